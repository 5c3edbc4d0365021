//! Inbound wire protocol — `{type, payload, requestId?}` JSON objects.
//!
//! Parsing is two-stage: the envelope first (so a malformed body yields
//! `ERROR` while an unknown `type` yields `ACTION_REJECTED`), then the typed
//! payload for the matched kind. The kind set is a flat dispatch table —
//! no handler objects, no inheritance.

use serde::Deserialize;
use serde_json::Value;

use crate::enums::Phase;
use crate::ids::{ContestId, EntityId, PlayerId};
use crate::state::{Entity, GridPosition};

// =============================================================================
// Envelope
// =============================================================================

/// Raw inbound envelope, before the payload is typed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInbound {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCombatPayload {
    /// When present, the encounter tables are reset and reseeded.
    #[serde(default)]
    pub entities: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInitiativeRollPayload {
    pub entity_id: EntityId,
    pub roll: i64,
    #[serde(default)]
    pub skill_value: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyActionPayload {
    pub entity_id: EntityId,
    pub trigger: String,
    pub action_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareMovementPayload {
    pub entity_id: EntityId,
    pub target_row: u32,
    pub target_col: u32,
    #[serde(default)]
    pub path: Option<Vec<GridPosition>>,
}

fn default_cost_one() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareAttackPayload {
    pub attacker_id: EntityId,
    pub target_id: EntityId,
    pub damage_type: String,
    pub base_damage: i64,
    #[serde(default = "default_cost_one")]
    pub ap_cost: i64,
    #[serde(default = "default_cost_one")]
    pub energy_cost: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareAbilityPayload {
    pub entity_id: EntityId,
    pub ability_name: String,
    #[serde(default = "default_cost_one")]
    pub ap_cost: i64,
    #[serde(default)]
    pub energy_cost: i64,
    #[serde(default)]
    pub effects: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareReactionPayload {
    pub entity_id: EntityId,
    #[serde(default)]
    pub reaction_name: Option<String>,
    #[serde(default = "default_cost_one")]
    pub ap_cost: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChannelingPayload {
    pub entity_id: EntityId,
    pub spell_name: String,
    pub total_cost: i64,
    pub damage_type: String,
    pub intensity: i64,
    #[serde(default)]
    pub initial_energy: i64,
    #[serde(default)]
    pub initial_ap: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueChannelingPayload {
    pub entity_id: EntityId,
    #[serde(default)]
    pub additional_energy: i64,
    #[serde(default)]
    pub additional_ap: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpellPayload {
    pub entity_id: EntityId,
    #[serde(default)]
    pub target_id: Option<EntityId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortChannelingPayload {
    pub entity_id: EntityId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollOutcomePayload {
    pub entity_id: EntityId,
    #[serde(default)]
    pub roll_total: i64,
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmOverridePayload {
    #[serde(default)]
    pub override_type: Option<String>,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub updates: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmMoveEntityPayload {
    pub entity_id: EntityId,
    pub target_row: u32,
    pub target_col: u32,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub ignore_ap_cost: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmApplyDamagePayload {
    pub entity_id: EntityId,
    /// Positive damages, negative heals.
    pub damage: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmModifyResourcesPayload {
    pub entity_id: EntityId,
    /// Delta applied to both `current` and `max`.
    #[serde(default)]
    pub ap: Option<i64>,
    #[serde(default)]
    pub energy: Option<i64>,
}

/// Entity arrives as loose JSON so a missing `controller` can be resolved
/// through the membership API before typed ingest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmAddEntityPayload {
    pub entity: Value,
    #[serde(default)]
    pub initiative_roll: Option<i64>,
    #[serde(default)]
    pub initiative_tiebreaker: Option<i64>,
    /// `"immediate"` splices the entity in after the current turn.
    #[serde(default)]
    pub initiative_timing: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmRemoveEntityPayload {
    pub entity_id: EntityId,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfigPatch {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_key: Option<String>,
    #[serde(default)]
    pub image_width: Option<f64>,
    #[serde(default)]
    pub image_height: Option<f64>,
    #[serde(default)]
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfigPatch {
    #[serde(default)]
    pub rows: Option<u32>,
    #[serde(default)]
    pub cols: Option<u32>,
    #[serde(default)]
    pub cell_size: Option<f64>,
    #[serde(default)]
    pub offset_x: Option<f64>,
    #[serde(default)]
    pub offset_y: Option<f64>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub opacity: Option<f64>,
}

fn default_dice_count() -> u32 {
    1
}

fn default_keep_highest() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateContestPayload {
    pub initiator_entity_id: EntityId,
    #[serde(default)]
    pub target_entity_id: Option<EntityId>,
    #[serde(default)]
    pub target_player_id: Option<PlayerId>,
    pub skill: String,
    #[serde(default)]
    pub skill_modifier: i64,
    #[serde(default = "default_dice_count")]
    pub dice_count: u32,
    #[serde(default = "default_keep_highest")]
    pub keep_highest: bool,
    /// Client-rolled pool; trusted when present.
    #[serde(default)]
    pub raw_rolls: Option<Vec<i64>>,
    #[serde(default)]
    pub selected_roll: Option<i64>,
    // Attack-contest fields.
    #[serde(default)]
    pub base_damage: Option<i64>,
    #[serde(default)]
    pub damage_type: Option<String>,
    #[serde(default)]
    pub physical_attribute: Option<i64>,
    #[serde(default)]
    pub ap_cost: Option<i64>,
    #[serde(default)]
    pub energy_cost: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondContestPayload {
    pub contest_id: ContestId,
    pub entity_id: EntityId,
    pub skill: String,
    #[serde(default)]
    pub skill_modifier: i64,
    #[serde(default = "default_dice_count")]
    pub dice_count: u32,
    #[serde(default = "default_keep_highest")]
    pub keep_highest: bool,
    #[serde(default)]
    pub raw_rolls: Option<Vec<i64>>,
    #[serde(default)]
    pub selected_roll: Option<i64>,
}

// =============================================================================
// Typed inbound messages
// =============================================================================

/// A fully parsed inbound message — the router's dispatch variant.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    StartCombat(StartCombatPayload),
    EndCombat,
    RequestState,
    SubmitInitiativeRoll(SubmitInitiativeRollPayload),
    EndTurn,
    DelayTurn,
    ReadyAction(ReadyActionPayload),
    DeclareMovement(DeclareMovementPayload),
    DeclareAttack(DeclareAttackPayload),
    DeclareAbility(DeclareAbilityPayload),
    DeclareReaction(DeclareReactionPayload),
    StartChanneling(StartChannelingPayload),
    ContinueChanneling(ContinueChannelingPayload),
    ReleaseSpell(ReleaseSpellPayload),
    AbortChanneling(AbortChannelingPayload),
    SubmitEndureRoll(RollOutcomePayload),
    SubmitDeathCheck(RollOutcomePayload),
    GmOverride(GmOverridePayload),
    GmMoveEntity(GmMoveEntityPayload),
    GmApplyDamage(GmApplyDamagePayload),
    GmModifyResources(GmModifyResourcesPayload),
    GmAddEntity(GmAddEntityPayload),
    GmRemoveEntity(GmRemoveEntityPayload),
    UpdateMapConfig(MapConfigPatch),
    UpdateGridConfig(GridConfigPatch),
    InitiateSkillContest(InitiateContestPayload),
    InitiateAttackContest(InitiateContestPayload),
    RespondSkillContest(RespondContestPayload),
}

/// Why an inbound envelope failed to become a typed message.
#[derive(Debug)]
pub enum ParseError {
    /// `type` is not in the dispatch table → `ACTION_REJECTED`.
    UnknownType(String),
    /// Payload did not match the kind's schema → `ERROR`.
    Payload(serde_json::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnknownType(t) => write!(f, "Unknown message type: {t}"),
            ParseError::Payload(e) => write!(f, "Invalid payload: {e}"),
        }
    }
}

impl InboundMessage {
    /// Type the payload for a known kind.
    pub fn parse(kind: &str, payload: Value) -> Result<Self, ParseError> {
        // Struct payloads don't deserialize from a bare null.
        let payload = if payload.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            payload
        };

        fn typed<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ParseError> {
            serde_json::from_value(payload).map_err(ParseError::Payload)
        }

        Ok(match kind {
            "START_COMBAT" => Self::StartCombat(typed(payload)?),
            "END_COMBAT" => Self::EndCombat,
            "REQUEST_STATE" => Self::RequestState,
            "SUBMIT_INITIATIVE_ROLL" => Self::SubmitInitiativeRoll(typed(payload)?),
            "END_TURN" => Self::EndTurn,
            "DELAY_TURN" => Self::DelayTurn,
            "READY_ACTION" => Self::ReadyAction(typed(payload)?),
            "DECLARE_MOVEMENT" => Self::DeclareMovement(typed(payload)?),
            "DECLARE_ATTACK" => Self::DeclareAttack(typed(payload)?),
            "DECLARE_ABILITY" => Self::DeclareAbility(typed(payload)?),
            "DECLARE_REACTION" => Self::DeclareReaction(typed(payload)?),
            "START_CHANNELING" => Self::StartChanneling(typed(payload)?),
            "CONTINUE_CHANNELING" => Self::ContinueChanneling(typed(payload)?),
            "RELEASE_SPELL" => Self::ReleaseSpell(typed(payload)?),
            "ABORT_CHANNELING" => Self::AbortChanneling(typed(payload)?),
            "SUBMIT_ENDURE_ROLL" => Self::SubmitEndureRoll(typed(payload)?),
            "SUBMIT_DEATH_CHECK" => Self::SubmitDeathCheck(typed(payload)?),
            "GM_OVERRIDE" => Self::GmOverride(typed(payload)?),
            "GM_MOVE_ENTITY" => Self::GmMoveEntity(typed(payload)?),
            "GM_APPLY_DAMAGE" => Self::GmApplyDamage(typed(payload)?),
            "GM_MODIFY_RESOURCES" => Self::GmModifyResources(typed(payload)?),
            "GM_ADD_ENTITY" => Self::GmAddEntity(typed(payload)?),
            "GM_REMOVE_ENTITY" => Self::GmRemoveEntity(typed(payload)?),
            "UPDATE_MAP_CONFIG" => Self::UpdateMapConfig(typed(payload)?),
            "UPDATE_GRID_CONFIG" => Self::UpdateGridConfig(typed(payload)?),
            "INITIATE_SKILL_CONTEST" => Self::InitiateSkillContest(typed(payload)?),
            "INITIATE_ATTACK_CONTEST" => Self::InitiateAttackContest(typed(payload)?),
            "RESPOND_SKILL_CONTEST" => Self::RespondSkillContest(typed(payload)?),
            other => return Err(ParseError::UnknownType(other.to_string())),
        })
    }

    /// Wire string for this kind (logging, combat log rows).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartCombat(_) => "START_COMBAT",
            Self::EndCombat => "END_COMBAT",
            Self::RequestState => "REQUEST_STATE",
            Self::SubmitInitiativeRoll(_) => "SUBMIT_INITIATIVE_ROLL",
            Self::EndTurn => "END_TURN",
            Self::DelayTurn => "DELAY_TURN",
            Self::ReadyAction(_) => "READY_ACTION",
            Self::DeclareMovement(_) => "DECLARE_MOVEMENT",
            Self::DeclareAttack(_) => "DECLARE_ATTACK",
            Self::DeclareAbility(_) => "DECLARE_ABILITY",
            Self::DeclareReaction(_) => "DECLARE_REACTION",
            Self::StartChanneling(_) => "START_CHANNELING",
            Self::ContinueChanneling(_) => "CONTINUE_CHANNELING",
            Self::ReleaseSpell(_) => "RELEASE_SPELL",
            Self::AbortChanneling(_) => "ABORT_CHANNELING",
            Self::SubmitEndureRoll(_) => "SUBMIT_ENDURE_ROLL",
            Self::SubmitDeathCheck(_) => "SUBMIT_DEATH_CHECK",
            Self::GmOverride(_) => "GM_OVERRIDE",
            Self::GmMoveEntity(_) => "GM_MOVE_ENTITY",
            Self::GmApplyDamage(_) => "GM_APPLY_DAMAGE",
            Self::GmModifyResources(_) => "GM_MODIFY_RESOURCES",
            Self::GmAddEntity(_) => "GM_ADD_ENTITY",
            Self::GmRemoveEntity(_) => "GM_REMOVE_ENTITY",
            Self::UpdateMapConfig(_) => "UPDATE_MAP_CONFIG",
            Self::UpdateGridConfig(_) => "UPDATE_GRID_CONFIG",
            Self::InitiateSkillContest(_) => "INITIATE_SKILL_CONTEST",
            Self::InitiateAttackContest(_) => "INITIATE_ATTACK_CONTEST",
            Self::RespondSkillContest(_) => "RESPOND_SKILL_CONTEST",
        }
    }

    /// GM-gated kinds: `GM_*`, config updates, and combat lifecycle.
    pub fn gm_only(&self) -> bool {
        matches!(
            self,
            Self::StartCombat(_)
                | Self::EndCombat
                | Self::GmOverride(_)
                | Self::GmMoveEntity(_)
                | Self::GmApplyDamage(_)
                | Self::GmModifyResources(_)
                | Self::GmAddEntity(_)
                | Self::GmRemoveEntity(_)
                | Self::UpdateMapConfig(_)
                | Self::UpdateGridConfig(_)
        )
    }
}
