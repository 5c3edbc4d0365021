//! Encounter state structures — the authoritative per-session data model.
//!
//! The session owns one `EncounterState`; entities, initiative, positions and
//! channeling form a coherent cluster of parallel tables keyed by entity id
//! (no object graph, no shared ownership). All wire-visible structs pin
//! camelCase field names.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::enums::{ContestKind, ContestStatus, EntityType, Faction, Phase, Tier};
use crate::ids::{CampaignId, CharacterId, CombatId, ContestId, Controller, EntityId, PlayerId};

// =============================================================================
// Resource pools
// =============================================================================

/// A `{current, max}` resource pair (AP or energy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub current: i64,
    pub max: i64,
}

impl ResourcePool {
    pub fn new(current: i64, max: i64) -> Self {
        Self { current, max }
    }

    pub fn full(max: i64) -> Self {
        Self { current: max, max }
    }

    /// Subtract, flooring at 0.
    pub fn drain(&mut self, amount: i64) {
        self.current = (self.current - amount).max(0);
    }

    /// Add, capping at max.
    pub fn gain(&mut self, amount: i64) {
        self.current = (self.current + amount).min(self.max);
    }
}

/// Default AP pool for entities that arrive without one.
pub fn default_ap() -> ResourcePool {
    ResourcePool::full(6)
}

/// Default energy pool for entities that arrive without one.
pub fn default_energy() -> ResourcePool {
    ResourcePool::full(100)
}

// =============================================================================
// Entity
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_level() -> u32 {
    1
}

fn default_tier() -> Tier {
    Tier::Full
}

fn default_faction() -> Faction {
    Faction::Neutral
}

fn default_entity_type() -> EntityType {
    EntityType::Npc
}

fn default_controller() -> Controller {
    Controller::Gm
}

/// A combatant. Resolved entity snapshots arrive from authoring tooling with
/// loose shapes, so ingest is liberal: missing pools, wounds and attribute
/// maps default rather than failing the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default = "default_faction")]
    pub faction: Faction,
    #[serde(default = "default_controller")]
    pub controller: Controller,
    #[serde(default = "default_entity_type")]
    pub entity_type: EntityType,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default = "default_ap")]
    pub ap: ResourcePool,
    #[serde(default = "default_energy")]
    pub energy: ResourcePool,
    /// Damage-type → accumulated wound count.
    #[serde(default)]
    pub wounds: BTreeMap<String, u32>,
    #[serde(default)]
    pub immunities: BTreeSet<String>,
    #[serde(default)]
    pub resistances: BTreeSet<String>,
    #[serde(default)]
    pub weaknesses: BTreeSet<String>,
    #[serde(default = "default_true")]
    pub alive: bool,
    #[serde(default)]
    pub unconscious: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<CharacterId>,
    /// Resolved attribute values (e.g. `"physical"`), consumed by movement
    /// and left open-ended for ruleset content.
    #[serde(default)]
    pub attributes: BTreeMap<String, i64>,
    #[serde(default)]
    pub stamina_potion_bonus: u32,
}

impl Entity {
    /// Numeric level tier: `ceil(level / 5)`, scales AP→energy conversion.
    pub fn level_tier(&self) -> i64 {
        (i64::from(self.level) + 4) / 5
    }

    pub fn physical_attribute(&self) -> i64 {
        self.attributes.get("physical").copied().unwrap_or(0)
    }

    pub fn total_wounds(&self, damage_type: &str) -> u32 {
        self.wounds.get(damage_type).copied().unwrap_or(0)
    }

    pub fn add_wounds(&mut self, damage_type: &str, count: u32) -> u32 {
        let entry = self.wounds.entry(damage_type.to_string()).or_insert(0);
        *entry += count;
        *entry
    }
}

// =============================================================================
// Initiative
// =============================================================================

/// One initiative row per participating entity, ordered by dense `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiativeEntry {
    pub entity_id: EntityId,
    pub roll: i64,
    /// Primary tiebreaker.
    pub skill_value: i64,
    /// Secondary tiebreaker, captured at roll time.
    pub current_energy: i64,
    pub position: u32,
}

// =============================================================================
// Grid & map
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPosition {
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    pub rows: u32,
    pub cols: u32,
    pub cell_size: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub visible: bool,
    pub opacity: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 20,
            cols: 20,
            cell_size: 50.0,
            offset_x: 0.0,
            offset_y: 0.0,
            visible: true,
            opacity: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub image_url: Option<String>,
    pub image_key: Option<String>,
    pub image_width: Option<f64>,
    pub image_height: Option<f64>,
    pub template_id: Option<String>,
}

// =============================================================================
// Channeling
// =============================================================================

/// Multi-turn spell charge, keyed by the channeling entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelingState {
    pub spell_name: String,
    pub damage_type: String,
    pub intensity: i64,
    pub total_cost: i64,
    pub energy_channeled: i64,
    pub ap_channeled: i64,
    pub turns_channeled: u32,
    pub started_at: String,
}

impl ChannelingState {
    /// Ready to release iff BOTH accumulators reached the total cost.
    pub fn is_ready(&self) -> bool {
        self.energy_channeled >= self.total_cost && self.ap_channeled >= self.total_cost
    }

    /// Charge progress in [0, 1], limited by the slower accumulator.
    pub fn progress(&self) -> f64 {
        if self.total_cost <= 0 {
            return 1.0;
        }
        let slower = self.energy_channeled.min(self.ap_channeled);
        (slower as f64 / self.total_cost as f64).min(1.0)
    }
}

// =============================================================================
// Pending (readied) actions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: String,
    pub entity_id: EntityId,
    pub trigger: String,
    pub action_type: String,
    pub created_at: String,
}

// =============================================================================
// Contests
// =============================================================================

/// One side of a contest: dice pool, selection, modifier, total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestSide {
    pub entity_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    pub skill: String,
    pub dice_count: u32,
    pub keep_highest: bool,
    pub raw_rolls: Vec<i64>,
    pub selected_roll: i64,
    pub skill_modifier: i64,
    pub total: i64,
}

/// Damage parameters carried only by attack contests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackParams {
    pub base_damage: i64,
    pub damage_type: String,
    pub physical_attribute: i64,
    pub ap_cost: i64,
    pub energy_cost: i64,
}

/// A two-phase contested roll. Created `awaiting_response`, resolved when the
/// defender responds. `winner` of `None` on a resolved contest means a tie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillContest {
    pub id: ContestId,
    pub contest_type: ContestKind,
    pub initiator: ContestSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defender: Option<ContestSide>,
    pub status: ContestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_entity_id: Option<EntityId>,
    pub margin: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_entity_id: Option<EntityId>,
    #[serde(flatten)]
    pub attack: Option<AttackParams>,
    pub created_at: String,
}

// =============================================================================
// Combat log
// =============================================================================

/// Append-only log row (persisted, served by the debug snapshot endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub created_at: String,
}

// =============================================================================
// Encounter state
// =============================================================================

/// The full authoritative state of one combat encounter.
///
/// Owned exclusively by the session actor; every mutating handler completion
/// bumps `version` exactly once.
#[derive(Debug, Clone)]
pub struct EncounterState {
    pub combat_id: CombatId,
    pub campaign_id: CampaignId,
    pub phase: Phase,
    pub round: u32,
    /// -1 when no turn is active.
    pub turn_index: i32,
    pub active_entity_id: Option<EntityId>,
    pub version: u64,
    pub started_at: Option<String>,
    pub last_updated_at: Option<String>,
    pub entities: BTreeMap<EntityId, Entity>,
    /// Kept sorted by `position`, dense 0..N-1.
    pub initiative: Vec<InitiativeEntry>,
    pub positions: BTreeMap<EntityId, GridPosition>,
    pub grid_config: GridConfig,
    pub map_config: MapConfig,
    pub channeling: BTreeMap<EntityId, ChannelingState>,
    pub contests: BTreeMap<ContestId, SkillContest>,
    pub pending_actions: BTreeMap<String, PendingAction>,
}

impl EncounterState {
    pub fn new(combat_id: CombatId, campaign_id: CampaignId) -> Self {
        Self {
            combat_id,
            campaign_id,
            phase: Phase::Setup,
            round: 0,
            turn_index: -1,
            active_entity_id: None,
            version: 0,
            started_at: None,
            last_updated_at: None,
            entities: BTreeMap::new(),
            initiative: Vec::new(),
            positions: BTreeMap::new(),
            grid_config: GridConfig::default(),
            map_config: MapConfig::default(),
            channeling: BTreeMap::new(),
            contests: BTreeMap::new(),
            pending_actions: BTreeMap::new(),
        }
    }

    /// Bump the version counter and stamp the update time. Called once per
    /// state-mutating handler completion, never on failed paths.
    pub fn touch(&mut self, now: &str) {
        self.version += 1;
        self.last_updated_at = Some(now.to_string());
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn initiative_entry(&self, id: &EntityId) -> Option<&InitiativeEntry> {
        self.initiative.iter().find(|e| &e.entity_id == id)
    }

    pub fn initiative_entry_mut(&mut self, id: &EntityId) -> Option<&mut InitiativeEntry> {
        self.initiative.iter_mut().find(|e| &e.entity_id == id)
    }

    /// Rewrite positions dense 0..N-1 following the current vec order.
    pub fn renumber_initiative(&mut self) {
        for (i, entry) in self.initiative.iter_mut().enumerate() {
            entry.position = i as u32;
        }
    }

    /// Append an initiative row at the end of the order.
    pub fn append_initiative(&mut self, mut entry: InitiativeEntry) {
        entry.position = self.initiative.len() as u32;
        self.initiative.push(entry);
    }

    pub fn remove_initiative(&mut self, id: &EntityId) -> bool {
        let before = self.initiative.len();
        self.initiative.retain(|e| &e.entity_id != id);
        let removed = self.initiative.len() != before;
        if removed {
            self.renumber_initiative();
        }
        removed
    }

    /// True iff every registered entity has an initiative row.
    pub fn all_rolled(&self) -> bool {
        !self.entities.is_empty() && self.initiative.len() == self.entities.len()
    }

    /// The entity occupying `(row, col)`, if any.
    pub fn occupant(&self, row: u32, col: u32) -> Option<&EntityId> {
        self.positions
            .iter()
            .find(|(_, p)| p.row == row && p.col == col)
            .map(|(id, _)| id)
    }

    /// Clear every child table. Used by END_COMBAT and by a seeded restart.
    pub fn clear_encounter(&mut self) {
        self.entities.clear();
        self.initiative.clear();
        self.positions.clear();
        self.channeling.clear();
        self.contests.clear();
        self.pending_actions.clear();
        self.active_entity_id = None;
        self.turn_index = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str) -> Entity {
        serde_json::from_value(serde_json::json!({ "id": id })).unwrap()
    }

    #[test]
    fn entity_ingest_applies_defaults() {
        let e = entity("e1");
        assert_eq!(e.ap, ResourcePool::new(6, 6));
        assert_eq!(e.energy, ResourcePool::new(100, 100));
        assert!(e.alive);
        assert!(!e.unconscious);
        assert_eq!(e.level, 1);
        assert_eq!(e.controller, Controller::Gm);
        assert!(e.wounds.is_empty());
    }

    #[test]
    fn level_tier_is_ceil_of_level_over_five() {
        let mut e = entity("e1");
        for (level, tier) in [(1, 1), (5, 1), (6, 2), (10, 2), (11, 3)] {
            e.level = level;
            assert_eq!(e.level_tier(), tier, "level {level}");
        }
    }

    #[test]
    fn resource_pool_clamps() {
        let mut p = ResourcePool::new(3, 6);
        p.drain(10);
        assert_eq!(p.current, 0);
        p.gain(100);
        assert_eq!(p.current, 6);
    }

    #[test]
    fn channeling_readiness_needs_both_accumulators() {
        let mut c = ChannelingState {
            spell_name: "emberlance".into(),
            damage_type: "fire".into(),
            intensity: 2,
            total_cost: 30,
            energy_channeled: 30,
            ap_channeled: 6,
            turns_channeled: 3,
            started_at: "2026-01-01T00:00:00Z".into(),
        };
        assert!(!c.is_ready());
        assert_eq!(c.progress(), 0.2);
        c.ap_channeled = 30;
        assert!(c.is_ready());
        assert_eq!(c.progress(), 1.0);
    }

    #[test]
    fn initiative_renumber_is_dense() {
        let mut state = EncounterState::new(CombatId::from("c1"), CampaignId::from("k1"));
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            state.append_initiative(InitiativeEntry {
                entity_id: EntityId::from(*id),
                roll: 10 - i as i64,
                skill_value: 0,
                current_energy: 0,
                position: 0,
            });
        }
        state.remove_initiative(&EntityId::from("b"));
        let positions: Vec<u32> = state.initiative.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert_eq!(state.initiative[1].entity_id, EntityId::from("c"));
    }

    #[test]
    fn occupant_lookup() {
        let mut state = EncounterState::new(CombatId::from("c1"), CampaignId::from("k1"));
        state
            .positions
            .insert(EntityId::from("a"), GridPosition { row: 2, col: 3 });
        assert_eq!(state.occupant(2, 3), Some(&EntityId::from("a")));
        assert_eq!(state.occupant(3, 2), None);
    }
}
