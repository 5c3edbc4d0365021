//! Outbound wire protocol — `{type, payload, timestamp, requestId?}` events.
//!
//! `EventBody` is adjacently tagged so the serialized form matches the wire
//! envelope; the session wraps it in an `Envelope` with a monotonic
//! timestamp. `Outbound` pairs a body with its delivery audience and never
//! crosses the wire itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::{CriticalTier, DamageModifier};
use crate::ids::{CampaignId, CombatId, ContestId, EntityId, PlayerId};
use crate::snapshot::{EntitySnapshot, StateSnapshot};
use crate::state::{
    GridConfig, GridPosition, InitiativeEntry, MapConfig, ResourcePool, SkillContest,
};

// =============================================================================
// Contest outcome payloads
// =============================================================================

/// Resolved attack contest: the contest row plus the damage envelope.
/// Damage fields are absent on a miss (defender won or tie).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackContestOutcome {
    #[serde(flatten)]
    pub contest: SkillContest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_type: Option<CriticalTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_mod_damage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_damage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifier: Option<DamageModifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wounds_dealt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_energy: Option<ResourcePool>,
}

// =============================================================================
// Event bodies
// =============================================================================

/// Every event the authority can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum EventBody {
    StateSync {
        state: StateSnapshot,
        your_controlled_entities: Vec<EntityId>,
    },
    CombatStarted {
        combat_id: CombatId,
        campaign_id: CampaignId,
        round: u32,
        entities: Vec<EntitySnapshot>,
    },
    CombatEnded {
        round: u32,
        entities: Vec<EntitySnapshot>,
    },
    RoundStarted {
        round: u32,
        initiative: Vec<InitiativeEntry>,
    },
    TurnStarted {
        entity_id: EntityId,
        turn_index: i32,
        round: u32,
    },
    TurnEnded {
        entity_id: EntityId,
        energy_gained: i64,
        delayed: bool,
    },
    InitiativeUpdated {
        order: Vec<InitiativeEntry>,
        all_rolled: bool,
    },
    MovementExecuted {
        entity_id: EntityId,
        from: GridPosition,
        to: GridPosition,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<Vec<GridPosition>>,
        distance: u32,
        ap_cost: i64,
        remaining_ap: i64,
    },
    AttackResolved {
        attacker_id: EntityId,
        target_id: EntityId,
        damage_type: String,
        base_damage: i64,
        final_damage: i64,
        modifier: DamageModifier,
        wounds_dealt: u32,
        target_energy: ResourcePool,
    },
    AbilityResolved {
        entity_id: EntityId,
        ability_name: String,
        ap_cost: i64,
        energy_cost: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        effects: Option<Value>,
    },
    ReactionResolved {
        entity_id: EntityId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reaction_name: Option<String>,
        ap_cost: i64,
    },
    ChannelingStarted {
        entity_id: EntityId,
        spell_name: String,
        damage_type: String,
        intensity: i64,
        total_cost: i64,
        energy_channeled: i64,
        ap_channeled: i64,
        progress: f64,
    },
    ChannelingContinued {
        entity_id: EntityId,
        energy_channeled: i64,
        ap_channeled: i64,
        turns_channeled: u32,
        progress: f64,
        is_ready: bool,
    },
    ChannelingReleased {
        entity_id: EntityId,
        spell_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_id: Option<EntityId>,
        damage_type: String,
        spell_damage: i64,
        final_damage: i64,
        wounds_dealt: u32,
        turns_channeled: u32,
    },
    ChannelingInterrupted {
        entity_id: EntityId,
        spell_name: String,
        voluntary: bool,
        energy_forfeited: i64,
        ap_forfeited: i64,
    },
    BlowbackApplied {
        entity_id: EntityId,
        damage: i64,
        damage_type: String,
    },
    DamageApplied {
        entity_id: EntityId,
        damage: i64,
        energy: ResourcePool,
    },
    WoundsInflicted {
        entity_id: EntityId,
        damage_type: String,
        wounds_added: u32,
        total_wounds: u32,
    },
    HealingApplied {
        entity_id: EntityId,
        healing: i64,
        energy: ResourcePool,
    },
    EndureRollRequired {
        entity_id: EntityId,
        triggering_damage: i64,
    },
    DeathCheckRequired {
        entity_id: EntityId,
        triggering_damage: i64,
    },
    EntityUnconscious {
        entity_id: EntityId,
    },
    EntityDied {
        entity_id: EntityId,
    },
    /// Heterogeneous by design: entity snapshots, connection notices,
    /// readied-action descriptors, endure results.
    EntityUpdated(Value),
    GmOverrideApplied(Value),
    ActionRejected {
        reason: String,
    },
    Error {
        message: String,
    },
    MapConfigUpdated(MapConfig),
    GridConfigUpdated(GridConfig),
    SkillContestInitiated(SkillContest),
    SkillContestResponseRequested {
        contest_id: ContestId,
        initiator_entity_id: EntityId,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_entity_id: Option<EntityId>,
        skill: String,
    },
    SkillContestResolved(SkillContest),
    AttackContestInitiated(SkillContest),
    AttackContestResolved(AttackContestOutcome),
}

// =============================================================================
// Envelope
// =============================================================================

/// The serialized outbound frame: `{type, payload, timestamp, requestId?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub body: EventBody,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

// =============================================================================
// Delivery routing
// =============================================================================

/// Who receives an event. Internal to the session; never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connection on the session.
    All,
    /// Only the connection whose message produced this event.
    Origin,
    /// Every connection of one player.
    Player(PlayerId),
    /// Every GM connection.
    Gms,
}

/// An event body paired with its audience.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub body: EventBody,
}

impl Outbound {
    pub fn all(body: EventBody) -> Self {
        Self { audience: Audience::All, body }
    }

    pub fn origin(body: EventBody) -> Self {
        Self { audience: Audience::Origin, body }
    }

    pub fn player(player_id: PlayerId, body: EventBody) -> Self {
        Self { audience: Audience::Player(player_id), body }
    }

    pub fn gms(body: EventBody) -> Self {
        Self { audience: Audience::Gms, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let envelope = Envelope {
            body: EventBody::ActionRejected { reason: "Insufficient AP".into() },
            timestamp: "2026-01-01T12:00:00.000Z".into(),
            request_id: Some("req-9".into()),
        };
        let v = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "ACTION_REJECTED",
                "payload": { "reason": "Insufficient AP" },
                "timestamp": "2026-01-01T12:00:00.000Z",
                "requestId": "req-9"
            })
        );
    }

    #[test]
    fn request_id_is_omitted_when_absent() {
        let envelope = Envelope {
            body: EventBody::EntityDied { entity_id: EntityId::from("e1") },
            timestamp: "2026-01-01T12:00:00.000Z".into(),
            request_id: None,
        };
        let v = serde_json::to_value(&envelope).unwrap();
        assert!(v.get("requestId").is_none());
        assert_eq!(v["type"], "ENTITY_DIED");
        assert_eq!(v["payload"]["entityId"], "e1");
    }

    #[test]
    fn event_fields_are_camel_case() {
        let body = EventBody::TurnEnded {
            entity_id: EntityId::from("e1"),
            energy_gained: 18,
            delayed: false,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["payload"]["entityId"], "e1");
        assert_eq!(v["payload"]["energyGained"], 18);
    }
}
