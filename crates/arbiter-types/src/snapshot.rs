//! Client-facing state views — the STATE_SYNC payload.
//!
//! The projection from `EncounterState` lives in the engine; these are the
//! wire shapes. Entity snapshots carry merged channeling state and always
//! have concrete AP/energy pools (never null on the wire).

use serde::{Deserialize, Serialize};

use crate::enums::Phase;
use crate::ids::{CampaignId, CombatId, EntityId};
use crate::state::{ChannelingState, Entity, GridConfig, InitiativeEntry, MapConfig};

/// An entity as clients see it: the entity row plus any active channeling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channeling: Option<ChannelingState>,
}

/// One grid occupancy row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRow {
    pub entity_id: EntityId,
    pub row: u32,
    pub col: u32,
}

/// The full denormalized snapshot broadcast in STATE_SYNC envelopes.
///
/// `phase` is the client-facing phase: the internal `active-turn` refinement
/// is reported as `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub combat_id: CombatId,
    pub campaign_id: CampaignId,
    pub phase: Phase,
    pub round: u32,
    pub current_turn_index: i32,
    pub current_entity_id: Option<EntityId>,
    pub entities: Vec<EntitySnapshot>,
    pub initiative: Vec<InitiativeEntry>,
    pub grid_positions: Vec<PositionRow>,
    pub grid_config: GridConfig,
    pub map_config: MapConfig,
    pub version: u64,
}
