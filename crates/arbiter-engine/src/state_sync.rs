//! State projection — `EncounterState` to client-facing snapshots.
//!
//! The internal `active-turn` phase refinement is folded to `active` here;
//! entity snapshots get any live channeling state merged in.

use arbiter_types::enums::Phase;
use arbiter_types::ids::EntityId;
use arbiter_types::snapshot::{EntitySnapshot, PositionRow, StateSnapshot};
use arbiter_types::state::EncounterState;

/// The phase as clients see it.
pub fn client_phase(phase: Phase) -> Phase {
    match phase {
        Phase::ActiveTurn => Phase::Active,
        other => other,
    }
}

/// Snapshot one entity with merged channeling state.
pub fn entity_snapshot(state: &EncounterState, id: &EntityId) -> Option<EntitySnapshot> {
    let entity = state.entity(id)?;
    Some(EntitySnapshot {
        entity: entity.clone(),
        channeling: state.channeling.get(id).cloned(),
    })
}

/// Snapshot every entity, ordered by id.
pub fn all_entity_snapshots(state: &EncounterState) -> Vec<EntitySnapshot> {
    state
        .entities
        .keys()
        .filter_map(|id| entity_snapshot(state, id))
        .collect()
}

/// One entity as a loose `ENTITY_UPDATED` payload.
pub fn entity_updated_value(state: &EncounterState, id: &EntityId) -> serde_json::Value {
    match entity_snapshot(state, id) {
        Some(snapshot) => serde_json::to_value(snapshot).unwrap_or_default(),
        None => serde_json::json!({ "entityId": id }),
    }
}

/// Build the full denormalized STATE_SYNC snapshot.
pub fn project(state: &EncounterState) -> StateSnapshot {
    StateSnapshot {
        combat_id: state.combat_id.clone(),
        campaign_id: state.campaign_id.clone(),
        phase: client_phase(state.phase),
        round: state.round,
        current_turn_index: state.turn_index,
        current_entity_id: state.active_entity_id.clone(),
        entities: all_entity_snapshots(state),
        initiative: state.initiative.clone(),
        grid_positions: state
            .positions
            .iter()
            .map(|(id, p)| PositionRow { entity_id: id.clone(), row: p.row, col: p.col })
            .collect(),
        grid_config: state.grid_config.clone(),
        map_config: state.map_config.clone(),
        version: state.version,
    }
}

/// Derive the controlled-entity set for a connection: owned entities when a
/// player id is known, otherwise the declared list as-is.
pub fn controlled_entities(
    state: &EncounterState,
    player_id: Option<&arbiter_types::ids::PlayerId>,
    declared: &[EntityId],
) -> Vec<EntityId> {
    match player_id {
        Some(pid) => state
            .entities
            .values()
            .filter(|e| matches!(&e.controller, arbiter_types::ids::Controller::Player(owner) if owner == pid))
            .map(|e| e.id.clone())
            .collect(),
        None => declared.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::ids::{CampaignId, CombatId, PlayerId};
    use arbiter_types::state::{ChannelingState, Entity};

    fn state_with(entities: &[(&str, &str)]) -> EncounterState {
        let mut state = EncounterState::new(CombatId::from("c1"), CampaignId::from("k1"));
        for (id, controller) in entities {
            let e: Entity = serde_json::from_value(
                serde_json::json!({ "id": id, "controller": controller }),
            )
            .unwrap();
            state.entities.insert(e.id.clone(), e);
        }
        state
    }

    #[test]
    fn active_turn_reports_as_active() {
        let mut state = state_with(&[("e1", "gm")]);
        state.phase = Phase::ActiveTurn;
        assert_eq!(project(&state).phase, Phase::Active);
        state.phase = Phase::Initiative;
        assert_eq!(project(&state).phase, Phase::Initiative);
    }

    #[test]
    fn snapshot_merges_channeling() {
        let mut state = state_with(&[("e1", "gm")]);
        state.channeling.insert(
            EntityId::from("e1"),
            ChannelingState {
                spell_name: "emberlance".into(),
                damage_type: "fire".into(),
                intensity: 2,
                total_cost: 30,
                energy_channeled: 10,
                ap_channeled: 2,
                turns_channeled: 1,
                started_at: "t".into(),
            },
        );
        let snap = project(&state);
        assert_eq!(snap.entities.len(), 1);
        assert!(snap.entities[0].channeling.is_some());
    }

    #[test]
    fn controlled_set_prefers_ownership_scan() {
        let state = state_with(&[("e1", "player:u1"), ("e2", "player:u2"), ("e3", "gm")]);
        let owned = controlled_entities(&state, Some(&PlayerId::from("u1")), &[]);
        assert_eq!(owned, vec![EntityId::from("e1")]);

        let declared = [EntityId::from("e3")];
        let fallback = controlled_entities(&state, None, &declared);
        assert_eq!(fallback, vec![EntityId::from("e3")]);
    }
}
