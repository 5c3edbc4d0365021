//! GM tooling — roster edits, damage/resource overrides, phase override,
//! map & grid configuration.
//!
//! All of these arrive through GM-gated message kinds; control checks are
//! already satisfied by the router gate.

use arbiter_types::enums::Phase;
use arbiter_types::event::{EventBody, Outbound};
use arbiter_types::ids::EntityId;
use arbiter_types::message::{
    GmApplyDamagePayload, GmModifyResourcesPayload, GmOverridePayload, GmRemoveEntityPayload,
    GridConfigPatch, MapConfigPatch,
};
use arbiter_types::state::{EncounterState, Entity, InitiativeEntry};

use crate::dispatch::Outcome;
use crate::error::Reject;
use crate::initiative::fix_turn_cursor;
use crate::state_sync::entity_updated_value;

// =============================================================================
// Roster edits
// =============================================================================

/// Insert or replace an entity mid-encounter. The controller was already
/// resolved (membership lookup happens before dispatch). `initiativeTiming`
/// of `"immediate"` splices the entity in right after the current turn;
/// anything else appends to the end of the order.
pub fn add_entity(
    state: &mut EncounterState,
    entity: Entity,
    initiative_roll: Option<i64>,
    initiative_tiebreaker: Option<i64>,
    initiative_timing: Option<&str>,
) -> Result<Outcome, Reject> {
    // A completed encounter restarts from setup on the first roster edit.
    if state.phase == Phase::Completed {
        state.clear_encounter();
        state.phase = Phase::Setup;
    }

    let entity_id = entity.id.clone();
    let entry = InitiativeEntry {
        entity_id: entity_id.clone(),
        roll: initiative_roll.unwrap_or(0),
        skill_value: initiative_tiebreaker.unwrap_or(0),
        current_energy: entity.energy.current,
        position: 0,
    };
    state.entities.insert(entity_id.clone(), entity);

    state.initiative.retain(|e| e.entity_id != entity_id);
    if state.phase.is_active() && initiative_timing == Some("immediate") {
        let splice_at =
            ((state.turn_index + 1).max(0) as usize).min(state.initiative.len());
        state.initiative.insert(splice_at, entry);
    } else {
        state.initiative.push(entry);
    }
    state.renumber_initiative();
    // The splice can displace the row the cursor pointed at.
    fix_turn_cursor(state, None);

    Ok(Outcome::mutated(vec![
        Outbound::all(EventBody::EntityUpdated(entity_updated_value(state, &entity_id))),
        Outbound::all(EventBody::InitiativeUpdated {
            order: state.initiative.clone(),
            all_rolled: state.all_rolled(),
        }),
    ]))
}

pub fn remove_entity(
    state: &mut EncounterState,
    p: &GmRemoveEntityPayload,
) -> Result<Outcome, Reject> {
    if state.entities.remove(&p.entity_id).is_none() {
        return Err(Reject::not_found("Entity not found"));
    }
    let removed_pos = state.initiative_entry(&p.entity_id).map(|e| e.position);
    state.remove_initiative(&p.entity_id);
    state.positions.remove(&p.entity_id);
    state.channeling.remove(&p.entity_id);
    state.pending_actions.retain(|_, a| a.entity_id != p.entity_id);
    fix_turn_cursor(state, removed_pos);

    Ok(Outcome::mutated(vec![
        Outbound::all(EventBody::EntityUpdated(serde_json::json!({
            "entityId": p.entity_id,
            "removed": true,
        }))),
        Outbound::all(EventBody::InitiativeUpdated {
            order: state.initiative.clone(),
            all_rolled: state.all_rolled(),
        }),
    ]))
}

// =============================================================================
// Damage & resource overrides
// =============================================================================

/// Direct energy adjustment: positive damages (floored at 0), negative heals
/// (capped at max). No endure trigger — this is GM fiat, not an attack.
pub fn apply_damage(
    state: &mut EncounterState,
    p: &GmApplyDamagePayload,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity_mut(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;

    let mut events = Vec::new();
    if p.damage >= 0 {
        entity.energy.drain(p.damage);
        events.push(Outbound::all(EventBody::DamageApplied {
            entity_id: p.entity_id.clone(),
            damage: p.damage,
            energy: entity.energy,
        }));
    } else {
        entity.energy.gain(-p.damage);
        events.push(Outbound::all(EventBody::HealingApplied {
            entity_id: p.entity_id.clone(),
            healing: -p.damage,
            energy: entity.energy,
        }));
    }
    let energy = entity.energy;
    let wounds = entity.wounds.clone();
    events.push(Outbound::all(EventBody::EntityUpdated(serde_json::json!({
        "entityId": p.entity_id,
        "energy": energy,
        "wounds": wounds,
    }))));
    Ok(Outcome::mutated(events))
}

/// Deltas applied to BOTH `current` and `max`: max floors at 1, current
/// clamps to [0, max].
pub fn modify_resources(
    state: &mut EncounterState,
    p: &GmModifyResourcesPayload,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity_mut(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;

    if let Some(delta) = p.ap {
        entity.ap.max = (entity.ap.max + delta).max(1);
        entity.ap.current = (entity.ap.current + delta).clamp(0, entity.ap.max);
    }
    if let Some(delta) = p.energy {
        entity.energy.max = (entity.energy.max + delta).max(1);
        entity.energy.current = (entity.energy.current + delta).clamp(0, entity.energy.max);
    }
    let (ap, energy) = (entity.ap, entity.energy);

    Ok(Outcome::mutated(vec![Outbound::all(EventBody::EntityUpdated(
        serde_json::json!({ "entityId": p.entity_id, "ap": ap, "energy": energy }),
    ))]))
}

// =============================================================================
// Generic override
// =============================================================================

pub fn gm_override(
    state: &mut EncounterState,
    p: &GmOverridePayload,
) -> Result<Outcome, Reject> {
    if p.override_type.as_deref() == Some("set_phase") {
        let phase = p.phase.ok_or_else(|| Reject::failed("Missing phase"))?;
        state.phase = phase;
        return Ok(Outcome::mutated(vec![Outbound::all(EventBody::GmOverrideApplied(
            serde_json::json!({ "overrideType": "set_phase", "phase": phase }),
        ))]));
    }

    let (entity_id, updates) = match (&p.entity_id, &p.updates) {
        (Some(id), Some(updates)) => (id, updates),
        _ => return Err(Reject::failed("Invalid override")),
    };
    merge_entity_updates(state, entity_id, updates)?;

    Ok(Outcome::mutated(vec![
        Outbound::all(EventBody::GmOverrideApplied(serde_json::json!({
            "entityId": entity_id,
            "updates": updates,
        }))),
        Outbound::all(EventBody::EntityUpdated(entity_updated_value(state, entity_id))),
    ]))
}

/// Shallow-merge a JSON object into an entity row.
fn merge_entity_updates(
    state: &mut EncounterState,
    entity_id: &EntityId,
    updates: &serde_json::Value,
) -> Result<(), Reject> {
    let entity = state
        .entity(entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    let patch = updates
        .as_object()
        .ok_or_else(|| Reject::failed("Invalid override"))?;

    let mut value = serde_json::to_value(entity)
        .map_err(|_| Reject::failed("Invalid override"))?;
    let object = value.as_object_mut().expect("entities serialize to objects");
    for (key, patch_value) in patch {
        object.insert(key.clone(), patch_value.clone());
    }

    let merged: Entity = serde_json::from_value(value)
        .map_err(|_| Reject::failed("Invalid entity updates"))?;
    state.entities.insert(entity_id.clone(), merged);
    Ok(())
}

// =============================================================================
// Map & grid configuration
// =============================================================================

pub fn update_map_config(
    state: &mut EncounterState,
    patch: &MapConfigPatch,
) -> Result<Outcome, Reject> {
    let config = &mut state.map_config;
    if patch.image_url.is_some() {
        config.image_url = patch.image_url.clone();
    }
    if patch.image_key.is_some() {
        config.image_key = patch.image_key.clone();
    }
    if patch.image_width.is_some() {
        config.image_width = patch.image_width;
    }
    if patch.image_height.is_some() {
        config.image_height = patch.image_height;
    }
    if patch.template_id.is_some() {
        config.template_id = patch.template_id.clone();
    }
    Ok(Outcome::mutated(vec![Outbound::all(EventBody::MapConfigUpdated(
        state.map_config.clone(),
    ))]))
}

pub fn update_grid_config(
    state: &mut EncounterState,
    patch: &GridConfigPatch,
) -> Result<Outcome, Reject> {
    let config = &mut state.grid_config;
    if let Some(rows) = patch.rows {
        config.rows = rows;
    }
    if let Some(cols) = patch.cols {
        config.cols = cols;
    }
    if let Some(cell_size) = patch.cell_size {
        config.cell_size = cell_size;
    }
    if let Some(offset_x) = patch.offset_x {
        config.offset_x = offset_x;
    }
    if let Some(offset_y) = patch.offset_y {
        config.offset_y = offset_y;
    }
    if let Some(visible) = patch.visible {
        config.visible = visible;
    }
    if let Some(opacity) = patch.opacity {
        config.opacity = opacity.clamp(0.0, 1.0);
    }
    Ok(Outcome::mutated(vec![Outbound::all(EventBody::GridConfigUpdated(
        state.grid_config.clone(),
    ))]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::ids::{CampaignId, CombatId};

    fn state_with(entities: serde_json::Value) -> EncounterState {
        let mut state = EncounterState::new(CombatId::from("c1"), CampaignId::from("k1"));
        for value in entities.as_array().unwrap() {
            let e: Entity = serde_json::from_value(value.clone()).unwrap();
            state.entities.insert(e.id.clone(), e);
        }
        state
    }

    fn typed(json: serde_json::Value) -> Entity {
        serde_json::from_value(json).unwrap()
    }

    fn active_three(state: &mut EncounterState) {
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            state.append_initiative(InitiativeEntry {
                entity_id: EntityId::from(*id),
                roll: 30 - i as i64,
                skill_value: 0,
                current_energy: 100,
                position: 0,
            });
        }
        state.phase = Phase::ActiveTurn;
        state.round = 1;
        state.turn_index = 0;
        state.active_entity_id = Some(EntityId::from("a"));
    }

    #[test]
    fn immediate_timing_splices_after_current_turn() {
        let mut state = state_with(serde_json::json!([
            { "id": "a" }, { "id": "b" }, { "id": "c" },
        ]));
        active_three(&mut state);

        add_entity(
            &mut state,
            typed(serde_json::json!({ "id": "reinforcement" })),
            Some(14),
            Some(2),
            Some("immediate"),
        )
        .unwrap();

        let order: Vec<&str> = state.initiative.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(order, vec!["a", "reinforcement", "b", "c"]);
        assert_eq!(state.active_entity_id, Some(EntityId::from("a")));
        // Positions stay dense.
        let positions: Vec<u32> = state.initiative.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn default_timing_appends_to_the_end() {
        let mut state = state_with(serde_json::json!([
            { "id": "a" }, { "id": "b" }, { "id": "c" },
        ]));
        active_three(&mut state);
        add_entity(
            &mut state,
            typed(serde_json::json!({ "id": "straggler" })),
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(state.initiative.last().unwrap().entity_id, EntityId::from("straggler"));
    }

    #[test]
    fn removing_the_active_entity_promotes_the_next() {
        let mut state = state_with(serde_json::json!([
            { "id": "a" }, { "id": "b" }, { "id": "c" },
        ]));
        active_three(&mut state);

        remove_entity(&mut state, &GmRemoveEntityPayload { entity_id: EntityId::from("a") })
            .unwrap();

        assert!(!state.entities.contains_key(&EntityId::from("a")));
        assert_eq!(state.initiative.len(), 2);
        assert_eq!(state.turn_index, 0);
        assert_eq!(state.active_entity_id, Some(EntityId::from("b")));
    }

    #[test]
    fn removing_an_earlier_entity_keeps_the_cursor_on_target() {
        let mut state = state_with(serde_json::json!([
            { "id": "a" }, { "id": "b" }, { "id": "c" },
        ]));
        active_three(&mut state);
        state.turn_index = 2;
        state.active_entity_id = Some(EntityId::from("c"));

        remove_entity(&mut state, &GmRemoveEntityPayload { entity_id: EntityId::from("a") })
            .unwrap();
        assert_eq!(state.turn_index, 1);
        assert_eq!(state.active_entity_id, Some(EntityId::from("c")));
    }

    #[test]
    fn positive_damage_drains_and_negative_heals() {
        let mut state = state_with(serde_json::json!([
            { "id": "e1", "energy": { "current": 30, "max": 100 } },
        ]));
        apply_damage(
            &mut state,
            &GmApplyDamagePayload { entity_id: EntityId::from("e1"), damage: 45 },
        )
        .unwrap();
        assert_eq!(state.entity(&EntityId::from("e1")).unwrap().energy.current, 0);

        let outcome = apply_damage(
            &mut state,
            &GmApplyDamagePayload { entity_id: EntityId::from("e1"), damage: -150 },
        )
        .unwrap();
        assert_eq!(state.entity(&EntityId::from("e1")).unwrap().energy.current, 100);
        assert!(matches!(outcome.events[0].body, EventBody::HealingApplied { healing: 150, .. }));
    }

    #[test]
    fn resource_deltas_hit_current_and_max() {
        let mut state = state_with(serde_json::json!([
            { "id": "e1", "ap": { "current": 4, "max": 6 }, "energy": { "current": 50, "max": 100 } },
        ]));
        modify_resources(
            &mut state,
            &GmModifyResourcesPayload {
                entity_id: EntityId::from("e1"),
                ap: Some(2),
                energy: Some(-70),
            },
        )
        .unwrap();
        let e = state.entity(&EntityId::from("e1")).unwrap();
        assert_eq!(e.ap, arbiter_types::state::ResourcePool::new(6, 8));
        assert_eq!(e.energy, arbiter_types::state::ResourcePool::new(0, 30));

        // Max floors at 1.
        modify_resources(
            &mut state,
            &GmModifyResourcesPayload {
                entity_id: EntityId::from("e1"),
                ap: Some(-20),
                energy: None,
            },
        )
        .unwrap();
        let e = state.entity(&EntityId::from("e1")).unwrap();
        assert_eq!(e.ap.max, 1);
        assert_eq!(e.ap.current, 0);
    }

    #[test]
    fn set_phase_override() {
        let mut state = state_with(serde_json::json!([{ "id": "e1" }]));
        gm_override(
            &mut state,
            &GmOverridePayload {
                override_type: Some("set_phase".into()),
                phase: Some(Phase::Completed),
                entity_id: None,
                updates: None,
            },
        )
        .unwrap();
        assert_eq!(state.phase, Phase::Completed);
    }

    #[test]
    fn generic_override_merges_entity_fields() {
        let mut state = state_with(serde_json::json!([{ "id": "e1", "level": 3 }]));
        gm_override(
            &mut state,
            &GmOverridePayload {
                override_type: None,
                phase: None,
                entity_id: Some(EntityId::from("e1")),
                updates: Some(serde_json::json!({
                    "level": 7,
                    "staminaPotionBonus": 1,
                    "displayName": "Renamed",
                })),
            },
        )
        .unwrap();
        let e = state.entity(&EntityId::from("e1")).unwrap();
        assert_eq!(e.level, 7);
        assert_eq!(e.stamina_potion_bonus, 1);
        assert_eq!(e.display_name, "Renamed");
    }

    #[test]
    fn config_patches_merge_into_stored_blobs() {
        let mut state = state_with(serde_json::json!([{ "id": "e1" }]));
        update_grid_config(
            &mut state,
            &GridConfigPatch { rows: Some(30), opacity: Some(2.0), ..Default::default() },
        )
        .unwrap();
        assert_eq!(state.grid_config.rows, 30);
        assert_eq!(state.grid_config.cols, 20);
        assert_eq!(state.grid_config.opacity, 1.0); // clamped

        update_map_config(
            &mut state,
            &MapConfigPatch {
                image_url: Some("https://assets.example/maps/crypt.png".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            state.map_config.image_url.as_deref(),
            Some("https://assets.example/maps/crypt.png")
        );
        assert_eq!(state.map_config.template_id, None);
    }
}
