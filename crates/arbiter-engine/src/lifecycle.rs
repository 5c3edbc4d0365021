//! Encounter lifecycle — START_COMBAT and END_COMBAT.

use arbiter_types::enums::Phase;
use arbiter_types::event::{EventBody, Outbound};
use arbiter_types::message::StartCombatPayload;
use arbiter_types::state::EncounterState;

use crate::dispatch::{CharacterSync, Outcome};
use crate::error::Reject;
use crate::initiative::sort_and_start;
use crate::state_sync::all_entity_snapshots;

/// Open the initiative phase. A supplied roster resets the encounter tables
/// and reseeds them; without one the registered entities carry over.
pub fn start_combat(
    state: &mut EncounterState,
    p: &StartCombatPayload,
    now: &str,
) -> Result<Outcome, Reject> {
    if let Some(entities) = &p.entities {
        state.clear_encounter();
        for entity in entities {
            state.entities.insert(entity.id.clone(), entity.clone());
        }
    }
    if state.entities.is_empty() {
        return Err(Reject::failed("No entities registered for combat"));
    }

    state.phase = Phase::Initiative;
    state.round = 0;
    state.turn_index = -1;
    state.active_entity_id = None;
    state.started_at = Some(now.to_string());

    let mut events = vec![Outbound::all(EventBody::CombatStarted {
        combat_id: state.combat_id.clone(),
        campaign_id: state.campaign_id.clone(),
        round: state.round,
        entities: all_entity_snapshots(state),
    })];

    // Rolls may already be on file (pre-rolled setup, restarted combat).
    if state.all_rolled() {
        events.extend(sort_and_start(state));
    }

    Ok(Outcome::mutated(events))
}

/// Close the encounter: snapshot every character-linked entity to the
/// external store, announce the result, clear all child tables.
pub fn end_combat(state: &mut EncounterState) -> Result<Outcome, Reject> {
    let character_syncs: Vec<CharacterSync> = state
        .entities
        .values()
        .filter_map(|entity| {
            entity.character_id.clone().map(|character_id| CharacterSync {
                character_id,
                wounds: entity.wounds.clone(),
                energy_current: entity.energy.current,
                is_alive: None,
                death_timestamp: None,
            })
        })
        .collect();

    let events = vec![Outbound::all(EventBody::CombatEnded {
        round: state.round,
        entities: all_entity_snapshots(state),
    })];

    state.clear_encounter();
    state.phase = Phase::Completed;

    let mut outcome = Outcome::mutated(events);
    outcome.character_syncs = character_syncs;
    outcome.combat_ended = true;
    Ok(outcome)
}
