//! Turn & initiative engine — roll collection, sorting, turn advancement,
//! delay, and readied actions.

use arbiter_types::enums::Phase;
use arbiter_types::event::{EventBody, Outbound};
use arbiter_types::ids::EntityId;
use arbiter_types::message::{ReadyActionPayload, SubmitInitiativeRollPayload};
use arbiter_types::state::{EncounterState, InitiativeEntry, PendingAction};

use crate::dispatch::Outcome;
use crate::error::Reject;
use crate::permission::{can_control, SessionCtx};

// =============================================================================
// Roll collection
// =============================================================================

pub fn submit_initiative_roll(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &SubmitInitiativeRollPayload,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }

    let skill_value = p.skill_value.unwrap_or(0);
    let current_energy = entity.energy.current;

    // Upsert: re-rolls keep their slot in the order, new rows append.
    if state.initiative_entry(&p.entity_id).is_some() {
        let entry = state.initiative_entry_mut(&p.entity_id).expect("checked above");
        entry.roll = p.roll;
        entry.skill_value = skill_value;
        entry.current_energy = current_energy;
    } else {
        state.append_initiative(InitiativeEntry {
            entity_id: p.entity_id.clone(),
            roll: p.roll,
            skill_value,
            current_energy,
            position: 0,
        });
    }

    let all_rolled = state.all_rolled();
    let mut events = vec![Outbound::all(EventBody::InitiativeUpdated {
        order: state.initiative.clone(),
        all_rolled,
    })];

    if all_rolled && !state.phase.is_active() {
        events.extend(sort_and_start(state));
    }

    Ok(Outcome::mutated(events))
}

/// Sort the collected rolls and open round 1.
///
/// Order: roll desc, then skill value desc, then current energy desc.
pub fn sort_and_start(state: &mut EncounterState) -> Vec<Outbound> {
    state.initiative.sort_by(|a, b| {
        b.roll
            .cmp(&a.roll)
            .then(b.skill_value.cmp(&a.skill_value))
            .then(b.current_energy.cmp(&a.current_energy))
    });
    state.renumber_initiative();

    state.phase = Phase::ActiveTurn;
    state.round = 1;
    state.turn_index = 0;
    let first = state.initiative[0].entity_id.clone();
    state.active_entity_id = Some(first.clone());

    let mut events = vec![
        Outbound::all(EventBody::InitiativeUpdated {
            order: state.initiative.clone(),
            all_rolled: true,
        }),
        Outbound::all(EventBody::RoundStarted {
            round: 1,
            initiative: state.initiative.clone(),
        }),
    ];
    events.push(begin_turn(state, &first));
    events
}

/// Mark `entity_id` as the active turn-taker and build TURN_STARTED.
/// Consumes any readied action the entity was holding.
fn begin_turn(state: &mut EncounterState, entity_id: &EntityId) -> Outbound {
    state.active_entity_id = Some(entity_id.clone());
    state
        .pending_actions
        .retain(|_, action| &action.entity_id != entity_id);
    Outbound::all(EventBody::TurnStarted {
        entity_id: entity_id.clone(),
        turn_index: state.turn_index,
        round: state.round,
    })
}

// =============================================================================
// Turn advancement
// =============================================================================

fn require_active_entity(
    state: &EncounterState,
    ctx: &SessionCtx,
) -> Result<EntityId, Reject> {
    if !state.phase.is_active() {
        return Err(Reject::failed("No active combat"));
    }
    if state.initiative.is_empty() {
        return Err(Reject::failed("No initiative order"));
    }
    let active_id = state
        .active_entity_id
        .clone()
        .ok_or_else(|| Reject::failed("No active turn"))?;
    let entity = state
        .entity(&active_id)
        .ok_or_else(|| Reject::not_found("Active entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control the active entity"));
    }
    Ok(active_id)
}

/// End the active turn: convert unspent AP to energy, refresh AP, advance
/// the cursor (rolling the round over from the last slot).
pub fn end_turn(state: &mut EncounterState, ctx: &SessionCtx) -> Result<Outcome, Reject> {
    let active_id = require_active_entity(state, ctx)?;

    let energy_gained = {
        let entity = state.entity_mut(&active_id).expect("checked above");
        let unspent = entity.ap.current;
        let tier = entity.level_tier();
        let factor = 3 + i64::from(entity.stamina_potion_bonus);
        let gain = tier * factor * unspent;
        entity.energy.gain(gain);
        entity.ap.current = entity.ap.max;
        gain
    };

    let count = state.initiative.len() as i32;
    let next_index = (state.turn_index + 1) % count;
    let rolled_over = next_index == 0;
    state.turn_index = next_index;
    if rolled_over {
        state.round += 1;
    }
    let next_id = state.initiative[next_index as usize].entity_id.clone();

    let mut events = vec![Outbound::all(EventBody::TurnEnded {
        entity_id: active_id,
        energy_gained,
        delayed: false,
    })];
    if rolled_over {
        events.push(Outbound::all(EventBody::RoundStarted {
            round: state.round,
            initiative: state.initiative.clone(),
        }));
    }
    events.push(begin_turn(state, &next_id));
    Ok(Outcome::mutated(events))
}

/// Move the active entity to the end of the order and promote the first
/// remaining entity. No AP→energy conversion on a delay.
pub fn delay_turn(state: &mut EncounterState, ctx: &SessionCtx) -> Result<Outcome, Reject> {
    let active_id = require_active_entity(state, ctx)?;

    if let Some(idx) = state.initiative.iter().position(|e| e.entity_id == active_id) {
        let entry = state.initiative.remove(idx);
        state.initiative.push(entry);
        state.renumber_initiative();
    }
    state.turn_index = 0;
    let next_id = state.initiative[0].entity_id.clone();

    let mut events = vec![Outbound::all(EventBody::TurnEnded {
        entity_id: active_id,
        energy_gained: 0,
        delayed: true,
    })];
    events.push(begin_turn(state, &next_id));
    Ok(Outcome::mutated(events))
}

/// Store a readied action (no resource cost; consumed when the owner's next
/// turn starts).
pub fn ready_action(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &ReadyActionPayload,
    now: &str,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }

    let action = PendingAction {
        id: uuid::Uuid::new_v4().to_string(),
        entity_id: p.entity_id.clone(),
        trigger: p.trigger.clone(),
        action_type: p.action_type.clone(),
        created_at: now.to_string(),
    };
    let descriptor = serde_json::json!({
        "entityId": p.entity_id,
        "readiedAction": { "trigger": action.trigger, "actionType": action.action_type },
    });
    state.pending_actions.insert(action.id.clone(), action);

    Ok(Outcome::mutated(vec![Outbound::all(EventBody::EntityUpdated(descriptor))]))
}

// =============================================================================
// Cursor repair after initiative removal
// =============================================================================

/// Re-point the turn cursor after an initiative row was removed (death, GM
/// removal). The entity at the removed slot is skipped, not replayed.
pub(crate) fn fix_turn_cursor(state: &mut EncounterState, removed_pos: Option<u32>) {
    if !state.phase.is_active() {
        return;
    }
    if state.initiative.is_empty() {
        state.turn_index = -1;
        state.active_entity_id = None;
        return;
    }
    if let Some(pos) = removed_pos {
        if (pos as i32) < state.turn_index {
            state.turn_index -= 1;
        }
    }
    let count = state.initiative.len() as i32;
    if state.turn_index >= count || state.turn_index < 0 {
        state.turn_index = 0;
    }
    state.active_entity_id =
        Some(state.initiative[state.turn_index as usize].entity_id.clone());
}
