//! Action pipeline — attack, ability, reaction.
//!
//! Shared preconditions: target exists, caller controls the actor, actor can
//! afford the declared costs. Resources are debited before effects land.

use arbiter_types::event::{EventBody, Outbound};
use arbiter_types::message::{DeclareAbilityPayload, DeclareAttackPayload, DeclareReactionPayload};
use arbiter_types::state::{EncounterState, Entity};

use crate::damage::{apply_damage, follow_up_events};
use crate::dispatch::Outcome;
use crate::error::Reject;
use crate::permission::{can_control, SessionCtx};

/// Check both costs, then debit both. AP is checked first.
pub(crate) fn debit_resources(entity: &mut Entity, ap: i64, energy: i64) -> Result<(), Reject> {
    if entity.ap.current < ap {
        return Err(Reject::failed("Insufficient AP"));
    }
    if entity.energy.current < energy {
        return Err(Reject::failed("Insufficient Energy"));
    }
    entity.ap.drain(ap);
    entity.energy.drain(energy);
    Ok(())
}

/// Non-contested attack: debit the attacker, run the damage pipeline on the
/// target, trigger endure rolls on a knockdown.
pub fn declare_attack(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &DeclareAttackPayload,
) -> Result<Outcome, Reject> {
    if !state.entities.contains_key(&p.target_id) {
        return Err(Reject::not_found("Target entity not found"));
    }
    let attacker = state
        .entity(&p.attacker_id)
        .ok_or_else(|| Reject::not_found("Attacker not found"))?;
    if !can_control(ctx, attacker) {
        return Err(Reject::denied("You do not control this entity"));
    }

    debit_resources(
        state.entity_mut(&p.attacker_id).expect("checked above"),
        p.ap_cost,
        p.energy_cost,
    )?;

    let target = state.entity_mut(&p.target_id).expect("checked above");
    let outcome = apply_damage(target, p.base_damage, &p.damage_type);

    let mut events = vec![Outbound::all(EventBody::AttackResolved {
        attacker_id: p.attacker_id.clone(),
        target_id: p.target_id.clone(),
        damage_type: p.damage_type.clone(),
        base_damage: p.base_damage,
        final_damage: outcome.final_damage,
        modifier: outcome.modifier,
        wounds_dealt: outcome.wounds_added,
        target_energy: outcome.energy,
    })];
    events.extend(follow_up_events(&p.target_id, &p.damage_type, &outcome));
    Ok(Outcome::mutated(events))
}

/// Ability use: debit and announce. Effect interpretation is a client
/// concern; the descriptor is echoed verbatim.
pub fn declare_ability(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &DeclareAbilityPayload,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }

    debit_resources(
        state.entity_mut(&p.entity_id).expect("checked above"),
        p.ap_cost,
        p.energy_cost,
    )?;

    Ok(Outcome::mutated(vec![Outbound::all(EventBody::AbilityResolved {
        entity_id: p.entity_id.clone(),
        ability_name: p.ability_name.clone(),
        ap_cost: p.ap_cost,
        energy_cost: p.energy_cost,
        effects: p.effects.clone(),
    })]))
}

/// Reaction: AP only, never gated to the active turn.
pub fn declare_reaction(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &DeclareReactionPayload,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }

    debit_resources(state.entity_mut(&p.entity_id).expect("checked above"), p.ap_cost, 0)?;

    Ok(Outcome::mutated(vec![Outbound::all(EventBody::ReactionResolved {
        entity_id: p.entity_id.clone(),
        reaction_name: p.reaction_name.clone(),
        ap_cost: p.ap_cost,
    })]))
}
