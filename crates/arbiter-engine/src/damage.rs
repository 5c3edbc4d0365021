//! Damage processing — the type-modifier pipeline, wound accounting, and the
//! endure / death-check flow.
//!
//! Pipeline precedence is immunity > resistance > weakness, short-circuiting
//! at the first match. Every 20 points of final damage inflicts one wound of
//! the damage's type.

use arbiter_types::enums::DamageModifier;
use arbiter_types::event::{EventBody, Outbound};
use arbiter_types::ids::EntityId;
use arbiter_types::message::RollOutcomePayload;
use arbiter_types::state::{EncounterState, Entity, ResourcePool};

use crate::channeling;
use crate::dispatch::{CharacterSync, Outcome};
use crate::error::Reject;
use crate::initiative::fix_turn_cursor;
use crate::permission::{can_control, SessionCtx};

// =============================================================================
// Modifier pipeline
// =============================================================================

/// Apply the damage-type modifier pipeline to a base amount.
pub fn modify_damage(entity: &Entity, base: i64, damage_type: &str) -> (i64, DamageModifier) {
    if entity.immunities.contains(damage_type) {
        (0, DamageModifier::Immune)
    } else if entity.resistances.contains(damage_type) {
        (base / 2, DamageModifier::Resisted)
    } else if entity.weaknesses.contains(damage_type) {
        (base * 2, DamageModifier::Weakened)
    } else {
        (base, DamageModifier::Unmodified)
    }
}

/// Wounds inflicted by a damage amount: `ceil(damage / 20)`.
pub fn wound_count(damage: i64) -> u32 {
    if damage <= 0 {
        0
    } else {
        ((damage + 19) / 20) as u32
    }
}

// =============================================================================
// Application
// =============================================================================

/// Result of landing damage on an entity.
#[derive(Debug, Clone)]
pub struct DamageOutcome {
    pub final_damage: i64,
    pub modifier: DamageModifier,
    pub wounds_added: u32,
    pub total_wounds: u32,
    pub energy: ResourcePool,
    /// Energy hit 0 on a conscious target — an endure roll is due.
    pub endure_required: bool,
    /// Damage landed on an already-unconscious target — a death check is due.
    pub death_check_required: bool,
}

/// Land pre-modified damage with an explicit wound count.
///
/// Contest resolution passes the critical tier's wound count here; plain
/// attacks and spell releases pass `wound_count(final_damage)`.
pub fn apply_raw_damage(
    entity: &mut Entity,
    final_damage: i64,
    modifier: DamageModifier,
    wounds: u32,
    damage_type: &str,
) -> DamageOutcome {
    let was_conscious = entity.alive && !entity.unconscious;
    let was_down = entity.alive && entity.unconscious;

    entity.energy.drain(final_damage);
    let total_wounds = if wounds > 0 {
        entity.add_wounds(damage_type, wounds)
    } else {
        entity.total_wounds(damage_type)
    };

    DamageOutcome {
        final_damage,
        modifier,
        wounds_added: wounds,
        total_wounds,
        energy: entity.energy,
        endure_required: was_conscious && entity.energy.current == 0,
        death_check_required: was_down && final_damage > 0,
    }
}

/// Modifier pipeline + standard wound accounting in one step.
pub fn apply_damage(entity: &mut Entity, base: i64, damage_type: &str) -> DamageOutcome {
    let (final_damage, modifier) = modify_damage(entity, base, damage_type);
    apply_raw_damage(entity, final_damage, modifier, wound_count(final_damage), damage_type)
}

/// The follow-up events a damage outcome produces (wounds, endure, death
/// check), in broadcast order.
pub fn follow_up_events(
    target_id: &EntityId,
    damage_type: &str,
    outcome: &DamageOutcome,
) -> Vec<Outbound> {
    let mut events = Vec::new();
    if outcome.wounds_added > 0 {
        events.push(Outbound::all(EventBody::WoundsInflicted {
            entity_id: target_id.clone(),
            damage_type: damage_type.to_string(),
            wounds_added: outcome.wounds_added,
            total_wounds: outcome.total_wounds,
        }));
    }
    if outcome.endure_required {
        events.push(Outbound::all(EventBody::EndureRollRequired {
            entity_id: target_id.clone(),
            triggering_damage: outcome.final_damage,
        }));
    } else if outcome.death_check_required {
        events.push(Outbound::all(EventBody::DeathCheckRequired {
            entity_id: target_id.clone(),
            triggering_damage: outcome.final_damage,
        }));
    }
    events
}

// =============================================================================
// Endure / death-check handlers
// =============================================================================

pub fn submit_endure_roll(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &RollOutcomePayload,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }

    if p.success {
        let events = vec![Outbound::all(EventBody::EntityUpdated(serde_json::json!({
            "entityId": p.entity_id,
            "endureResult": "success",
            "rollTotal": p.roll_total,
        })))];
        return Ok(Outcome::read_only(events));
    }

    if let Some(entity) = state.entity_mut(&p.entity_id) {
        entity.unconscious = true;
    }
    let mut events = vec![Outbound::all(EventBody::EntityUnconscious {
        entity_id: p.entity_id.clone(),
    })];
    events.extend(channeling::interrupt_involuntary(state, &p.entity_id));
    Ok(Outcome::mutated(events))
}

pub fn submit_death_check(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &RollOutcomePayload,
    now: &str,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }

    if p.success {
        let events = vec![Outbound::all(EventBody::EntityUpdated(serde_json::json!({
            "entityId": p.entity_id,
            "deathCheckResult": "success",
            "rollTotal": p.roll_total,
        })))];
        return Ok(Outcome::read_only(events));
    }

    // Dead is terminal: alive=false implies unconscious=false.
    let character_id = {
        let entity = state.entity_mut(&p.entity_id).expect("checked above");
        entity.alive = false;
        entity.unconscious = false;
        entity.character_id.clone()
    };

    let removed_pos = state.initiative_entry(&p.entity_id).map(|e| e.position);
    state.remove_initiative(&p.entity_id);
    fix_turn_cursor(state, removed_pos);

    let mut events = vec![Outbound::all(EventBody::EntityDied {
        entity_id: p.entity_id.clone(),
    })];
    events.extend(channeling::interrupt_involuntary(state, &p.entity_id));
    events.push(Outbound::all(EventBody::InitiativeUpdated {
        order: state.initiative.clone(),
        all_rolled: state.all_rolled(),
    }));

    let mut outcome = Outcome::mutated(events);
    if let Some(character_id) = character_id {
        let wounds = state
            .entity(&p.entity_id)
            .map(|e| e.wounds.clone())
            .unwrap_or_default();
        let energy_current = state.entity(&p.entity_id).map(|e| e.energy.current).unwrap_or(0);
        outcome.character_syncs.push(CharacterSync {
            character_id,
            wounds,
            energy_current,
            is_alive: Some(false),
            death_timestamp: Some(now.to_string()),
        });
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entity(json: serde_json::Value) -> Entity {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn pipeline_precedence_short_circuits() {
        // Overlapping sets: immunity wins, then resistance.
        let e = entity(serde_json::json!({
            "id": "e1",
            "immunities": ["fire"],
            "resistances": ["fire", "frost"],
            "weaknesses": ["frost", "laceration"],
        }));
        assert_eq!(modify_damage(&e, 40, "fire"), (0, DamageModifier::Immune));
        assert_eq!(modify_damage(&e, 41, "frost"), (20, DamageModifier::Resisted));
        assert_eq!(modify_damage(&e, 40, "laceration"), (80, DamageModifier::Weakened));
        assert_eq!(modify_damage(&e, 40, "sonic"), (40, DamageModifier::Unmodified));
    }

    #[test]
    fn wound_count_is_ceil_over_twenty() {
        assert_eq!(wound_count(0), 0);
        assert_eq!(wound_count(1), 1);
        assert_eq!(wound_count(20), 1);
        assert_eq!(wound_count(21), 2);
        assert_eq!(wound_count(40), 2);
        assert_eq!(wound_count(-5), 0);
    }

    #[test]
    fn damage_floors_energy_and_flags_endure() {
        let mut e = entity(serde_json::json!({ "id": "e1", "energy": { "current": 25, "max": 100 } }));
        let outcome = apply_damage(&mut e, 30, "laceration");
        assert_eq!(outcome.final_damage, 30);
        assert_eq!(e.energy.current, 0);
        assert_eq!(outcome.wounds_added, 2);
        assert!(outcome.endure_required);
        assert!(!outcome.death_check_required);
    }

    #[test]
    fn damage_on_unconscious_target_requires_death_check() {
        let mut e = entity(serde_json::json!({
            "id": "e1",
            "unconscious": true,
            "energy": { "current": 0, "max": 100 },
        }));
        let outcome = apply_damage(&mut e, 10, "laceration");
        assert!(!outcome.endure_required);
        assert!(outcome.death_check_required);
    }

    #[test]
    fn immune_hit_adds_no_wounds() {
        let mut e = entity(serde_json::json!({ "id": "e1", "immunities": ["fire"] }));
        let outcome = apply_damage(&mut e, 55, "fire");
        assert_eq!(outcome.final_damage, 0);
        assert_eq!(outcome.wounds_added, 0);
        assert!(e.wounds.is_empty());
        assert_eq!(e.energy.current, 100);
    }

    proptest! {
        // Invariant 2: resource pools stay within [0, max] under any damage.
        #[test]
        fn energy_stays_bounded(start in 0i64..200, base in 0i64..500) {
            let mut e = entity(serde_json::json!({
                "id": "e1",
                "energy": { "current": start.min(100), "max": 100 },
            }));
            apply_damage(&mut e, base, "laceration");
            prop_assert!(e.energy.current >= 0);
            prop_assert!(e.energy.current <= e.energy.max);
        }
    }
}
