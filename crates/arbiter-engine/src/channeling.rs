//! Channeling engine — multi-turn spell charge and release.
//!
//! A channel accumulates energy AND AP toward `totalCost`; release requires
//! both. `turnsChanneled` is informational only — continuation is never
//! gated on turn boundaries. Falling unconscious or dying mid-channel
//! interrupts involuntarily, with blowback.

use arbiter_types::event::{EventBody, Outbound};
use arbiter_types::ids::EntityId;
use arbiter_types::message::{
    AbortChannelingPayload, ContinueChannelingPayload, ReleaseSpellPayload,
    StartChannelingPayload,
};
use arbiter_types::state::{ChannelingState, EncounterState};

use crate::actions::debit_resources;
use crate::damage::{apply_raw_damage, follow_up_events, modify_damage, wound_count};
use crate::dispatch::Outcome;
use crate::error::Reject;
use crate::permission::{can_control, SessionCtx};

fn require_controlled(
    state: &EncounterState,
    ctx: &SessionCtx,
    entity_id: &EntityId,
) -> Result<(), Reject> {
    let entity = state
        .entity(entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }
    Ok(())
}

pub fn start_channeling(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &StartChannelingPayload,
    now: &str,
) -> Result<Outcome, Reject> {
    require_controlled(state, ctx, &p.entity_id)?;
    if state.channeling.contains_key(&p.entity_id) {
        return Err(Reject::failed("Already channeling"));
    }
    if p.total_cost <= 0 || p.intensity <= 0 {
        return Err(Reject::failed("Invalid channeling parameters"));
    }
    if p.initial_energy < 0 || p.initial_ap < 0 {
        return Err(Reject::failed("Invalid channeling parameters"));
    }

    debit_resources(
        state.entity_mut(&p.entity_id).expect("checked above"),
        p.initial_ap,
        p.initial_energy,
    )?;

    let channel = ChannelingState {
        spell_name: p.spell_name.clone(),
        damage_type: p.damage_type.clone(),
        intensity: p.intensity,
        total_cost: p.total_cost,
        energy_channeled: p.initial_energy,
        ap_channeled: p.initial_ap,
        turns_channeled: 1,
        started_at: now.to_string(),
    };
    let event = EventBody::ChannelingStarted {
        entity_id: p.entity_id.clone(),
        spell_name: channel.spell_name.clone(),
        damage_type: channel.damage_type.clone(),
        intensity: channel.intensity,
        total_cost: channel.total_cost,
        energy_channeled: channel.energy_channeled,
        ap_channeled: channel.ap_channeled,
        progress: channel.progress(),
    };
    state.channeling.insert(p.entity_id.clone(), channel);

    Ok(Outcome::mutated(vec![Outbound::all(event)]))
}

pub fn continue_channeling(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &ContinueChannelingPayload,
) -> Result<Outcome, Reject> {
    require_controlled(state, ctx, &p.entity_id)?;
    if !state.channeling.contains_key(&p.entity_id) {
        return Err(Reject::failed("Not channeling"));
    }
    if p.additional_energy < 0 || p.additional_ap < 0 {
        return Err(Reject::failed("Invalid channeling parameters"));
    }

    debit_resources(
        state.entity_mut(&p.entity_id).expect("checked above"),
        p.additional_ap,
        p.additional_energy,
    )?;

    let channel = state.channeling.get_mut(&p.entity_id).expect("checked above");
    channel.energy_channeled += p.additional_energy;
    channel.ap_channeled += p.additional_ap;
    channel.turns_channeled += 1;

    Ok(Outcome::mutated(vec![Outbound::all(EventBody::ChannelingContinued {
        entity_id: p.entity_id.clone(),
        energy_channeled: channel.energy_channeled,
        ap_channeled: channel.ap_channeled,
        turns_channeled: channel.turns_channeled,
        progress: channel.progress(),
        is_ready: channel.is_ready(),
    })]))
}

pub fn release_spell(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &ReleaseSpellPayload,
) -> Result<Outcome, Reject> {
    require_controlled(state, ctx, &p.entity_id)?;
    let channel = state
        .channeling
        .get(&p.entity_id)
        .ok_or_else(|| Reject::failed("Not channeling"))?;
    if !channel.is_ready() {
        return Err(Reject::failed("Spell not fully charged"));
    }
    if let Some(target_id) = &p.target_id {
        if !state.entities.contains_key(target_id) {
            return Err(Reject::not_found("Target entity not found"));
        }
    }

    let channel = state.channeling.remove(&p.entity_id).expect("checked above");
    let spell_damage = channel.energy_channeled * channel.intensity;

    let mut final_damage = spell_damage;
    let mut wounds_dealt = 0;
    let mut follow_ups = Vec::new();
    if let Some(target_id) = &p.target_id {
        let target = state.entity_mut(target_id).expect("checked above");
        let (modified, modifier) = modify_damage(target, spell_damage, &channel.damage_type);
        let outcome = apply_raw_damage(
            target,
            modified,
            modifier,
            wound_count(modified),
            &channel.damage_type,
        );
        final_damage = outcome.final_damage;
        wounds_dealt = outcome.wounds_added;
        follow_ups = follow_up_events(target_id, &channel.damage_type, &outcome);
    }

    let mut events = vec![Outbound::all(EventBody::ChannelingReleased {
        entity_id: p.entity_id.clone(),
        spell_name: channel.spell_name.clone(),
        target_id: p.target_id.clone(),
        damage_type: channel.damage_type.clone(),
        spell_damage,
        final_damage,
        wounds_dealt,
        turns_channeled: channel.turns_channeled,
    })];
    events.extend(follow_ups);
    Ok(Outcome::mutated(events))
}

/// Voluntary abort: the accumulated resources are forfeited, no blowback.
pub fn abort_channeling(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &AbortChannelingPayload,
) -> Result<Outcome, Reject> {
    require_controlled(state, ctx, &p.entity_id)?;
    let channel = state
        .channeling
        .remove(&p.entity_id)
        .ok_or_else(|| Reject::failed("Not channeling"))?;

    Ok(Outcome::mutated(vec![Outbound::all(EventBody::ChannelingInterrupted {
        entity_id: p.entity_id.clone(),
        spell_name: channel.spell_name,
        voluntary: true,
        energy_forfeited: channel.energy_channeled,
        ap_forfeited: channel.ap_channeled,
    })]))
}

/// Involuntary interruption (unconsciousness, death): the channel collapses
/// and half the channeled energy blows back through the damage pipeline.
/// No endure/death follow-up — the channeler is already down.
pub fn interrupt_involuntary(state: &mut EncounterState, entity_id: &EntityId) -> Vec<Outbound> {
    let Some(channel) = state.channeling.remove(entity_id) else {
        return Vec::new();
    };

    let mut events = vec![Outbound::all(EventBody::ChannelingInterrupted {
        entity_id: entity_id.clone(),
        spell_name: channel.spell_name.clone(),
        voluntary: false,
        energy_forfeited: channel.energy_channeled,
        ap_forfeited: channel.ap_channeled,
    })];

    let blowback = channel.energy_channeled / 2;
    if blowback > 0 {
        if let Some(entity) = state.entity_mut(entity_id) {
            let (modified, modifier) = modify_damage(entity, blowback, &channel.damage_type);
            let outcome = apply_raw_damage(
                entity,
                modified,
                modifier,
                wound_count(modified),
                &channel.damage_type,
            );
            events.push(Outbound::all(EventBody::BlowbackApplied {
                entity_id: entity_id.clone(),
                damage: outcome.final_damage,
                damage_type: channel.damage_type.clone(),
            }));
            if outcome.wounds_added > 0 {
                events.push(Outbound::all(EventBody::WoundsInflicted {
                    entity_id: entity_id.clone(),
                    damage_type: channel.damage_type.clone(),
                    wounds_added: outcome.wounds_added,
                    total_wounds: outcome.total_wounds,
                }));
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::ids::{CampaignId, CombatId};
    use arbiter_types::state::Entity;

    fn state_with(entities: serde_json::Value) -> EncounterState {
        let mut state = EncounterState::new(CombatId::from("c1"), CampaignId::from("k1"));
        for value in entities.as_array().unwrap() {
            let e: Entity = serde_json::from_value(value.clone()).unwrap();
            state.entities.insert(e.id.clone(), e);
        }
        state
    }

    fn start(state: &mut EncounterState, energy: i64, ap: i64) {
        start_channeling(
            state,
            &SessionCtx::gm(),
            &StartChannelingPayload {
                entity_id: EntityId::from("mage"),
                spell_name: "emberlance".into(),
                total_cost: 30,
                damage_type: "fire".into(),
                intensity: 2,
                initial_energy: energy,
                initial_ap: ap,
            },
            "t0",
        )
        .unwrap();
    }

    fn push(state: &mut EncounterState, energy: i64, ap: i64) -> Outcome {
        continue_channeling(
            state,
            &SessionCtx::gm(),
            &ContinueChannelingPayload {
                entity_id: EntityId::from("mage"),
                additional_energy: energy,
                additional_ap: ap,
            },
        )
        .unwrap()
    }

    // Scenario: energy reaches the cost but AP lags — not ready, release
    // rejected.
    #[test]
    fn release_requires_both_accumulators() {
        let mut state = state_with(serde_json::json!([{ "id": "mage" }]));
        start(&mut state, 10, 2);
        push(&mut state, 10, 2);
        let outcome = push(&mut state, 10, 2);

        match &outcome.events[0].body {
            EventBody::ChannelingContinued { energy_channeled, ap_channeled, is_ready, .. } => {
                assert_eq!(*energy_channeled, 30);
                assert_eq!(*ap_channeled, 6);
                assert!(!is_ready);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let err = release_spell(
            &mut state,
            &SessionCtx::gm(),
            &ReleaseSpellPayload { entity_id: EntityId::from("mage"), target_id: None },
        )
        .unwrap_err();
        assert_eq!(err, Reject::failed("Spell not fully charged"));
        assert!(state.channeling.contains_key(&EntityId::from("mage")));
    }

    #[test]
    fn release_scales_damage_by_intensity() {
        let mut state = state_with(serde_json::json!([
            { "id": "mage", "ap": { "current": 40, "max": 40 }, "energy": { "current": 100, "max": 100 } },
            { "id": "ogre", "energy": { "current": 100, "max": 100 } },
        ]));
        start(&mut state, 30, 30);
        let outcome = release_spell(
            &mut state,
            &SessionCtx::gm(),
            &ReleaseSpellPayload {
                entity_id: EntityId::from("mage"),
                target_id: Some(EntityId::from("ogre")),
            },
        )
        .unwrap();

        match &outcome.events[0].body {
            EventBody::ChannelingReleased { spell_damage, final_damage, wounds_dealt, .. } => {
                assert_eq!(*spell_damage, 60); // 30 energy × intensity 2
                assert_eq!(*final_damage, 60);
                assert_eq!(*wounds_dealt, 3); // ceil(60/20)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(state.entity(&EntityId::from("ogre")).unwrap().energy.current, 40);
        assert!(state.channeling.is_empty());
    }

    #[test]
    fn release_without_target_just_discharges() {
        let mut state = state_with(serde_json::json!([
            { "id": "mage", "ap": { "current": 40, "max": 40 } },
        ]));
        start(&mut state, 30, 30);
        let outcome = release_spell(
            &mut state,
            &SessionCtx::gm(),
            &ReleaseSpellPayload { entity_id: EntityId::from("mage"), target_id: None },
        )
        .unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert!(state.channeling.is_empty());
    }

    #[test]
    fn starting_twice_is_rejected() {
        let mut state = state_with(serde_json::json!([{ "id": "mage" }]));
        start(&mut state, 10, 2);
        let err = start_channeling(
            &mut state,
            &SessionCtx::gm(),
            &StartChannelingPayload {
                entity_id: EntityId::from("mage"),
                spell_name: "other".into(),
                total_cost: 10,
                damage_type: "fire".into(),
                intensity: 1,
                initial_energy: 1,
                initial_ap: 1,
            },
            "t1",
        )
        .unwrap_err();
        assert_eq!(err, Reject::failed("Already channeling"));
    }

    #[test]
    fn start_debits_initial_resources() {
        let mut state = state_with(serde_json::json!([
            { "id": "mage", "ap": { "current": 6, "max": 6 }, "energy": { "current": 50, "max": 100 } },
        ]));
        start(&mut state, 10, 2);
        let mage = state.entity(&EntityId::from("mage")).unwrap();
        assert_eq!(mage.ap.current, 4);
        assert_eq!(mage.energy.current, 40);
    }

    #[test]
    fn continue_with_insufficient_energy_is_rejected() {
        let mut state = state_with(serde_json::json!([
            { "id": "mage", "energy": { "current": 12, "max": 100 } },
        ]));
        start(&mut state, 10, 2);
        let err = continue_channeling(
            &mut state,
            &SessionCtx::gm(),
            &ContinueChannelingPayload {
                entity_id: EntityId::from("mage"),
                additional_energy: 10,
                additional_ap: 1,
            },
        )
        .unwrap_err();
        assert_eq!(err, Reject::failed("Insufficient Energy"));
        // The channel keeps its progress untouched.
        assert_eq!(state.channeling[&EntityId::from("mage")].energy_channeled, 10);
    }

    #[test]
    fn abort_forfeits_without_blowback() {
        let mut state = state_with(serde_json::json!([{ "id": "mage" }]));
        start(&mut state, 10, 2);
        let outcome = abort_channeling(
            &mut state,
            &SessionCtx::gm(),
            &AbortChannelingPayload { entity_id: EntityId::from("mage") },
        )
        .unwrap();
        match &outcome.events[0].body {
            EventBody::ChannelingInterrupted { voluntary, energy_forfeited, ap_forfeited, .. } => {
                assert!(voluntary);
                assert_eq!(*energy_forfeited, 10);
                assert_eq!(*ap_forfeited, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(outcome.events.len(), 1);
        assert!(state.channeling.is_empty());
    }

    #[test]
    fn involuntary_interrupt_blows_back_half_the_energy() {
        let mut state = state_with(serde_json::json!([
            { "id": "mage", "energy": { "current": 80, "max": 100 } },
        ]));
        start(&mut state, 20, 2);
        // 60 energy left after the start debit.
        let events = interrupt_involuntary(&mut state, &EntityId::from("mage"));

        let blowback = events
            .iter()
            .find_map(|o| match &o.body {
                EventBody::BlowbackApplied { damage, .. } => Some(*damage),
                _ => None,
            })
            .unwrap();
        assert_eq!(blowback, 10); // floor(20 / 2)
        let mage = state.entity(&EntityId::from("mage")).unwrap();
        assert_eq!(mage.energy.current, 50);
        assert_eq!(mage.total_wounds("fire"), 1);
        assert!(state.channeling.is_empty());
    }

    #[test]
    fn interrupt_without_channel_is_a_no_op() {
        let mut state = state_with(serde_json::json!([{ "id": "mage" }]));
        assert!(interrupt_involuntary(&mut state, &EntityId::from("mage")).is_empty());
    }
}
