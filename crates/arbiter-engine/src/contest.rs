//! Skill & attack contest resolver — two-phase contested d100 rolls.
//!
//! Phase one persists an `awaiting_response` row and asks the target's
//! controller to respond; phase two rolls the defender, compares totals, and
//! for attack contests converts the winning margin into a critical tier and
//! a damage envelope. Totals are always recomputed server-side from
//! `selectedRoll + skillModifier`, whether the dice came from the client or
//! the session RNG.

use arbiter_types::enums::{ContestKind, ContestStatus, CriticalTier};
use arbiter_types::event::{AttackContestOutcome, Audience, EventBody, Outbound};
use arbiter_types::ids::{Controller, ContestId, EntityId, PlayerId};
use arbiter_types::message::{InitiateContestPayload, RespondContestPayload};
use arbiter_types::rng::RngState;
use arbiter_types::state::{AttackParams, ContestSide, EncounterState, SkillContest};

use crate::actions::debit_resources;
use crate::damage::{apply_raw_damage, follow_up_events, modify_damage};
use crate::dispatch::Outcome;
use crate::error::Reject;
use crate::permission::{can_control, SessionCtx};

// =============================================================================
// Dice
// =============================================================================

fn select_roll(raw: &[i64], keep_highest: bool) -> i64 {
    let picked = if keep_highest {
        raw.iter().max()
    } else {
        raw.iter().min()
    };
    picked.copied().unwrap_or(0)
}

/// Build one side of a contest: consume client-supplied dice when present,
/// otherwise roll the pool through the session RNG.
#[allow(clippy::too_many_arguments)]
fn roll_side(
    rng: &mut RngState,
    entity_id: EntityId,
    player_id: Option<PlayerId>,
    skill: &str,
    skill_modifier: i64,
    dice_count: u32,
    keep_highest: bool,
    raw_rolls: Option<Vec<i64>>,
    selected_roll: Option<i64>,
) -> ContestSide {
    let (raw_rolls, selected_roll) = match (raw_rolls, selected_roll) {
        (Some(raw), selected) if !raw.is_empty() => {
            let derived = select_roll(&raw, keep_highest);
            (raw, selected.unwrap_or(derived))
        }
        (_, Some(selected)) => (vec![selected], selected),
        _ => {
            let raw = rng.d100_pool(dice_count);
            let selected = select_roll(&raw, keep_highest);
            (raw, selected)
        }
    };

    ContestSide {
        entity_id,
        player_id,
        skill: skill.to_string(),
        dice_count,
        keep_highest,
        total: selected_roll + skill_modifier,
        raw_rolls,
        selected_roll,
        skill_modifier,
    }
}

// =============================================================================
// Phase one — initiate
// =============================================================================

pub fn initiate_contest(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    rng: &mut RngState,
    now: &str,
    kind: ContestKind,
    p: &InitiateContestPayload,
) -> Result<Outcome, Reject> {
    let initiator = state
        .entity(&p.initiator_entity_id)
        .ok_or_else(|| Reject::not_found("Initiator entity not found"))?;
    if !can_control(ctx, initiator) {
        return Err(Reject::denied("You do not control this entity"));
    }
    if let Some(target_id) = &p.target_entity_id {
        if !state.entities.contains_key(target_id) {
            return Err(Reject::not_found("Target entity not found"));
        }
    }

    let attack = match kind {
        ContestKind::Attack => Some(AttackParams {
            base_damage: p.base_damage.unwrap_or(0),
            damage_type: p.damage_type.clone().unwrap_or_else(|| "physical".to_string()),
            physical_attribute: p
                .physical_attribute
                .unwrap_or_else(|| initiator.physical_attribute()),
            ap_cost: p.ap_cost.unwrap_or(1),
            energy_cost: p.energy_cost.unwrap_or(1),
        }),
        ContestKind::Skill => None,
    };

    // Attack contests charge the initiator up front; a miss still costs.
    if let Some(params) = &attack {
        let (ap_cost, energy_cost) = (params.ap_cost, params.energy_cost);
        debit_resources(
            state.entity_mut(&p.initiator_entity_id).expect("checked above"),
            ap_cost,
            energy_cost,
        )?;
    }

    let side = roll_side(
        rng,
        p.initiator_entity_id.clone(),
        ctx.player_id.clone(),
        &p.skill,
        p.skill_modifier,
        p.dice_count,
        p.keep_highest,
        p.raw_rolls.clone(),
        p.selected_roll,
    );

    let contest = SkillContest {
        id: ContestId::from(uuid::Uuid::new_v4().to_string()),
        contest_type: kind,
        initiator: side,
        defender: None,
        status: ContestStatus::AwaitingResponse,
        winner_entity_id: None,
        margin: 0,
        target_entity_id: p.target_entity_id.clone(),
        attack,
        created_at: now.to_string(),
    };

    let announce = match kind {
        ContestKind::Skill => EventBody::SkillContestInitiated(contest.clone()),
        ContestKind::Attack => EventBody::AttackContestInitiated(contest.clone()),
    };
    let mut events = vec![Outbound::all(announce)];

    // Route the response request to whoever controls the target.
    let audience = match (&p.target_entity_id, &p.target_player_id) {
        (Some(target_id), _) => match &state.entity(target_id).expect("checked above").controller {
            Controller::Player(owner) => Some(Audience::Player(owner.clone())),
            Controller::Gm => Some(Audience::Gms),
        },
        (None, Some(player_id)) => Some(Audience::Player(player_id.clone())),
        (None, None) => None,
    };
    if let Some(audience) = audience {
        events.push(Outbound {
            audience,
            body: EventBody::SkillContestResponseRequested {
                contest_id: contest.id.clone(),
                initiator_entity_id: p.initiator_entity_id.clone(),
                target_entity_id: p.target_entity_id.clone(),
                skill: p.skill.clone(),
            },
        });
    }

    state.contests.insert(contest.id.clone(), contest);
    Ok(Outcome::mutated(events))
}

// =============================================================================
// Phase two — respond & resolve
// =============================================================================

pub fn respond_contest(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    rng: &mut RngState,
    p: &RespondContestPayload,
) -> Result<Outcome, Reject> {
    let mut contest = state
        .contests
        .get(&p.contest_id)
        .cloned()
        .ok_or_else(|| Reject::not_found("Contest not found"))?;
    if contest.status != ContestStatus::AwaitingResponse {
        return Err(Reject::failed("Contest already resolved"));
    }
    let defender = state
        .entity(&p.entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, defender) {
        return Err(Reject::denied("You do not control this entity"));
    }

    let side = roll_side(
        rng,
        p.entity_id.clone(),
        ctx.player_id.clone(),
        &p.skill,
        p.skill_modifier,
        p.dice_count,
        p.keep_highest,
        p.raw_rolls.clone(),
        p.selected_roll,
    );

    let initiator_total = contest.initiator.total;
    let defender_total = side.total;
    contest.winner_entity_id = if initiator_total > defender_total {
        Some(contest.initiator.entity_id.clone())
    } else if defender_total > initiator_total {
        Some(p.entity_id.clone())
    } else {
        None
    };
    contest.margin = (initiator_total - defender_total).abs();
    contest.defender = Some(side);
    contest.status = ContestStatus::Resolved;

    let initiator_won =
        contest.winner_entity_id.as_ref() == Some(&contest.initiator.entity_id);

    let events = match (contest.contest_type, &contest.attack) {
        (ContestKind::Skill, _) => {
            vec![Outbound::all(EventBody::SkillContestResolved(contest.clone()))]
        }
        (ContestKind::Attack, Some(params)) if initiator_won => {
            let params = params.clone();
            // Margin as a percentage of the defender's total; a non-positive
            // defender total counts as brutal outright.
            let margin_percent = (defender_total > 0).then(|| {
                (initiator_total - defender_total) as f64 / defender_total as f64 * 100.0
            });
            let critical = margin_percent
                .map_or(CriticalTier::Brutal, CriticalTier::from_margin_percent);
            let pre_mod = ((params.base_damage + params.physical_attribute) as f64
                * critical.damage_multiplier())
            .floor() as i64;

            let target = state.entity_mut(&p.entity_id).expect("checked above");
            let (final_damage, modifier) = modify_damage(target, pre_mod, &params.damage_type);
            let outcome = apply_raw_damage(
                target,
                final_damage,
                modifier,
                critical.bonus_wounds(),
                &params.damage_type,
            );

            let mut events = vec![Outbound::all(EventBody::AttackContestResolved(
                AttackContestOutcome {
                    contest: contest.clone(),
                    margin_percent,
                    critical_type: Some(critical),
                    pre_mod_damage: Some(pre_mod),
                    final_damage: Some(outcome.final_damage),
                    modifier: Some(outcome.modifier),
                    wounds_dealt: Some(outcome.wounds_added),
                    target_energy: Some(outcome.energy),
                },
            ))];
            events.extend(follow_up_events(&p.entity_id, &params.damage_type, &outcome));
            events
        }
        // Defender won or tie: the attack misses.
        (ContestKind::Attack, _) => vec![Outbound::all(EventBody::AttackContestResolved(
            AttackContestOutcome {
                contest: contest.clone(),
                margin_percent: None,
                critical_type: None,
                pre_mod_damage: None,
                final_damage: None,
                modifier: None,
                wounds_dealt: None,
                target_energy: None,
            },
        ))],
    };

    state.contests.insert(contest.id.clone(), contest);
    Ok(Outcome::mutated(events))
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

    fn initiate(
        state: &mut EncounterState,
        rng: &mut RngState,
        kind: ContestKind,
        selected: i64,
        base_damage: i64,
    ) -> ContestId {
        let p = InitiateContestPayload {
            initiator_entity_id: EntityId::from("atk"),
            target_entity_id: Some(EntityId::from("def")),
            target_player_id: None,
            skill: "blades".into(),
            skill_modifier: 0,
            dice_count: 1,
            keep_highest: true,
            raw_rolls: Some(vec![selected]),
            selected_roll: Some(selected),
            base_damage: Some(base_damage),
            damage_type: Some("laceration".into()),
            physical_attribute: Some(5),
            ap_cost: Some(1),
            energy_cost: Some(1),
        };
        initiate_contest(state, &SessionCtx::gm(), rng, "t0", kind, &p).unwrap();
        state.contests.keys().next().cloned().unwrap()
    }

    fn respond(
        state: &mut EncounterState,
        rng: &mut RngState,
        contest_id: &ContestId,
        selected: i64,
    ) -> Outcome {
        let p = RespondContestPayload {
            contest_id: contest_id.clone(),
            entity_id: EntityId::from("def"),
            skill: "dodge".into(),
            skill_modifier: 0,
            dice_count: 1,
            keep_highest: true,
            raw_rolls: Some(vec![selected]),
            selected_roll: Some(selected),
        };
        respond_contest(state, &SessionCtx::gm(), rng, &p).unwrap()
    }

    fn attack_outcome(outcome: &Outcome) -> AttackContestOutcome {
        outcome
            .events
            .iter()
            .find_map(|o| match &o.body {
                EventBody::AttackContestResolved(res) => Some(res.clone()),
                _ => None,
            })
            .expect("no ATTACK_CONTEST_RESOLVED event")
    }

    // Scenario: 120 vs 40 → 200% margin, brutal: floor((10+5)×2)=30 damage,
    // +2 wounds.
    #[test]
    fn brutal_critical_resolution() {
        let mut state = state_with(serde_json::json!([
            { "id": "atk" },
            { "id": "def", "energy": { "current": 100, "max": 100 } },
        ]));
        let mut rng = RngState::new(1);
        let id = initiate(&mut state, &mut rng, ContestKind::Attack, 120, 10);
        let outcome = respond(&mut state, &mut rng, &id, 40);

        let res = attack_outcome(&outcome);
        assert_eq!(res.critical_type, Some(CriticalTier::Brutal));
        assert_eq!(res.final_damage, Some(30));
        assert_eq!(res.wounds_dealt, Some(2));

        let def = state.entity(&EntityId::from("def")).unwrap();
        assert_eq!(def.energy.current, 70);
        assert_eq!(def.total_wounds("laceration"), 2);
    }

    #[test]
    fn margin_boundaries_select_the_right_tier() {
        // Defender total fixed at 40; initiator totals probe each threshold.
        for (initiator, expected) in [
            (59, Some(CriticalTier::Normal)),   // 47.5%
            (60, Some(CriticalTier::Wicked)),   // 50%
            (79, Some(CriticalTier::Wicked)),   // 97.5%
            (80, Some(CriticalTier::Vicious)),  // 100%
            (119, Some(CriticalTier::Vicious)), // 197.5%
            (120, Some(CriticalTier::Brutal)),  // 200%
        ] {
            let mut state = state_with(serde_json::json!([{ "id": "atk" }, { "id": "def" }]));
            let mut rng = RngState::new(1);
            let id = initiate(&mut state, &mut rng, ContestKind::Attack, initiator, 10);
            let outcome = respond(&mut state, &mut rng, &id, 40);
            assert_eq!(
                attack_outcome(&outcome).critical_type,
                expected,
                "initiator total {initiator}"
            );
        }
    }

    #[test]
    fn tie_is_a_miss_with_no_winner() {
        let mut state = state_with(serde_json::json!([{ "id": "atk" }, { "id": "def" }]));
        let mut rng = RngState::new(1);
        let id = initiate(&mut state, &mut rng, ContestKind::Attack, 50, 10);
        let outcome = respond(&mut state, &mut rng, &id, 50);

        let res = attack_outcome(&outcome);
        assert_eq!(res.contest.winner_entity_id, None);
        assert_eq!(res.final_damage, None);
        assert_eq!(state.entity(&EntityId::from("def")).unwrap().energy.current, 100);
    }

    #[test]
    fn defender_win_deals_no_damage_but_costs_stand() {
        let mut state = state_with(serde_json::json!([
            { "id": "atk", "ap": { "current": 3, "max": 6 }, "energy": { "current": 50, "max": 100 } },
            { "id": "def" },
        ]));
        let mut rng = RngState::new(1);
        let id = initiate(&mut state, &mut rng, ContestKind::Attack, 30, 10);
        let outcome = respond(&mut state, &mut rng, &id, 90);

        assert_eq!(
            attack_outcome(&outcome).contest.winner_entity_id,
            Some(EntityId::from("def"))
        );
        // The initiator paid on initiation, win or lose.
        let atk = state.entity(&EntityId::from("atk")).unwrap();
        assert_eq!(atk.ap.current, 2);
        assert_eq!(atk.energy.current, 49);
    }

    #[test]
    fn double_response_is_rejected() {
        let mut state = state_with(serde_json::json!([{ "id": "atk" }, { "id": "def" }]));
        let mut rng = RngState::new(1);
        let id = initiate(&mut state, &mut rng, ContestKind::Attack, 60, 10);
        respond(&mut state, &mut rng, &id, 40);

        let p = RespondContestPayload {
            contest_id: id,
            entity_id: EntityId::from("def"),
            skill: "dodge".into(),
            skill_modifier: 0,
            dice_count: 1,
            keep_highest: true,
            raw_rolls: None,
            selected_roll: None,
        };
        let err = respond_contest(&mut state, &SessionCtx::gm(), &mut rng, &p).unwrap_err();
        assert_eq!(err, Reject::failed("Contest already resolved"));
    }

    #[test]
    fn server_rolls_when_client_dice_absent() {
        let mut state = state_with(serde_json::json!([{ "id": "atk" }, { "id": "def" }]));
        let mut rng = RngState::new(42);
        let p = InitiateContestPayload {
            initiator_entity_id: EntityId::from("atk"),
            target_entity_id: None,
            target_player_id: None,
            skill: "lore".into(),
            skill_modifier: 7,
            dice_count: 3,
            keep_highest: true,
            raw_rolls: None,
            selected_roll: None,
            base_damage: None,
            damage_type: None,
            physical_attribute: None,
            ap_cost: None,
            energy_cost: None,
        };
        initiate_contest(&mut state, &SessionCtx::gm(), &mut rng, "t0", ContestKind::Skill, &p)
            .unwrap();

        let contest = state.contests.values().next().unwrap();
        // Seed 42 rolls [100, 84, 4]; keep-highest picks 100.
        assert_eq!(contest.initiator.raw_rolls, vec![100, 84, 4]);
        assert_eq!(contest.initiator.selected_roll, 100);
        assert_eq!(contest.initiator.total, 107);
    }

    #[test]
    fn keep_lowest_selects_the_minimum() {
        let mut state = state_with(serde_json::json!([{ "id": "atk" }, { "id": "def" }]));
        let mut rng = RngState::new(42);
        let p = InitiateContestPayload {
            initiator_entity_id: EntityId::from("atk"),
            target_entity_id: None,
            target_player_id: None,
            skill: "stealth".into(),
            skill_modifier: 0,
            dice_count: 3,
            keep_highest: false,
            raw_rolls: None,
            selected_roll: None,
            base_damage: None,
            damage_type: None,
            physical_attribute: None,
            ap_cost: None,
            energy_cost: None,
        };
        initiate_contest(&mut state, &SessionCtx::gm(), &mut rng, "t0", ContestKind::Skill, &p)
            .unwrap();
        let contest = state.contests.values().next().unwrap();
        assert_eq!(contest.initiator.selected_roll, 4);
    }

    #[test]
    fn response_request_routes_to_target_controller() {
        let mut state = state_with(serde_json::json!([
            { "id": "atk" },
            { "id": "def", "controller": "player:u7" },
        ]));
        let mut rng = RngState::new(1);
        let p = InitiateContestPayload {
            initiator_entity_id: EntityId::from("atk"),
            target_entity_id: Some(EntityId::from("def")),
            target_player_id: None,
            skill: "blades".into(),
            skill_modifier: 0,
            dice_count: 1,
            keep_highest: true,
            raw_rolls: Some(vec![55]),
            selected_roll: Some(55),
            base_damage: None,
            damage_type: None,
            physical_attribute: None,
            ap_cost: None,
            energy_cost: None,
        };
        let outcome =
            initiate_contest(&mut state, &SessionCtx::gm(), &mut rng, "t0", ContestKind::Skill, &p)
                .unwrap();

        let request = outcome
            .events
            .iter()
            .find(|o| matches!(o.body, EventBody::SkillContestResponseRequested { .. }))
            .unwrap();
        assert_eq!(request.audience, Audience::Player(PlayerId::from("u7")));
    }

    #[test]
    fn insufficient_energy_blocks_attack_contest() {
        let mut state = state_with(serde_json::json!([
            { "id": "atk", "energy": { "current": 0, "max": 100 } },
            { "id": "def" },
        ]));
        let mut rng = RngState::new(1);
        let p = InitiateContestPayload {
            initiator_entity_id: EntityId::from("atk"),
            target_entity_id: Some(EntityId::from("def")),
            target_player_id: None,
            skill: "blades".into(),
            skill_modifier: 0,
            dice_count: 1,
            keep_highest: true,
            raw_rolls: None,
            selected_roll: None,
            base_damage: Some(10),
            damage_type: Some("laceration".into()),
            physical_attribute: None,
            ap_cost: None,
            energy_cost: None,
        };
        let err =
            initiate_contest(&mut state, &SessionCtx::gm(), &mut rng, "t0", ContestKind::Attack, &p)
                .unwrap_err();
        assert_eq!(err, Reject::failed("Insufficient Energy"));
        assert!(state.contests.is_empty());
    }
}
