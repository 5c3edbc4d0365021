//! Message dispatch — the single entry point the session calls per inbound
//! message.
//!
//! Gating and the per-message handler table live here. Handlers never throw
//! across this boundary: every failure is a `Reject` the caller turns into
//! one `ACTION_REJECTED`. The version counter bumps exactly once per
//! mutating completion and never on a failed path.

use std::collections::BTreeMap;

use arbiter_types::enums::ContestKind;
use arbiter_types::event::Outbound;
use arbiter_types::ids::CharacterId;
use arbiter_types::message::InboundMessage;
use arbiter_types::rng::RngState;
use arbiter_types::state::{EncounterState, Entity};

use crate::error::Reject;
use crate::permission::SessionCtx;
use crate::{actions, channeling, contest, damage, gm_tools, initiative, lifecycle, movement};

// =============================================================================
// Handler output
// =============================================================================

/// A pending upsert against the external character store. Best-effort: the
/// server ships these after the handler completes, off the critical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSync {
    pub character_id: CharacterId,
    pub wounds: BTreeMap<String, u32>,
    pub energy_current: i64,
    pub is_alive: Option<bool>,
    pub death_timestamp: Option<String>,
}

/// What a successful handler hands back to the session.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Targeted events, in broadcast order.
    pub events: Vec<Outbound>,
    /// External store upserts to ship after broadcasting.
    pub character_syncs: Vec<CharacterSync>,
    /// Whether state changed (drives the version bump, persistence, and the
    /// trailing STATE_SYNC broadcast).
    pub mutated: bool,
    /// END_COMBAT completed; the registry may tear the session down.
    pub combat_ended: bool,
}

impl Outcome {
    pub fn mutated(events: Vec<Outbound>) -> Self {
        Self { events, character_syncs: Vec::new(), mutated: true, combat_ended: false }
    }

    pub fn read_only(events: Vec<Outbound>) -> Self {
        Self { events, character_syncs: Vec::new(), mutated: false, combat_ended: false }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Route one typed inbound message to its handler.
///
/// `REQUEST_STATE` intentionally produces no events here — the state-sync
/// envelope is connection-scoped, so the session builds it per connection.
pub fn dispatch(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    rng: &mut RngState,
    now: &str,
    msg: &InboundMessage,
) -> Result<Outcome, Reject> {
    if msg.gm_only() && !ctx.is_gm {
        return Err(Reject::denied("GM privileges required"));
    }

    let outcome = match msg {
        InboundMessage::StartCombat(p) => lifecycle::start_combat(state, p, now)?,
        InboundMessage::EndCombat => lifecycle::end_combat(state)?,
        InboundMessage::RequestState => Outcome::read_only(Vec::new()),

        InboundMessage::SubmitInitiativeRoll(p) => {
            initiative::submit_initiative_roll(state, ctx, p)?
        }
        InboundMessage::EndTurn => initiative::end_turn(state, ctx)?,
        InboundMessage::DelayTurn => initiative::delay_turn(state, ctx)?,
        InboundMessage::ReadyAction(p) => initiative::ready_action(state, ctx, p, now)?,

        InboundMessage::DeclareMovement(p) => movement::declare_movement(state, ctx, p)?,
        InboundMessage::DeclareAttack(p) => actions::declare_attack(state, ctx, p)?,
        InboundMessage::DeclareAbility(p) => actions::declare_ability(state, ctx, p)?,
        InboundMessage::DeclareReaction(p) => actions::declare_reaction(state, ctx, p)?,

        InboundMessage::StartChanneling(p) => channeling::start_channeling(state, ctx, p, now)?,
        InboundMessage::ContinueChanneling(p) => channeling::continue_channeling(state, ctx, p)?,
        InboundMessage::ReleaseSpell(p) => channeling::release_spell(state, ctx, p)?,
        InboundMessage::AbortChanneling(p) => channeling::abort_channeling(state, ctx, p)?,

        InboundMessage::SubmitEndureRoll(p) => damage::submit_endure_roll(state, ctx, p)?,
        InboundMessage::SubmitDeathCheck(p) => damage::submit_death_check(state, ctx, p, now)?,

        InboundMessage::GmOverride(p) => gm_tools::gm_override(state, p)?,
        InboundMessage::GmMoveEntity(p) => movement::gm_move_entity(state, ctx, p)?,
        InboundMessage::GmApplyDamage(p) => gm_tools::apply_damage(state, p)?,
        InboundMessage::GmModifyResources(p) => gm_tools::modify_resources(state, p)?,
        InboundMessage::GmAddEntity(p) => {
            let entity: Entity = serde_json::from_value(p.entity.clone())
                .map_err(|_| Reject::failed("Invalid entity data"))?;
            gm_tools::add_entity(
                state,
                entity,
                p.initiative_roll,
                p.initiative_tiebreaker,
                p.initiative_timing.as_deref(),
            )?
        }
        InboundMessage::GmRemoveEntity(p) => gm_tools::remove_entity(state, p)?,
        InboundMessage::UpdateMapConfig(p) => gm_tools::update_map_config(state, p)?,
        InboundMessage::UpdateGridConfig(p) => gm_tools::update_grid_config(state, p)?,

        InboundMessage::InitiateSkillContest(p) => {
            contest::initiate_contest(state, ctx, rng, now, ContestKind::Skill, p)?
        }
        InboundMessage::InitiateAttackContest(p) => {
            contest::initiate_contest(state, ctx, rng, now, ContestKind::Attack, p)?
        }
        InboundMessage::RespondSkillContest(p) => contest::respond_contest(state, ctx, rng, p)?,
    };

    if outcome.mutated {
        state.touch(now);
    }
    Ok(outcome)
}
