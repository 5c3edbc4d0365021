//! Movement engine — Manhattan distance on the grid, AP charging, occupancy.

use arbiter_types::event::{EventBody, Outbound};
use arbiter_types::ids::EntityId;
use arbiter_types::message::{DeclareMovementPayload, GmMoveEntityPayload};
use arbiter_types::state::{EncounterState, GridPosition};

use crate::dispatch::Outcome;
use crate::error::Reject;
use crate::permission::{can_control, SessionCtx};

/// Squares covered per AP: the entity's physical attribute, floored at 3.
fn squares_per_ap(physical: i64) -> i64 {
    physical.max(3)
}

#[allow(clippy::too_many_arguments)]
fn move_entity(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    entity_id: &EntityId,
    target: GridPosition,
    path: Option<Vec<GridPosition>>,
    force: bool,
    ignore_ap_cost: bool,
) -> Result<Outcome, Reject> {
    let entity = state
        .entity(entity_id)
        .ok_or_else(|| Reject::not_found("Entity not found"))?;
    if !can_control(ctx, entity) {
        return Err(Reject::denied("You do not control this entity"));
    }
    if target.row >= state.grid_config.rows || target.col >= state.grid_config.cols {
        return Err(Reject::failed("Target cell is out of bounds"));
    }

    // Fresh placement: no prior position means zero distance.
    let from = state.positions.get(entity_id).copied().unwrap_or(target);
    let distance = from.row.abs_diff(target.row) + from.col.abs_diff(target.col);

    let per_ap = squares_per_ap(entity.physical_attribute());
    let full_cost = (i64::from(distance) + per_ap - 1) / per_ap;

    // AP is only charged mid-combat, and never on GM force/free moves.
    let charged = state.phase.is_active() && !force && !ignore_ap_cost;
    let ap_cost = if charged { full_cost } else { 0 };
    if charged && entity.ap.current < ap_cost {
        return Err(Reject::failed("Insufficient AP"));
    }

    if !force {
        if let Some(occupant) = state.occupant(target.row, target.col) {
            if occupant != entity_id {
                return Err(Reject::failed("Target cell is occupied"));
            }
        }
    }

    state.positions.insert(entity_id.clone(), target);
    let remaining_ap = {
        let entity = state.entity_mut(entity_id).expect("checked above");
        if charged {
            entity.ap.drain(ap_cost);
        }
        entity.ap.current
    };

    Ok(Outcome::mutated(vec![Outbound::all(EventBody::MovementExecuted {
        entity_id: entity_id.clone(),
        from,
        to: target,
        path,
        distance,
        ap_cost,
        remaining_ap,
    })]))
}

pub fn declare_movement(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &DeclareMovementPayload,
) -> Result<Outcome, Reject> {
    move_entity(
        state,
        ctx,
        &p.entity_id,
        GridPosition { row: p.target_row, col: p.target_col },
        p.path.clone(),
        false,
        false,
    )
}

/// GM form: gated by the router, supports `force` (ignore occupancy) and
/// `ignoreApCost`.
pub fn gm_move_entity(
    state: &mut EncounterState,
    ctx: &SessionCtx,
    p: &GmMoveEntityPayload,
) -> Result<Outcome, Reject> {
    move_entity(
        state,
        ctx,
        &p.entity_id,
        GridPosition { row: p.target_row, col: p.target_col },
        None,
        p.force,
        p.ignore_ap_cost,
    )
}
