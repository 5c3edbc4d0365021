//! Session identity and the entity control check.

use std::collections::BTreeSet;

use arbiter_types::ids::{Controller, EntityId, PlayerId};
use arbiter_types::state::Entity;

/// Per-connection identity, derived at accept time from the connect query
/// parameters and the entity roster.
#[derive(Debug, Clone, Default)]
pub struct SessionCtx {
    pub player_id: Option<PlayerId>,
    pub is_gm: bool,
    /// Declared or derived controlled-entity set.
    pub controlled: BTreeSet<EntityId>,
}

impl SessionCtx {
    pub fn gm() -> Self {
        Self { player_id: None, is_gm: true, controlled: BTreeSet::new() }
    }

    pub fn player(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: Some(player_id.into()),
            is_gm: false,
            controlled: BTreeSet::new(),
        }
    }
}

/// True if the session may mutate the entity: GM, matching
/// `player:<playerId>` controller, or an explicitly declared entity id.
pub fn can_control(ctx: &SessionCtx, entity: &Entity) -> bool {
    if ctx.is_gm {
        return true;
    }
    if let (Some(player_id), Controller::Player(owner)) = (&ctx.player_id, &entity.controller) {
        if player_id == owner {
            return true;
        }
    }
    ctx.controlled.contains(&entity.id)
}
