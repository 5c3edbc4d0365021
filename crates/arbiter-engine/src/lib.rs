//! Combat logic for the session authority.
//!
//! Every handler is a pure, synchronous function over `EncounterState`: it
//! validates linear preconditions (explicit early returns, never panics),
//! mutates state, and returns the events to broadcast. The dispatch layer in
//! `dispatch` is the single entry point the server calls.

pub mod actions;
pub mod channeling;
pub mod contest;
pub mod damage;
pub mod dispatch;
pub mod error;
pub mod gm_tools;
pub mod initiative;
pub mod lifecycle;
pub mod movement;
pub mod permission;
pub mod state_sync;

pub use dispatch::{dispatch, CharacterSync, Outcome};
pub use error::Reject;
pub use permission::SessionCtx;
