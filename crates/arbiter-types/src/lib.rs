//! Core types for the combat session authority.
//!
//! Everything that crosses a crate or wire boundary lives here: the encounter
//! state model, inbound message / outbound event protocol types, and the
//! seeded RNG the session rolls dice through. No I/O, no async.

pub mod enums;
pub mod event;
pub mod ids;
pub mod message;
pub mod rng;
pub mod snapshot;
pub mod state;
