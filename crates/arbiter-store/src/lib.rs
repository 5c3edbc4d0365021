//! SQLite-backed storage facade — one database file per encounter session.
//!
//! Row-oriented and synchronous; the owning session task is the only caller,
//! so there is no connection pooling and no cross-session access. Storage is
//! durable by construction: the session hydrates from here after a restart.

mod db;
mod schema;

pub use db::SessionStore;
