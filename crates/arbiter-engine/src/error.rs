//! Handler failure taxonomy.
//!
//! Every failed handler surfaces exactly one `ACTION_REJECTED` with a
//! human-readable reason; the variants only matter for logging and tests.
//! Malformed payloads are caught before dispatch and surface as `ERROR`.

/// A rejected operation. Never unwinds across the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    /// Caller is not GM / does not control the entity.
    PermissionDenied(String),
    /// Insufficient resources, wrong phase, occupied cell, stale contest...
    PreconditionFailed(String),
    /// Referenced entity or contest does not exist.
    NotFound(String),
}

impl Reject {
    pub fn denied(reason: impl Into<String>) -> Self {
        Reject::PermissionDenied(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Reject::PreconditionFailed(reason.into())
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Reject::NotFound(reason.into())
    }

    pub fn reason(&self) -> &str {
        match self {
            Reject::PermissionDenied(r) | Reject::PreconditionFailed(r) | Reject::NotFound(r) => r,
        }
    }
}

impl std::fmt::Display for Reject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}
