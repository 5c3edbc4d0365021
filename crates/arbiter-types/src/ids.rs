//! Branded/newtype ID types for type safety.
//!
//! Each ID wraps a `Box<str>` for cheap cloning and small struct size.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Box<str>);

        impl $name {
            pub fn new(s: impl Into<Box<str>>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.into())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s.into_boxed_str())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Combat encounter identifier (one session per combat).
    CombatId
);

define_id!(
    /// Campaign identifier — sessions are keyed by `(campaign, combat)`.
    CampaignId
);

define_id!(
    /// Combatant entity identifier.
    EntityId
);

define_id!(
    /// Player user identifier (from the auth layer, opaque here).
    PlayerId
);

define_id!(
    /// Link to a character row in the external authoring store.
    CharacterId
);

define_id!(
    /// Skill/attack contest identifier (uuid).
    ContestId
);

/// The authority allowed to mutate an entity.
///
/// Serialized as `"gm"` or `"player:<playerId>"` — the wire format the
/// clients and the membership API speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Controller {
    Gm,
    Player(PlayerId),
}

impl Controller {
    pub fn as_wire(&self) -> String {
        match self {
            Controller::Gm => "gm".to_string(),
            Controller::Player(id) => format!("player:{id}"),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.strip_prefix("player:") {
            Some(id) if !id.is_empty() => Controller::Player(PlayerId::from(id)),
            _ => Controller::Gm,
        }
    }
}

impl Serialize for Controller {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Controller {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Controller::parse(&s))
    }
}
