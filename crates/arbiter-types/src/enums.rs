//! Enum types shared across the authority.
//!
//! Serde renames pin the exact wire strings the clients already speak.

use serde::{Deserialize, Serialize};

/// Encounter lifecycle phase.
///
/// `ActiveTurn` is an internal refinement of `Active`; state-sync projection
/// reports it to clients as `active` (client contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Setup,
    Initiative,
    Active,
    ActiveTurn,
    Completed,
}

impl Phase {
    /// True while turns are being taken and resources are charged.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Active | Phase::ActiveTurn)
    }
}

/// Entity tier — narrative weight class, not the numeric level tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Minion,
    Full,
    Lieutenant,
    Hero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Ally,
    Enemy,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Pc,
    Npc,
    Monster,
}

/// Contest flavor: pure skill comparison, or an attack carrying damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestKind {
    Skill,
    Attack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    AwaitingResponse,
    Resolved,
}

/// Critical tier of a winning attack contest, selected by margin percentage
/// of the defender's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalTier {
    Normal,
    Wicked,
    Vicious,
    Brutal,
}

impl CriticalTier {
    /// Tier thresholds: brutal ≥ 200%, vicious ≥ 100%, wicked ≥ 50%.
    pub fn from_margin_percent(percent: f64) -> Self {
        if percent >= 200.0 {
            CriticalTier::Brutal
        } else if percent >= 100.0 {
            CriticalTier::Vicious
        } else if percent >= 50.0 {
            CriticalTier::Wicked
        } else {
            CriticalTier::Normal
        }
    }

    pub fn damage_multiplier(self) -> f64 {
        match self {
            CriticalTier::Brutal => 2.0,
            CriticalTier::Vicious => 1.5,
            CriticalTier::Wicked | CriticalTier::Normal => 1.0,
        }
    }

    pub fn bonus_wounds(self) -> u32 {
        match self {
            CriticalTier::Brutal => 2,
            CriticalTier::Vicious | CriticalTier::Wicked => 1,
            CriticalTier::Normal => 0,
        }
    }
}

/// Which damage-type modifier fired for a hit. The pipeline short-circuits
/// at the first match: immunity > resistance > weakness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageModifier {
    Immune,
    Resisted,
    Weakened,
    Unmodified,
}
