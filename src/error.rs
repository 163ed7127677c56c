//! Error types for the simulation core.
//!
//! Only startup/configuration failures and whole-group failures are errors.
//! Per-entity problems (stale references, missing components, no target found)
//! are handled inside systems by skipping the entity for the current tick.

use crate::components::BuildingKind;
use crate::schedule::UpdateGroup;
use thiserror::Error;

/// Invalid scheduler configuration. Fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("system `{name}` registered twice in group {group:?}")]
    DuplicateSystem { group: UpdateGroup, name: String },

    #[error("system `{system}` in group {group:?} references unknown system `{missing}`")]
    UnknownSystem {
        group: UpdateGroup,
        system: String,
        missing: String,
    },

    #[error("system `{system}` in group {group:?} is constrained against `{other}` from group {other_group:?}")]
    CrossGroupConstraint {
        group: UpdateGroup,
        system: String,
        other: String,
        other_group: UpdateGroup,
    },

    #[error("cyclic ordering constraints in group {group:?} between: {}", systems.join(", "))]
    Cycle {
        group: UpdateGroup,
        systems: Vec<String>,
    },
}

/// A tick completed, but one or more groups aborted and had their
/// structural changes discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TickError {
    #[error("update groups failed this tick: {groups:?}")]
    GroupsFailed { groups: Vec<UpdateGroup> },
}

/// Invalid or unreadable configuration record.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config field `{field}` must be positive (got {value})")]
    NonPositive { field: &'static str, value: f32 },

    #[error("config field `{field}` must be at least {min} (got {value})")]
    TooSmall {
        field: &'static str,
        min: usize,
        value: usize,
    },
}

/// Why a placement request was rejected. Rejections have no side effects.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlacementError {
    #[error("not enough resources for {kind:?}")]
    Underfunded { kind: BuildingKind },

    #[error("cell ({x}, {y}) is already occupied")]
    Occupied { x: i32, y: i32 },

    #[error("cell ({x}, {y}) is outside the map")]
    OutOfBounds { x: i32, y: i32 },
}

/// Umbrella error for the public `SimWorld` API.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tick(#[from] TickError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("failed to serialize snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}
