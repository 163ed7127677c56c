//! RTS Simulation Core
//!
//! A deterministic, fixed-timestep ECS simulation for a real-time strategy
//! game: worker economy, enemy waves, towers, walls and crowd movement.
//! Uses `bevy_ecs` for the entity-component-system architecture.

pub mod api;
pub mod components;
pub mod config;
pub mod error;
pub mod flow_field;
pub mod profiler;
pub mod resources;
pub mod schedule;
pub mod spatial;
pub mod systems;
pub mod world;

pub use api::SimWorld;
pub use components::*;
pub use config::{BuildingConfig, GameConfig, UnitClassConfig};
pub use error::{ConfigError, PlacementError, ScheduleError, SimError, TickError};
pub use flow_field::{FlowField, FlowFieldGoal, FlowFieldState};
pub use resources::*;
pub use schedule::{GroupPlan, ScheduleBuilder, SimSchedule, UpdateGroup};
pub use spatial::{SpatialEntry, SpatialHash};
pub use world::{LatestSnapshot, Snapshot};
