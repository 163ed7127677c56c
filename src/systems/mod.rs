//! ECS systems for the RTS simulation.
//!
//! Systems contain the game logic that operates on components.
//!
//! ## Update Groups
//!
//! [`default_schedule`] registers every system into its group. Groups run in
//! a fixed order; inside a group the declared constraints decide the order.
//!
//! **Input** - external orders:
//! - `player_orders` - selection, move orders, flow goal requests
//! - `flow_field_goal` - recompute the flow field when the goal changed
//!
//! **MovementAi** - hashes first, then AI, then the movement chain:
//! - `rebuild_*_hash` - every spatial index queried this tick
//! - `enemy_ai` - enemy state machine and destinations
//! - `flow_field_sample` → `obstacle_avoidance` → `steering` →
//!   `target_seeking` → `integration`
//!
//! **Economy**:
//! - `release_stale_gather_spots` → `worker_economy`
//! - `resource_regen`, `population_census`
//!
//! **Combat** - gather/apply:
//! - `health_regen`, `target_acquisition` → `attack_resolution`
//! - `projectile_movement` → `projectile_collision`
//! - `damage_application` → `death_marking`
//!
//! **Building**: `placement` → `wall_connection`, `building_destruction`.
//! Placement and destruction write the grid, the staged ledger and the match
//! status directly, so those resources are checkpointed with the group.
//!
//! **GameState**: `apply_transactions`, `day_night`
//!
//! **Cleanup**: `death_cleanup`
//!
//! **Presentation**: `publish_snapshot`

pub mod buildings;
pub mod combat;
pub mod economy;
pub mod enemy_ai;
pub mod game_state;
pub mod input;
pub mod movement;
pub mod projectile;

pub use buildings::*;
pub use combat::*;
pub use economy::*;
pub use enemy_ai::*;
pub use game_state::*;
pub use input::*;
pub use movement::*;
pub use projectile::*;

use crate::error::ScheduleError;
use crate::flow_field::flow_field_goal_system;
use crate::resources::{BuildingGrid, GameStatus, PendingTransactions, PlacementOutcomes, PlacementRequests};
use crate::schedule::{ScheduleBuilder, SimSchedule, UpdateGroup};
use crate::spatial::{
    rebuild_deposit_hash_system, rebuild_flock_hash_system, rebuild_obstacle_hash_system,
    rebuild_resource_hash_system, rebuild_target_hash_system, rebuild_unit_hash_system,
};
use crate::world::publish_snapshot_system;

/// Names of the hash rebuild systems; everything else in MovementAi runs after them.
const HASH_REBUILDS: [&str; 6] = [
    "rebuild_unit_hash",
    "rebuild_target_hash",
    "rebuild_resource_hash",
    "rebuild_deposit_hash",
    "rebuild_obstacle_hash",
    "rebuild_flock_hash",
];

/// Register every simulation system with its group and ordering constraints.
pub fn register_systems(builder: &mut ScheduleBuilder) {
    use UpdateGroup::*;

    builder.add_system(Input, "player_orders", player_orders_system);
    builder
        .add_system(Input, "flow_field_goal", flow_field_goal_system)
        .after("player_orders");

    builder.add_system(MovementAi, "rebuild_unit_hash", rebuild_unit_hash_system);
    builder.add_system(MovementAi, "rebuild_target_hash", rebuild_target_hash_system);
    builder.add_system(MovementAi, "rebuild_resource_hash", rebuild_resource_hash_system);
    builder.add_system(MovementAi, "rebuild_deposit_hash", rebuild_deposit_hash_system);
    builder.add_system(MovementAi, "rebuild_obstacle_hash", rebuild_obstacle_hash_system);
    builder.add_system(MovementAi, "rebuild_flock_hash", rebuild_flock_hash_system);

    let mut enemy_ai = builder.add_system(MovementAi, "enemy_ai", enemy_ai_system);
    for rebuild in HASH_REBUILDS {
        enemy_ai = enemy_ai.after(rebuild);
    }
    let mut flow_sample = builder.add_system(MovementAi, "flow_field_sample", flow_field_sample_system);
    for rebuild in HASH_REBUILDS {
        flow_sample = flow_sample.after(rebuild);
    }
    builder
        .add_system(MovementAi, "obstacle_avoidance", obstacle_avoidance_system)
        .after("flow_field_sample");
    builder
        .add_system(MovementAi, "steering", steering_system)
        .after("obstacle_avoidance");
    builder
        .add_system(MovementAi, "target_seeking", target_seeking_system)
        .after("steering")
        .after("enemy_ai");
    builder
        .add_system(MovementAi, "integration", integration_system)
        .after("target_seeking");

    builder.add_system(Economy, "release_stale_gather_spots", release_stale_gather_spots_system);
    builder
        .add_system(Economy, "worker_economy", worker_economy_system)
        .after("release_stale_gather_spots");
    builder
        .add_system(Economy, "resource_regen", resource_regen_system)
        .after("worker_economy");
    builder.add_system(Economy, "population_census", population_census_system);

    builder.add_system(Combat, "health_regen", health_regen_system);
    builder.add_system(Combat, "target_acquisition", target_acquisition_system);
    builder
        .add_system(Combat, "attack_resolution", attack_resolution_system)
        .after("target_acquisition");
    builder
        .add_system(Combat, "projectile_movement", projectile_movement_system)
        .after("attack_resolution");
    builder
        .add_system(Combat, "projectile_collision", projectile_collision_system)
        .after("projectile_movement");
    builder
        .add_system(Combat, "damage_application", damage_application_system)
        .after("health_regen")
        .after("projectile_collision");
    builder
        .add_system(Combat, "death_marking", death_marking_system)
        .after("damage_application");

    builder.add_system(Building, "placement", placement_system);
    builder
        .add_system(Building, "wall_connection", wall_connection_system)
        .after("placement");
    builder.add_system(Building, "building_destruction", building_destruction_system);
    builder
        .checkpoint_resource::<PlacementRequests>(Building)
        .checkpoint_resource::<PlacementOutcomes>(Building)
        .checkpoint_resource::<BuildingGrid>(Building)
        .checkpoint_resource::<PendingTransactions>(Building)
        .checkpoint_resource::<GameStatus>(Building);

    builder.add_system(GameState, "apply_transactions", apply_transactions_system);
    builder.add_system(GameState, "day_night", day_night_system);

    builder.add_system(Cleanup, "death_cleanup", death_cleanup_system);

    builder.add_system(Presentation, "publish_snapshot", publish_snapshot_system);
}

/// The full tick schedule.
pub fn default_schedule() -> Result<SimSchedule, ScheduleError> {
    let mut builder = ScheduleBuilder::new();
    register_systems(&mut builder);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::*;

    #[test]
    fn test_default_schedule_builds() {
        let schedule = default_schedule().unwrap();
        assert_eq!(schedule.plans().count(), UpdateGroup::ORDER.len());
    }

    #[test]
    fn test_movement_order() {
        let schedule = default_schedule().unwrap();
        let order = &schedule.plan(UpdateGroup::MovementAi).unwrap().order;
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();

        for rebuild in HASH_REBUILDS {
            assert!(pos(rebuild) < pos("enemy_ai"));
            assert!(pos(rebuild) < pos("flow_field_sample"));
        }
        assert!(pos("flow_field_sample") < pos("obstacle_avoidance"));
        assert!(pos("obstacle_avoidance") < pos("steering"));
        assert!(pos("steering") < pos("target_seeking"));
        assert!(pos("enemy_ai") < pos("target_seeking"));
        assert!(pos("target_seeking") < pos("integration"));
    }

    #[test]
    fn test_combat_applies_damage_after_projectiles() {
        let schedule = default_schedule().unwrap();
        let plan = schedule.plan(UpdateGroup::Combat).unwrap();
        let pos = |name: &str| plan.order.iter().position(|n| *n == name).unwrap();
        assert!(pos("projectile_collision") < pos("damage_application"));
        assert!(pos("damage_application") < pos("death_marking"));
        assert_eq!(plan.batches[0], vec!["health_regen", "target_acquisition"]);
    }

    #[derive(Resource)]
    struct FailOnce(bool);

    fn fail_once(mut flag: ResMut<FailOnce>) {
        if flag.0 {
            flag.0 = false;
            panic!("building group failure");
        }
    }

    #[test]
    fn test_failed_building_group_leaves_no_placement_trace() {
        use crate::api::SimWorld;
        use crate::components::{Building, BuildingKind};
        use crate::resources::GlobalResources;

        let mut sim = SimWorld::new().unwrap();
        sim.world_mut().insert_resource(FailOnce(true));

        let mut builder = ScheduleBuilder::new();
        register_systems(&mut builder);
        builder
            .add_system(UpdateGroup::Building, "fail_once", fail_once)
            .after("placement")
            .after("building_destruction");
        let mut schedule = builder.build().unwrap();

        let before = *sim.world().resource::<GlobalResources>();
        sim.request_placement(BuildingKind::House, (3, 3), 0);

        let world = sim.world_mut();
        assert!(schedule.run_tick(world).is_err());

        let count_buildings = |world: &mut World| world.query_filtered::<(), With<Building>>().iter(world).count();
        assert_eq!(count_buildings(world), 0);
        assert_eq!(world.resource::<BuildingGrid>().occupant((3, 3)), None);
        assert_eq!(*world.resource::<GlobalResources>(), before);
        assert!(world.resource::<PlacementOutcomes>().0.is_empty());
        assert_eq!(world.resource::<PlacementRequests>().0.len(), 1);

        // The request survives and is placed once the group runs cleanly.
        schedule.run_tick(world).unwrap();
        assert_eq!(count_buildings(world), 1);
        assert!(world.resource::<BuildingGrid>().occupant((3, 3)).is_some());
        let after = *world.resource::<GlobalResources>();
        assert!(after.wood < before.wood);
        assert!(after.population_cap > before.population_cap);
    }
}
