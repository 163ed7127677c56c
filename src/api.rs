//! Public API for the simulation.
//!
//! `SimWorld` owns the ECS world and the tick schedule and is the interface
//! for the surrounding application: it spawns entities, forwards player
//! orders and placement requests, steps time and hands out snapshots.
//!
//! ## Fixed Timestep
//!
//! The simulation uses a fixed timestep internally (default 30 Hz). When `step(dt)` is called,
//! the simulation accumulates time and runs fixed updates as needed. This ensures deterministic
//! behavior regardless of frame rate.

use crate::components::*;
use crate::config::{GameConfig, UnitClassConfig};
use crate::error::{PlacementError, SimError, TickError};
use crate::flow_field::{FlowField, FlowFieldGoal};
use crate::resources::*;
use crate::schedule::SimSchedule;
use crate::spatial::insert_spatial_hashes;
use crate::systems::{default_schedule, footprint_for, spawn_building, PendingDamage};
use crate::world::{LatestSnapshot, Snapshot};
use bevy_ecs::prelude::*;
use bevy_ecs::world::CommandQueue;

/// Radius of the ring of gather spots around a resource node.
const GATHER_SPOT_RADIUS: f32 = 1.5;

/// The main simulation world container.
///
/// Holds the ECS world and schedule, providing a clean API for:
/// - Initializing the simulation
/// - Stepping the simulation forward
/// - Extracting state snapshots
/// - Issuing commands
pub struct SimWorld {
    world: World,
    schedule: SimSchedule,
    /// Accumulated time for fixed timestep.
    time_accumulator: f32,
    /// Fixed updates that reported a failed group.
    failed_ticks: u64,
}

impl SimWorld {
    /// Create a simulation world with the default configuration.
    pub fn new() -> Result<Self, SimError> {
        Self::with_config(GameConfig::default())
    }

    /// Parse a JSON config record and create a simulation world from it.
    pub fn from_json_config(json: &str) -> Result<Self, SimError> {
        Self::with_config(GameConfig::from_json_str(json)?)
    }

    /// Create a simulation world with a custom configuration.
    ///
    /// Fails when the config is invalid or the schedule's ordering
    /// constraints cannot be satisfied.
    pub fn with_config(config: GameConfig) -> Result<Self, SimError> {
        config.validate()?;
        let schedule = default_schedule()?;

        let mut world = World::new();

        // Clock and ledger
        world.insert_resource(GameTime::new(config.fixed_timestep));
        world.insert_resource(GlobalResources {
            wood: config.starting_wood,
            stone: config.starting_stone,
            food: config.starting_food,
            gold: config.starting_gold,
            population: 0,
            population_cap: 0,
        });
        world.insert_resource(PendingTransactions::default());
        world.insert_resource(PendingDamage::default());
        world.insert_resource(GameStatus::default());

        // External collaborator queues
        world.insert_resource(PlayerOrders::default());
        world.insert_resource(PlacementRequests::default());
        world.insert_resource(PlacementOutcomes::default());

        // Spatial structures
        world.insert_resource(BuildingGrid::new(config.building_cell_size, config.building_grid_size()));
        world.insert_resource(FlowField::from_config(&config));
        world.insert_resource(FlowFieldGoal::default());
        insert_spatial_hashes(&mut world, &config);

        world.insert_resource(LatestSnapshot::default());

        tracing::info!(
            fixed_timestep = config.fixed_timestep,
            map_size = config.map_size,
            "simulation world created"
        );
        world.insert_resource(config);

        Ok(Self {
            world,
            schedule,
            time_accumulator: 0.0,
            failed_ticks: 0,
        })
    }

    /// Step the simulation forward by `dt` seconds.
    ///
    /// Uses fixed timestep internally - accumulates time and runs fixed updates
    /// as needed. Returns the number of fixed updates run. Failed groups are
    /// logged by the scheduler and counted in `failed_ticks`.
    pub fn step(&mut self, dt: f32) -> u32 {
        if !dt.is_finite() || dt < 0.0 {
            tracing::warn!(dt, "ignoring invalid step duration");
            return 0;
        }
        let fixed_dt = self.config().fixed_timestep;

        self.time_accumulator += dt;

        let mut ran = 0;
        while self.time_accumulator >= fixed_dt {
            // Failures are already logged per group.
            let _ = self.tick();
            self.time_accumulator -= fixed_dt;
            ran += 1;
        }
        ran
    }

    /// Run exactly one fixed update.
    pub fn tick(&mut self) -> Result<(), TickError> {
        self.world.resource_mut::<GameTime>().advance();
        let result = self.schedule.run_tick(&mut self.world);
        if result.is_err() {
            self.failed_ticks += 1;
        }
        result
    }

    /// Run `count` fixed updates, stopping at the first failed one.
    pub fn run_ticks(&mut self, count: u32) -> Result<(), TickError> {
        for _ in 0..count {
            self.tick()?;
        }
        Ok(())
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    /// Build a fresh snapshot of the current state.
    pub fn snapshot(&mut self) -> Snapshot {
        Snapshot::from_world(&mut self.world)
    }

    /// Snapshot published at the end of the last tick.
    pub fn latest_snapshot(&self) -> &Snapshot {
        &self.world.resource::<LatestSnapshot>().0
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&mut self) -> Result<String, SimError> {
        Ok(self.snapshot().to_json()?)
    }

    // ========================================================================
    // STATE ACCESS
    // ========================================================================

    pub fn config(&self) -> &GameConfig {
        self.world.resource::<GameConfig>()
    }

    pub fn resources(&self) -> GlobalResources {
        *self.world.resource::<GlobalResources>()
    }

    pub fn status(&self) -> GameStatus {
        *self.world.resource::<GameStatus>()
    }

    /// Get the current tick number.
    pub fn current_tick(&self) -> u64 {
        self.world.resource::<GameTime>().tick
    }

    /// Get the elapsed simulation time.
    pub fn current_time(&self) -> f64 {
        self.world.resource::<GameTime>().elapsed
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }

    pub fn schedule(&self) -> &SimSchedule {
        &self.schedule
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    // ========================================================================
    // ORDERS AND REQUESTS
    // ========================================================================

    /// Queue a player order for the next Input group.
    pub fn issue_order(&mut self, order: PlayerOrder) {
        self.world.resource_mut::<PlayerOrders>().0.push(order);
    }

    pub fn select(&mut self, entities: Vec<Entity>) {
        self.issue_order(PlayerOrder::Select(entities));
    }

    pub fn move_selected(&mut self, x: f32, y: f32) {
        self.issue_order(PlayerOrder::MoveSelected { x, y });
    }

    pub fn set_flow_goal(&mut self, x: f32, y: f32) {
        self.issue_order(PlayerOrder::SetFlowGoal { x, y });
    }

    /// Queue a placement request for the next Building group.
    pub fn request_placement(&mut self, kind: BuildingKind, cell: (i32, i32), player: u8) {
        self.world
            .resource_mut::<PlacementRequests>()
            .0
            .push(PlacementRequest { kind, cell, player });
    }

    /// Outcomes of the requests processed by the last Building group.
    pub fn placement_outcomes(&self) -> &[PlacementOutcome] {
        &self.world.resource::<PlacementOutcomes>().0
    }

    // ========================================================================
    // SPAWNING
    // ========================================================================

    fn unit_bundle(class: &UnitClassConfig, faction: Faction, x: f32, y: f32) -> UnitBundle {
        UnitBundle {
            faction,
            position: Position::new(x, y),
            stats: MovementStats {
                max_speed: class.max_speed,
                acceleration: class.acceleration,
                rotation_speed: class.rotation_speed,
                ..Default::default()
            },
            health: Health::new(class.max_health),
            ..Default::default()
        }
    }

    fn attack_stats(class: &UnitClassConfig) -> AttackStats {
        if class.projectile_speed > 0.0 {
            AttackStats::ranged(
                class.attack_damage,
                class.attack_range,
                class.attack_cooldown,
                class.projectile_speed,
            )
        } else {
            AttackStats::melee(class.attack_damage, class.attack_range, class.attack_cooldown)
        }
    }

    /// Spawn a player worker.
    pub fn spawn_worker(&mut self, x: f32, y: f32) -> Entity {
        let config = self.config();
        let bundle = WorkerBundle {
            unit: Self::unit_bundle(&config.worker, Faction::Player, x, y),
            worker_stats: WorkerStats {
                gather_speed: config.worker_gather_speed,
                max_carry_capacity: config.worker_carry_capacity,
                search_radius: config.worker_search_radius,
            },
            ..Default::default()
        };
        let threat = ThreatLevel(config.unit_threat);
        self.world.spawn((bundle, threat, PlayerId(0))).id()
    }

    /// Spawn a player melee soldier.
    pub fn spawn_soldier(&mut self, x: f32, y: f32) -> Entity {
        let config = self.config();
        let unit = Self::unit_bundle(&config.soldier, Faction::Player, x, y);
        let attack = Self::attack_stats(&config.soldier);
        let threat = ThreatLevel(config.unit_threat);
        self.world
            .spawn((
                unit,
                attack,
                AttackTarget::default(),
                threat,
                Soldier,
                PlayerId(0),
                ObstacleAvoider::default(),
            ))
            .id()
    }

    /// Spawn a player ranged soldier.
    pub fn spawn_archer(&mut self, x: f32, y: f32) -> Entity {
        let config = self.config();
        let unit = Self::unit_bundle(&config.archer, Faction::Player, x, y);
        let attack = Self::attack_stats(&config.archer);
        let threat = ThreatLevel(config.unit_threat);
        self.world
            .spawn((
                unit,
                attack,
                AttackTarget::default(),
                threat,
                Soldier,
                PlayerId(0),
                ObstacleAvoider::default(),
            ))
            .id()
    }

    /// Spawn a hostile AI unit.
    pub fn spawn_enemy(&mut self, x: f32, y: f32) -> Entity {
        let config = self.config();
        let unit = Self::unit_bundle(&config.enemy, Faction::Enemy, x, y);
        let attack = Self::attack_stats(&config.enemy);
        let ai = EnemyAi::new(config.enemy_detection_radius, config.enemy_retarget_interval);
        self.world
            .spawn((
                unit,
                attack,
                ai,
                EnemyUnit,
                Flocking::default(),
                ObstacleAvoider::default(),
            ))
            .id()
    }

    /// Spawn a harvestable resource node.
    pub fn spawn_resource_node(&mut self, kind: ResourceType, x: f32, y: f32, amount: u32, max_gatherers: u32) -> Entity {
        self.world
            .spawn((
                Position::new(x, y),
                ResourceNode::new(kind, amount, max_gatherers, GATHER_SPOT_RADIUS),
            ))
            .id()
    }

    /// Place a constructed building at `cell` without paying for it.
    ///
    /// Population capacity is credited immediately.
    pub fn spawn_building(&mut self, kind: BuildingKind, cell: (i32, i32)) -> Result<Entity, PlacementError> {
        let config = self.config().clone();
        let footprint = footprint_for(&config, kind, cell);
        self.world.resource::<BuildingGrid>().check(&footprint)?;

        let mut pending = PendingTransactions::default();
        let entity = self.world.resource_scope(|world, mut grid: Mut<BuildingGrid>| {
            let mut queue = CommandQueue::default();
            let entity = {
                let mut commands = Commands::new(&mut queue, world);
                spawn_building(&mut commands, &mut grid, &mut pending, &config, kind, footprint, 0)
            };
            queue.apply(world);
            entity
        });

        let mut ledger = self.world.resource_mut::<GlobalResources>();
        for transaction in &pending.0 {
            ledger.apply(transaction);
        }
        tracing::debug!(?kind, ?cell, ?entity, "building spawned");
        Ok(entity)
    }

    /// Spawn a static obstacle.
    pub fn spawn_obstacle(&mut self, x: f32, y: f32, radius: f32) -> Entity {
        self.world.spawn((Position::new(x, y), Obstacle { radius })).id()
    }
}
