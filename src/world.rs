//! Presentation snapshots.
//!
//! The `Snapshot` struct is a serializable, read-only view of the simulation
//! for a renderer or UI. The Presentation group publishes one into
//! `LatestSnapshot` at the end of every tick; consumers read it whenever they
//! like and never hold up the simulation.

use crate::components::*;
use crate::resources::{GameStatus, GameTime, GlobalResources};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Snapshot of a single mobile unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: u64,
    pub faction: Faction,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub heading: f32,
    pub health: f32,
    pub health_max: f32,
    pub selected: bool,
    pub dead: bool,
    pub worker_state: Option<WorkerState>,
    pub carried: Option<(ResourceType, u32)>,
    pub enemy_state: Option<EnemyState>,
}

/// Snapshot of a building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingSnapshot {
    pub id: u64,
    pub kind: BuildingKind,
    pub x: f32,
    pub y: f32,
    pub cell: (i32, i32),
    pub health: f32,
    pub health_max: f32,
    pub constructed: bool,
    pub dead: bool,
    /// Number of linked neighbor walls; zero for non-walls.
    pub wall_links: usize,
}

/// Snapshot of a resource node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNodeSnapshot {
    pub id: u64,
    pub kind: ResourceType,
    pub x: f32,
    pub y: f32,
    pub amount: u32,
    pub max_amount: u32,
    pub gatherers: u32,
}

/// Snapshot of a projectile in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub x: f32,
    pub y: f32,
    pub faction: Faction,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current simulation tick.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f64,
    pub units: Vec<UnitSnapshot>,
    pub buildings: Vec<BuildingSnapshot>,
    pub resource_nodes: Vec<ResourceNodeSnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
    pub ledger: GlobalResources,
    pub status: GameStatus,
}

impl Snapshot {
    /// Create a snapshot from the ECS world. Entries are ordered by entity id.
    pub fn from_world(world: &mut World) -> Self {
        let time = world.get_resource::<GameTime>().copied().unwrap_or_default();

        let mut units = Vec::new();
        let mut unit_query = world.query_filtered::<(
            Entity,
            &Faction,
            &Position,
            Option<&Velocity>,
            Option<&Heading>,
            &Health,
            Has<Selected>,
            Has<Dead>,
            Option<&WorkerEconomy>,
            Option<&EnemyAi>,
        ), Without<Building>>();
        for (entity, faction, pos, vel, heading, health, selected, dead, economy, ai) in unit_query.iter(world) {
            let vel = vel.copied().unwrap_or_default();
            units.push(UnitSnapshot {
                id: entity.to_bits(),
                faction: *faction,
                x: pos.x,
                y: pos.y,
                vx: vel.vx,
                vy: vel.vy,
                heading: heading.map(|h| h.0).unwrap_or(0.0),
                health: health.current,
                health_max: health.max,
                selected,
                dead,
                worker_state: economy.map(|e| e.state),
                carried: economy.and_then(|e| e.carried_type.map(|kind| (kind, e.carried_amount))),
                enemy_state: ai.map(|a| a.state),
            });
        }
        units.sort_by_key(|u| u.id);

        let mut buildings = Vec::new();
        let mut building_query = world.query_filtered::<(
            Entity,
            &BuildingKind,
            &Position,
            &GridCell,
            &Health,
            Has<Constructed>,
            Has<Dead>,
            Option<&WallConnections>,
        ), With<Building>>();
        for (entity, kind, pos, cell, health, constructed, dead, links) in building_query.iter(world) {
            buildings.push(BuildingSnapshot {
                id: entity.to_bits(),
                kind: *kind,
                x: pos.x,
                y: pos.y,
                cell: (cell.x, cell.y),
                health: health.current,
                health_max: health.max,
                constructed,
                dead,
                wall_links: links.map(|l| l.count()).unwrap_or(0),
            });
        }
        buildings.sort_by_key(|b| b.id);

        let mut resource_nodes = Vec::new();
        let mut node_query = world.query::<(Entity, &Position, &ResourceNode)>();
        for (entity, pos, node) in node_query.iter(world) {
            resource_nodes.push(ResourceNodeSnapshot {
                id: entity.to_bits(),
                kind: node.kind,
                x: pos.x,
                y: pos.y,
                amount: node.current_amount,
                max_amount: node.max_amount,
                gatherers: node.gatherer_count,
            });
        }
        resource_nodes.sort_by_key(|n| n.id);

        let mut projectile_query = world.query::<(&Position, &Projectile)>();
        let projectiles = projectile_query
            .iter(world)
            .map(|(pos, p)| ProjectileSnapshot {
                x: pos.x,
                y: pos.y,
                faction: p.source_faction,
            })
            .collect();

        Self {
            tick: time.tick,
            time: time.elapsed,
            units,
            buildings,
            resource_nodes,
            projectiles,
            ledger: world.get_resource::<GlobalResources>().copied().unwrap_or_default(),
            status: world.get_resource::<GameStatus>().copied().unwrap_or_default(),
        }
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn unit(&self, entity: Entity) -> Option<&UnitSnapshot> {
        let id = entity.to_bits();
        self.units.iter().find(|u| u.id == id)
    }
}

/// Most recent snapshot published by the Presentation group.
#[derive(Resource, Debug, Clone, Default)]
pub struct LatestSnapshot(pub Snapshot);

/// Publish the end-of-tick snapshot.
pub fn publish_snapshot_system(world: &mut World) {
    let snapshot = Snapshot::from_world(world);
    world.insert_resource(LatestSnapshot(snapshot));
}
