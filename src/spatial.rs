//! Spatial hashing for efficient neighbor queries.
//!
//! Provides O(1) cell lookup and O(k) neighbor queries where k is the number
//! of entities in nearby cells, rather than O(n) for brute force.
//!
//! Every hash is cleared and rebuilt once per tick by the rebuild systems at the
//! head of the MovementAi group, so all queries in a tick see the same snapshot.
//! Entries in a cell keep insertion order, and candidates at equal distance are
//! resolved by that order. Reordering insertion (e.g. after entity reuse) can
//! change which of two equidistant candidates wins.

use crate::components::*;
use crate::config::GameConfig;
use bevy_ecs::prelude::*;
use std::collections::HashMap;

/// Entry in a spatial cell.
#[derive(Debug, Clone, Copy)]
pub struct SpatialEntry<P> {
    pub entity: Entity,
    pub x: f32,
    pub y: f32,
    pub payload: P,
}

impl<P> SpatialEntry<P> {
    #[inline]
    pub fn distance_sq(&self, x: f32, y: f32) -> f32 {
        let dx = self.x - x;
        let dy = self.y - y;
        dx * dx + dy * dy
    }
}

/// Uniform-cell spatial hash keyed by `floor(pos / cell_size)`.
///
/// Single-point hashing: an entity lives only in the cell containing its position.
#[derive(Resource, Debug)]
pub struct SpatialHash<P: Send + Sync + 'static> {
    /// Cell size in world units.
    pub cell_size: f32,
    cells: HashMap<(i32, i32), Vec<SpatialEntry<P>>>,
    count: usize,
}

impl<P: Copy + Send + Sync + 'static> Default for SpatialHash<P> {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl<P: Copy + Send + Sync + 'static> SpatialHash<P> {
    /// Create a new spatial hash with the given cell size.
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            count: 0,
        }
    }

    /// Convert world coordinates to cell coordinates.
    #[inline]
    pub fn cell_of(&self, x: f32, y: f32) -> (i32, i32) {
        cell_of(x, y, self.cell_size)
    }

    /// Clear all entries. Only populated cells are ever kept.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.count = 0;
    }

    /// Insert an entity at a position.
    ///
    /// Positions that are non-finite or exactly at the origin are unset and
    /// never indexed.
    pub fn insert(&mut self, entity: Entity, x: f32, y: f32, payload: P) -> bool {
        if !x.is_finite() || !y.is_finite() || (x == 0.0 && y == 0.0) {
            return false;
        }
        let cell = self.cell_of(x, y);
        self.cells.entry(cell).or_default().push(SpatialEntry {
            entity,
            x,
            y,
            payload,
        });
        self.count += 1;
        true
    }

    /// Clear and repopulate from an iterator of `(entity, x, y, payload)`.
    pub fn build(&mut self, entries: impl IntoIterator<Item = (Entity, f32, f32, P)>) {
        self.clear();
        for (entity, x, y, payload) in entries {
            self.insert(entity, x, y, payload);
        }
    }

    /// Visit every entry within `radius` of `(x, y)`.
    ///
    /// Scans the ring of `ceil(radius / cell_size)` cells around the query cell
    /// (at least the 3x3 block) and accepts on `dist² <= radius²`. When that ring
    /// holds more cells than are populated, scans the populated cells instead.
    pub fn for_each_neighbor(&self, x: f32, y: f32, radius: f32, mut visit: impl FnMut(&SpatialEntry<P>, f32)) {
        if self.count == 0 || !(radius >= 0.0) {
            return;
        }
        let radius_sq = radius * radius;
        // Float-to-int casts saturate, so an infinite radius yields i64::MAX.
        let ring = ((radius / self.cell_size).ceil() as i64).max(1);
        let side = ring.saturating_mul(2).saturating_add(1);
        let ring_cells = side.saturating_mul(side);

        if ring_cells >= self.populated_cells() as i64 {
            for entries in self.cells.values() {
                for entry in entries {
                    let dist_sq = entry.distance_sq(x, y);
                    if dist_sq <= radius_sq {
                        visit(entry, dist_sq);
                    }
                }
            }
            return;
        }

        let ring = ring as i32;
        let (cx, cy) = self.cell_of(x, y);
        for dx in -ring..=ring {
            for dy in -ring..=ring {
                if let Some(entries) = self.cells.get(&(cx + dx, cy + dy)) {
                    for entry in entries {
                        let dist_sq = entry.distance_sq(x, y);
                        if dist_sq <= radius_sq {
                            visit(entry, dist_sq);
                        }
                    }
                }
            }
        }
    }

    /// All entries within `radius`, in scan order.
    pub fn query_neighbors(&self, x: f32, y: f32, radius: f32) -> Vec<SpatialEntry<P>> {
        let mut results = Vec::new();
        self.for_each_neighbor(x, y, radius, |entry, _| results.push(*entry));
        results
    }

    /// Entries of the 3x3 cell block around `(x, y)` without a distance check.
    pub fn for_each_in_block(&self, x: f32, y: f32, mut visit: impl FnMut(&SpatialEntry<P>)) {
        let (cx, cy) = self.cell_of(x, y);
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(entries) = self.cells.get(&(cx + dx, cy + dy)) {
                    entries.iter().for_each(&mut visit);
                }
            }
        }
    }

    /// Nearest entry within `radius` accepted by `filter`.
    /// Equal distances keep the first candidate in scan order.
    pub fn nearest(
        &self,
        x: f32,
        y: f32,
        radius: f32,
        mut filter: impl FnMut(&SpatialEntry<P>) -> bool,
    ) -> Option<SpatialEntry<P>> {
        let mut best: Option<(SpatialEntry<P>, f32)> = None;
        self.for_each_neighbor(x, y, radius, |entry, dist_sq| {
            if best.as_ref().map_or(true, |(_, d)| dist_sq < *d) && filter(entry) {
                best = Some((*entry, dist_sq));
            }
        });
        best.map(|(entry, _)| entry)
    }

    /// Entry minimizing `score(entry, dist²)` within `radius`.
    pub fn min_by_score(
        &self,
        x: f32,
        y: f32,
        radius: f32,
        mut score: impl FnMut(&SpatialEntry<P>, f32) -> Option<f32>,
    ) -> Option<SpatialEntry<P>> {
        let mut best: Option<(SpatialEntry<P>, f32)> = None;
        self.for_each_neighbor(x, y, radius, |entry, dist_sq| {
            if let Some(s) = score(entry, dist_sq) {
                if best.as_ref().map_or(true, |(_, b)| s < *b) {
                    best = Some((*entry, s));
                }
            }
        });
        best.map(|(entry, _)| entry)
    }

    /// Get count of entities in a cell.
    pub fn cell_count(&self, cell: (i32, i32)) -> usize {
        self.cells.get(&cell).map(|v| v.len()).unwrap_or(0)
    }

    /// Number of cells currently holding entries.
    pub fn populated_cells(&self) -> usize {
        self.cells.len()
    }

    /// Get total entity count.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// `(floor(x / cell_size), floor(y / cell_size))`.
#[inline]
pub fn cell_of(x: f32, y: f32, cell_size: f32) -> (i32, i32) {
    ((x / cell_size).floor() as i32, (y / cell_size).floor() as i32)
}

/// Living combatants of every faction. Payload: faction.
pub type UnitHash = SpatialHash<Faction>;
/// Player-owned units and constructed player buildings. Payload: threat level.
pub type TargetHash = SpatialHash<ThreatLevel>;
/// Non-depleted resource nodes. Payload: resource type.
pub type ResourceHash = SpatialHash<ResourceType>;
/// Constructed deposit buildings. Payload: accepted resource types.
pub type DepositHash = SpatialHash<ResourceMask>;
/// Static obstacles. Payload: the obstacle itself.
pub type ObstacleHash = SpatialHash<Obstacle>;
/// Flocking agents. Payload: velocity at rebuild time.
pub type FlockHash = SpatialHash<Velocity>;

/// Insert every spatial hash resource with the configured cell size.
pub fn insert_spatial_hashes(world: &mut World, config: &GameConfig) {
    let cell = config.spatial_cell_size;
    world.insert_resource(UnitHash::new(cell));
    world.insert_resource(TargetHash::new(cell));
    world.insert_resource(ResourceHash::new(cell));
    world.insert_resource(DepositHash::new(cell));
    world.insert_resource(ObstacleHash::new(cell));
    world.insert_resource(FlockHash::new(cell));
}

// ============================================================================
// REBUILD SYSTEMS
// ============================================================================

/// Rebuild the hash of living combatants.
pub fn rebuild_unit_hash_system(
    mut hash: ResMut<UnitHash>,
    query: Query<(Entity, &Position, &Faction, &Health), Without<Dead>>,
) {
    hash.build(
        query
            .iter()
            .filter(|(_, _, _, health)| health.is_alive())
            .map(|(entity, pos, faction, _)| (entity, pos.x, pos.y, *faction)),
    );
}

/// Rebuild the hash of entities enemies may target: living player units and
/// constructed player buildings.
pub fn rebuild_target_hash_system(
    mut hash: ResMut<TargetHash>,
    config: Res<GameConfig>,
    units: Query<(Entity, &Position, &Faction, &Health, Option<&ThreatLevel>), (Without<Building>, Without<Dead>)>,
    buildings: Query<
        (Entity, &Position, &Faction, &Health, &BuildingKind, Option<&ThreatLevel>),
        (With<Building>, With<Constructed>, Without<Dead>),
    >,
) {
    let unit_entries = units
        .iter()
        .filter(|(_, _, faction, health, _)| **faction == Faction::Player && health.is_alive())
        .map(|(entity, pos, _, _, threat)| {
            let threat = threat.copied().unwrap_or(ThreatLevel(config.unit_threat));
            (entity, pos.x, pos.y, threat)
        });
    let building_entries = buildings
        .iter()
        .filter(|(_, _, faction, health, _, _)| **faction == Faction::Player && health.is_alive())
        .map(|(entity, pos, _, _, kind, threat)| {
            let threat = threat.copied().unwrap_or(ThreatLevel(config.threat_for(Some(*kind))));
            (entity, pos.x, pos.y, threat)
        });
    hash.build(unit_entries.chain(building_entries));
}

/// Rebuild the hash of gatherable resource nodes.
pub fn rebuild_resource_hash_system(mut hash: ResMut<ResourceHash>, query: Query<(Entity, &Position, &ResourceNode)>) {
    hash.build(
        query
            .iter()
            .filter(|(_, _, node)| !node.is_depleted())
            .map(|(entity, pos, node)| (entity, pos.x, pos.y, node.kind)),
    );
}

/// Rebuild the hash of constructed drop-off buildings.
pub fn rebuild_deposit_hash_system(
    mut hash: ResMut<DepositHash>,
    query: Query<(Entity, &Position, &ResourceDeposit), (With<Constructed>, Without<Dead>)>,
) {
    hash.build(
        query
            .iter()
            .map(|(entity, pos, deposit)| (entity, pos.x, pos.y, deposit.accepts)),
    );
}

/// Rebuild the hash of static obstacles.
pub fn rebuild_obstacle_hash_system(mut hash: ResMut<ObstacleHash>, query: Query<(Entity, &Position, &Obstacle), Without<Dead>>) {
    hash.build(
        query
            .iter()
            .map(|(entity, pos, obstacle)| (entity, pos.x, pos.y, *obstacle)),
    );
}

/// Rebuild the hash of flocking agents with their current velocity.
pub fn rebuild_flock_hash_system(
    mut hash: ResMut<FlockHash>,
    query: Query<(Entity, &Position, &Velocity), (With<Flocking>, Without<Dead>)>,
) {
    hash.build(
        query
            .iter()
            .map(|(entity, pos, vel)| (entity, pos.x, pos.y, *vel)),
    );
}
