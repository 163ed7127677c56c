//! ECS Components for the RTS simulation.
//!
//! Components are pure data containers attached to entities.
//! All game logic lives in systems that query these components.
//! Tags are zero-sized components used only for filtering.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// SPATIAL COMPONENTS
// ============================================================================

/// 2D position on the ground plane.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        self.distance_sq_to(other).sqrt()
    }

    pub fn distance_sq_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn as_tuple(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

/// 2D velocity vector.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
}

impl Velocity {
    pub fn new(vx: f32, vy: f32) -> Self {
        Self { vx, vy }
    }

    pub fn magnitude(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }

    pub fn normalized(&self) -> Self {
        let mag = self.magnitude();
        if mag < 0.0001 {
            Self::default()
        } else {
            Self {
                vx: self.vx / mag,
                vy: self.vy / mag,
            }
        }
    }

    /// Scale down to `max` if longer, keeping direction.
    pub fn clamp_magnitude(&mut self, max: f32) {
        let mag = self.magnitude();
        if mag > max && mag > 0.0 {
            let scale = max / mag;
            self.vx *= scale;
            self.vy *= scale;
        }
    }

    /// Move toward `(tx, ty)` by fraction `t` (clamped to `[0, 1]`).
    pub fn lerp_toward(&mut self, tx: f32, ty: f32, t: f32) {
        let t = t.clamp(0.0, 1.0);
        self.vx += (tx - self.vx) * t;
        self.vy += (ty - self.vy) * t;
    }
}

/// Facing angle in radians (0 = +x axis).
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Heading(pub f32);

/// Movement tuning for a mobile entity.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovementStats {
    /// Maximum speed (units per second).
    pub max_speed: f32,
    /// How quickly velocity converges on the desired velocity (per second).
    pub acceleration: f32,
    /// Turn rate used when rotating toward the velocity heading.
    pub rotation_speed: f32,
    /// Exponential decay rate applied when there is no destination.
    pub braking: f32,
}

impl Default for MovementStats {
    fn default() -> Self {
        Self {
            max_speed: 5.0,
            acceleration: 8.0,
            rotation_speed: 6.0,
            braking: 6.0,
        }
    }
}

/// Where an entity wants to go.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Destination {
    pub point: Option<(f32, f32)>,
    pub stopping_distance: f32,
    /// Set by target seeking when within `stopping_distance` of `point`.
    pub reached: bool,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            point: None,
            stopping_distance: 0.5,
            reached: false,
        }
    }
}

impl Destination {
    pub fn set(&mut self, x: f32, y: f32) {
        self.point = Some((x, y));
        self.reached = false;
    }

    pub fn clear(&mut self) {
        self.point = None;
        self.reached = false;
    }

    /// True only once the current point has been reached.
    pub fn arrived(&self) -> bool {
        self.point.is_some() && self.reached
    }
}

/// Entity steers by sampling the shared flow field.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowFieldAgent {
    /// Per-tick lerp factor from current velocity toward the field direction.
    pub blend: f32,
}

impl Default for FlowFieldAgent {
    fn default() -> Self {
        Self { blend: 0.2 }
    }
}

/// Static obstacle other units steer around.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Obstacle {
    pub radius: f32,
}

/// Entity avoids obstacles in its neighborhood.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObstacleAvoider {
    pub radius: f32,
    pub strength: f32,
}

impl Default for ObstacleAvoider {
    fn default() -> Self {
        Self {
            radius: 2.0,
            strength: 10.0,
        }
    }
}

/// Flocking weights for separation/alignment/cohesion steering.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Flocking {
    pub separation: f32,
    pub alignment: f32,
    pub cohesion: f32,
    /// Radius for neighbor detection.
    pub neighbor_radius: f32,
    /// Upper bound on the combined steering force.
    pub max_force: f32,
}

impl Default for Flocking {
    fn default() -> Self {
        Self {
            separation: 1.5,
            alignment: 0.5,
            cohesion: 0.3,
            neighbor_radius: 5.0,
            max_force: 10.0,
        }
    }
}

// ============================================================================
// IDENTITY COMPONENTS
// ============================================================================

/// Side an entity fights for.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    #[default]
    Player,
    Enemy,
    Neutral,
}

impl Faction {
    pub fn is_hostile_to(&self, other: Faction) -> bool {
        matches!(
            (self, other),
            (Faction::Player, Faction::Enemy) | (Faction::Enemy, Faction::Player)
        )
    }
}

/// Owning player for player-side entities.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

/// Marker for worker units.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Worker;

/// Marker for hostile AI units.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct EnemyUnit;

/// Marker for player combat units.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Soldier;

/// Marker for buildings.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Building;

/// Marker for buildings that finished construction.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Constructed;

/// Marker for the player's headquarters.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Headquarters;

/// Marker for towers.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Tower;

/// Marker for entities selected by the player.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Selected;

/// Marker for entities that died and await cleanup.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Dead;

/// Marker for dead buildings whose destruction side effects were applied.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct DestructionHandled;

// ============================================================================
// COMBAT COMPONENTS
// ============================================================================

/// Health of a unit or building.
///
/// `current` stays within `[0, max]` and `is_dead` is true exactly when
/// `current` reached zero.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
    pub is_dead: bool,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self {
            current: max,
            max,
            is_dead: false,
        }
    }

    pub fn fraction(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            (self.current / self.max).clamp(0.0, 1.0)
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.is_dead
    }

    pub fn damage(&mut self, amount: f32) {
        if self.is_dead || !(amount > 0.0) {
            return;
        }
        self.current = (self.current - amount).clamp(0.0, self.max);
        if self.current <= 0.0 {
            self.current = 0.0;
            self.is_dead = true;
        }
    }

    /// Dead entities cannot be healed.
    pub fn heal(&mut self, amount: f32) {
        if self.is_dead || !(amount > 0.0) {
            return;
        }
        self.current = (self.current + amount).clamp(0.0, self.max);
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new(100.0)
    }
}

/// Passive health regeneration.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthRegen {
    pub per_second: f32,
}

/// Damage categories resisted separately by armor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    #[default]
    Physical,
    Pierce,
    Siege,
}

/// Resistance per damage type, as a fraction of damage absorbed.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Armor {
    pub physical: f32,
    pub pierce: f32,
    pub siege: f32,
}

impl Armor {
    pub fn resistance(&self, damage_type: DamageType) -> f32 {
        match damage_type {
            DamageType::Physical => self.physical,
            DamageType::Pierce => self.pierce,
            DamageType::Siege => self.siege,
        }
    }
}

/// Maximum fraction of damage armor can absorb.
pub const MAX_RESISTANCE: f32 = 0.99;

/// `raw * (1 - clamp(resistance, 0, 0.99))`.
pub fn mitigated_damage(raw: f32, armor: Option<&Armor>, damage_type: DamageType) -> f32 {
    let resistance = armor
        .map(|a| a.resistance(damage_type))
        .unwrap_or(0.0)
        .clamp(0.0, MAX_RESISTANCE);
    raw * (1.0 - resistance)
}

/// How an attacker delivers damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackKind {
    Melee,
    Ranged,
}

/// Offensive stats for units and towers.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AttackStats {
    pub kind: AttackKind,
    pub damage: f32,
    pub damage_type: DamageType,
    pub range: f32,
    /// Seconds between attacks.
    pub cooldown: f32,
    /// Seconds until the next attack is allowed.
    pub cooldown_remaining: f32,
    pub projectile_speed: f32,
    /// Splash radius for projectiles; zero for single target.
    pub aoe_radius: f32,
}

impl AttackStats {
    pub fn melee(damage: f32, range: f32, cooldown: f32) -> Self {
        Self {
            kind: AttackKind::Melee,
            damage,
            damage_type: DamageType::Physical,
            range,
            cooldown,
            cooldown_remaining: 0.0,
            projectile_speed: 0.0,
            aoe_radius: 0.0,
        }
    }

    pub fn ranged(damage: f32, range: f32, cooldown: f32, projectile_speed: f32) -> Self {
        Self {
            kind: AttackKind::Ranged,
            damage,
            damage_type: DamageType::Pierce,
            range,
            cooldown,
            cooldown_remaining: 0.0,
            projectile_speed,
            aoe_radius: 0.0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.cooldown_remaining <= 0.0
    }
}

/// Current target of a player unit or tower.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct AttackTarget(pub Option<Entity>);

/// A projectile in flight.
#[derive(Component, Debug, Clone, Copy)]
pub struct Projectile {
    pub source_faction: Faction,
    pub target: Option<Entity>,
    /// Last observed target position; the projectile flies here once the target is lost.
    pub last_known: (f32, f32),
    pub speed: f32,
    pub damage: f32,
    pub damage_type: DamageType,
    pub aoe_radius: f32,
    pub hit_radius: f32,
    pub lifetime: f32,
}

/// Countdown until a dead entity is destroyed.
#[derive(Component, Debug, Clone, Copy)]
pub struct DeathTimer {
    pub remaining: f32,
}

/// Targeting priority of a player entity; higher attracts enemies from further away.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThreatLevel(pub f32);

/// Physical radius of a building, used for range checks against its edge.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Footprint {
    pub radius: f32,
}

// ============================================================================
// ECONOMY COMPONENTS
// ============================================================================

/// Gatherable resource categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Wood,
    Stone,
    Food,
    Gold,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Wood,
        ResourceType::Stone,
        ResourceType::Food,
        ResourceType::Gold,
    ];

    fn bit(self) -> u8 {
        match self {
            ResourceType::Wood => 1,
            ResourceType::Stone => 1 << 1,
            ResourceType::Food => 1 << 2,
            ResourceType::Gold => 1 << 3,
        }
    }
}

/// Set of resource types, stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMask(u8);

impl ResourceMask {
    pub fn all() -> Self {
        Self::of(&ResourceType::ALL)
    }

    pub fn of(types: &[ResourceType]) -> Self {
        Self(types.iter().fold(0, |acc, t| acc | t.bit()))
    }

    pub fn contains(&self, kind: ResourceType) -> bool {
        self.0 & kind.bit() != 0
    }
}

/// A building workers can drop resources at.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceDeposit {
    pub accepts: ResourceMask,
}

/// A working position around a resource node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GatherSpot {
    /// Offset from the node center.
    pub offset: (f32, f32),
    #[serde(skip)]
    pub occupant: Option<Entity>,
}

/// A harvestable resource node.
///
/// `current_amount` stays within `[0, max_amount]` and `gatherer_count`
/// equals the number of reserved gather spots (never above `max_gatherers`).
#[derive(Component, Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    pub kind: ResourceType,
    pub current_amount: u32,
    pub max_amount: u32,
    /// Units regenerated per second.
    pub regen_rate: f32,
    #[serde(skip)]
    pub regen_progress: f32,
    pub gatherer_count: u32,
    pub max_gatherers: u32,
    pub gather_spots: Vec<GatherSpot>,
}

impl ResourceNode {
    /// Node with `max_gatherers` spots evenly spaced on a ring of `spot_radius`.
    pub fn new(kind: ResourceType, amount: u32, max_gatherers: u32, spot_radius: f32) -> Self {
        let gather_spots = (0..max_gatherers)
            .map(|i| {
                let angle = (i as f32 / max_gatherers.max(1) as f32) * std::f32::consts::TAU;
                GatherSpot {
                    offset: (angle.cos() * spot_radius, angle.sin() * spot_radius),
                    occupant: None,
                }
            })
            .collect();
        Self {
            kind,
            current_amount: amount,
            max_amount: amount,
            regen_rate: 0.0,
            regen_progress: 0.0,
            gatherer_count: 0,
            max_gatherers,
            gather_spots,
        }
    }

    pub fn with_regen(mut self, per_second: f32) -> Self {
        self.regen_rate = per_second;
        self
    }

    pub fn is_depleted(&self) -> bool {
        self.current_amount == 0
    }

    pub fn is_full(&self) -> bool {
        self.gatherer_count >= self.max_gatherers
    }

    /// Reserve a free gather spot for `worker`; returns its index.
    pub fn reserve_spot(&mut self, worker: Entity) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let index = self.gather_spots.iter().position(|s| s.occupant.is_none())?;
        self.gather_spots[index].occupant = Some(worker);
        self.recount();
        Some(index)
    }

    /// Release whatever spot `worker` holds.
    pub fn release_spot(&mut self, worker: Entity) {
        for spot in self.gather_spots.iter_mut() {
            if spot.occupant == Some(worker) {
                spot.occupant = None;
            }
        }
        self.recount();
    }

    /// Release spots whose occupant fails `keep`.
    pub fn release_where(&mut self, mut keep: impl FnMut(Entity) -> bool) {
        for spot in self.gather_spots.iter_mut() {
            if let Some(occupant) = spot.occupant {
                if !keep(occupant) {
                    spot.occupant = None;
                }
            }
        }
        self.recount();
    }

    /// Remove up to `amount`, returning what was actually taken.
    pub fn take(&mut self, amount: u32) -> u32 {
        let taken = amount.min(self.current_amount);
        self.current_amount -= taken;
        taken
    }

    fn recount(&mut self) {
        self.gatherer_count = self
            .gather_spots
            .iter()
            .filter(|s| s.occupant.is_some())
            .count() as u32;
    }
}

/// Worker economy state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    #[default]
    Idle,
    Moving,
    Gathering,
}

/// Worker economy state machine data.
///
/// `carried_amount > 0` implies `carried_type.is_some()`.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct WorkerEconomy {
    pub state: WorkerState,
    pub target_resource: Option<Entity>,
    pub target_deposit: Option<Entity>,
    pub carried_type: Option<ResourceType>,
    pub carried_amount: u32,
    /// Simulation time when the current state began.
    pub state_started_at: f64,
    /// Index of the reserved spot on `target_resource`.
    pub gather_spot: Option<usize>,
}

impl WorkerEconomy {
    pub fn clear_cargo(&mut self) {
        self.carried_amount = 0;
        self.carried_type = None;
    }
}

/// Per-worker gathering stats.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Gathers per second; one gather takes `1 / gather_speed` seconds.
    pub gather_speed: f32,
    pub max_carry_capacity: u32,
    pub search_radius: f32,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            gather_speed: 1.0,
            max_carry_capacity: 10,
            search_radius: 60.0,
        }
    }
}

// ============================================================================
// ENEMY AI COMPONENTS
// ============================================================================

/// Enemy AI state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnemyState {
    #[default]
    Spawning,
    SeekingTarget,
    MovingToTarget,
    Attacking,
    Dead,
}

/// Enemy target acquisition state machine data.
#[derive(Component, Debug, Clone, Copy)]
pub struct EnemyAi {
    pub state: EnemyState,
    pub current_target: Option<Entity>,
    pub target_position: Option<(f32, f32)>,
    /// Seconds until the next retarget evaluation.
    pub retarget_timer: f32,
    pub retarget_interval: f32,
    pub detection_radius: f32,
    /// Seconds spent in Spawning before seeking.
    pub spawn_delay: f32,
}

impl EnemyAi {
    pub fn new(detection_radius: f32, retarget_interval: f32) -> Self {
        Self {
            state: EnemyState::Spawning,
            current_target: None,
            target_position: None,
            retarget_timer: 0.0,
            retarget_interval,
            detection_radius,
            spawn_delay: 0.0,
        }
    }

    pub fn clear_target(&mut self) {
        self.current_target = None;
        self.target_position = None;
    }
}

// ============================================================================
// BUILDING COMPONENTS
// ============================================================================

/// Building types known to placement and destruction handling.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildingKind {
    Headquarters,
    House,
    Storehouse,
    Tower,
    Wall,
}

/// Footprint on the building grid: origin cell and edge length in cells.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCell {
    pub x: i32,
    pub y: i32,
    pub size: i32,
}

impl GridCell {
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (0..self.size).flat_map(move |dy| (0..self.size).map(move |dx| (self.x + dx, self.y + dy)))
    }
}

/// Links between walls on 4-neighbor cells.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WallConnections {
    pub north: Option<Entity>,
    pub south: Option<Entity>,
    pub east: Option<Entity>,
    pub west: Option<Entity>,
}

impl WallConnections {
    pub fn count(&self) -> usize {
        [self.north, self.south, self.east, self.west]
            .iter()
            .filter(|c| c.is_some())
            .count()
    }

    /// Clear every link that points at `entity`.
    pub fn unlink(&mut self, entity: Entity) {
        for slot in [&mut self.north, &mut self.south, &mut self.east, &mut self.west] {
            if *slot == Some(entity) {
                *slot = None;
            }
        }
    }
}

/// Population capacity a constructed building provides.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PopulationProvider(pub u32);

// ============================================================================
// BUNDLE HELPERS
// ============================================================================

/// Shared components for every mobile unit.
#[derive(Bundle, Default)]
pub struct UnitBundle {
    pub faction: Faction,
    pub position: Position,
    pub velocity: Velocity,
    pub heading: Heading,
    pub stats: MovementStats,
    pub destination: Destination,
    pub health: Health,
}

/// Worker unit.
#[derive(Bundle, Default)]
pub struct WorkerBundle {
    pub unit: UnitBundle,
    pub economy: WorkerEconomy,
    pub worker_stats: WorkerStats,
    pub avoider: ObstacleAvoider,
    pub marker: Worker,
}

/// Buildings share this set; kind-specific parts are inserted on top.
#[derive(Bundle)]
pub struct BuildingBundle {
    pub kind: BuildingKind,
    pub faction: Faction,
    pub position: Position,
    pub health: Health,
    pub footprint: Footprint,
    pub grid: GridCell,
    pub threat: ThreatLevel,
    pub marker: Building,
}
