//! Global singleton resources.
//!
//! Each resource is inserted once by `SimWorld::with_config` and lives until
//! the world is dropped. Only the systems named on each type write to it.

use crate::components::{BuildingKind, GridCell, ResourceType};
use crate::error::PlacementError;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Simulation clock. Written only by `SimWorld` before each tick.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct GameTime {
    /// Number of completed fixed updates.
    pub tick: u64,
    /// Fixed timestep of the current tick.
    pub dt: f32,
    /// Simulated seconds at the end of the current tick.
    pub elapsed: f64,
}

impl GameTime {
    pub fn new(dt: f32) -> Self {
        Self {
            tick: 0,
            dt,
            elapsed: 0.0,
        }
    }

    /// Advance by one fixed step; called before each tick runs. Elapsed time
    /// is derived from the tick count so it does not accumulate rounding error.
    pub fn advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.elapsed = self.tick as f64 * self.dt as f64;
    }
}

/// Which ledger bucket a transaction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntry {
    Resource(ResourceType),
    Population,
    PopulationCap,
}

/// One staged change to the global ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceTransaction {
    pub entry: LedgerEntry,
    /// Signed amount; negative for spending.
    pub amount: i64,
    pub source: Option<Entity>,
}

impl ResourceTransaction {
    pub fn deposit(kind: ResourceType, amount: u32, source: Entity) -> Self {
        Self {
            entry: LedgerEntry::Resource(kind),
            amount: amount as i64,
            source: Some(source),
        }
    }

    pub fn spend(kind: ResourceType, amount: u32) -> Self {
        Self {
            entry: LedgerEntry::Resource(kind),
            amount: -(amount as i64),
            source: None,
        }
    }
}

/// Transactions staged this tick, drained by `apply_transactions_system`.
#[derive(Resource, Debug, Clone, Default)]
pub struct PendingTransactions(pub Vec<ResourceTransaction>);

impl PendingTransactions {
    pub fn push(&mut self, transaction: ResourceTransaction) {
        self.0.push(transaction);
    }

    /// Net staged change for one ledger bucket.
    pub fn net(&self, entry: LedgerEntry) -> i64 {
        self.0
            .iter()
            .filter(|t| t.entry == entry)
            .map(|t| t.amount)
            .sum()
    }
}

/// Global resource ledger. Mutated only by `apply_transactions_system`.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalResources {
    pub wood: u32,
    pub stone: u32,
    pub food: u32,
    pub gold: u32,
    pub population: u32,
    pub population_cap: u32,
}

impl GlobalResources {
    pub fn get(&self, entry: LedgerEntry) -> u32 {
        match entry {
            LedgerEntry::Resource(ResourceType::Wood) => self.wood,
            LedgerEntry::Resource(ResourceType::Stone) => self.stone,
            LedgerEntry::Resource(ResourceType::Food) => self.food,
            LedgerEntry::Resource(ResourceType::Gold) => self.gold,
            LedgerEntry::Population => self.population,
            LedgerEntry::PopulationCap => self.population_cap,
        }
    }

    fn slot_mut(&mut self, entry: LedgerEntry) -> &mut u32 {
        match entry {
            LedgerEntry::Resource(ResourceType::Wood) => &mut self.wood,
            LedgerEntry::Resource(ResourceType::Stone) => &mut self.stone,
            LedgerEntry::Resource(ResourceType::Food) => &mut self.food,
            LedgerEntry::Resource(ResourceType::Gold) => &mut self.gold,
            LedgerEntry::Population => &mut self.population,
            LedgerEntry::PopulationCap => &mut self.population_cap,
        }
    }

    pub fn amount(&self, kind: ResourceType) -> u32 {
        self.get(LedgerEntry::Resource(kind))
    }

    /// Apply a signed change, clamping at zero and `u32::MAX`.
    pub fn apply(&mut self, transaction: &ResourceTransaction) {
        let slot = self.slot_mut(transaction.entry);
        let next = (*slot as i64 + transaction.amount).clamp(0, u32::MAX as i64);
        *slot = next as u32;
    }

    /// Whether `cost` fits in the ledger after already-staged transactions.
    pub fn can_afford(&self, cost: &[(ResourceType, u32)], pending: &PendingTransactions) -> bool {
        cost.iter().all(|(kind, amount)| {
            let entry = LedgerEntry::Resource(*kind);
            self.get(entry) as i64 + pending.net(entry) >= *amount as i64
        })
    }
}

/// Overall match outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    #[default]
    Playing,
    Victory,
    Defeat,
}

/// Day/night and victory flags. Written by the GameState group and by
/// headquarters destruction handling.
#[derive(Resource, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GameStatus {
    pub phase: GamePhase,
    pub is_day: bool,
    /// Days completed so far.
    pub day: u32,
    /// Seconds into the current day or night.
    pub cycle_elapsed: f32,
}

impl Default for GameStatus {
    fn default() -> Self {
        Self {
            phase: GamePhase::Playing,
            is_day: true,
            day: 0,
            cycle_elapsed: 0.0,
        }
    }
}

/// Request from the placement collaborator to build something.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementRequest {
    pub kind: BuildingKind,
    /// Origin cell on the building grid.
    pub cell: (i32, i32),
    pub player: u8,
}

/// Pending placement requests, drained by the Building group.
#[derive(Resource, Debug, Clone, Default)]
pub struct PlacementRequests(pub Vec<PlacementRequest>);

/// Result of one processed placement request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementOutcome {
    pub request: PlacementRequest,
    pub result: Result<Entity, PlacementError>,
}

/// Log of processed placement requests. Cleared at the start of each Building group pass.
#[derive(Resource, Debug, Clone, Default)]
pub struct PlacementOutcomes(pub Vec<PlacementOutcome>);

/// Occupancy of the building placement grid.
///
/// Cells are indexed from `(0, 0)` to `(size - 1, size - 1)`; cell `(0, 0)` has its
/// corner at the world origin.
#[derive(Resource, Debug, Clone, Default)]
pub struct BuildingGrid {
    pub cell_size: f32,
    pub size: i32,
    cells: HashMap<(i32, i32), Entity>,
}

impl BuildingGrid {
    pub fn new(cell_size: f32, size: i32) -> Self {
        Self {
            cell_size,
            size,
            cells: HashMap::new(),
        }
    }

    pub fn in_bounds(&self, cell: (i32, i32)) -> bool {
        (0..self.size).contains(&cell.0) && (0..self.size).contains(&cell.1)
    }

    pub fn occupant(&self, cell: (i32, i32)) -> Option<Entity> {
        self.cells.get(&cell).copied()
    }

    /// First cell of `footprint` that is out of bounds or taken.
    pub fn check(&self, footprint: &GridCell) -> Result<(), PlacementError> {
        for (x, y) in footprint.cells() {
            if !self.in_bounds((x, y)) {
                return Err(PlacementError::OutOfBounds { x, y });
            }
            if self.cells.contains_key(&(x, y)) {
                return Err(PlacementError::Occupied { x, y });
            }
        }
        Ok(())
    }

    pub fn occupy(&mut self, footprint: &GridCell, entity: Entity) {
        for cell in footprint.cells() {
            self.cells.insert(cell, entity);
        }
    }

    /// Free the cells `entity` occupies within `footprint`.
    pub fn release(&mut self, footprint: &GridCell, entity: Entity) {
        for cell in footprint.cells() {
            if self.cells.get(&cell) == Some(&entity) {
                self.cells.remove(&cell);
            }
        }
    }

    /// World-space center of a footprint.
    pub fn center_of(&self, footprint: &GridCell) -> (f32, f32) {
        let half = footprint.size as f32 * 0.5;
        (
            (footprint.x as f32 + half) * self.cell_size,
            (footprint.y as f32 + half) * self.cell_size,
        )
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }
}

/// Orders coming from the input collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerOrder {
    /// Replace the selection with these entities.
    Select(Vec<Entity>),
    /// Send every selected unit to a point.
    MoveSelected { x: f32, y: f32 },
    /// Change the crowd navigation goal.
    SetFlowGoal { x: f32, y: f32 },
}

/// Pending player orders, drained by the Input group.
#[derive(Resource, Debug, Default)]
pub struct PlayerOrders(pub Vec<PlayerOrder>);
