//! Worker economy AI and the resource ledger.
//!
//! ```text
//! Idle -> Moving (outbound) -> Gathering -> Moving (return) -> Idle
//! ```
//!
//! Workers pick the nearest non-full, non-depleted node from the resource hash,
//! reserve one of its gather spots and walk there. A completed gather takes
//! `min(gather_amount, carry capacity, node amount)` from the node, releases
//! the spot and heads for the nearest deposit accepting that resource.
//! Arriving at the deposit stages a `ResourceTransaction`; the ledger itself is
//! only written by `apply_transactions_system` in the GameState group.
//!
//! All node writes (reservation, deduction) happen inside
//! `worker_economy_system`, one worker at a time, so two workers can never
//! take the same units or the same spot.

use crate::components::*;
use crate::config::GameConfig;
use crate::resources::{GameTime, GlobalResources, LedgerEntry, PendingTransactions, ResourceTransaction};
use crate::spatial::{DepositHash, ResourceHash};
use bevy_ecs::prelude::*;

/// Slack when comparing elapsed gather time against the required duration.
const GATHER_EPSILON: f64 = 1e-6;

/// Extra distance past a deposit's footprint at which a worker counts as arrived.
const DEPOSIT_REACH: f32 = 0.5;

// ============================================================================
// GATHER SPOT BOOKKEEPING
// ============================================================================

/// Free gather spots whose occupant despawned, died or moved on.
pub fn release_stale_gather_spots_system(
    mut nodes: Query<(Entity, &mut ResourceNode)>,
    workers: Query<(&WorkerEconomy, Option<&Health>)>,
) {
    for (node_entity, mut node) in nodes.iter_mut() {
        if node.gatherer_count == 0 {
            continue;
        }
        let before = node.gatherer_count;
        node.release_where(|occupant| match workers.get(occupant) {
            Ok((economy, health)) => {
                economy.target_resource == Some(node_entity)
                    && economy.gather_spot.is_some()
                    && health.map_or(true, |h| !h.is_dead)
            }
            Err(_) => false,
        });
        if node.gatherer_count != before {
            tracing::debug!(node = ?node_entity, released = before - node.gatherer_count, "released stale gather spots");
        }
    }
}

// ============================================================================
// WORKER STATE MACHINE
// ============================================================================

fn set_state(entity: Entity, economy: &mut WorkerEconomy, next: WorkerState, now: f64) {
    if economy.state != next {
        tracing::debug!(worker = ?entity, from = ?economy.state, to = ?next, "worker state");
    }
    economy.state = next;
    economy.state_started_at = now;
}

/// Release the worker's reserved spot on its target node, if any.
fn release_spot(entity: Entity, economy: &mut WorkerEconomy, nodes: &mut Query<(&Position, &mut ResourceNode)>) {
    if let Some(node_entity) = economy.target_resource {
        if economy.gather_spot.take().is_some() {
            if let Ok((_, mut node)) = nodes.get_mut(node_entity) {
                node.release_spot(entity);
            }
        }
    }
}

/// Nearest deposit accepting `kind`, with its arrival distance.
fn find_deposit(
    hash: &DepositHash,
    footprints: &Query<Option<&Footprint>, With<ResourceDeposit>>,
    pos: &Position,
    kind: ResourceType,
) -> Option<(Entity, f32, f32, f32)> {
    let entry = hash.nearest(pos.x, pos.y, f32::INFINITY, |d| d.payload.contains(kind))?;
    let radius = footprints
        .get(entry.entity)
        .ok()
        .flatten()
        .map(|f| f.radius)
        .unwrap_or(0.0);
    Some((entry.entity, entry.x, entry.y, radius + DEPOSIT_REACH))
}

/// Start the return leg toward the nearest accepting deposit, or go idle with cargo.
fn head_to_deposit(
    entity: Entity,
    pos: &Position,
    economy: &mut WorkerEconomy,
    dest: &mut Destination,
    deposits: &DepositHash,
    footprints: &Query<Option<&Footprint>, With<ResourceDeposit>>,
    now: f64,
) {
    let Some(kind) = economy.carried_type else {
        set_state(entity, economy, WorkerState::Idle, now);
        return;
    };
    match find_deposit(deposits, footprints, pos, kind) {
        Some((deposit, x, y, reach)) => {
            economy.target_deposit = Some(deposit);
            dest.set(x, y);
            dest.stopping_distance = reach;
            set_state(entity, economy, WorkerState::Moving, now);
        }
        None => {
            economy.target_deposit = None;
            dest.clear();
            set_state(entity, economy, WorkerState::Idle, now);
        }
    }
}

/// Drive every worker's economy state machine.
#[allow(clippy::too_many_arguments)]
pub fn worker_economy_system(
    time: Res<GameTime>,
    config: Res<GameConfig>,
    resource_hash: Res<ResourceHash>,
    deposit_hash: Res<DepositHash>,
    mut pending: ResMut<PendingTransactions>,
    mut workers: Query<
        (Entity, &Position, &mut WorkerEconomy, &WorkerStats, &mut Destination),
        (With<Worker>, Without<Dead>),
    >,
    mut nodes: Query<(&Position, &mut ResourceNode)>,
    deposits: Query<(), (With<ResourceDeposit>, With<Constructed>, Without<Dead>)>,
    footprints: Query<Option<&Footprint>, With<ResourceDeposit>>,
) {
    let now = time.elapsed;

    for (entity, pos, mut economy, stats, mut dest) in workers.iter_mut() {
        match economy.state {
            WorkerState::Idle => {
                if economy.carried_amount > 0 {
                    // Holding cargo from a trip with no deposit available.
                    head_to_deposit(entity, pos, &mut economy, &mut dest, &deposit_hash, &footprints, now);
                    continue;
                }

                let candidate = resource_hash.nearest(pos.x, pos.y, stats.search_radius, |entry| {
                    nodes
                        .get(entry.entity)
                        .map(|(_, node)| !node.is_full() && !node.is_depleted())
                        .unwrap_or(false)
                });
                let Some(candidate) = candidate else {
                    continue;
                };
                let Ok((node_pos, mut node)) = nodes.get_mut(candidate.entity) else {
                    continue;
                };
                let Some(spot) = node.reserve_spot(entity) else {
                    continue;
                };
                let (ox, oy) = node.gather_spots[spot].offset;
                economy.target_resource = Some(candidate.entity);
                economy.gather_spot = Some(spot);
                dest.set(node_pos.x + ox, node_pos.y + oy);
                dest.stopping_distance = Destination::default().stopping_distance;
                set_state(entity, &mut economy, WorkerState::Moving, now);
            }

            WorkerState::Moving if economy.carried_amount == 0 => {
                let node_ok = economy
                    .target_resource
                    .and_then(|n| nodes.get(n).ok())
                    .map(|(_, node)| !node.is_depleted())
                    .unwrap_or(false);
                if !node_ok {
                    release_spot(entity, &mut economy, &mut nodes);
                    economy.target_resource = None;
                    dest.clear();
                    set_state(entity, &mut economy, WorkerState::Idle, now);
                    continue;
                }
                if dest.arrived() {
                    set_state(entity, &mut economy, WorkerState::Gathering, now);
                }
            }

            WorkerState::Moving => {
                // Return leg.
                let deposit_ok = economy.target_deposit.map(|d| deposits.contains(d)).unwrap_or(false);
                if !deposit_ok {
                    head_to_deposit(entity, pos, &mut economy, &mut dest, &deposit_hash, &footprints, now);
                    continue;
                }
                if !dest.arrived() {
                    continue;
                }
                if let Some(kind) = economy.carried_type {
                    pending.push(ResourceTransaction::deposit(kind, economy.carried_amount, entity));
                    tracing::debug!(worker = ?entity, ?kind, amount = economy.carried_amount, "deposited");
                }
                economy.clear_cargo();
                economy.target_resource = None;
                economy.target_deposit = None;
                dest.clear();
                set_state(entity, &mut economy, WorkerState::Idle, now);
            }

            WorkerState::Gathering => {
                let Some(node_entity) = economy.target_resource else {
                    economy.gather_spot = None;
                    set_state(entity, &mut economy, WorkerState::Idle, now);
                    continue;
                };
                let Ok((_, mut node)) = nodes.get_mut(node_entity) else {
                    economy.target_resource = None;
                    economy.gather_spot = None;
                    set_state(entity, &mut economy, WorkerState::Idle, now);
                    continue;
                };

                let required = 1.0 / stats.gather_speed.max(f32::EPSILON) as f64;
                if now - economy.state_started_at + GATHER_EPSILON < required {
                    continue;
                }

                let capacity = stats.max_carry_capacity.saturating_sub(economy.carried_amount);
                let taken = node.take(config.gather_amount.min(capacity));
                node.release_spot(entity);
                economy.gather_spot = None;

                if taken == 0 {
                    economy.target_resource = None;
                    set_state(entity, &mut economy, WorkerState::Idle, now);
                    continue;
                }
                economy.carried_amount += taken;
                economy.carried_type = Some(node.kind);
                tracing::debug!(worker = ?entity, node = ?node_entity, taken, remaining = node.current_amount, "gathered");

                head_to_deposit(entity, pos, &mut economy, &mut dest, &deposit_hash, &footprints, now);
            }
        }
    }
}

// ============================================================================
// REGENERATION
// ============================================================================

/// Regrow nodes with a positive `regen_rate`, never past `max_amount`.
pub fn resource_regen_system(time: Res<GameTime>, mut nodes: Query<&mut ResourceNode>) {
    let dt = time.dt;
    for mut node in nodes.iter_mut() {
        if node.regen_rate <= 0.0 {
            continue;
        }
        if node.current_amount >= node.max_amount {
            node.regen_progress = 0.0;
            continue;
        }
        node.regen_progress += node.regen_rate * dt;
        let whole = node.regen_progress.floor();
        if whole >= 1.0 {
            node.regen_progress -= whole;
            let room = node.max_amount - node.current_amount;
            node.current_amount += (whole as u32).min(room);
        }
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// Drain staged transactions into the global ledger.
pub fn apply_transactions_system(mut pending: ResMut<PendingTransactions>, mut ledger: ResMut<GlobalResources>) {
    for transaction in pending.0.drain(..) {
        ledger.apply(&transaction);
    }
}

/// Stage a correction so `population` matches the living player units.
pub fn population_census_system(
    ledger: Res<GlobalResources>,
    mut pending: ResMut<PendingTransactions>,
    units: Query<(&Faction, &Health), (Or<(With<Worker>, With<Soldier>)>, Without<Dead>)>,
) {
    let living = units
        .iter()
        .filter(|(faction, health)| **faction == Faction::Player && health.is_alive())
        .count() as i64;
    let staged = ledger.population as i64 + pending.net(LedgerEntry::Population);
    if living != staged {
        pending.push(ResourceTransaction {
            entry: LedgerEntry::Population,
            amount: living - staged,
            source: None,
        });
    }
}
