//! Building placement, wall links and destruction side effects.
//!
//! Placement requests are checked against the building grid and the ledger
//! (including transactions already staged this tick). Accepted requests
//! occupy the grid at once and spawn a constructed building through
//! `Commands`; rejected requests leave no trace beyond their outcome entry.

use crate::components::*;
use crate::config::GameConfig;
use crate::error::PlacementError;
use crate::resources::{
    BuildingGrid, GamePhase, GameStatus, GlobalResources, LedgerEntry, PendingTransactions, PlacementOutcome,
    PlacementOutcomes, PlacementRequests, ResourceTransaction,
};
use bevy_ecs::prelude::*;
use std::collections::HashMap;

/// Footprint of a `kind` building with its origin at `cell`.
pub fn footprint_for(config: &GameConfig, kind: BuildingKind, cell: (i32, i32)) -> GridCell {
    GridCell {
        x: cell.0,
        y: cell.1,
        size: config.building(kind).size.max(1),
    }
}

/// Spawn a constructed building on `footprint` and claim its grid cells.
///
/// The caller has already checked the grid. Population capacity is staged in
/// the ledger; the resource cost is not.
pub fn spawn_building(
    commands: &mut Commands,
    grid: &mut BuildingGrid,
    pending: &mut PendingTransactions,
    config: &GameConfig,
    kind: BuildingKind,
    footprint: GridCell,
    player: u8,
) -> Entity {
    let stats = config.building(kind);
    let (x, y) = grid.center_of(&footprint);
    let radius = footprint.size as f32 * grid.cell_size * 0.5;

    let mut building = commands.spawn((
        BuildingBundle {
            kind,
            faction: Faction::Player,
            position: Position::new(x, y),
            health: Health::new(stats.max_health),
            footprint: Footprint { radius },
            grid: footprint,
            threat: ThreatLevel(config.threat_for(Some(kind))),
            marker: Building,
        },
        Constructed,
        PlayerId(player),
    ));

    match kind {
        BuildingKind::Headquarters => {
            building.insert((
                Headquarters,
                ResourceDeposit {
                    accepts: ResourceMask::all(),
                },
            ));
        }
        BuildingKind::Storehouse => {
            building.insert(ResourceDeposit {
                accepts: ResourceMask::all(),
            });
        }
        BuildingKind::Tower => {
            building.insert((
                Tower,
                AttackStats::ranged(
                    config.tower_damage,
                    config.tower_range,
                    config.tower_cooldown,
                    config.projectile_speed,
                ),
                AttackTarget::default(),
            ));
        }
        BuildingKind::Wall => {
            building.insert((WallConnections::default(), Obstacle { radius }));
        }
        BuildingKind::House => {}
    }

    if stats.population > 0 {
        building.insert(PopulationProvider(stats.population));
        pending.push(ResourceTransaction {
            entry: LedgerEntry::PopulationCap,
            amount: stats.population as i64,
            source: None,
        });
    }

    let entity = building.id();
    grid.occupy(&footprint, entity);
    entity
}

/// Consume placement requests in arrival order.
pub fn placement_system(
    mut commands: Commands,
    config: Res<GameConfig>,
    ledger: Res<GlobalResources>,
    mut requests: ResMut<PlacementRequests>,
    mut outcomes: ResMut<PlacementOutcomes>,
    mut grid: ResMut<BuildingGrid>,
    mut pending: ResMut<PendingTransactions>,
) {
    outcomes.0.clear();

    for request in std::mem::take(&mut requests.0) {
        let footprint = footprint_for(&config, request.kind, request.cell);
        let cost = config.building_cost(request.kind);

        let result = grid.check(&footprint).and_then(|()| {
            if ledger.can_afford(&cost, &pending) {
                Ok(())
            } else {
                Err(PlacementError::Underfunded { kind: request.kind })
            }
        });

        let result = result.map(|()| {
            for (resource, amount) in &cost {
                pending.push(ResourceTransaction::spend(*resource, *amount));
            }
            spawn_building(
                &mut commands,
                &mut grid,
                &mut pending,
                &config,
                request.kind,
                footprint,
                request.player,
            )
        });

        match &result {
            Ok(entity) => {
                tracing::info!(kind = ?request.kind, cell = ?request.cell, ?entity, "building placed");
            }
            Err(err) => {
                tracing::info!(kind = ?request.kind, cell = ?request.cell, %err, "placement rejected");
            }
        }
        outcomes.0.push(PlacementOutcome { request, result });
    }
}

// ============================================================================
// WALLS
// ============================================================================

/// Link every wall to the walls on its four neighboring cells.
pub fn wall_connection_system(mut walls: Query<(Entity, &GridCell, &mut WallConnections), Without<Dead>>) {
    let by_cell: HashMap<(i32, i32), Entity> = walls
        .iter()
        .map(|(entity, cell, _)| ((cell.x, cell.y), entity))
        .collect();

    for (_, cell, mut links) in walls.iter_mut() {
        let next = WallConnections {
            north: by_cell.get(&(cell.x, cell.y + 1)).copied(),
            south: by_cell.get(&(cell.x, cell.y - 1)).copied(),
            east: by_cell.get(&(cell.x + 1, cell.y)).copied(),
            west: by_cell.get(&(cell.x - 1, cell.y)).copied(),
        };
        if *links != next {
            *links = next;
        }
    }
}

// ============================================================================
// DESTRUCTION
// ============================================================================

/// Apply side effects of buildings that died this tick.
///
/// Frees grid cells, reduces population capacity, unlinks neighboring walls
/// and ends the match when the headquarters falls. Each building is handled
/// once; `DestructionHandled` marks it done.
pub fn building_destruction_system(
    mut commands: Commands,
    mut grid: ResMut<BuildingGrid>,
    mut pending: ResMut<PendingTransactions>,
    mut status: ResMut<GameStatus>,
    destroyed: Query<
        (Entity, &BuildingKind, &GridCell, Option<&PopulationProvider>),
        (With<Building>, With<Dead>, Without<DestructionHandled>),
    >,
    mut walls: Query<&mut WallConnections>,
) {
    for (entity, kind, footprint, population) in destroyed.iter() {
        grid.release(footprint, entity);

        if let Some(provider) = population {
            pending.push(ResourceTransaction {
                entry: LedgerEntry::PopulationCap,
                amount: -(provider.0 as i64),
                source: Some(entity),
            });
        }

        if let Ok(links) = walls.get(entity) {
            let neighbors = [links.north, links.south, links.east, links.west];
            for neighbor in neighbors.into_iter().flatten() {
                if let Ok(mut other) = walls.get_mut(neighbor) {
                    other.unlink(entity);
                }
            }
            if let Ok(mut links) = walls.get_mut(entity) {
                *links = WallConnections::default();
            }
        }

        if *kind == BuildingKind::Headquarters && status.phase == GamePhase::Playing {
            status.phase = GamePhase::Defeat;
            tracing::info!(?entity, "headquarters destroyed, match lost");
        }

        tracing::debug!(?entity, ?kind, "building destroyed");
        commands.entity(entity).insert(DestructionHandled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::PlacementRequest;
    use crate::systems::economy::apply_transactions_system;

    fn setup() -> World {
        let mut world = World::new();
        let config = GameConfig::default();
        world.insert_resource(BuildingGrid::new(config.building_cell_size, config.building_grid_size()));
        world.insert_resource(GlobalResources {
            wood: 100,
            stone: 20,
            ..Default::default()
        });
        world.insert_resource(config);
        world.insert_resource(PendingTransactions::default());
        world.insert_resource(PlacementRequests::default());
        world.insert_resource(PlacementOutcomes::default());
        world.insert_resource(GameStatus::default());
        world
    }

    fn request(kind: BuildingKind, cell: (i32, i32)) -> PlacementRequest {
        PlacementRequest { kind, cell, player: 0 }
    }

    #[test]
    fn test_placement_spends_and_spawns() {
        let mut world = setup();
        world
            .resource_mut::<PlacementRequests>()
            .0
            .push(request(BuildingKind::House, (2, 3)));

        let mut schedule = Schedule::default();
        schedule.add_systems((placement_system, apply_transactions_system).chain());
        schedule.run(&mut world);

        let outcome = world.resource::<PlacementOutcomes>().0[0];
        let entity = outcome.result.unwrap();
        assert_eq!(world.get::<BuildingKind>(entity), Some(&BuildingKind::House));
        assert!(world.get::<Constructed>(entity).is_some());
        assert_eq!(world.get::<Position>(entity), Some(&Position::new(10.0, 14.0)));

        let ledger = world.resource::<GlobalResources>();
        assert_eq!(ledger.wood, 70);
        assert_eq!(ledger.population_cap, 5);
        assert_eq!(world.resource::<BuildingGrid>().occupant((2, 3)), Some(entity));
    }

    #[test]
    fn test_underfunded_request_has_no_side_effects() {
        let mut world = setup();
        world
            .resource_mut::<PlacementRequests>()
            .0
            .push(request(BuildingKind::Tower, (0, 0)));

        let mut schedule = Schedule::default();
        schedule.add_systems((placement_system, apply_transactions_system).chain());
        schedule.run(&mut world);

        let outcome = world.resource::<PlacementOutcomes>().0[0];
        assert_eq!(
            outcome.result,
            Err(PlacementError::Underfunded {
                kind: BuildingKind::Tower
            })
        );
        assert_eq!(world.resource::<GlobalResources>().wood, 100);
        assert_eq!(world.resource::<BuildingGrid>().occupied_cells(), 0);
        assert_eq!(world.query::<&Building>().iter(&world).count(), 0);
    }

    #[test]
    fn test_second_request_sees_staged_spending_and_occupancy() {
        let mut world = setup();
        {
            let mut requests = world.resource_mut::<PlacementRequests>();
            requests.0.push(request(BuildingKind::Storehouse, (0, 0)));
            requests.0.push(request(BuildingKind::House, (1, 1)));
            requests.0.push(request(BuildingKind::Storehouse, (5, 5)));
        }

        let mut schedule = Schedule::default();
        schedule.add_systems(placement_system);
        schedule.run(&mut world);

        let outcomes = &world.resource::<PlacementOutcomes>().0;
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].result, Err(PlacementError::Occupied { x: 1, y: 1 }));
        assert_eq!(
            outcomes[2].result,
            Err(PlacementError::Underfunded {
                kind: BuildingKind::Storehouse
            })
        );
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut world = setup();
        world
            .resource_mut::<PlacementRequests>()
            .0
            .push(request(BuildingKind::Wall, (-1, 0)));

        let mut schedule = Schedule::default();
        schedule.add_systems(placement_system);
        schedule.run(&mut world);

        let outcome = world.resource::<PlacementOutcomes>().0[0];
        assert_eq!(outcome.result, Err(PlacementError::OutOfBounds { x: -1, y: 0 }));
    }

    #[test]
    fn test_adjacent_walls_link_and_unlink() {
        let mut world = setup();
        let west = world
            .spawn((GridCell { x: 0, y: 0, size: 1 }, WallConnections::default(), BuildingKind::Wall, Building))
            .id();
        let east = world
            .spawn((GridCell { x: 1, y: 0, size: 1 }, WallConnections::default(), BuildingKind::Wall, Building))
            .id();

        let mut schedule = Schedule::default();
        schedule.add_systems(wall_connection_system);
        schedule.run(&mut world);

        assert_eq!(world.get::<WallConnections>(west).unwrap().east, Some(east));
        assert_eq!(world.get::<WallConnections>(east).unwrap().west, Some(west));
        assert_eq!(world.get::<WallConnections>(west).unwrap().count(), 1);

        world.entity_mut(east).insert(Dead);
        let mut destruction = Schedule::default();
        destruction.add_systems(building_destruction_system);
        destruction.run(&mut world);

        assert_eq!(world.get::<WallConnections>(west).unwrap().east, None);
        assert!(world.get::<DestructionHandled>(east).is_some());
    }

    #[test]
    fn test_headquarters_destruction_is_defeat() {
        let mut world = setup();
        let hq = world
            .spawn((
                GridCell { x: 4, y: 4, size: 3 },
                BuildingKind::Headquarters,
                Building,
                PopulationProvider(10),
                Dead,
            ))
            .id();
        world
            .resource_mut::<BuildingGrid>()
            .occupy(&GridCell { x: 4, y: 4, size: 3 }, hq);
        world.resource_mut::<GlobalResources>().population_cap = 10;

        let mut schedule = Schedule::default();
        schedule.add_systems((building_destruction_system, apply_transactions_system).chain());
        schedule.run(&mut world);
        schedule.run(&mut world);

        assert_eq!(world.resource::<GameStatus>().phase, GamePhase::Defeat);
        assert_eq!(world.resource::<GlobalResources>().population_cap, 0);
        assert_eq!(world.resource::<BuildingGrid>().occupied_cells(), 0);
    }
}
