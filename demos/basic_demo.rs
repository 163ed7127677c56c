//! Basic demonstration of the RTS simulation core.
//!
//! Run with: cargo run --example basic_demo
//! Set RUST_LOG=rts_sim=debug for state-transition logs.

use rts_sim::{BuildingKind, GamePhase, ResourceType, SimError, SimWorld, Snapshot};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), SimError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rts_sim=info")))
        .init();

    println!("=== RTS Simulation Demo ===\n");

    let mut sim = SimWorld::new()?;

    // Base: headquarters, a storehouse and two towers.
    let hq = sim.spawn_building(BuildingKind::Headquarters, (30, 30))?;
    sim.spawn_building(BuildingKind::Storehouse, (36, 30))?;
    sim.spawn_building(BuildingKind::Tower, (28, 34))?;
    sim.spawn_building(BuildingKind::Tower, (34, 34))?;

    let base = sim.world().get::<rts_sim::Position>(hq).copied().unwrap_or_default();

    // Resources around the base.
    sim.spawn_resource_node(ResourceType::Wood, base.x + 30.0, base.y - 10.0, 500, 3);
    sim.spawn_resource_node(ResourceType::Stone, base.x - 25.0, base.y - 15.0, 400, 2);
    sim.spawn_resource_node(ResourceType::Gold, base.x + 5.0, base.y - 30.0, 300, 2);

    for i in 0..6 {
        sim.spawn_worker(base.x - 3.0 + i as f32, base.y - 8.0);
    }
    let soldiers: Vec<_> = (0..4)
        .map(|i| sim.spawn_soldier(base.x - 6.0 + i as f32 * 2.0, base.y + 10.0))
        .collect();

    // A wall line, bought with the starting stone.
    for x in 26..32 {
        sim.request_placement(BuildingKind::Wall, (x, 38), 0);
    }

    // An enemy wave approaching from the north-east.
    for i in 0..12 {
        let f = i as f32;
        sim.spawn_enemy(base.x + 70.0 + (f % 4.0) * 2.0, base.y + 60.0 + (f / 4.0).floor() * 2.0);
    }

    println!("Initial state:");
    print_snapshot(&sim.snapshot());

    sim.select(soldiers);
    sim.move_selected(base.x + 10.0, base.y + 20.0);

    println!("\nRunning 20 simulated seconds at 20 frames per second...\n");
    for frame in 0..400 {
        sim.step(0.05);

        if (frame + 1) % 80 == 0 {
            println!("--- Tick {} (t={:.1}s) ---", sim.current_tick(), sim.current_time());
            print_snapshot(sim.latest_snapshot());
        }
        if sim.status().phase != GamePhase::Playing {
            println!("Match over: {:?}", sim.status().phase);
            break;
        }
    }

    sim.schedule().profiler().log_summary();

    println!("\n=== Final State (JSON) ===\n");
    println!("{}", sim.snapshot().to_json_pretty()?);
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    let ledger = &snapshot.ledger;
    println!(
        "  Ledger: wood={} stone={} food={} gold={} pop={}/{}",
        ledger.wood, ledger.stone, ledger.food, ledger.gold, ledger.population, ledger.population_cap
    );
    println!(
        "  Status: {:?} day={} {}",
        snapshot.status.phase,
        snapshot.status.day,
        if snapshot.status.is_day { "(day)" } else { "(night)" }
    );

    let alive = |dead: bool| !dead;
    let workers = snapshot.units.iter().filter(|u| u.worker_state.is_some() && alive(u.dead));
    for unit in workers {
        println!(
            "    Worker {}: pos=({:.1}, {:.1}) {:?} carrying {:?}",
            unit.id,
            unit.x,
            unit.y,
            unit.worker_state.unwrap_or_default(),
            unit.carried
        );
    }

    let enemies: Vec<_> = snapshot.units.iter().filter(|u| u.enemy_state.is_some()).collect();
    let living = enemies.iter().filter(|u| alive(u.dead)).count();
    println!("  Enemies: {living} alive of {}", enemies.len());

    for building in &snapshot.buildings {
        println!(
            "    {:?} at {:?}: hp={:.0}/{:.0}{}",
            building.kind,
            building.cell,
            building.health,
            building.health_max,
            if building.wall_links > 0 {
                format!(" links={}", building.wall_links)
            } else {
                String::new()
            }
        );
    }
    println!("  Projectiles in flight: {}", snapshot.projectiles.len());
}
