//! Combat pipeline - targeting, attacks, damage and death.
//!
//! Stages, in order within the Combat group:
//!
//! 1. `health_regen_system`
//! 2. `target_acquisition_system` - validate or pick targets for units and towers
//! 3. `attack_resolution_system` - cooldown-gated melee hits and projectile launches
//! 4. `projectile_movement_system` / `projectile_collision_system` (see `projectile`)
//! 5. `damage_application_system` - apply armor-mitigated damage once per target
//! 6. `death_marking_system` - tag dead entities with `Dead` and a `DeathTimer`
//!
//! `death_cleanup_system` runs in the Cleanup group and despawns entities whose
//! grace period has expired.
//!
//! ## Gather/Apply split
//!
//! Attacks and projectile hits never touch `Health` directly. They add damage
//! intents to `PendingDamage`, which `damage_application_system` drains. Every
//! write to `Health` in a tick therefore happens in one place.
//!
//! ## Parallel Feature
//!
//! With `--features parallel`, target acquisition scores attackers on rayon.

use crate::components::*;
use crate::config::GameConfig;
use crate::resources::GameTime;
use crate::spatial::UnitHash;
use crate::systems::enemy_ai::{effective_distance, resolve_target, ATTACK_LEASH};
use bevy_ecs::prelude::*;
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Raw damage against one target, split by damage type.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DamageByType {
    pub physical: f32,
    pub pierce: f32,
    pub siege: f32,
}

impl DamageByType {
    pub fn add(&mut self, damage_type: DamageType, amount: f32) {
        match damage_type {
            DamageType::Physical => self.physical += amount,
            DamageType::Pierce => self.pierce += amount,
            DamageType::Siege => self.siege += amount,
        }
    }

    /// Total after armor, each type mitigated separately.
    pub fn mitigated(&self, armor: Option<&Armor>) -> f32 {
        mitigated_damage(self.physical, armor, DamageType::Physical)
            + mitigated_damage(self.pierce, armor, DamageType::Pierce)
            + mitigated_damage(self.siege, armor, DamageType::Siege)
    }
}

/// Collected combat results to apply after iteration.
#[derive(Debug, Default, Clone)]
pub struct CombatResults {
    pub damage: HashMap<Entity, DamageByType>,
    /// Entities that attacked this tick.
    pub attacked: Vec<Entity>,
}

impl CombatResults {
    pub fn add_damage(&mut self, target: Entity, damage_type: DamageType, amount: f32) {
        if amount > 0.0 {
            self.damage.entry(target).or_default().add(damage_type, amount);
        }
    }
}

/// Damage staged this tick, drained by `damage_application_system`.
#[derive(Resource, Default)]
pub struct PendingDamage(pub CombatResults);

// ============================================================================
// REGENERATION
// ============================================================================

pub fn health_regen_system(time: Res<GameTime>, mut query: Query<(&mut Health, &HealthRegen), Without<Dead>>) {
    let dt = time.dt;
    for (mut health, regen) in query.iter_mut() {
        if health.is_alive() && health.current < health.max {
            health.heal(regen.per_second * dt);
        }
    }
}

// ============================================================================
// TARGET ACQUISITION
// ============================================================================

/// Attacker data extracted for the acquisition phase.
#[derive(Clone, Copy)]
struct Seeker {
    entity: Entity,
    faction: Faction,
    x: f32,
    y: f32,
    range: f32,
}

fn nearest_hostile(seeker: &Seeker, hash: &UnitHash) -> Option<Entity> {
    hash.nearest(seeker.x, seeker.y, seeker.range, |entry| {
        entry.entity != seeker.entity && seeker.faction.is_hostile_to(entry.payload)
    })
    .map(|entry| entry.entity)
}

/// Clear stale targets and acquire the nearest hostile in range.
///
/// A target is dropped when it no longer exists, is dead, lost its position,
/// or left attack range.
pub fn target_acquisition_system(
    hash: Res<UnitHash>,
    mut attackers: Query<(Entity, &Position, &Faction, &AttackStats, &mut AttackTarget), Without<Dead>>,
    targets: Query<(&Position, &Health, Option<&Footprint>)>,
) {
    let mut seekers: Vec<Seeker> = Vec::new();

    for (entity, pos, faction, stats, mut target) in attackers.iter_mut() {
        if let Some(current) = target.0 {
            let keep = resolve_target(&targets, current)
                .map(|(target_pos, radius)| effective_distance(pos, &target_pos, radius) <= stats.range)
                .unwrap_or(false);
            if keep {
                continue;
            }
            target.0 = None;
        }
        seekers.push(Seeker {
            entity,
            faction: *faction,
            x: pos.x,
            y: pos.y,
            range: stats.range,
        });
    }

    let hash: &UnitHash = &hash;

    #[cfg(feature = "parallel")]
    let found: Vec<(Entity, Option<Entity>)> = seekers
        .par_iter()
        .map(|s| (s.entity, nearest_hostile(s, hash)))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let found: Vec<(Entity, Option<Entity>)> = seekers
        .iter()
        .map(|s| (s.entity, nearest_hostile(s, hash)))
        .collect();

    for (entity, choice) in found {
        if let (Some(choice), Ok((_, _, _, _, mut target))) = (choice, attackers.get_mut(entity)) {
            tracing::debug!(attacker = ?entity, target = ?choice, "target acquired");
            target.0 = Some(choice);
        }
    }
}

// ============================================================================
// ATTACK RESOLUTION
// ============================================================================

/// Resolve cooldown-gated attacks.
///
/// Player units and towers attack their `AttackTarget`; enemies attack their
/// AI target while in the Attacking state. Melee damage is staged in
/// `PendingDamage` immediately. Ranged attacks spawn a projectile, which
/// exists from the next tick on.
pub fn attack_resolution_system(
    mut commands: Commands,
    time: Res<GameTime>,
    config: Res<GameConfig>,
    mut pending: ResMut<PendingDamage>,
    mut attackers: Query<
        (Entity, &Position, &Faction, &mut AttackStats, Option<&AttackTarget>, Option<&EnemyAi>),
        Without<Dead>,
    >,
    targets: Query<(&Position, &Health, Option<&Footprint>)>,
) {
    let dt = time.dt;

    for (entity, pos, faction, mut stats, attack_target, enemy_ai) in attackers.iter_mut() {
        if stats.cooldown_remaining > 0.0 {
            stats.cooldown_remaining = (stats.cooldown_remaining - dt).max(0.0);
        }

        let (target, reach) = match (enemy_ai, attack_target) {
            (Some(ai), _) if ai.state == EnemyState::Attacking => (ai.current_target, stats.range * ATTACK_LEASH),
            (Some(_), _) => continue,
            (None, Some(t)) => (t.0, stats.range),
            (None, None) => continue,
        };
        let Some(target) = target else {
            continue;
        };
        let Some((target_pos, radius)) = resolve_target(&targets, target) else {
            continue;
        };
        if !stats.is_ready() || effective_distance(pos, &target_pos, radius) > reach {
            continue;
        }

        stats.cooldown_remaining = stats.cooldown;
        pending.0.attacked.push(entity);

        match stats.kind {
            AttackKind::Melee => {
                pending.0.add_damage(target, stats.damage_type, stats.damage);
            }
            AttackKind::Ranged => {
                let speed = if stats.projectile_speed > 0.0 {
                    stats.projectile_speed
                } else {
                    config.projectile_speed
                };
                commands.spawn((
                    Position::new(pos.x, pos.y),
                    Projectile {
                        source_faction: *faction,
                        target: Some(target),
                        last_known: target_pos.as_tuple(),
                        speed,
                        damage: stats.damage,
                        damage_type: stats.damage_type,
                        aoe_radius: stats.aoe_radius,
                        hit_radius: config.projectile_hit_radius,
                        lifetime: config.projectile_lifetime,
                    },
                ));
            }
        }
    }
}

// ============================================================================
// DAMAGE APPLICATION
// ============================================================================

/// Apply all staged damage, armor-adjusted, then clear the buffer.
pub fn damage_application_system(
    mut pending: ResMut<PendingDamage>,
    mut query: Query<(&mut Health, Option<&Armor>)>,
) {
    let results = std::mem::take(&mut pending.0);
    if !results.damage.is_empty() {
        tracing::trace!(
            attackers = results.attacked.len(),
            targets = results.damage.len(),
            "applying damage"
        );
    }
    for (entity, damage) in results.damage {
        let Ok((mut health, armor)) = query.get_mut(entity) else {
            continue;
        };
        health.damage(damage.mitigated(armor));
    }
}

// ============================================================================
// DEATH
// ============================================================================

/// Tag newly dead entities with `Dead` and start their grace timer.
pub fn death_marking_system(
    mut commands: Commands,
    config: Res<GameConfig>,
    query: Query<(Entity, &Health), Without<Dead>>,
) {
    for (entity, health) in query.iter() {
        if health.is_dead {
            tracing::debug!(?entity, "entity died");
            commands.entity(entity).insert((
                Dead,
                DeathTimer {
                    remaining: config.death_grace_period,
                },
            ));
        }
    }
}

/// Despawn dead entities once their grace period has run out.
pub fn death_cleanup_system(mut commands: Commands, time: Res<GameTime>, mut query: Query<(Entity, &mut DeathTimer)>) {
    let dt = time.dt;
    for (entity, mut timer) in query.iter_mut() {
        timer.remaining -= dt;
        if timer.remaining <= 0.0 {
            commands.entity(entity).despawn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> World {
        let mut world = World::new();
        world.insert_resource(GameTime::new(0.1));
        world.insert_resource(GameConfig::default());
        world.insert_resource(PendingDamage::default());
        world.insert_resource(UnitHash::new(10.0));
        world
    }

    #[test]
    fn test_damage_application_uses_armor() {
        let mut world = world();
        let e = world
            .spawn((
                Health::new(100.0),
                Armor {
                    physical: 0.5,
                    ..Default::default()
                },
            ))
            .id();
        world.resource_mut::<PendingDamage>().0.add_damage(e, DamageType::Physical, 40.0);
        world.resource_mut::<PendingDamage>().0.add_damage(e, DamageType::Pierce, 10.0);

        let mut schedule = Schedule::default();
        schedule.add_systems(damage_application_system);
        schedule.run(&mut world);

        assert_eq!(world.get::<Health>(e).unwrap().current, 70.0);
        assert!(world.resource::<PendingDamage>().0.damage.is_empty());
    }

    #[test]
    fn test_melee_attack_is_cooldown_gated() {
        let mut world = world();
        let target = world.spawn((Position::new(1.0, 0.0), Health::new(100.0))).id();
        world.spawn((
            Position::new(0.0, 0.0),
            Faction::Player,
            AttackStats::melee(10.0, 2.0, 1.0),
            AttackTarget(Some(target)),
        ));

        let mut schedule = Schedule::default();
        schedule.add_systems((attack_resolution_system, damage_application_system).chain());

        // 0.1 s ticks: one hit on the first tick, the second about a second later.
        for _ in 0..15 {
            schedule.run(&mut world);
        }
        assert_eq!(world.get::<Health>(target).unwrap().current, 80.0);
    }

    #[test]
    fn test_ranged_attack_spawns_projectile() {
        let mut world = world();
        let target = world.spawn((Position::new(10.0, 0.0), Health::new(100.0))).id();
        world.spawn((
            Position::new(0.0, 0.0),
            Faction::Player,
            AttackStats::ranged(30.0, 25.0, 1.0, 40.0),
            AttackTarget(Some(target)),
        ));

        let mut schedule = Schedule::default();
        schedule.add_systems(attack_resolution_system);
        schedule.run(&mut world);

        let mut query = world.query::<&Projectile>();
        let projectile = query.single(&world);
        assert_eq!(projectile.target, Some(target));
        assert_eq!(projectile.last_known, (10.0, 0.0));
        assert_eq!(world.get::<Health>(target).unwrap().current, 100.0);
    }

    #[test]
    fn test_enemy_attacks_only_while_attacking() {
        let mut world = world();
        let target = world.spawn((Position::new(1.0, 0.0), Health::new(100.0))).id();
        let mut ai = EnemyAi::new(80.0, 0.5);
        ai.state = EnemyState::MovingToTarget;
        ai.current_target = Some(target);
        let enemy = world
            .spawn((Position::new(0.0, 0.0), Faction::Enemy, AttackStats::melee(10.0, 2.0, 1.0), ai))
            .id();

        let mut schedule = Schedule::default();
        schedule.add_systems((attack_resolution_system, damage_application_system).chain());
        schedule.run(&mut world);
        assert_eq!(world.get::<Health>(target).unwrap().current, 100.0);

        world.get_mut::<EnemyAi>(enemy).unwrap().state = EnemyState::Attacking;
        schedule.run(&mut world);
        assert_eq!(world.get::<Health>(target).unwrap().current, 90.0);
    }

    #[test]
    fn test_target_acquisition_drops_dead_and_picks_nearest_hostile() {
        let mut world = world();
        let far = world
            .spawn((Position::new(8.0, 0.0), Faction::Enemy, Health::new(10.0)))
            .id();
        let near = world
            .spawn((Position::new(4.0, 0.0), Faction::Enemy, Health::new(10.0)))
            .id();
        let friend = world
            .spawn((Position::new(1.0, 0.0), Faction::Player, Health::new(10.0)))
            .id();
        let tower = world
            .spawn((
                Position::new(0.0, 0.0),
                Faction::Player,
                AttackStats::ranged(30.0, 25.0, 1.0, 40.0),
                AttackTarget(Some(far)),
            ))
            .id();
        world.get_mut::<Health>(far).unwrap().damage(100.0);

        let mut hash = UnitHash::new(10.0);
        hash.insert(near, 4.0, 0.0, Faction::Enemy);
        hash.insert(friend, 1.0, 0.0, Faction::Player);
        world.insert_resource(hash);

        let mut schedule = Schedule::default();
        schedule.add_systems(target_acquisition_system);
        schedule.run(&mut world);

        assert_eq!(world.get::<AttackTarget>(tower).unwrap().0, Some(near));
    }

    #[test]
    fn test_despawned_or_unplaced_target_stages_no_damage() {
        for remove_position in [false, true] {
            let mut world = world();
            let target = world.spawn((Position::new(0.5, 0.0), Health::new(100.0))).id();
            let soldier = world
                .spawn((
                    Position::new(-1.0, 0.0),
                    Faction::Player,
                    AttackStats::melee(10.0, 2.0, 1.0),
                    AttackTarget(Some(target)),
                ))
                .id();
            let mut ai = EnemyAi::new(80.0, 0.5);
            ai.state = EnemyState::Attacking;
            ai.current_target = Some(target);
            let raider = world
                .spawn((Position::new(2.0, 0.0), Faction::Enemy, AttackStats::melee(10.0, 2.0, 1.0), ai))
                .id();

            if remove_position {
                world.entity_mut(target).remove::<Position>();
            } else {
                world.despawn(target);
            }

            let mut schedule = Schedule::default();
            schedule.add_systems((target_acquisition_system, attack_resolution_system).chain());
            schedule.run(&mut world);

            assert_eq!(world.get::<AttackTarget>(soldier).unwrap().0, None);
            let pending = &world.resource::<PendingDamage>().0;
            assert!(!pending.damage.contains_key(&target), "unplaced {remove_position}");
            assert!(pending.damage.is_empty());
            assert!(pending.attacked.is_empty());
            assert_eq!(world.get::<AttackStats>(soldier).unwrap().cooldown_remaining, 0.0);
            assert_eq!(world.get::<AttackStats>(raider).unwrap().cooldown_remaining, 0.0);
        }
    }

    #[test]
    fn test_death_marking_and_cleanup() {
        let mut world = world();
        let e = world.spawn(Health::new(10.0)).id();
        world.get_mut::<Health>(e).unwrap().damage(50.0);

        let mut schedule = Schedule::default();
        schedule.add_systems((death_marking_system, death_cleanup_system).chain());

        schedule.run(&mut world);
        assert!(world.get::<Dead>(e).is_some());

        // Default grace period is 2 s at 0.1 s per tick.
        for _ in 0..25 {
            schedule.run(&mut world);
        }
        assert!(world.get_entity(e).is_err());
    }
}
