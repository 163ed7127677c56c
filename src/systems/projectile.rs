//! Projectile flight and impact.
//!
//! Projectiles home on their target while it lives and fly on to the last
//! known position once it is gone. Impacts stage damage in `PendingDamage`;
//! splash damage falls off linearly with distance from the impact point.

use crate::components::*;
use crate::resources::GameTime;
use crate::spatial::UnitHash;
use crate::systems::combat::PendingDamage;
use crate::systems::enemy_ai::resolve_target;
use bevy_ecs::prelude::*;

/// Splash multiplier at `distance` from the impact point.
pub fn splash_falloff(distance: f32, radius: f32) -> f32 {
    if radius <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / radius).clamp(0.0, 1.0)
}

/// Advance projectiles toward their target and expire old ones.
pub fn projectile_movement_system(
    mut commands: Commands,
    time: Res<GameTime>,
    mut projectiles: Query<(Entity, &mut Position, &mut Projectile)>,
    targets: Query<(&Position, &Health, Option<&Footprint>), Without<Projectile>>,
) {
    let dt = time.dt;

    for (entity, mut pos, mut projectile) in projectiles.iter_mut() {
        projectile.lifetime -= dt;
        if projectile.lifetime <= 0.0 {
            commands.entity(entity).despawn();
            continue;
        }

        if let Some(target) = projectile.target {
            match resolve_target_position(&targets, target) {
                Some(target_pos) => projectile.last_known = target_pos.as_tuple(),
                None => projectile.target = None,
            }
        }

        let (tx, ty) = projectile.last_known;
        let dx = tx - pos.x;
        let dy = ty - pos.y;
        let dist = (dx * dx + dy * dy).sqrt();
        let step = projectile.speed * dt;
        if dist <= step || dist < 1e-4 {
            pos.x = tx;
            pos.y = ty;
        } else {
            pos.x += dx / dist * step;
            pos.y += dy / dist * step;
        }
    }
}

fn resolve_target_position(
    targets: &Query<(&Position, &Health, Option<&Footprint>), Without<Projectile>>,
    target: Entity,
) -> Option<Position> {
    let (pos, health, _) = targets.get(target).ok()?;
    health.is_alive().then_some(*pos)
}

/// Detect hits, stage damage and despawn spent projectiles.
///
/// A projectile hits when it is within `hit_radius` of its live target (plus
/// the target's footprint). A projectile whose target is gone detonates on
/// reaching the last known position; without splash it deals no damage.
pub fn projectile_collision_system(
    mut commands: Commands,
    hash: Res<UnitHash>,
    mut pending: ResMut<PendingDamage>,
    projectiles: Query<(Entity, &Position, &Projectile)>,
    targets: Query<(&Position, &Health, Option<&Footprint>)>,
) {
    for (entity, pos, projectile) in projectiles.iter() {
        if projectile.lifetime <= 0.0 {
            continue;
        }
        let impact = match projectile.target {
            Some(target) => match resolve_target(&targets, target) {
                Some((target_pos, radius)) => {
                    (pos.distance_to(&target_pos) <= projectile.hit_radius + radius).then_some(Some(target))
                }
                None => None,
            },
            None => {
                let (lx, ly) = projectile.last_known;
                (pos.distance_to(&Position::new(lx, ly)) <= projectile.hit_radius).then_some(None)
            }
        };
        let Some(direct) = impact else {
            continue;
        };

        if projectile.aoe_radius > 0.0 {
            hash.for_each_neighbor(pos.x, pos.y, projectile.aoe_radius, |entry, dist_sq| {
                if projectile.source_faction.is_hostile_to(entry.payload) {
                    let falloff = splash_falloff(dist_sq.sqrt(), projectile.aoe_radius);
                    pending
                        .0
                        .add_damage(entry.entity, projectile.damage_type, projectile.damage * falloff);
                }
            });
            // The struck target takes full damage even if it sits outside the hash.
            if let Some(target) = direct {
                if !hash.query_neighbors(pos.x, pos.y, projectile.aoe_radius).iter().any(|e| e.entity == target) {
                    pending.0.add_damage(target, projectile.damage_type, projectile.damage);
                }
            }
        } else if let Some(target) = direct {
            pending.0.add_damage(target, projectile.damage_type, projectile.damage);
        }

        tracing::trace!(projectile = ?entity, target = ?direct, "projectile impact");
        commands.entity(entity).despawn();
    }
}
