//! Enemy AI - target acquisition state machine.
//!
//! ```text
//! Spawning -> SeekingTarget -> MovingToTarget -> Attacking
//!                  ^                 |    ^          |
//!                  +-- target lost --+    +-- >1.2x --+
//! ```
//!
//! `Dead` is absorbing and entered from any state once `Health::is_dead`.
//!
//! Targets come from the `TargetHash` (player units and constructed player
//! buildings) built at the start of the tick. The best candidate minimizes
//! `dist² / max(0.1, threat)`. Equal scores keep the first candidate in hash
//! scan order, which is not stable across reordered insertion.
//!
//! ## Parallel Feature
//!
//! With `--features parallel`, candidate scoring for all seekers runs on rayon.

use crate::components::*;
use crate::config::GameConfig;
use crate::resources::GameTime;
use crate::spatial::TargetHash;
use bevy_ecs::prelude::*;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Lower bound on threat in the target score.
pub const MIN_THREAT: f32 = 0.1;

/// Leaving attack range by this factor drops back to pursuit.
pub const ATTACK_LEASH: f32 = 1.2;

/// Priority score for a candidate; lower is better.
pub fn target_score(dist_sq: f32, threat: f32) -> f32 {
    dist_sq / threat.max(MIN_THREAT)
}

/// Distance from `pos` to the edge of a target with the given footprint radius.
pub fn effective_distance(pos: &Position, target: &Position, radius: f32) -> f32 {
    (pos.distance_to(target) - radius).max(0.0)
}

/// Resolve a target reference: it must exist, keep its position and be alive.
/// Returns the target's position and footprint radius.
pub fn resolve_target(
    targets: &Query<(&Position, &Health, Option<&Footprint>)>,
    target: Entity,
) -> Option<(Position, f32)> {
    let (pos, health, footprint) = targets.get(target).ok()?;
    if health.is_dead {
        return None;
    }
    Some((*pos, footprint.map(|f| f.radius).unwrap_or(0.0)))
}

fn best_target(hash: &TargetHash, x: f32, y: f32, radius: f32) -> Option<(Entity, f32, f32)> {
    hash.min_by_score(x, y, radius, |entry, dist_sq| Some(target_score(dist_sq, entry.payload.0)))
        .map(|entry| (entry.entity, entry.x, entry.y))
}

/// Enemy waiting on a fresh target search this tick.
#[derive(Clone, Copy)]
struct Seeker {
    entity: Entity,
    x: f32,
    y: f32,
    radius: f32,
}

fn set_state(entity: Entity, ai: &mut EnemyAi, next: EnemyState) {
    if ai.state != next {
        tracing::debug!(?entity, from = ?ai.state, to = ?next, "enemy state");
        ai.state = next;
    }
}

/// Drive every enemy's state machine and write its movement destination.
pub fn enemy_ai_system(
    time: Res<GameTime>,
    config: Res<GameConfig>,
    hash: Res<TargetHash>,
    mut enemies: Query<
        (Entity, &Position, &mut EnemyAi, &mut Destination, &Health, Option<&AttackStats>),
        With<EnemyUnit>,
    >,
    targets: Query<(&Position, &Health, Option<&Footprint>)>,
) {
    let dt = time.dt;
    let mut seekers: Vec<Seeker> = Vec::new();

    for (entity, pos, mut ai, mut dest, health, attack) in enemies.iter_mut() {
        if health.is_dead {
            if ai.state != EnemyState::Dead {
                set_state(entity, &mut ai, EnemyState::Dead);
                ai.clear_target();
                dest.clear();
            }
            continue;
        }

        match ai.state {
            EnemyState::Dead => continue,
            EnemyState::Spawning => {
                ai.spawn_delay -= dt;
                if ai.spawn_delay > 0.0 {
                    continue;
                }
                set_state(entity, &mut ai, EnemyState::SeekingTarget);
                ai.retarget_timer = 0.0;
            }
            _ => {}
        }

        ai.retarget_timer -= dt;
        let range = attack.map(|a| a.range).unwrap_or(config.enemy.attack_range);

        match ai.state {
            EnemyState::SeekingTarget => {
                if ai.retarget_timer <= 0.0 {
                    ai.retarget_timer = ai.retarget_interval;
                    seekers.push(Seeker {
                        entity,
                        x: pos.x,
                        y: pos.y,
                        radius: ai.detection_radius,
                    });
                }
            }
            EnemyState::MovingToTarget => {
                let Some((target_pos, radius)) = ai.current_target.and_then(|t| resolve_target(&targets, t)) else {
                    ai.clear_target();
                    set_state(entity, &mut ai, EnemyState::SeekingTarget);
                    ai.retarget_timer = 0.0;
                    continue;
                };
                ai.target_position = Some(target_pos.as_tuple());

                if effective_distance(pos, &target_pos, radius) <= range {
                    set_state(entity, &mut ai, EnemyState::Attacking);
                    dest.clear();
                    continue;
                }
                if dest.point != Some(target_pos.as_tuple()) {
                    dest.set(target_pos.x, target_pos.y);
                }
                if ai.retarget_timer <= 0.0 {
                    // Periodic re-evaluation; a better target may have appeared.
                    ai.retarget_timer = ai.retarget_interval;
                    seekers.push(Seeker {
                        entity,
                        x: pos.x,
                        y: pos.y,
                        radius: ai.detection_radius,
                    });
                }
            }
            EnemyState::Attacking => {
                let Some((target_pos, radius)) = ai.current_target.and_then(|t| resolve_target(&targets, t)) else {
                    ai.clear_target();
                    set_state(entity, &mut ai, EnemyState::SeekingTarget);
                    ai.retarget_timer = 0.0;
                    continue;
                };
                ai.target_position = Some(target_pos.as_tuple());

                if effective_distance(pos, &target_pos, radius) > range * ATTACK_LEASH {
                    set_state(entity, &mut ai, EnemyState::MovingToTarget);
                    dest.set(target_pos.x, target_pos.y);
                }
            }
            EnemyState::Spawning | EnemyState::Dead => {}
        }
    }

    if seekers.is_empty() {
        return;
    }

    // SCORING PHASE: read-only against the target hash
    let hash: &TargetHash = &hash;

    #[cfg(feature = "parallel")]
    let found: Vec<(Entity, Option<(Entity, f32, f32)>)> = seekers
        .par_iter()
        .map(|s| (s.entity, best_target(hash, s.x, s.y, s.radius)))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let found: Vec<(Entity, Option<(Entity, f32, f32)>)> = seekers
        .iter()
        .map(|s| (s.entity, best_target(hash, s.x, s.y, s.radius)))
        .collect();

    // APPLY PHASE
    for (entity, choice) in found {
        let Ok((_, pos, mut ai, mut dest, _, attack)) = enemies.get_mut(entity) else {
            continue;
        };
        let range = attack.map(|a| a.range).unwrap_or(config.enemy.attack_range);

        match choice.and_then(|(target, _, _)| resolve_target(&targets, target).map(|info| (target, info))) {
            Some((target, (target_pos, radius))) => {
                if ai.current_target != Some(target) {
                    tracing::debug!(?entity, ?target, "enemy acquired target");
                }
                ai.current_target = Some(target);
                ai.target_position = Some(target_pos.as_tuple());
                if effective_distance(pos, &target_pos, radius) <= range {
                    set_state(entity, &mut ai, EnemyState::Attacking);
                    dest.clear();
                } else {
                    set_state(entity, &mut ai, EnemyState::MovingToTarget);
                    dest.set(target_pos.x, target_pos.y);
                }
            }
            None if ai.state == EnemyState::MovingToTarget => {
                // Current target is still valid but out of detection range; keep chasing.
            }
            None => {
                ai.clear_target();
                set_state(entity, &mut ai, EnemyState::SeekingTarget);
                if dest.point != Some((0.0, 0.0)) {
                    dest.set(0.0, 0.0);
                }
            }
        }
    }
}
