//! Movement pipeline.
//!
//! Five stages run in this order every tick, each reading the velocity the
//! previous stage produced:
//!
//! 1. `flow_field_sample_system` - blend toward the flow field direction
//! 2. `obstacle_avoidance_system` - push away from nearby obstacles
//! 3. `steering_system` - separation, alignment and cohesion
//! 4. `target_seeking_system` - accelerate toward the destination or brake
//! 5. `integration_system` - apply velocity to position and turn the heading
//!
//! ## Parallel Feature
//!
//! With `--features parallel`, the steering gather phase runs on rayon over a
//! read-only snapshot; forces are applied sequentially afterwards.

use crate::components::*;
use crate::flow_field::{FlowField, FlowFieldState};
use crate::resources::GameTime;
use crate::spatial::{FlockHash, ObstacleHash};
use bevy_ecs::prelude::*;
use std::f32::consts::{PI, TAU};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const MIN_MOVING_SPEED: f32 = 1e-3;

// ============================================================================
// FLOW FIELD SAMPLING
// ============================================================================

/// Lerp each agent's velocity toward `direction * max_speed` from the flow field.
///
/// Does nothing until the field has been initialized.
pub fn flow_field_sample_system(
    field: Res<FlowField>,
    mut query: Query<(&Position, &mut Velocity, &MovementStats, &FlowFieldAgent), Without<Dead>>,
) {
    if field.state() != FlowFieldState::Ready {
        return;
    }
    for (pos, mut vel, stats, agent) in query.iter_mut() {
        let (dx, dy) = field.sample(pos.x, pos.y);
        vel.lerp_toward(dx * stats.max_speed, dy * stats.max_speed, agent.blend);
    }
}

// ============================================================================
// OBSTACLE AVOIDANCE
// ============================================================================

/// Repulsion from obstacles in the 3x3 cell block around `pos`.
///
/// Each obstacle closer than `avoider.radius + obstacle.radius` contributes a
/// unit push away from it, weighted by `(reach - dist) / reach`.
pub fn avoidance_force(obstacles: &ObstacleHash, entity: Entity, pos: &Position, avoider: &ObstacleAvoider) -> (f32, f32) {
    let mut force = (0.0, 0.0);
    obstacles.for_each_in_block(pos.x, pos.y, |obstacle| {
        if obstacle.entity == entity {
            return;
        }
        let reach = avoider.radius + obstacle.payload.radius;
        if reach <= 0.0 {
            return;
        }
        let dist_sq = obstacle.distance_sq(pos.x, pos.y);
        if dist_sq >= reach * reach || dist_sq < 1e-8 {
            return;
        }
        let dist = dist_sq.sqrt();
        let weight = (reach - dist) / reach;
        force.0 += (pos.x - obstacle.x) / dist * weight;
        force.1 += (pos.y - obstacle.y) / dist * weight;
    });
    force
}

/// Push moving entities away from obstacles, then re-clamp to max speed.
pub fn obstacle_avoidance_system(
    time: Res<GameTime>,
    obstacles: Res<ObstacleHash>,
    mut query: Query<(Entity, &Position, &mut Velocity, &MovementStats, &ObstacleAvoider), Without<Dead>>,
) {
    if obstacles.is_empty() {
        return;
    }
    let dt = time.dt;
    for (entity, pos, mut vel, stats, avoider) in query.iter_mut() {
        if vel.magnitude() < MIN_MOVING_SPEED {
            continue;
        }
        let (fx, fy) = avoidance_force(&obstacles, entity, pos, avoider);
        if fx == 0.0 && fy == 0.0 {
            continue;
        }
        vel.vx += fx * avoider.strength * dt;
        vel.vy += fy * avoider.strength * dt;
        vel.clamp_magnitude(stats.max_speed);
    }
}

// ============================================================================
// STEERING (FLOCKING)
// ============================================================================

/// Agent data extracted for the steering gather phase.
#[derive(Clone, Copy)]
struct FlockAgent {
    entity: Entity,
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    max_speed: f32,
    flocking: Flocking,
}

/// Combined separation/alignment/cohesion force for one agent, clamped to `max_force`.
fn compute_steering(agent: &FlockAgent, hash: &FlockHash) -> (f32, f32) {
    let radius_sq = agent.flocking.neighbor_radius * agent.flocking.neighbor_radius;
    let mut separation = (0.0, 0.0);
    let mut velocity_sum = (0.0, 0.0);
    let mut position_sum = (0.0, 0.0);
    let mut count = 0u32;

    hash.for_each_in_block(agent.x, agent.y, |other| {
        if other.entity == agent.entity {
            return;
        }
        let dist_sq = other.distance_sq(agent.x, agent.y);
        if dist_sq > radius_sq {
            return;
        }
        count += 1;
        velocity_sum.0 += other.payload.vx;
        velocity_sum.1 += other.payload.vy;
        position_sum.0 += other.x;
        position_sum.1 += other.y;

        if dist_sq > 1e-8 {
            // Unit direction away, divided by distance.
            separation.0 += (agent.x - other.x) / dist_sq;
            separation.1 += (agent.y - other.y) / dist_sq;
        }
    });

    if count == 0 {
        return (0.0, 0.0);
    }
    let n = count as f32;

    let alignment = (velocity_sum.0 / n - agent.vx, velocity_sum.1 / n - agent.vy);

    let to_center = Velocity::new(position_sum.0 / n - agent.x, position_sum.1 / n - agent.y).normalized();
    let cohesion = (
        to_center.vx * agent.max_speed - agent.vx,
        to_center.vy * agent.max_speed - agent.vy,
    );

    let w = &agent.flocking;
    let mut force = Velocity::new(
        separation.0 * w.separation + alignment.0 * w.alignment + cohesion.0 * w.cohesion,
        separation.1 * w.separation + alignment.1 * w.alignment + cohesion.1 * w.cohesion,
    );
    force.clamp_magnitude(w.max_force);
    (force.vx, force.vy)
}

/// Apply flocking forces using the flock hash built at the start of the tick.
pub fn steering_system(
    time: Res<GameTime>,
    hash: Res<FlockHash>,
    mut query: Query<(Entity, &Position, &mut Velocity, &MovementStats, &Flocking), Without<Dead>>,
) {
    let dt = time.dt;
    let hash: &FlockHash = &hash;

    // GATHER PHASE: read-only snapshot
    let agents: Vec<FlockAgent> = query
        .iter()
        .map(|(entity, pos, vel, stats, flocking)| FlockAgent {
            entity,
            x: pos.x,
            y: pos.y,
            vx: vel.vx,
            vy: vel.vy,
            max_speed: stats.max_speed,
            flocking: *flocking,
        })
        .collect();

    #[cfg(feature = "parallel")]
    let forces: Vec<(Entity, (f32, f32))> = agents
        .par_iter()
        .map(|agent| (agent.entity, compute_steering(agent, hash)))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let forces: Vec<(Entity, (f32, f32))> = agents
        .iter()
        .map(|agent| (agent.entity, compute_steering(agent, hash)))
        .collect();

    // APPLY PHASE
    for (entity, (fx, fy)) in forces {
        if fx == 0.0 && fy == 0.0 {
            continue;
        }
        if let Ok((_, _, mut vel, stats, _)) = query.get_mut(entity) {
            vel.vx += fx * dt;
            vel.vy += fy * dt;
            vel.clamp_magnitude(stats.max_speed);
        }
    }
}

// ============================================================================
// TARGET SEEKING
// ============================================================================

/// Accelerate toward the destination, or brake when there is none.
///
/// Flow field agents without a destination keep their field-driven velocity.
pub fn target_seeking_system(
    time: Res<GameTime>,
    mut query: Query<(&Position, &mut Velocity, &MovementStats, &mut Destination, Has<FlowFieldAgent>), Without<Dead>>,
) {
    let dt = time.dt;
    for (pos, mut vel, stats, mut dest, is_flow_agent) in query.iter_mut() {
        let Some((tx, ty)) = dest.point else {
            if !is_flow_agent {
                brake(&mut vel, stats.braking, dt);
            }
            continue;
        };

        let dx = tx - pos.x;
        let dy = ty - pos.y;
        let dist_sq = dx * dx + dy * dy;
        let stop = dest.stopping_distance;

        if dist_sq <= stop * stop {
            if !dest.reached {
                dest.reached = true;
            }
            brake(&mut vel, stats.braking, dt);
            continue;
        }

        if dest.reached {
            dest.reached = false;
        }
        let dist = dist_sq.sqrt();
        let desired = (dx / dist * stats.max_speed, dy / dist * stats.max_speed);
        vel.lerp_toward(desired.0, desired.1, stats.acceleration * dt);
        vel.clamp_magnitude(stats.max_speed);
    }
}

fn brake(vel: &mut Velocity, rate: f32, dt: f32) {
    let factor = (-rate * dt).exp();
    vel.vx *= factor;
    vel.vy *= factor;
    if vel.magnitude() < MIN_MOVING_SPEED {
        vel.vx = 0.0;
        vel.vy = 0.0;
    }
}

// ============================================================================
// INTEGRATION
// ============================================================================

/// Rotate `current` toward `target` along the shortest arc by at most `max_step`.
pub fn rotate_toward(current: f32, target: f32, max_step: f32) -> f32 {
    let mut diff = (target - current) % TAU;
    if diff > PI {
        diff -= TAU;
    } else if diff < -PI {
        diff += TAU;
    }
    if diff.abs() <= max_step {
        target
    } else {
        current + max_step * diff.signum()
    }
}

/// System that applies velocity to position and turns the heading toward it.
pub fn integration_system(
    time: Res<GameTime>,
    mut query: Query<(&mut Position, &Velocity, Option<&mut Heading>, Option<&MovementStats>), Without<Dead>>,
) {
    let dt = time.dt;
    for (mut pos, vel, heading, stats) in query.iter_mut() {
        if vel.vx == 0.0 && vel.vy == 0.0 {
            continue;
        }
        pos.x += vel.vx * dt;
        pos.y += vel.vy * dt;

        if let (Some(mut heading), Some(stats)) = (heading, stats) {
            if vel.magnitude() >= MIN_MOVING_SPEED {
                let target = vel.vy.atan2(vel.vx);
                heading.0 = rotate_toward(heading.0, target, stats.rotation_speed * dt);
            }
        }
    }
}
