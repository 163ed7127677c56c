//! Flow field navigation grid.
//!
//! A square grid centered on the world origin stores one direction per cell,
//! pointing in a straight line at the current goal. Agents sample their cell
//! instead of searching for a path, so the cost of a goal change is paid once
//! per cell, not once per agent.
//!
//! The field ignores obstacles; obstacle avoidance is layered on top by the
//! movement pipeline.

use crate::config::GameConfig;
use bevy_ecs::prelude::*;

/// Whether the field holds directions yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowFieldState {
    #[default]
    Uninitialized,
    Ready,
}

/// Direction grid toward a single goal.
#[derive(Resource, Debug, Clone)]
pub struct FlowField {
    size: usize,
    cell_size: f32,
    /// World coordinates of the corner of cell (0, 0).
    origin: (f32, f32),
    directions: Vec<(f32, f32)>,
    state: FlowFieldState,
    goal: Option<(f32, f32)>,
    /// Number of times the field has been computed.
    generation: u32,
}

impl FlowField {
    /// Create an uninitialized `size × size` field.
    pub fn new(size: usize, cell_size: f32) -> Self {
        let half = size as f32 * cell_size * 0.5;
        Self {
            size,
            cell_size,
            origin: (-half, -half),
            directions: vec![(0.0, 0.0); size * size],
            state: FlowFieldState::Uninitialized,
            goal: None,
            generation: 0,
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.flow_field_size(), config.flow_cell_size)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn state(&self) -> FlowFieldState {
        self.state
    }

    pub fn goal(&self) -> Option<(f32, f32)> {
        self.goal
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Grid coordinates of a world position, clamped to the grid.
    pub fn world_to_grid(&self, x: f32, y: f32) -> (usize, usize) {
        let max = self.size.saturating_sub(1) as f32;
        let gx = ((x - self.origin.0) / self.cell_size).floor().clamp(0.0, max);
        let gy = ((y - self.origin.1) / self.cell_size).floor().clamp(0.0, max);
        // NaN survives `clamp` and casts to 0.
        (gx as usize, gy as usize)
    }

    /// World position of a cell's center.
    pub fn cell_center(&self, gx: usize, gy: usize) -> (f32, f32) {
        (
            self.origin.0 + (gx as f32 + 0.5) * self.cell_size,
            self.origin.1 + (gy as f32 + 0.5) * self.cell_size,
        )
    }

    /// Compute a straight-line field toward `target` and mark the field ready.
    ///
    /// Every cell stores `normalize(target - cell_center)`. The cell containing
    /// the target stores zero so agents at the goal come to rest.
    pub fn initialize(&mut self, target: (f32, f32)) {
        let goal_cell = self.world_to_grid(target.0, target.1);
        for gy in 0..self.size {
            for gx in 0..self.size {
                let direction = if (gx, gy) == goal_cell {
                    (0.0, 0.0)
                } else {
                    let (cx, cy) = self.cell_center(gx, gy);
                    normalize(target.0 - cx, target.1 - cy)
                };
                self.directions[gy * self.size + gx] = direction;
            }
        }
        self.goal = Some(target);
        self.state = FlowFieldState::Ready;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Direction stored for the cell containing `(x, y)`, clamped to the grid.
    /// Zero while uninitialized.
    pub fn sample(&self, x: f32, y: f32) -> (f32, f32) {
        if self.state == FlowFieldState::Uninitialized || self.directions.is_empty() {
            return (0.0, 0.0);
        }
        let (gx, gy) = self.world_to_grid(x, y);
        self.directions[gy * self.size + gx]
    }
}

fn normalize(x: f32, y: f32) -> (f32, f32) {
    let len = (x * x + y * y).sqrt();
    if len < 1e-4 {
        (0.0, 0.0)
    } else {
        (x / len, y / len)
    }
}

/// Requested crowd navigation goal, written by the input collaborator.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct FlowFieldGoal {
    pub target: Option<(f32, f32)>,
}

/// Recompute the field when the requested goal differs from the current one.
pub fn flow_field_goal_system(goal: Res<FlowFieldGoal>, mut field: ResMut<FlowField>) {
    let Some(target) = goal.target else {
        return;
    };
    if !target.0.is_finite() || !target.1.is_finite() {
        tracing::warn!(?target, "ignoring non-finite flow field goal");
        return;
    }
    if field.goal() == Some(target) {
        return;
    }
    field.initialize(target);
    tracing::debug!(?target, generation = field.generation(), "flow field recomputed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length((x, y): (f32, f32)) -> f32 {
        (x * x + y * y).sqrt()
    }

    #[test]
    fn test_uninitialized_samples_zero() {
        let field = FlowField::new(16, 4.0);
        assert_eq!(field.state(), FlowFieldState::Uninitialized);
        assert_eq!(field.sample(3.0, -7.0), (0.0, 0.0));
    }

    #[test]
    fn test_sample_at_target_is_zero() {
        let mut field = FlowField::new(32, 4.0);
        field.initialize((10.0, -6.0));
        assert_eq!(field.state(), FlowFieldState::Ready);
        assert!(length(field.sample(10.0, -6.0)) < 1e-4);
    }

    #[test]
    fn test_far_sample_points_at_target() {
        let mut field = FlowField::new(64, 2.0);
        field.initialize((0.0, 0.0));

        let dir = field.sample(-50.0, 0.5);
        assert!((length(dir) - 1.0).abs() < 1e-4);
        assert!(dir.0 > 0.99, "expected +x direction, got {dir:?}");

        let dir = field.sample(40.0, 40.0);
        assert!((length(dir) - 1.0).abs() < 1e-4);
        assert!(dir.0 < 0.0 && dir.1 < 0.0);
    }

    #[test]
    fn test_out_of_bounds_sample_is_clamped() {
        let mut field = FlowField::new(8, 1.0);
        field.initialize((0.0, 0.0));
        // Beyond the map edge, the edge cell is used.
        assert_eq!(field.sample(1000.0, 0.2), field.sample(3.5, 0.2));
        assert_eq!(field.sample(f32::NAN, 0.0), field.sample(-4.0, 0.0));
    }

    #[test]
    fn test_goal_system_recomputes_only_on_change() {
        let mut world = World::new();
        world.insert_resource(FlowField::new(16, 4.0));
        world.insert_resource(FlowFieldGoal {
            target: Some((4.0, 4.0)),
        });

        let mut schedule = Schedule::default();
        schedule.add_systems(flow_field_goal_system);

        schedule.run(&mut world);
        schedule.run(&mut world);
        assert_eq!(world.resource::<FlowField>().generation(), 1);

        world.resource_mut::<FlowFieldGoal>().target = Some((-8.0, 0.0));
        schedule.run(&mut world);
        let field = world.resource::<FlowField>();
        assert_eq!(field.generation(), 2);
        assert_eq!(field.goal(), Some((-8.0, 0.0)));
    }
}
