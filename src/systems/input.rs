//! Player orders from the input collaborator.
//!
//! Orders are applied in arrival order. Selection changes go through
//! `Commands`, so the system tracks the selection locally to let a `Select`
//! followed by `MoveSelected` in the same batch address the new selection.

use crate::components::{Destination, Selected};
use crate::flow_field::FlowFieldGoal;
use crate::resources::{PlayerOrder, PlayerOrders};
use bevy_ecs::prelude::*;

pub fn player_orders_system(
    mut commands: Commands,
    mut orders: ResMut<PlayerOrders>,
    mut goal: ResMut<FlowFieldGoal>,
    selected: Query<Entity, With<Selected>>,
    mut destinations: Query<&mut Destination>,
) {
    if orders.0.is_empty() {
        return;
    }
    let mut selection: Vec<Entity> = selected.iter().collect();

    for order in orders.0.drain(..) {
        match order {
            PlayerOrder::Select(entities) => {
                for entity in selection.iter().filter(|e| !entities.contains(*e)) {
                    if let Some(mut e) = commands.get_entity(*entity) {
                        e.remove::<Selected>();
                    }
                }
                selection.clear();
                for entity in entities {
                    if let Some(mut e) = commands.get_entity(entity) {
                        e.try_insert(Selected);
                        selection.push(entity);
                    } else {
                        tracing::warn!(?entity, "cannot select missing entity");
                    }
                }
            }
            PlayerOrder::MoveSelected { x, y } => {
                if !x.is_finite() || !y.is_finite() {
                    tracing::warn!(x, y, "ignoring non-finite move order");
                    continue;
                }
                for entity in &selection {
                    if let Ok(mut dest) = destinations.get_mut(*entity) {
                        dest.set(x, y);
                    }
                }
            }
            PlayerOrder::SetFlowGoal { x, y } => {
                goal.target = Some((x, y));
            }
        }
    }
}
