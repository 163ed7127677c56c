//! Update-group scheduler.
//!
//! Systems are registered into one of eight [`UpdateGroup`]s by name, with
//! optional `before`/`after` constraints against siblings in the same group.
//! [`ScheduleBuilder::build`] validates the constraints and linearizes each
//! group once at startup; [`SimSchedule::run_tick`] then runs the groups in
//! their fixed order every tick.
//!
//! ## Command playback
//!
//! Each group is backed by its own bevy `Schedule` with a single-threaded
//! executor and no automatic `apply_deferred` insertion. `Commands` issued by
//! any system in a group are applied once, after the group's last system.
//! Later systems in the same group never observe them.
//!
//! ## Failure
//!
//! A panicking system aborts its group. The group's schedule is dropped and
//! rebuilt from its registrations, which discards every command staged by the
//! group during that tick. Later groups still run and the tick reports
//! [`TickError::GroupsFailed`]. Rebuilt systems start with fresh `Local` state.
//!
//! Resources that a group writes directly alongside its commands are declared
//! with [`ScheduleBuilder::checkpoint_resource`]. They are cloned before the
//! group runs and restored when it fails, so the direct writes are dropped
//! together with the commands.
//!
//! ## Batches
//!
//! [`GroupPlan::batches`] groups systems with no ordering path between them.
//! They describe the dependency graph; execution is always the linear order.
//! Parallelism lives inside systems, behind the `parallel` feature.

use crate::error::{ScheduleError, TickError};
use crate::profiler::GroupProfiler;
use bevy_ecs::prelude::*;
use bevy_ecs::schedule::{ExecutorKind, ScheduleBuildSettings, ScheduleLabel, SystemConfigs};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Named phases of a tick, in execution order.
#[derive(ScheduleLabel, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateGroup {
    Input,
    MovementAi,
    Economy,
    Combat,
    Building,
    GameState,
    Cleanup,
    Presentation,
}

impl UpdateGroup {
    /// Fixed execution order.
    pub const ORDER: [UpdateGroup; 8] = [
        UpdateGroup::Input,
        UpdateGroup::MovementAi,
        UpdateGroup::Economy,
        UpdateGroup::Combat,
        UpdateGroup::Building,
        UpdateGroup::GameState,
        UpdateGroup::Cleanup,
        UpdateGroup::Presentation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UpdateGroup::Input => "input",
            UpdateGroup::MovementAi => "movement_ai",
            UpdateGroup::Economy => "economy",
            UpdateGroup::Combat => "combat",
            UpdateGroup::Building => "building",
            UpdateGroup::GameState => "game_state",
            UpdateGroup::Cleanup => "cleanup",
            UpdateGroup::Presentation => "presentation",
        }
    }
}

/// System set carrying the registration name, used to chain systems inside a group.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemLabel(pub &'static str);

type SystemFactory = Arc<dyn Fn() -> SystemConfigs + Send + Sync>;

/// Restores one resource to the value it held before the group ran.
type Restore = Box<dyn FnOnce(&mut World)>;

/// Captures a resource, if present, and returns its restore step.
type CheckpointFactory = Arc<dyn Fn(&World) -> Option<Restore> + Send + Sync>;

fn checkpoint<R: Resource + Clone>() -> CheckpointFactory {
    Arc::new(|world: &World| {
        let saved = world.get_resource::<R>()?.clone();
        Some(Box::new(move |world: &mut World| world.insert_resource(saved)) as Restore)
    })
}

struct Registration {
    group: UpdateGroup,
    name: &'static str,
    factory: SystemFactory,
    before: Vec<&'static str>,
    after: Vec<&'static str>,
}

/// Collects named system registrations and their ordering constraints.
#[derive(Default)]
pub struct ScheduleBuilder {
    registrations: Vec<Registration>,
    checkpoints: Vec<(UpdateGroup, CheckpointFactory)>,
}

/// Handle returned by [`ScheduleBuilder::add_system`] for declaring constraints.
pub struct SystemHandle<'a> {
    registration: &'a mut Registration,
}

impl SystemHandle<'_> {
    /// Run this system before the sibling named `other`.
    pub fn before(self, other: &'static str) -> Self {
        self.registration.before.push(other);
        self
    }

    /// Run this system after the sibling named `other`.
    pub fn after(self, other: &'static str) -> Self {
        self.registration.after.push(other);
        self
    }
}

impl ScheduleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `system` under `name` in `group`.
    ///
    /// Names must be unique across all groups.
    pub fn add_system<M, S>(&mut self, group: UpdateGroup, name: &'static str, system: S) -> SystemHandle<'_>
    where
        M: 'static,
        S: IntoSystemConfigs<M> + Clone + Send + Sync + 'static,
    {
        let factory: SystemFactory = Arc::new(move || system.clone().into_configs());
        self.registrations.push(Registration {
            group,
            name,
            factory,
            before: Vec::new(),
            after: Vec::new(),
        });
        let index = self.registrations.len() - 1;
        SystemHandle {
            registration: &mut self.registrations[index],
        }
    }

    /// Roll resource `R` back when any system in `group` panics.
    pub fn checkpoint_resource<R: Resource + Clone>(&mut self, group: UpdateGroup) -> &mut Self {
        self.checkpoints.push((group, checkpoint::<R>()));
        self
    }

    /// Validate constraints and linearize every group.
    pub fn build(self) -> Result<SimSchedule, ScheduleError> {
        let mut index_of: HashMap<&'static str, usize> = HashMap::new();
        for (index, registration) in self.registrations.iter().enumerate() {
            if index_of.insert(registration.name, index).is_some() {
                return Err(ScheduleError::DuplicateSystem {
                    group: registration.group,
                    name: registration.name.to_string(),
                });
            }
        }

        // Edges as (from, to) registration indices: `from` runs first.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (index, registration) in self.registrations.iter().enumerate() {
            let constraints = registration
                .before
                .iter()
                .map(|other| (*other, true))
                .chain(registration.after.iter().map(|other| (*other, false)));
            for (other, is_before) in constraints {
                let Some(&other_index) = index_of.get(other) else {
                    return Err(ScheduleError::UnknownSystem {
                        group: registration.group,
                        system: registration.name.to_string(),
                        missing: other.to_string(),
                    });
                };
                let other_group = self.registrations[other_index].group;
                if other_group != registration.group {
                    return Err(ScheduleError::CrossGroupConstraint {
                        group: registration.group,
                        system: registration.name.to_string(),
                        other: other.to_string(),
                        other_group,
                    });
                }
                let edge = if is_before {
                    (index, other_index)
                } else {
                    (other_index, index)
                };
                if !edges.contains(&edge) {
                    edges.push(edge);
                }
            }
        }

        let mut groups = Vec::with_capacity(UpdateGroup::ORDER.len());
        for group in UpdateGroup::ORDER {
            let members: Vec<usize> = self
                .registrations
                .iter()
                .enumerate()
                .filter(|(_, r)| r.group == group)
                .map(|(i, _)| i)
                .collect();
            let group_edges: Vec<(usize, usize)> = edges
                .iter()
                .copied()
                .filter(|(from, _)| self.registrations[*from].group == group)
                .collect();

            let (order, levels) = linearize(&members, &group_edges).map_err(|stuck| ScheduleError::Cycle {
                group,
                systems: stuck
                    .iter()
                    .map(|i| self.registrations[*i].name.to_string())
                    .collect(),
            })?;

            let mut batches: Vec<Vec<&'static str>> = Vec::new();
            for &index in &order {
                let level = levels[&index];
                if batches.len() <= level {
                    batches.resize_with(level + 1, Vec::new);
                }
                batches[level].push(self.registrations[index].name);
            }

            let plan = GroupPlan {
                group,
                order: order.iter().map(|i| self.registrations[*i].name).collect(),
                batches,
            };
            let systems: Vec<(&'static str, SystemFactory)> = order
                .iter()
                .map(|i| {
                    let r = &self.registrations[*i];
                    (r.name, Arc::clone(&r.factory))
                })
                .collect();
            let schedule = make_schedule(group, &systems);
            let checkpoints = self
                .checkpoints
                .iter()
                .filter(|(g, _)| *g == group)
                .map(|(_, factory)| Arc::clone(factory))
                .collect();
            groups.push(GroupRunner {
                plan,
                systems,
                checkpoints,
                schedule,
            });
        }

        Ok(SimSchedule {
            groups,
            profiler: GroupProfiler::new(),
        })
    }
}

/// Kahn's algorithm over registration indices. Among ready systems the one
/// registered first is taken next. Returns the order and each node's
/// longest-path depth, or the nodes left unresolved by a cycle.
fn linearize(
    members: &[usize],
    edges: &[(usize, usize)],
) -> Result<(Vec<usize>, HashMap<usize, usize>), Vec<usize>> {
    let mut in_degree: HashMap<usize, usize> = members.iter().map(|m| (*m, 0)).collect();
    for (_, to) in edges {
        if let Some(d) = in_degree.get_mut(to) {
            *d += 1;
        }
    }

    let mut levels: HashMap<usize, usize> = HashMap::new();
    let mut order = Vec::with_capacity(members.len());
    let mut remaining: Vec<usize> = members.to_vec();

    while !remaining.is_empty() {
        // `members` is in registration order, so the first ready entry wins ties.
        let Some(pos) = remaining.iter().position(|m| in_degree[m] == 0) else {
            return Err(remaining);
        };
        let node = remaining.remove(pos);
        let level = *levels.entry(node).or_insert(0);
        order.push(node);

        for (from, to) in edges {
            if *from == node {
                if let Some(d) = in_degree.get_mut(to) {
                    *d -= 1;
                }
                let next = levels.entry(*to).or_insert(0);
                *next = (*next).max(level + 1);
            }
        }
    }

    Ok((order, levels))
}

fn make_schedule(group: UpdateGroup, systems: &[(&'static str, SystemFactory)]) -> Schedule {
    let mut schedule = Schedule::new(group);
    schedule.set_executor_kind(ExecutorKind::SingleThreaded);
    schedule.set_build_settings(ScheduleBuildSettings {
        auto_insert_apply_deferred: false,
        ..Default::default()
    });

    let mut previous: Option<&'static str> = None;
    for &(name, ref factory) in systems {
        let mut configs = factory().in_set(SystemLabel(name));
        if let Some(prev) = previous {
            configs = configs.after(SystemLabel(prev));
        }
        schedule.add_systems(configs);
        previous = Some(name);
    }
    schedule
}

/// Linearized execution plan for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub group: UpdateGroup,
    /// Execution order.
    pub order: Vec<&'static str>,
    /// Systems with no ordering path between them share a batch.
    pub batches: Vec<Vec<&'static str>>,
}

struct GroupRunner {
    plan: GroupPlan,
    systems: Vec<(&'static str, SystemFactory)>,
    checkpoints: Vec<CheckpointFactory>,
    schedule: Schedule,
}

impl GroupRunner {
    fn capture(&self, world: &World) -> Vec<Restore> {
        self.checkpoints.iter().filter_map(|factory| factory(world)).collect()
    }

    /// Drop the schedule, and with it any commands still queued in its
    /// systems, then roll back the checkpointed resources.
    fn reset(&mut self, world: &mut World, saved: Vec<Restore>) {
        self.schedule = make_schedule(self.plan.group, &self.systems);
        for restore in saved {
            restore(world);
        }
    }
}

/// Validated, runnable tick schedule.
pub struct SimSchedule {
    groups: Vec<GroupRunner>,
    profiler: GroupProfiler,
}

impl SimSchedule {
    /// Run every group once, in order.
    pub fn run_tick(&mut self, world: &mut World) -> Result<(), TickError> {
        let mut failed = Vec::new();

        for runner in &mut self.groups {
            let group = runner.plan.group;
            let _span = tracing::trace_span!("update_group", group = group.name()).entered();
            let saved = runner.capture(world);

            let mut panic_message = None;
            let ok = self.profiler.time_group(group, || {
                match catch_unwind(AssertUnwindSafe(|| runner.schedule.run(world))) {
                    Ok(()) => true,
                    Err(payload) => {
                        panic_message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned());
                        false
                    }
                }
            });

            if !ok {
                tracing::error!(
                    group = group.name(),
                    message = panic_message.as_deref().unwrap_or("<non-string panic>"),
                    restored = saved.len(),
                    "system panicked; discarding the group's staged commands"
                );
                runner.reset(world, saved);
                failed.push(group);
            }
        }

        self.profiler.tick();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(TickError::GroupsFailed { groups: failed })
        }
    }

    pub fn plan(&self, group: UpdateGroup) -> Option<&GroupPlan> {
        self.groups.iter().map(|r| &r.plan).find(|p| p.group == group)
    }

    pub fn plans(&self) -> impl Iterator<Item = &GroupPlan> {
        self.groups.iter().map(|r| &r.plan)
    }

    pub fn profiler(&self) -> &GroupProfiler {
        &self.profiler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Component)]
    struct Marker;

    #[derive(Resource, Default)]
    struct Seen(Vec<usize>);

    #[derive(Resource)]
    struct PanicOnce(bool);

    #[derive(Resource, Default)]
    struct Counter(u32);

    #[derive(Resource, Clone, Default)]
    struct Stock(u32);

    fn noop() {}

    fn spawn_marker(mut commands: Commands) {
        commands.spawn(Marker);
    }

    fn count_markers(query: Query<&Marker>, mut seen: ResMut<Seen>) {
        seen.0.push(query.iter().count());
    }

    fn panic_once(mut flag: ResMut<PanicOnce>) {
        if flag.0 {
            flag.0 = false;
            panic!("scripted failure");
        }
    }

    fn bump(mut counter: ResMut<Counter>) {
        counter.0 += 1;
    }

    fn spend_stock(mut stock: ResMut<Stock>, mut counter: ResMut<Counter>) {
        stock.0 += 5;
        counter.0 += 1;
    }

    #[test]
    fn test_ties_follow_registration_order() {
        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Combat, "x", noop);
        builder.add_system(UpdateGroup::Combat, "y", noop);
        builder.add_system(UpdateGroup::Combat, "z", noop).before("x");

        let schedule = builder.build().unwrap();
        let plan = schedule.plan(UpdateGroup::Combat).unwrap();
        assert_eq!(plan.order, vec!["y", "z", "x"]);
    }

    #[test]
    fn test_batches_are_longest_path_levels() {
        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::MovementAi, "a", noop);
        builder.add_system(UpdateGroup::MovementAi, "d", noop).after("b").after("c");
        builder.add_system(UpdateGroup::MovementAi, "b", noop).after("a");
        builder.add_system(UpdateGroup::MovementAi, "c", noop).after("a");

        let schedule = builder.build().unwrap();
        let plan = schedule.plan(UpdateGroup::MovementAi).unwrap();
        assert_eq!(plan.order, vec!["a", "b", "c", "d"]);
        assert_eq!(plan.batches, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Economy, "free", noop);
        builder.add_system(UpdateGroup::Economy, "a", noop).after("b");
        builder.add_system(UpdateGroup::Economy, "b", noop).after("a");

        let err = builder.build().err().unwrap();
        assert_eq!(
            err,
            ScheduleError::Cycle {
                group: UpdateGroup::Economy,
                systems: vec!["a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn test_unknown_and_cross_group_constraints() {
        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Input, "a", noop).after("ghost");
        assert!(matches!(
            builder.build().err(),
            Some(ScheduleError::UnknownSystem { .. })
        ));

        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Input, "a", noop);
        builder.add_system(UpdateGroup::Combat, "b", noop).after("a");
        assert!(matches!(
            builder.build().err(),
            Some(ScheduleError::CrossGroupConstraint {
                group: UpdateGroup::Combat,
                other_group: UpdateGroup::Input,
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Input, "a", noop);
        builder.add_system(UpdateGroup::Cleanup, "a", noop);
        assert!(matches!(
            builder.build().err(),
            Some(ScheduleError::DuplicateSystem { .. })
        ));
    }

    #[test]
    fn test_commands_play_back_at_end_of_group() {
        let mut world = World::new();
        world.init_resource::<Seen>();

        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Economy, "spawn", spawn_marker);
        builder.add_system(UpdateGroup::Economy, "count", count_markers).after("spawn");
        builder.add_system(UpdateGroup::Combat, "count_later", count_markers);
        let mut schedule = builder.build().unwrap();

        schedule.run_tick(&mut world).unwrap();

        // Same group: not visible. Next group: visible.
        assert_eq!(world.resource::<Seen>().0, vec![0, 1]);
    }

    #[test]
    fn test_panic_discards_group_commands() {
        let mut world = World::new();
        world.insert_resource(PanicOnce(true));
        world.init_resource::<Counter>();

        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Economy, "spawn", spawn_marker);
        builder.add_system(UpdateGroup::Economy, "fail", panic_once).after("spawn");
        builder.add_system(UpdateGroup::Cleanup, "bump", bump);
        let mut schedule = builder.build().unwrap();

        let result = schedule.run_tick(&mut world);
        assert_eq!(
            result,
            Err(TickError::GroupsFailed {
                groups: vec![UpdateGroup::Economy]
            })
        );
        assert_eq!(world.query::<&Marker>().iter(&world).count(), 0);
        assert_eq!(world.resource::<Counter>().0, 1, "later groups still run");

        schedule.run_tick(&mut world).unwrap();
        assert_eq!(world.query::<&Marker>().iter(&world).count(), 1);
        assert_eq!(world.resource::<Counter>().0, 2);

        let stats = schedule.profiler().group(UpdateGroup::Economy).unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(schedule.profiler().tick_count(), 2);
    }

    #[test]
    fn test_panic_restores_checkpointed_resources() {
        let mut world = World::new();
        world.insert_resource(PanicOnce(true));
        world.init_resource::<Counter>();
        world.init_resource::<Stock>();

        let mut builder = ScheduleBuilder::new();
        builder.add_system(UpdateGroup::Building, "spend", spend_stock);
        builder.add_system(UpdateGroup::Building, "spawn", spawn_marker);
        builder
            .add_system(UpdateGroup::Building, "fail", panic_once)
            .after("spend")
            .after("spawn");
        builder.checkpoint_resource::<Stock>(UpdateGroup::Building);
        let mut schedule = builder.build().unwrap();

        assert!(schedule.run_tick(&mut world).is_err());
        assert_eq!(world.resource::<Stock>().0, 0);
        assert_eq!(world.query::<&Marker>().iter(&world).count(), 0);
        // Not checkpointed: the direct write survives.
        assert_eq!(world.resource::<Counter>().0, 1);

        schedule.run_tick(&mut world).unwrap();
        assert_eq!(world.resource::<Stock>().0, 5);
        assert_eq!(world.query::<&Marker>().iter(&world).count(), 1);
    }
}
