//! Per-group timing for the tick scheduler.
//!
//! `SimSchedule::run_tick` records one sample per update group per tick.
//! Read the numbers back through `SimWorld::profiler()` or emit them as a
//! tracing event with `log_summary`.

use crate::schedule::UpdateGroup;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Statistics for a profiled section
#[derive(Debug, Default, Clone, Copy)]
pub struct SectionStats {
    pub total_time: Duration,
    pub call_count: u64,
    pub min_time: Option<Duration>,
    pub max_time: Option<Duration>,
    /// Runs that ended in a caught panic.
    pub failures: u64,
}

impl SectionStats {
    pub fn avg_time(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.call_count as u32
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.total_time += elapsed;
        self.call_count += 1;
        self.min_time = Some(self.min_time.map_or(elapsed, |m| m.min(elapsed)));
        self.max_time = Some(self.max_time.map_or(elapsed, |m| m.max(elapsed)));
    }
}

/// Wall-clock timing per update group.
#[derive(Debug, Default)]
pub struct GroupProfiler {
    groups: BTreeMap<UpdateGroup, SectionStats>,
    tick_count: u64,
}

impl GroupProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time one group run. `f` returns whether the group completed.
    pub fn time_group(&mut self, group: UpdateGroup, f: impl FnOnce() -> bool) -> bool {
        let start = Instant::now();
        let ok = f();
        let stats = self.groups.entry(group).or_default();
        stats.record(start.elapsed());
        if !ok {
            stats.failures += 1;
        }
        ok
    }

    /// Increment the tick counter.
    pub fn tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn group(&self, group: UpdateGroup) -> Option<&SectionStats> {
        self.groups.get(&group)
    }

    /// Sum of average group times, i.e. the average tick cost.
    pub fn avg_tick_time(&self) -> Duration {
        if self.tick_count == 0 {
            return Duration::ZERO;
        }
        let total: Duration = self.groups.values().map(|s| s.total_time).sum();
        total / self.tick_count as u32
    }

    /// Emit one `info` event per group, slowest first.
    pub fn log_summary(&self) {
        let mut groups: Vec<_> = self.groups.iter().collect();
        groups.sort_by(|a, b| b.1.total_time.cmp(&a.1.total_time));

        tracing::info!(
            ticks = self.tick_count,
            avg_tick_us = self.avg_tick_time().as_micros() as u64,
            "scheduler profile"
        );
        for (group, stats) in groups {
            tracing::info!(
                group = group.name(),
                total_us = stats.total_time.as_micros() as u64,
                avg_us = stats.avg_time().as_micros() as u64,
                max_us = stats.max_time.unwrap_or(Duration::ZERO).as_micros() as u64,
                failures = stats.failures,
                "group timing"
            );
        }
    }

    /// Reset all profiling data.
    pub fn reset(&mut self) {
        self.groups.clear();
        self.tick_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_profiler_basic() {
        let mut profiler = GroupProfiler::new();

        profiler.time_group(UpdateGroup::Combat, || {
            sleep(Duration::from_millis(10));
            true
        });

        profiler.tick();

        let stats = profiler.group(UpdateGroup::Combat).unwrap();
        assert!(stats.total_time >= Duration::from_millis(10));
        assert_eq!(stats.call_count, 1);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_profiler_counts_failures() {
        let mut profiler = GroupProfiler::new();

        for i in 0..5 {
            profiler.time_group(UpdateGroup::Economy, || i != 2);
            profiler.tick();
        }

        assert_eq!(profiler.tick_count(), 5);
        let economy = profiler.group(UpdateGroup::Economy).unwrap();
        assert_eq!(economy.call_count, 5);
        assert_eq!(economy.failures, 1);
        assert!(profiler.group(UpdateGroup::Input).is_none());
    }
}
