//! Day/night cycle and match outcome.

use crate::config::GameConfig;
use crate::resources::{GamePhase, GameStatus, GameTime};
use bevy_ecs::prelude::*;

/// Advance the day/night cycle and check the survival victory condition.
///
/// A day counts as survived when the night that follows it ends. Once the
/// match is decided the clock keeps running but the phase no longer changes.
pub fn day_night_system(time: Res<GameTime>, config: Res<GameConfig>, mut status: ResMut<GameStatus>) {
    status.cycle_elapsed += time.dt;

    loop {
        let duration = if status.is_day {
            config.day_duration
        } else {
            config.night_duration
        };
        if duration <= 0.0 || status.cycle_elapsed < duration {
            break;
        }
        status.cycle_elapsed -= duration;
        if status.is_day {
            status.is_day = false;
            tracing::info!(day = status.day, "night falls");
        } else {
            status.is_day = true;
            status.day += 1;
            tracing::info!(day = status.day, "day breaks");
        }
    }

    if status.phase == GamePhase::Playing && config.days_to_win > 0 && status.day >= config.days_to_win {
        status.phase = GamePhase::Victory;
        tracing::info!(days = status.day, "survived, match won");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(days_to_win: u32) -> (World, Schedule) {
        let mut world = World::new();
        world.insert_resource(GameTime::new(1.0));
        world.insert_resource(GameConfig {
            day_duration: 3.0,
            night_duration: 2.0,
            days_to_win,
            ..Default::default()
        });
        world.insert_resource(GameStatus::default());
        let mut schedule = Schedule::default();
        schedule.add_systems(day_night_system);
        (world, schedule)
    }

    #[test]
    fn test_day_night_alternates() {
        let (mut world, mut schedule) = setup(0);
        for _ in 0..3 {
            schedule.run(&mut world);
        }
        let status = *world.resource::<GameStatus>();
        assert!(!status.is_day);
        assert_eq!(status.day, 0);

        for _ in 0..2 {
            schedule.run(&mut world);
        }
        let status = *world.resource::<GameStatus>();
        assert!(status.is_day);
        assert_eq!(status.day, 1);
        assert_eq!(status.phase, GamePhase::Playing);
    }

    #[test]
    fn test_victory_after_required_days() {
        let (mut world, mut schedule) = setup(2);
        for _ in 0..9 {
            schedule.run(&mut world);
        }
        assert_eq!(world.resource::<GameStatus>().phase, GamePhase::Playing);
        schedule.run(&mut world);
        assert_eq!(world.resource::<GameStatus>().phase, GamePhase::Victory);
    }

    #[test]
    fn test_defeat_is_final() {
        let (mut world, mut schedule) = setup(1);
        world.resource_mut::<GameStatus>().phase = GamePhase::Defeat;
        for _ in 0..10 {
            schedule.run(&mut world);
        }
        assert_eq!(world.resource::<GameStatus>().phase, GamePhase::Defeat);
    }
}
