//! Game configuration record.
//!
//! Supplied once at startup by the authoring layer and inserted into the world
//! as a read-only resource. No system mutates it mid-run.

use crate::components::{BuildingKind, ResourceType};
use crate::error::ConfigError;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Movement and combat parameters for one unit class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitClassConfig {
    pub max_health: f32,
    pub max_speed: f32,
    pub acceleration: f32,
    pub rotation_speed: f32,
    pub attack_damage: f32,
    pub attack_range: f32,
    pub attack_cooldown: f32,
    /// Zero for melee attackers.
    pub projectile_speed: f32,
}

impl Default for UnitClassConfig {
    fn default() -> Self {
        Self {
            max_health: 100.0,
            max_speed: 5.0,
            acceleration: 8.0,
            rotation_speed: 6.0,
            attack_damage: 10.0,
            attack_range: 2.0,
            attack_cooldown: 1.0,
            projectile_speed: 0.0,
        }
    }
}

/// Cost and durability of one building type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildingConfig {
    pub wood: u32,
    pub stone: u32,
    pub gold: u32,
    pub max_health: f32,
    /// Footprint edge length in grid cells.
    pub size: i32,
    pub population: u32,
}

impl Default for BuildingConfig {
    fn default() -> Self {
        Self {
            wood: 50,
            stone: 0,
            gold: 0,
            max_health: 300.0,
            size: 1,
            population: 0,
        }
    }
}

/// Full configuration record for a match.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Fixed timestep in seconds (e.g., 1/30 for 30 Hz).
    pub fixed_timestep: f32,
    /// Spatial hash cell size in world units.
    pub spatial_cell_size: f32,
    /// World edge length; the map spans `[-map_size/2, map_size/2]` on both axes.
    pub map_size: f32,
    /// Flow field cell size in world units.
    pub flow_cell_size: f32,
    /// Building placement grid cell size in world units.
    pub building_cell_size: f32,

    pub starting_wood: u32,
    pub starting_stone: u32,
    pub starting_food: u32,
    pub starting_gold: u32,

    pub day_duration: f32,
    pub night_duration: f32,
    /// Days to survive for victory. Zero disables the victory condition.
    pub days_to_win: u32,

    pub projectile_speed: f32,
    pub projectile_hit_radius: f32,
    pub projectile_lifetime: f32,

    pub worker: UnitClassConfig,
    pub soldier: UnitClassConfig,
    pub archer: UnitClassConfig,
    pub enemy: UnitClassConfig,

    pub worker_gather_speed: f32,
    pub worker_carry_capacity: u32,
    pub worker_search_radius: f32,
    /// Units taken from a node per completed gather.
    pub gather_amount: u32,

    pub enemy_detection_radius: f32,
    pub enemy_retarget_interval: f32,

    pub unit_threat: f32,
    pub building_threat: f32,
    pub headquarters_threat: f32,

    /// Seconds a dead entity lingers before it is destroyed.
    pub death_grace_period: f32,

    pub tower_range: f32,
    pub tower_damage: f32,
    pub tower_cooldown: f32,

    pub headquarters: BuildingConfig,
    pub house: BuildingConfig,
    pub storehouse: BuildingConfig,
    pub tower: BuildingConfig,
    pub wall: BuildingConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0,
            spatial_cell_size: 10.0,
            map_size: 512.0,
            flow_cell_size: 4.0,
            building_cell_size: 4.0,

            starting_wood: 200,
            starting_stone: 100,
            starting_food: 100,
            starting_gold: 50,

            day_duration: 120.0,
            night_duration: 60.0,
            days_to_win: 0,

            projectile_speed: 40.0,
            projectile_hit_radius: 0.75,
            projectile_lifetime: 5.0,

            worker: UnitClassConfig {
                max_health: 50.0,
                max_speed: 4.0,
                attack_damage: 0.0,
                ..Default::default()
            },
            soldier: UnitClassConfig {
                max_health: 120.0,
                max_speed: 4.5,
                attack_damage: 12.0,
                attack_range: 2.0,
                ..Default::default()
            },
            archer: UnitClassConfig {
                max_health: 80.0,
                max_speed: 4.5,
                attack_damage: 8.0,
                attack_range: 18.0,
                attack_cooldown: 1.5,
                projectile_speed: 40.0,
                ..Default::default()
            },
            enemy: UnitClassConfig {
                max_health: 80.0,
                max_speed: 3.5,
                attack_damage: 10.0,
                attack_range: 2.0,
                attack_cooldown: 1.0,
                ..Default::default()
            },

            worker_gather_speed: 1.0,
            worker_carry_capacity: 10,
            worker_search_radius: 60.0,
            gather_amount: 10,

            enemy_detection_radius: 80.0,
            enemy_retarget_interval: 0.5,

            unit_threat: 1.0,
            building_threat: 2.0,
            headquarters_threat: 4.0,

            death_grace_period: 2.0,

            tower_range: 25.0,
            tower_damage: 30.0,
            tower_cooldown: 1.0,

            headquarters: BuildingConfig {
                wood: 0,
                max_health: 1500.0,
                size: 3,
                population: 10,
                ..Default::default()
            },
            house: BuildingConfig {
                wood: 30,
                max_health: 200.0,
                population: 5,
                ..Default::default()
            },
            storehouse: BuildingConfig {
                wood: 60,
                max_health: 400.0,
                size: 2,
                ..Default::default()
            },
            tower: BuildingConfig {
                wood: 40,
                stone: 60,
                max_health: 500.0,
                ..Default::default()
            },
            wall: BuildingConfig {
                wood: 0,
                stone: 10,
                max_health: 600.0,
                ..Default::default()
            },
        }
    }
}

impl GameConfig {
    /// Parse a config record from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("fixed_timestep", self.fixed_timestep),
            ("spatial_cell_size", self.spatial_cell_size),
            ("map_size", self.map_size),
            ("flow_cell_size", self.flow_cell_size),
            ("building_cell_size", self.building_cell_size),
            ("day_duration", self.day_duration),
            ("night_duration", self.night_duration),
            ("projectile_speed", self.projectile_speed),
            ("worker_gather_speed", self.worker_gather_speed),
        ];
        for (field, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }

        let flow_cells = self.flow_field_size();
        if flow_cells < 2 {
            return Err(ConfigError::TooSmall {
                field: "map_size / flow_cell_size",
                min: 2,
                value: flow_cells,
            });
        }
        Ok(())
    }

    /// Flow field edge length in cells.
    pub fn flow_field_size(&self) -> usize {
        (self.map_size / self.flow_cell_size).ceil().max(0.0) as usize
    }

    /// Building grid edge length in cells.
    pub fn building_grid_size(&self) -> i32 {
        (self.map_size / self.building_cell_size).floor() as i32
    }

    pub fn building(&self, kind: BuildingKind) -> &BuildingConfig {
        match kind {
            BuildingKind::Headquarters => &self.headquarters,
            BuildingKind::House => &self.house,
            BuildingKind::Storehouse => &self.storehouse,
            BuildingKind::Tower => &self.tower,
            BuildingKind::Wall => &self.wall,
        }
    }

    /// Resource cost of a building as `(type, amount)` pairs, zero entries omitted.
    pub fn building_cost(&self, kind: BuildingKind) -> Vec<(ResourceType, u32)> {
        let b = self.building(kind);
        [
            (ResourceType::Wood, b.wood),
            (ResourceType::Stone, b.stone),
            (ResourceType::Gold, b.gold),
        ]
        .into_iter()
        .filter(|(_, amount)| *amount > 0)
        .collect()
    }

    pub fn threat_for(&self, kind: Option<BuildingKind>) -> f32 {
        match kind {
            None => self.unit_threat,
            Some(BuildingKind::Headquarters) => self.headquarters_threat,
            Some(_) => self.building_threat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GameConfig::default().validate().is_ok());
        assert_eq!(GameConfig::default().flow_field_size(), 128);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = GameConfig::from_json_str(r#"{ "map_size": 256.0, "starting_wood": 7 }"#).unwrap();
        assert_eq!(config.starting_wood, 7);
        assert_eq!(config.map_size, 256.0);
        assert_eq!(config.gather_amount, 10);
    }

    #[test]
    fn test_rejects_non_positive_timestep() {
        let err = GameConfig::from_json_str(r#"{ "fixed_timestep": 0.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::NonPositive { field: "fixed_timestep", .. }));
    }

    #[test]
    fn test_building_cost_skips_zero_entries() {
        let config = GameConfig::default();
        let cost = config.building_cost(BuildingKind::Wall);
        assert_eq!(cost, vec![(ResourceType::Stone, 10)]);
    }
}
