//! Simulation configuration.
//!
//! Loaded from `simulation_config.json`; `SIM_CONFIG_PATH` overrides the builtin copy.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_SIMULATION_CONFIG: &str = include_str!("data/simulation_config.json");
pub const CONFIG_PATH_ENV: &str = "SIM_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub grid_size_x: u32,
    pub grid_size_y: u32,
    pub seed: u64,
    pub run_name: String,
    pub pathfinding: PathfindingConfig,
    pub interpreter: InterpreterConfig,
    pub snapshots: SnapshotConfig,
    pub observation: ObservationConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            grid_size_x: 32,
            grid_size_y: 32,
            seed: 0,
            run_name: "tileworld".to_string(),
            pathfinding: PathfindingConfig::default(),
            interpreter: InterpreterConfig::default(),
            snapshots: SnapshotConfig::default(),
            observation: ObservationConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_SIMULATION_CONFIG)
                .expect("builtin simulation config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        SimulationConfig::from_json_str(&contents)
    }

    /// Config named by `SIM_CONFIG_PATH`, or the builtin one.
    pub fn load() -> Result<Arc<Self>, ConfigError> {
        match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                tracing::info!(
                    target: "tileworld::config",
                    path = %path.display(),
                    "simulation_config.loaded_from_env"
                );
                Ok(Arc::new(SimulationConfig::from_file(&path)?))
            }
            None => Ok(SimulationConfig::builtin()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size_x == 0 || self.grid_size_y == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid size must be non-zero, got {}x{}",
                self.grid_size_x, self.grid_size_y
            )));
        }
        if self.pathfinding.normal_cost == 0 {
            return Err(ConfigError::Invalid(
                "pathfinding.normal_cost must be at least 1".to_string(),
            ));
        }
        if self.snapshots.export_part_max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "snapshots.export_part_max_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Step costs for the NPC path search.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathfindingConfig {
    pub normal_cost: u32,
    pub closed_passage_cost: u32,
    pub congestion_penalty: u32,
    /// Steps an autopilot waits on an agent in its way before giving up.
    pub max_blocked_ticks: u32,
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            normal_cost: 1,
            closed_passage_cost: 20,
            congestion_penalty: 10,
            max_blocked_ticks: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub action_history_limit: usize,
    pub poison_duration_ticks: u32,
    pub teleport_search_radius: i32,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            action_history_limit: 256,
            poison_duration_ticks: 100,
            teleport_search_radius: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub compression_level: i32,
    /// Upper bound on one compressed export part.
    pub export_part_max_bytes: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            compression_level: sim_schema::DEFAULT_COMPRESSION_LEVEL,
            export_part_max_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    pub viewport_radius: i32,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self { viewport_radius: 4 }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read simulation config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid simulation config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_matches_defaults() {
        let config = SimulationConfig::builtin();
        assert_eq!((config.grid_size_x, config.grid_size_y), (32, 32));
        assert_eq!(config.pathfinding.closed_passage_cost, 20);
        assert_eq!(config.pathfinding.congestion_penalty, 10);
        assert_eq!(config.pathfinding.max_blocked_ticks, 8);
        assert_eq!(config.snapshots.export_part_max_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            SimulationConfig::from_json_str(r#"{"grid_size_x": 8, "interpreter": {"poison_duration_ticks": 3}}"#)
                .expect("config parses");
        assert_eq!(config.grid_size_x, 8);
        assert_eq!(config.grid_size_y, 32);
        assert_eq!(config.interpreter.poison_duration_ticks, 3);
        assert_eq!(config.interpreter.action_history_limit, 256);
    }

    #[test]
    fn rejects_empty_grid() {
        let err = SimulationConfig::from_json_str(r#"{"grid_size_y": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
