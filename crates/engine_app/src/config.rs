//! Engine configuration file.
//!
//! ```json
//! {
//!   "tick": { "tick_rate": 60.0, "max_ticks": 600, "render_rate": 30.0 },
//!   "entities": [{ "name": "probe", "velocity": [0.0, 0.0, 0.0] }],
//!   "systems": [
//!     { "name": "accelerate", "entity": 1, "config": { "acceleration": [0.0, 9.8, 0.0] } },
//!     { "name": "velocity_log", "config": { "every": 60 } }
//!   ]
//! }
//! ```
//!
//! Entities are spawned in file order, so the first one gets id 1.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use engine_system::PluginSpec;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Timing of the host loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Target simulation steps per second.
    pub tick_rate: f64,
    /// Maximum number of steps to run (0 = unlimited).
    pub max_ticks: u64,
    /// Scene-update notifications per second on the render task.
    pub render_rate: f64,
    /// Start with the simulation paused.
    pub start_paused: bool,
}

impl TickConfig {
    /// Wall-clock budget of one step.
    #[must_use]
    pub fn step_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate)
    }

    /// Interval between scene updates.
    #[must_use]
    pub fn render_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.render_rate)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
            render_rate: 30.0,
            start_paused: false,
        }
    }
}

/// An entity spawned at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Display name, stored as a [`Name`](crate::components::Name) component.
    pub name: String,
    /// Initial velocity, if the entity moves.
    #[serde(default)]
    pub velocity: Option<Vec3>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Host loop timing.
    pub tick: TickConfig,
    /// Entities to spawn before any system is attached.
    pub entities: Vec<EntityConfig>,
    /// Systems to load and attach, in order.
    pub systems: Vec<PluginSpec>,
}

impl EngineConfig {
    /// Read a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON, or
    /// if a rate is not positive.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.tick.tick_rate > 0.0,
            "tick_rate must be positive, got {}",
            self.tick.tick_rate
        );
        anyhow::ensure!(
            self.tick.render_rate > 0.0,
            "render_rate must be positive, got {}",
            self.tick.render_rate
        );
        Ok(())
    }
}
