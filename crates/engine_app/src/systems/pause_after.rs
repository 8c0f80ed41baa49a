//! Pauses the simulation once a step count is reached.

use std::sync::Arc;

use anyhow::{Result, ensure};
use engine_component::ComponentStore;
use engine_system::{ConfigPayload, EventManager, Pause, PreUpdate, Stop, System, UpdateInfo};
use tracing::info;

/// Emits [`Pause`] when the `after` iteration is reached, and optionally
/// [`Stop`] after `stop_after` further paused steps.
#[derive(Debug)]
pub struct PauseAfter {
    events: Arc<EventManager>,
    after: u64,
    stop_after: Option<u64>,
    paused_at: Option<u64>,
}

impl PauseAfter {
    /// Build from the `after` (required) and `stop_after` config keys.
    ///
    /// # Errors
    ///
    /// Returns an error if `after` is missing or not a positive integer.
    pub fn from_config(config: &ConfigPayload, events: Arc<EventManager>) -> Result<Self> {
        let after: u64 = config.require("after")?;
        ensure!(after > 0, "<after> must be positive");
        Ok(Self {
            events,
            after,
            stop_after: config.get_as("stop_after")?,
            paused_at: None,
        })
    }
}

impl System for PauseAfter {
    fn name(&self) -> &str {
        "pause_after"
    }

    fn as_pre_update(&mut self) -> Option<&mut dyn PreUpdate> {
        Some(self)
    }
}

impl PreUpdate for PauseAfter {
    fn pre_update(&mut self, info: &UpdateInfo, _store: &mut dyn ComponentStore) -> Result<()> {
        match self.paused_at {
            None if info.iterations >= self.after => {
                info!(iteration = info.iterations, "pausing simulation");
                self.paused_at = Some(info.iterations);
                self.events.emit::<Pause>(&true);
            }
            Some(at) => {
                if let Some(stop_after) = self.stop_after
                    && info.iterations == at + stop_after
                {
                    info!(iteration = info.iterations, "requesting stop");
                    self.events.emit::<Stop>(&());
                }
            }
            None => {}
        }
        Ok(())
    }
}
