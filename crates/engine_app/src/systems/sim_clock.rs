//! Simulation clock overlay.
//!
//! The simulation side records the step timing in PreUpdate; the render side
//! reads it on every scene update. Both sides share one mutex-guarded state.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use engine_component::ComponentStore;
use engine_system::{
    Configure, ConfigureContext, Connection, PreUpdate, SceneUpdate, System, UpdateInfo,
};
use tracing::{debug, info};

/// State shared between the simulation thread and the render thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockState {
    /// Iterations seen by the last PreUpdate.
    pub iterations: u64,
    /// Simulation time seen by the last PreUpdate.
    pub sim_time: Duration,
    /// Pause flag seen by the last PreUpdate.
    pub paused: bool,
    /// Scene updates handled.
    pub frames: u64,
    /// Simulation time shown by the last frame.
    pub rendered_sim_time: Option<Duration>,
}

/// Keeps the render side informed of simulation time.
#[derive(Debug, Default)]
pub struct SimClock {
    state: Arc<Mutex<ClockState>>,
    log_every_frames: u64,
    connection: Option<Connection>,
}

impl SimClock {
    /// Create an unconfigured clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the shared state.
    #[must_use]
    pub fn state(&self) -> Arc<Mutex<ClockState>> {
        Arc::clone(&self.state)
    }
}

impl System for SimClock {
    fn name(&self) -> &str {
        "sim_clock"
    }

    fn as_configure(&mut self) -> Option<&mut dyn Configure> {
        Some(self)
    }

    fn as_pre_update(&mut self) -> Option<&mut dyn PreUpdate> {
        Some(self)
    }
}

impl Configure for SimClock {
    fn configure(&mut self, ctx: ConfigureContext<'_>) -> Result<()> {
        self.log_every_frames = ctx.config.get_or("log_every_frames", 0)?;

        let state = Arc::clone(&self.state);
        let log_every = self.log_every_frames;
        // Replacing the connection on reconfigure disconnects the old callback.
        self.connection = Some(ctx.events.connect::<SceneUpdate>(move |_| {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.frames += 1;
            if state.rendered_sim_time != Some(state.sim_time) {
                state.rendered_sim_time = Some(state.sim_time);
                debug!(frame = state.frames, sim_time = ?state.sim_time, "clock overlay refreshed");
            }
            if log_every > 0 && state.frames % log_every == 0 {
                info!(
                    frame = state.frames,
                    iterations = state.iterations,
                    sim_time = ?state.sim_time,
                    paused = state.paused,
                    "render frame"
                );
            }
        }));
        Ok(())
    }
}

impl PreUpdate for SimClock {
    fn pre_update(&mut self, info: &UpdateInfo, _store: &mut dyn ComponentStore) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.iterations = info.iterations;
        state.sim_time = info.sim_time;
        state.paused = info.paused;
        Ok(())
    }
}
