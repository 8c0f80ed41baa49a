//! What a system sees when it is called.
//!
//! [`UpdateInfo`] is handed to every per-step phase; [`ConfigureContext`] is
//! handed to the one-time Configure call.

use std::time::Duration;

use engine_component::{ComponentStore, Entity};

use crate::config::ConfigPayload;
use crate::event::EventManager;
use crate::pending::QueryList;
use crate::scheduler::{SchedulerCommands, SystemHandle};

/// Timing information for one simulation step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateInfo {
    /// Number of steps completed before this one.
    pub iterations: u64,
    /// Simulation time at the start of this step. Does not advance while paused.
    pub sim_time: Duration,
    /// Wall-clock time since the host loop started.
    pub real_time: Duration,
    /// Simulation time covered by this step.
    pub dt: Duration,
    /// Whether the simulation is paused. Phases still run while paused.
    pub paused: bool,
}

impl UpdateInfo {
    /// Info for the first step of a simulation.
    #[must_use]
    pub fn new(dt: Duration) -> Self {
        Self {
            dt,
            ..Self::default()
        }
    }

    /// Info for the step after this one.
    ///
    /// Simulation time advances by `dt` only if this step was not paused.
    #[must_use]
    pub fn next(&self, real_time: Duration, paused: bool) -> Self {
        let sim_time = if self.paused {
            self.sim_time
        } else {
            self.sim_time + self.dt
        };
        Self {
            iterations: self.iterations + 1,
            sim_time,
            real_time,
            dt: self.dt,
            paused,
        }
    }

    /// Simulation time in seconds.
    #[must_use]
    pub fn sim_seconds(&self) -> f64 {
        self.sim_time.as_secs_f64()
    }

    /// Step size in seconds.
    #[must_use]
    pub fn dt_seconds(&self) -> f64 {
        self.dt.as_secs_f64()
    }
}

/// Everything a system may need while configuring itself.
///
/// A system typically reads its parameters from [`config`](Self::config),
/// looks up the components of [`entity`](Self::entity), connects to events
/// that fire on other threads, and registers pending queries.
pub struct ConfigureContext<'a> {
    /// Handle of the instance being configured.
    pub handle: SystemHandle,
    /// Entity the system is attached to ([`Entity::NULL`] if none).
    pub entity: Entity,
    /// The cached configuration payload.
    pub config: &'a ConfigPayload,
    /// The storage engine.
    pub store: &'a mut dyn ComponentStore,
    /// Event channels, including the render-thread scene update.
    pub events: &'a EventManager,
    /// This instance's pending query list.
    pub queries: &'a QueryList,
    /// Attach/detach requests applied at the start of the next step.
    pub commands: &'a SchedulerCommands,
}

impl std::fmt::Debug for ConfigureContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigureContext")
            .field("handle", &self.handle)
            .field("entity", &self.entity)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
