//! Host tick loop.
//!
//! Each tick:
//!
//! 1. Build the [`UpdateInfo`] for this step (sim time only advances while
//!    not paused).
//! 2. Load and attach plugins requested through [`LoadPlugins`] since the
//!    last tick.
//! 3. Run the scheduler: queued attach/detach requests, pending queries, then
//!    the PreUpdate, Update and PostUpdate passes.
//! 4. Check for a stop request or the tick limit.
//!
//! Scene updates are emitted independently by a render task in
//! [`TickLoop::run_async`], at their own rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use engine_component::World;
use engine_system::{
    Connection, EventManager, LoadPlugins, Pause, PluginSpec, SceneUpdate, StepReport, Stop,
    SystemLoader, SystemScheduler, UpdateInfo,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::components::{Name, Velocity};
use crate::config::{EngineConfig, TickConfig};

/// The host simulation loop.
#[derive(Debug)]
pub struct TickLoop {
    config: TickConfig,
    world: World,
    scheduler: SystemScheduler,
    loader: Arc<SystemLoader>,
    events: Arc<EventManager>,
    /// Specs requested through [`LoadPlugins`], loaded at the next tick.
    load_requests: Arc<Mutex<Vec<PluginSpec>>>,
    /// Info of the last completed step.
    last: Option<UpdateInfo>,
    started: Instant,
    paused: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    faults: u64,
    _subscriptions: [Connection; 3],
}

impl TickLoop {
    /// Create a loop with an empty world, listening for [`Pause`], [`Stop`]
    /// and [`LoadPlugins`] on `events`. Requested plugins are built by
    /// `loader`.
    #[must_use]
    pub fn new(config: TickConfig, loader: Arc<SystemLoader>, events: Arc<EventManager>) -> Self {
        let paused = Arc::new(AtomicBool::new(config.start_paused));
        let stop_requested = Arc::new(AtomicBool::new(false));
        let load_requests = Arc::new(Mutex::new(Vec::new()));

        let flag = Arc::clone(&paused);
        let on_pause = events.connect::<Pause>(move |&pause| {
            flag.store(pause, Ordering::SeqCst);
            info!(paused = pause, "pause state changed");
        });
        let flag = Arc::clone(&stop_requested);
        let on_stop = events.connect::<Stop>(move |_| {
            flag.store(true, Ordering::SeqCst);
        });
        let queue = Arc::clone(&load_requests);
        let on_load = events.connect::<LoadPlugins>(move |(entity, specs)| {
            debug!(%entity, count = specs.len(), "plugin load requested");
            let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.extend(specs.iter().map(|spec| spec.clone().with_entity(*entity)));
        });

        Self {
            config,
            world: World::new(),
            scheduler: SystemScheduler::new(Arc::clone(&events)),
            loader,
            events,
            load_requests,
            last: None,
            started: Instant::now(),
            paused,
            stop_requested,
            faults: 0,
            _subscriptions: [on_pause, on_stop, on_load],
        }
    }

    /// Create a loop from a configuration file: spawn its entities, then load
    /// and attach its systems in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a system cannot be loaded.
    pub fn from_config(
        config: &EngineConfig,
        loader: Arc<SystemLoader>,
        events: Arc<EventManager>,
    ) -> Result<Self> {
        let mut tick_loop = Self::new(config.tick.clone(), loader, events);

        for entity_config in &config.entities {
            let entity = tick_loop.world.spawn();
            tick_loop
                .world
                .insert(entity, Name(entity_config.name.clone()))?;
            if let Some(velocity) = entity_config.velocity {
                tick_loop.world.insert(entity, Velocity(velocity))?;
            }
            debug!(%entity, name = %entity_config.name, "spawned entity");
        }

        for spec in &config.systems {
            tick_loop
                .scheduler
                .load_and_attach(&tick_loop.loader, spec, &mut tick_loop.world)
                .with_context(|| format!("failed to attach system '{}'", spec.name))?;
        }

        info!(
            entities = tick_loop.world.entity_count(),
            systems = tick_loop.scheduler.len(),
            "world ready"
        );
        Ok(tick_loop)
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.last.map_or(0, |info| info.iterations + 1)
    }

    /// Info of the last completed tick.
    #[must_use]
    pub fn last_info(&self) -> Option<UpdateInfo> {
        self.last
    }

    /// Total faults reported by the scheduler.
    #[must_use]
    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Returns a reference to the world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Returns a reference to the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &SystemScheduler {
        &self.scheduler
    }

    /// The world and the scheduler, for attaching systems by hand.
    #[cfg(test)]
    pub fn parts_mut(&mut self) -> (&mut World, &mut SystemScheduler) {
        (&mut self.world, &mut self.scheduler)
    }

    /// Returns `true` while the simulation is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Pause or resume the simulation.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Returns `true` once a stop was requested or the tick limit was reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
            || (self.config.max_ticks > 0 && self.tick_id() >= self.config.max_ticks)
    }

    /// Run one tick of the simulation.
    pub fn tick(&mut self) -> StepReport {
        let real_time = self.started.elapsed();
        let paused = self.is_paused();
        let info = match self.last {
            Some(last) => last.next(real_time, paused),
            None => UpdateInfo {
                real_time,
                paused,
                ..UpdateInfo::new(self.config.step_duration())
            },
        };

        debug!(
            iteration = info.iterations,
            sim_time = ?info.sim_time,
            paused,
            systems = self.scheduler.len(),
            "tick start"
        );

        self.load_requested();
        let report = self.scheduler.run_step(&info, &mut self.world);
        self.faults += report.faults.len() as u64;
        self.last = Some(info);
        report
    }

    /// Run the tick loop until a stop request or the tick limit, blocking the
    /// current thread. No scene updates are emitted.
    pub fn run(&mut self) {
        let tick_duration = self.config.step_duration();

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        loop {
            let start = Instant::now();
            self.tick();

            if self.is_finished() {
                info!(ticks = self.tick_id(), faults = self.faults, "tick loop complete");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                self.warn_over_budget(elapsed, tick_duration);
            }
        }
    }

    /// Run the tick loop on the tokio runtime with a render task emitting
    /// [`SceneUpdate`] at the configured render rate. Ctrl-C stops the loop.
    ///
    /// Every system is detached before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the Ctrl-C handler cannot be installed.
    pub async fn run_async(&mut self) -> Result<()> {
        let tick_duration = self.config.step_duration();
        let mut ticker = tokio::time::interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let render = spawn_render_task(
            Arc::clone(&self.events),
            self.config.render_interval(),
            shutdown_rx,
        );

        info!(
            tick_rate = self.config.tick_rate,
            render_rate = self.config.render_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    self.tick();
                    let elapsed = start.elapsed();
                    if elapsed > tick_duration {
                        self.warn_over_budget(elapsed, tick_duration);
                    }
                    if self.is_finished() {
                        break;
                    }
                }
                result = &mut ctrl_c => {
                    result.context("failed to listen for ctrl-c")?;
                    info!("ctrl-c received, shutting down");
                    break;
                }
            }
        }

        // Fails only if the render task already stopped.
        let _ = shutdown_tx.send(true);
        let frames = join_render_task(render).await.unwrap_or_default();
        info!(
            ticks = self.tick_id(),
            frames,
            faults = self.faults,
            "tick loop complete"
        );

        self.scheduler.clear();
        Ok(())
    }

    /// Attach the plugins requested since the last tick. A spec that fails to
    /// load is logged and dropped.
    fn load_requested(&mut self) {
        let requests = std::mem::take(
            &mut *self
                .load_requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for spec in requests {
            match self
                .scheduler
                .load_and_attach(&self.loader, &spec, &mut self.world)
            {
                Ok(handle) => info!(
                    %handle,
                    plugin = %spec.name,
                    entity = %spec.entity,
                    "attached requested plugin"
                ),
                Err(err) => warn!(
                    plugin = %spec.name,
                    entity = %spec.entity,
                    error = %err,
                    "requested plugin failed to load"
                ),
            }
        }
    }

    fn warn_over_budget(&self, elapsed: Duration, budget: Duration) {
        warn!(
            tick_id = self.tick_id(),
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "tick exceeded time budget"
        );
    }
}

/// Emit [`SceneUpdate`] every `interval` until `shutdown` turns true.
/// Resolves to the number of frames emitted.
fn spawn_render_task(
    events: Arc<EventManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    events.emit::<SceneUpdate>(&());
                    frames += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(frames, "render task stopped");
        frames
    })
}

/// Wait for the render task. Returns `None` if it panicked or was cancelled.
async fn join_render_task(render: JoinHandle<u64>) -> Option<u64> {
    match render.await {
        Ok(frames) => Some(frames),
        Err(err) => {
            warn!(error = %err, "render task did not finish cleanly");
            None
        }
    }
}
