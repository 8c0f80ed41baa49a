//! System scheduler: attach/detach and the phase-batched step.
//!
//! One call to [`SystemScheduler::run_step`] does, in order:
//!
//! 1. Apply queued [`SchedulerCommands`] (attach and detach requests).
//! 2. Admit instances attached since the previous step.
//! 3. Deliver every instance's pending queries.
//! 4. A PreUpdate pass, an Update pass and a PostUpdate pass, each over all
//!    instances in attach order. A pass completes before the next begins.
//!
//! A fault in any call is isolated to its instance: it is reported in the
//! [`StepReport`], the instance skips its remaining phases for this step, and
//! every other instance is stepped normally.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use engine_component::{ComponentStore, Entity};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::capability::{Phase, System};
use crate::config::{ConfigPayload, PluginSpec};
use crate::context::UpdateInfo;
use crate::error::SystemError;
use crate::event::EventManager;
use crate::instance::{PluginHandle, SystemInstance, SystemOwnership};
use crate::loader::SystemLoader;
use crate::parameters::ParameterRegistry;

/// Stable handle of an attached system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemHandle(Uuid);

impl SystemHandle {
    /// Generate a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for SystemHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SystemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum Command {
    Attach {
        handle: SystemHandle,
        ownership: SystemOwnership,
        entity: Entity,
        config: ConfigPayload,
    },
    Detach(SystemHandle),
}

/// Attach and detach requests applied at the start of the next step.
///
/// Clones share one queue, so systems can keep a copy from their Configure
/// call and issue requests from inside a phase.
#[derive(Clone, Default)]
pub struct SchedulerCommands {
    queue: Arc<Mutex<VecDeque<Command>>>,
}

impl SchedulerCommands {
    /// Queue an attach of an exclusively owned instance.
    ///
    /// The handle is valid immediately; the instance is configured when the
    /// queue is applied.
    pub fn attach_plugin(
        &self,
        plugin: PluginHandle,
        entity: Entity,
        config: ConfigPayload,
    ) -> SystemHandle {
        self.push_attach(SystemOwnership::Plugin(plugin), entity, config)
    }

    /// Queue an attach of a shared instance.
    pub fn attach_shared<S: System>(
        &self,
        system: Arc<Mutex<S>>,
        entity: Entity,
        config: ConfigPayload,
    ) -> SystemHandle {
        self.push_attach(SystemOwnership::shared(system), entity, config)
    }

    /// Queue a detach.
    pub fn detach(&self, handle: SystemHandle) {
        self.lock().push_back(Command::Detach(handle));
    }

    /// Number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push_attach(
        &self,
        ownership: SystemOwnership,
        entity: Entity,
        config: ConfigPayload,
    ) -> SystemHandle {
        let handle = SystemHandle::new();
        self.lock().push_back(Command::Attach {
            handle,
            ownership,
            entity,
            config,
        });
        handle
    }

    fn drain(&self) -> Vec<Command> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Command>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SchedulerCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerCommands")
            .field("queued", &self.len())
            .finish()
    }
}

/// A fault raised by one instance during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFault {
    /// The faulted instance.
    pub handle: SystemHandle,
    /// Its system name.
    pub system: String,
    /// Where the fault happened.
    pub phase: Phase,
    /// Error text or panic message.
    pub message: String,
}

impl std::fmt::Display for PhaseFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "system '{}' ({}) faulted in {}: {}",
            self.system, self.handle, self.phase, self.message
        )
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Iteration number of the step.
    pub iterations: u64,
    /// Faults, in the order they occurred.
    pub faults: Vec<PhaseFault>,
    /// PreUpdate, Update and PostUpdate calls that completed.
    pub phase_calls: usize,
    /// Query callbacks invoked.
    pub query_callbacks: usize,
}

impl StepReport {
    /// Returns `true` if no instance faulted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Owns the attached systems and steps them.
pub struct SystemScheduler {
    /// Stepping instances, in attach order.
    instances: Vec<SystemInstance>,
    /// Attached and configured, admitted at the start of the next step.
    pending: Vec<SystemInstance>,
    commands: SchedulerCommands,
    events: Arc<EventManager>,
    parameters: ParameterRegistry,
}

impl SystemScheduler {
    /// Create an empty scheduler. Configure calls receive `events`.
    #[must_use]
    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            instances: Vec::new(),
            pending: Vec::new(),
            commands: SchedulerCommands::default(),
            events,
            parameters: ParameterRegistry::new(),
        }
    }

    /// The event manager handed to Configure calls.
    #[must_use]
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// The registry systems declare their parameters in.
    #[must_use]
    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    /// A handle to this scheduler's command queue.
    #[must_use]
    pub fn commands(&self) -> SchedulerCommands {
        self.commands.clone()
    }

    /// Attach an exclusively owned instance, configure it and let it declare
    /// its parameters.
    ///
    /// The instance takes part from the next step.
    pub fn attach_plugin(
        &mut self,
        plugin: PluginHandle,
        entity: Entity,
        config: ConfigPayload,
        store: &mut dyn ComponentStore,
    ) -> SystemHandle {
        let handle = SystemHandle::new();
        self.attach(handle, SystemOwnership::Plugin(plugin), entity, config, store);
        handle
    }

    /// Attach a shared instance and configure it.
    ///
    /// The caller keeps its own reference; detaching only drops the
    /// scheduler's.
    pub fn attach_shared<S: System>(
        &mut self,
        system: Arc<Mutex<S>>,
        entity: Entity,
        config: ConfigPayload,
        store: &mut dyn ComponentStore,
    ) -> SystemHandle {
        let handle = SystemHandle::new();
        self.attach(handle, SystemOwnership::shared(system), entity, config, store);
        handle
    }

    /// Construct an instance through `loader` and attach it.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; nothing is attached in that case.
    pub fn load_and_attach(
        &mut self,
        loader: &SystemLoader,
        spec: &PluginSpec,
        store: &mut dyn ComponentStore,
    ) -> Result<SystemHandle, SystemError> {
        let plugin = loader.load(spec)?;
        Ok(self.attach_plugin(plugin, spec.entity, spec.config.clone(), store))
    }

    /// Detach an instance. No phase of it runs after this returns.
    ///
    /// An exclusively owned instance is released here, which unloads its
    /// plugin.
    ///
    /// # Errors
    ///
    /// [`SystemError::UnknownHandle`] if `handle` is not attached.
    pub fn detach(&mut self, handle: SystemHandle) -> Result<(), SystemError> {
        let mut instance = self
            .take(handle)
            .ok_or(SystemError::UnknownHandle(handle))?;
        instance.detach();
        info!(%handle, system = %instance.name(), "system detached");
        Ok(())
    }

    /// Run Configure again, optionally with a new payload.
    ///
    /// Returns `false` if the instance is degraded afterwards.
    ///
    /// # Errors
    ///
    /// [`SystemError::UnknownHandle`] if `handle` is not attached.
    pub fn reconfigure(
        &mut self,
        handle: SystemHandle,
        config: Option<ConfigPayload>,
        store: &mut dyn ComponentStore,
    ) -> Result<bool, SystemError> {
        let instance = self
            .instances
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|instance| instance.handle() == handle)
            .ok_or(SystemError::UnknownHandle(handle))?;
        // Failures are logged and reflected in the degraded flag.
        let _ = instance.configure(config, store, &self.events, &self.commands);
        Ok(!instance.is_degraded())
    }

    /// Returns `true` if `handle` is attached, stepping or not yet admitted.
    #[must_use]
    pub fn contains(&self, handle: SystemHandle) -> bool {
        self.instance(handle).is_some()
    }

    /// Number of attached instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len() + self.pending.len()
    }

    /// Returns `true` if nothing is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of instances waiting for the next step.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Look up an attached instance.
    #[must_use]
    pub fn instance(&self, handle: SystemHandle) -> Option<&SystemInstance> {
        self.instances
            .iter()
            .chain(&self.pending)
            .find(|instance| instance.handle() == handle)
    }

    /// Handles of all attached instances, in attach order.
    #[must_use]
    pub fn handles(&self) -> Vec<SystemHandle> {
        self.instances
            .iter()
            .chain(&self.pending)
            .map(SystemInstance::handle)
            .collect()
    }

    /// Run one simulation step.
    pub fn run_step(&mut self, info: &UpdateInfo, store: &mut dyn ComponentStore) -> StepReport {
        self.apply_commands(store);
        self.admit_pending();

        let mut report = StepReport {
            iterations: info.iterations,
            ..StepReport::default()
        };
        let mut faulted = vec![false; self.instances.len()];

        for (idx, instance) in self.instances.iter_mut().enumerate() {
            match instance.deliver_queries(info, store) {
                Ok(calls) => report.query_callbacks += calls,
                Err(message) => {
                    faulted[idx] = true;
                    record_fault(&mut report, instance, Phase::Queries, message);
                }
            }
        }

        for phase in Phase::STEP {
            for (idx, instance) in self.instances.iter_mut().enumerate() {
                if faulted[idx] {
                    continue;
                }
                match instance.run_phase(phase, info, store) {
                    Ok(true) => report.phase_calls += 1,
                    Ok(false) => {}
                    Err(message) => {
                        faulted[idx] = true;
                        record_fault(&mut report, instance, phase, message);
                    }
                }
            }
        }

        report
    }

    /// Detach every instance, newest first.
    pub fn clear(&mut self) {
        if self.is_empty() {
            return;
        }
        debug!(count = self.len(), "detaching all systems");
        while let Some(mut instance) = self.pending.pop().or_else(|| self.instances.pop()) {
            instance.detach();
        }
    }

    fn attach(
        &mut self,
        handle: SystemHandle,
        ownership: SystemOwnership,
        entity: Entity,
        config: ConfigPayload,
        store: &mut dyn ComponentStore,
    ) {
        let mut instance = SystemInstance::new(handle, ownership, entity, config);
        // Failures are logged and reflected in the degraded flag.
        let _ = instance.configure(None, store, &self.events, &self.commands);
        let _ = instance.configure_parameters(&self.parameters, store);
        info!(
            %handle,
            system = %instance.name(),
            %entity,
            capabilities = %instance.capabilities(),
            degraded = instance.is_degraded(),
            "system attached"
        );
        self.pending.push(instance);
    }

    fn apply_commands(&mut self, store: &mut dyn ComponentStore) {
        for command in self.commands.drain() {
            match command {
                Command::Attach {
                    handle,
                    ownership,
                    entity,
                    config,
                } => self.attach(handle, ownership, entity, config, store),
                Command::Detach(handle) => {
                    if let Err(err) = self.detach(handle) {
                        debug!(error = %err, "ignoring queued detach");
                    }
                }
            }
        }
    }

    fn admit_pending(&mut self) {
        for mut instance in self.pending.drain(..) {
            instance.admit();
            self.instances.push(instance);
        }
    }

    fn take(&mut self, handle: SystemHandle) -> Option<SystemInstance> {
        if let Some(pos) = self.instances.iter().position(|i| i.handle() == handle) {
            return Some(self.instances.remove(pos));
        }
        let pos = self.pending.iter().position(|i| i.handle() == handle)?;
        Some(self.pending.remove(pos))
    }
}

fn record_fault(report: &mut StepReport, instance: &SystemInstance, phase: Phase, message: String) {
    let fault = PhaseFault {
        handle: instance.handle(),
        system: instance.name().to_string(),
        phase,
        message,
    };
    error!(
        handle = %fault.handle,
        system = %fault.system,
        %phase,
        iteration = report.iterations,
        error = %fault.message,
        "system faulted; skipping its remaining phases this step"
    );
    report.faults.push(fault);
}

impl Drop for SystemScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for SystemScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemScheduler")
            .field("instances", &self.instances)
            .field("pending", &self.pending)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}
