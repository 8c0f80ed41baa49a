//! The system instance wrapper.
//!
//! A [`SystemInstance`] is what the scheduler stores per attached system: the
//! instance itself under one of two ownership modes, the entity it is bound
//! to, the capability set resolved at construction, the cached configuration
//! payload, and its pending query list.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use engine_component::{ComponentStore, Entity};
use tracing::{debug, info, warn};

use crate::capability::{Capabilities, Phase, System};
use crate::config::ConfigPayload;
use crate::context::{ConfigureContext, UpdateInfo};
use crate::error::panic_message;
use crate::event::EventManager;
use crate::parameters::ParameterRegistry;
use crate::pending::QueryList;
use crate::scheduler::{SchedulerCommands, SystemHandle};

/// A system owned exclusively through its plugin.
///
/// Dropping the handle drops the instance first and then runs the unload
/// hook, which stands for tearing down the loaded code.
pub struct PluginHandle {
    plugin: String,
    system: Option<Box<dyn System>>,
    on_unload: Option<Box<dyn FnOnce() + Send>>,
}

impl PluginHandle {
    /// Wrap a constructed instance of plugin `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>, system: Box<dyn System>) -> Self {
        Self {
            plugin: plugin.into(),
            system: Some(system),
            on_unload: None,
        }
    }

    /// Run `hook` after the instance has been dropped.
    #[must_use]
    pub fn with_unload_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_unload = Some(Box::new(hook));
        self
    }

    /// Name of the plugin this instance came from.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    fn system_mut(&mut self) -> Option<&mut dyn System> {
        self.system.as_deref_mut()
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        drop(self.system.take());
        if let Some(unload) = self.on_unload.take() {
            unload();
        }
        debug!(plugin = %self.plugin, "plugin instance released");
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("plugin", &self.plugin)
            .field("has_unload_hook", &self.on_unload.is_some())
            .finish()
    }
}

/// How a system instance is owned. Exactly one mode applies per instance.
pub enum SystemOwnership {
    /// Exclusively owned; released when the instance is detached.
    Plugin(PluginHandle),
    /// Shared with host code; lives as long as its longest holder.
    Shared(Arc<Mutex<dyn System>>),
}

impl SystemOwnership {
    /// Wrap a shared system.
    #[must_use]
    pub fn shared<S: System>(system: Arc<Mutex<S>>) -> Self {
        Self::Shared(system)
    }

    fn with_system<R>(&mut self, f: impl FnOnce(&mut dyn System) -> R) -> Option<R> {
        match self {
            Self::Plugin(plugin) => plugin.system_mut().map(f),
            Self::Shared(shared) => {
                let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                Some(f(&mut *guard))
            }
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::Plugin(_) => "plugin",
            Self::Shared(_) => "shared",
        }
    }
}

impl std::fmt::Debug for SystemOwnership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plugin(plugin) => f.debug_tuple("Plugin").field(plugin).finish(),
            Self::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

/// Lifecycle of an instance: `Created → Configured → Stepping → Detached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Wrapped, Configure not yet called.
    Created,
    /// Configured (or nothing to configure), waiting for the next step.
    Configured,
    /// Taking part in the per-step phases.
    Stepping,
    /// Removed from the scheduler. Terminal.
    Detached,
}

/// One attached system.
pub struct SystemInstance {
    handle: SystemHandle,
    name: String,
    ownership: SystemOwnership,
    entity: Entity,
    capabilities: Capabilities,
    config: ConfigPayload,
    queries: QueryList,
    state: InstanceState,
    degraded: bool,
}

impl SystemInstance {
    /// Wrap a system and resolve its capabilities.
    #[must_use]
    pub fn new(
        handle: SystemHandle,
        mut ownership: SystemOwnership,
        entity: Entity,
        config: ConfigPayload,
    ) -> Self {
        let (name, capabilities) = ownership
            .with_system(|system| (system.name().to_string(), Capabilities::resolve(system)))
            .unwrap_or_else(|| (String::from("<released>"), Capabilities::default()));

        debug!(
            %handle,
            system = %name,
            ownership = ownership.mode(),
            %entity,
            %capabilities,
            "wrapped system instance"
        );

        Self {
            handle,
            name,
            ownership,
            entity,
            capabilities,
            config,
            queries: QueryList::new(),
            state: InstanceState::Created,
            degraded: false,
        }
    }

    /// The handle this instance is attached under.
    #[must_use]
    pub fn handle(&self) -> SystemHandle {
        self.handle
    }

    /// The system's name, captured at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entity this system is bound to.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Interfaces resolved at construction.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The payload used for the last Configure call.
    #[must_use]
    pub fn config(&self) -> &ConfigPayload {
        &self.config
    }

    /// This instance's pending queries.
    #[must_use]
    pub fn queries(&self) -> &QueryList {
        &self.queries
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Returns `true` if the last Configure call failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Returns `true` if the instance is exclusively owned through a plugin.
    #[must_use]
    pub fn is_plugin(&self) -> bool {
        matches!(self.ownership, SystemOwnership::Plugin(_))
    }

    /// Run Configure with the cached payload, replacing it first if `config`
    /// is given.
    ///
    /// Returns `Ok(false)` if the system has no Configure interface. A failed
    /// Configure leaves the instance configured but degraded and returns the
    /// failure text.
    pub(crate) fn configure(
        &mut self,
        config: Option<ConfigPayload>,
        store: &mut dyn ComponentStore,
        events: &EventManager,
        commands: &SchedulerCommands,
    ) -> Result<bool, String> {
        if let Some(config) = config {
            self.config = config;
        }
        if self.state == InstanceState::Created {
            self.state = InstanceState::Configured;
        }
        if !self.capabilities.configure {
            return Ok(false);
        }

        let handle = self.handle;
        let entity = self.entity;
        let payload = self.config.clone();
        let queries = self.queries.clone();
        let outcome = self.ownership.with_system(|system| {
            panic::catch_unwind(AssertUnwindSafe(|| {
                system.as_configure().map(|configure| {
                    configure.configure(ConfigureContext {
                        handle,
                        entity,
                        config: &payload,
                        store,
                        events,
                        queries: &queries,
                        commands,
                    })
                })
            }))
        });

        let result = self.settle(Phase::Configure, outcome);
        self.degraded = result.is_err();
        match &result {
            Ok(_) => info!(handle = %self.handle, system = %self.name, entity = %self.entity, "system configured"),
            Err(message) => warn!(
                handle = %self.handle,
                system = %self.name,
                entity = %self.entity,
                error = %message,
                "system configuration failed; running degraded"
            ),
        }
        result
    }

    /// Let the system declare its parameters in `registry`.
    ///
    /// Returns `Ok(false)` if the system has no ConfigureParameters interface.
    /// A failure marks the instance degraded and returns the failure text.
    pub(crate) fn configure_parameters(
        &mut self,
        registry: &ParameterRegistry,
        store: &mut dyn ComponentStore,
    ) -> Result<bool, String> {
        if !self.capabilities.configure_parameters {
            return Ok(false);
        }
        let outcome = self.ownership.with_system(|system| {
            panic::catch_unwind(AssertUnwindSafe(|| {
                system
                    .as_configure_parameters()
                    .map(|s| s.configure_parameters(registry, store))
            }))
        });

        let result = self.settle(Phase::ConfigureParameters, outcome);
        if let Err(message) = &result {
            self.degraded = true;
            warn!(
                handle = %self.handle,
                system = %self.name,
                error = %message,
                "parameter declaration failed; running degraded"
            );
        }
        result
    }

    /// Deliver pending query callbacks for this step.
    pub(crate) fn deliver_queries(
        &mut self,
        info: &UpdateInfo,
        store: &mut dyn ComponentStore,
    ) -> Result<usize, String> {
        self.queries.deliver(info, store)
    }

    /// Run one per-step phase.
    ///
    /// Returns `Ok(false)` if the phase is not supported (nothing was called).
    pub(crate) fn run_phase(
        &mut self,
        phase: Phase,
        info: &UpdateInfo,
        store: &mut dyn ComponentStore,
    ) -> Result<bool, String> {
        if !self.capabilities.supports(phase) {
            return Ok(false);
        }
        let outcome = self.ownership.with_system(|system| {
            panic::catch_unwind(AssertUnwindSafe(|| match phase {
                Phase::PreUpdate => system.as_pre_update().map(|s| s.pre_update(info, store)),
                Phase::Update => system.as_update().map(|s| s.update(info, store)),
                Phase::PostUpdate => system.as_post_update().map(|s| s.post_update(info, &*store)),
                Phase::Configure | Phase::ConfigureParameters | Phase::Queries => None,
            }))
        });
        self.settle(phase, outcome)
    }

    pub(crate) fn admit(&mut self) {
        self.state = InstanceState::Stepping;
    }

    /// Mark detached and discard pending queries without calling them.
    pub(crate) fn detach(&mut self) {
        self.queries.clear();
        self.state = InstanceState::Detached;
    }

    /// Fold the nested outcome of a guarded call into `Ok(ran)` or a fault message.
    fn settle(
        &self,
        phase: Phase,
        outcome: Option<std::thread::Result<Option<anyhow::Result<()>>>>,
    ) -> Result<bool, String> {
        match outcome {
            None => Ok(false),
            Some(Err(cause)) => Err(format!("panicked: {}", panic_message(cause.as_ref()))),
            Some(Ok(None)) => {
                warn!(
                    handle = %self.handle,
                    system = %self.name,
                    %phase,
                    "capability resolved at attach is no longer exposed; skipping"
                );
                Ok(false)
            }
            Some(Ok(Some(Err(err)))) => Err(format!("{err:#}")),
            Some(Ok(Some(Ok(())))) => Ok(true),
        }
    }
}

impl std::fmt::Debug for SystemInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemInstance")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("ownership", &self.ownership)
            .field("entity", &self.entity)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}
