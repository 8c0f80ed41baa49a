//! System loader: plugin factories keyed by name.
//!
//! The host registers a [`SystemFactory`] per plugin name. Loading a
//! [`PluginSpec`] looks the factory up, constructs one instance and wraps it
//! in a [`PluginHandle`] whose unload hook tracks how many instances of that
//! plugin are still alive.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use engine_component::Entity;
use tracing::{debug, info};

use crate::capability::System;
use crate::config::{ConfigPayload, PluginSpec};
use crate::error::{SystemError, panic_message};
use crate::instance::PluginHandle;

/// Constructs instances of one plugin.
pub trait SystemFactory: Send + Sync {
    /// Build a new instance bound to `entity`.
    ///
    /// # Errors
    ///
    /// Any error rejects the instance; it is never attached.
    fn create(&self, config: &ConfigPayload, entity: Entity) -> anyhow::Result<Box<dyn System>>;
}

struct FnFactory<S, F> {
    build: F,
    _system: PhantomData<fn() -> S>,
}

impl<S, F> SystemFactory for FnFactory<S, F>
where
    S: System,
    F: Fn(&ConfigPayload, Entity) -> anyhow::Result<S> + Send + Sync,
{
    fn create(&self, config: &ConfigPayload, entity: Entity) -> anyhow::Result<Box<dyn System>> {
        Ok(Box::new((self.build)(config, entity)?))
    }
}

/// Registry of system factories.
#[derive(Default)]
pub struct SystemLoader {
    factories: HashMap<String, Arc<dyn SystemFactory>>,
    /// Live instance count per plugin name.
    live: Arc<DashMap<String, usize>>,
}

impl SystemLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, factory: impl SystemFactory + 'static) {
        let name = name.into();
        debug!(plugin = %name, "registered system factory");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Register a constructor function under `name`.
    pub fn register_fn<S, F>(&mut self, name: impl Into<String>, build: F)
    where
        S: System,
        F: Fn(&ConfigPayload, Entity) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.register(
            name,
            FnFactory {
                build,
                _system: PhantomData,
            },
        );
    }

    /// Remove the factory for `name`. Instances already loaded are unaffected.
    ///
    /// Returns `true` if a factory was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    /// Returns `true` if a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered plugin names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of live instances loaded from `name`.
    #[must_use]
    pub fn live_instances(&self, name: &str) -> usize {
        self.live.get(name).map_or(0, |count| *count)
    }

    /// Construct one instance described by `spec`.
    ///
    /// # Errors
    ///
    /// [`SystemError::UnknownPlugin`] if no factory is registered under the
    /// spec's name, [`SystemError::Construction`] if the factory fails or
    /// panics.
    pub fn load(&self, spec: &PluginSpec) -> Result<PluginHandle, SystemError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| SystemError::UnknownPlugin(spec.name.clone()))?;

        let created = panic::catch_unwind(AssertUnwindSafe(|| {
            factory.create(&spec.config, spec.entity)
        }));
        let system = match created {
            Ok(Ok(system)) => system,
            Ok(Err(err)) => {
                return Err(SystemError::Construction {
                    plugin: spec.name.clone(),
                    message: format!("{err:#}"),
                });
            }
            Err(cause) => {
                return Err(SystemError::Construction {
                    plugin: spec.name.clone(),
                    message: format!("panicked: {}", panic_message(cause.as_ref())),
                });
            }
        };

        *self.live.entry(spec.name.clone()).or_insert(0) += 1;
        let live = Arc::clone(&self.live);
        let plugin = spec.name.clone();
        debug!(plugin = %plugin, entity = %spec.entity, "loaded system instance");

        Ok(PluginHandle::new(spec.name.clone(), system).with_unload_hook(move || {
            let remaining = live.get_mut(&plugin).map(|mut count| {
                *count = count.saturating_sub(1);
                *count
            });
            if remaining == Some(0) {
                live.remove(&plugin);
                info!(plugin = %plugin, "unloading plugin, no instances left");
            }
        }))
    }
}

impl std::fmt::Debug for SystemLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemLoader")
            .field("plugins", &self.names())
            .finish_non_exhaustive()
    }
}
