//! # engine_system
//!
//! System runtime for the simulation engine.
//!
//! A system is a behavior unit bound to an entity. It implements [`System`]
//! plus any subset of the lifecycle interfaces ([`Configure`],
//! [`ConfigureParameters`], [`PreUpdate`], [`Update`], [`PostUpdate`]); the
//! subset is discovered once when the system is attached. The
//! [`SystemScheduler`] owns the attached systems and calls their phases once
//! per step, each phase as a full pass over all systems in attach order.
//!
//! Work that has to happen on another thread, such as the render thread, goes
//! through the [`EventManager`] instead of the phase sequence.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! use engine_component::{ComponentStore, Entity, World};
//! use engine_system::{
//!     ConfigPayload, EventManager, System, SystemScheduler, Update, UpdateInfo,
//! };
//!
//! #[derive(Default)]
//! struct Counter {
//!     steps: u64,
//! }
//!
//! impl System for Counter {
//!     fn as_update(&mut self) -> Option<&mut dyn Update> {
//!         Some(self)
//!     }
//! }
//!
//! impl Update for Counter {
//!     fn update(&mut self, _: &UpdateInfo, _: &mut dyn ComponentStore) -> anyhow::Result<()> {
//!         self.steps += 1;
//!         Ok(())
//!     }
//! }
//!
//! let mut world = World::new();
//! let mut scheduler = SystemScheduler::new(Arc::new(EventManager::new()));
//! let counter = Arc::new(Mutex::new(Counter::default()));
//! scheduler.attach_shared(
//!     Arc::clone(&counter),
//!     Entity::NULL,
//!     ConfigPayload::empty(),
//!     &mut world,
//! );
//!
//! let info = UpdateInfo::new(Duration::from_millis(16));
//! let report = scheduler.run_step(&info, &mut world);
//! assert!(report.is_clean());
//! assert_eq!(counter.lock().unwrap().steps, 1);
//! ```

pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod instance;
pub mod loader;
pub mod parameters;
pub mod pending;
pub mod scheduler;

pub use capability::{
    Capabilities, Configure, ConfigureParameters, Phase, PostUpdate, PreUpdate, System, Update,
};
pub use config::{ConfigError, ConfigPayload, PluginSpec};
pub use context::{ConfigureContext, UpdateInfo};
pub use error::SystemError;
pub use event::{
    Connection, Event, EventChannel, EventManager, LoadPlugins, Pause, SceneUpdate, Stop,
};
pub use instance::{InstanceState, PluginHandle, SystemInstance, SystemOwnership};
pub use loader::{SystemFactory, SystemLoader};
pub use parameters::{ParameterError, ParameterRegistry};
pub use pending::{QueryCallback, QueryId, QueryList};
pub use scheduler::{PhaseFault, SchedulerCommands, StepReport, SystemHandle, SystemScheduler};
