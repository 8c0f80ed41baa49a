//! Capability interfaces.
//!
//! A system implements [`System`] plus any subset of [`Configure`],
//! [`ConfigureParameters`], [`PreUpdate`], [`Update`] and [`PostUpdate`]. It
//! advertises the subset by overriding the matching `as_*` view on [`System`]:
//!
//! ```rust
//! use engine_component::ComponentStore;
//! use engine_system::{PreUpdate, System, UpdateInfo};
//!
//! struct Clock {
//!     last_seen: f64,
//! }
//!
//! impl System for Clock {
//!     fn as_pre_update(&mut self) -> Option<&mut dyn PreUpdate> {
//!         Some(self)
//!     }
//! }
//!
//! impl PreUpdate for Clock {
//!     fn pre_update(
//!         &mut self,
//!         info: &UpdateInfo,
//!         _store: &mut dyn ComponentStore,
//!     ) -> anyhow::Result<()> {
//!         self.last_seen = info.sim_seconds();
//!         Ok(())
//!     }
//! }
//! ```
//!
//! The views are probed once when the instance is wrapped; the resulting
//! [`Capabilities`] set never changes afterwards.

use engine_component::ComponentStore;

use crate::context::{ConfigureContext, UpdateInfo};
use crate::parameters::ParameterRegistry;

/// Base trait of every system.
pub trait System: Send + 'static {
    /// Name used in logs and fault reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// View this system through [`Configure`], if implemented.
    fn as_configure(&mut self) -> Option<&mut dyn Configure> {
        None
    }

    /// View this system through [`ConfigureParameters`], if implemented.
    fn as_configure_parameters(&mut self) -> Option<&mut dyn ConfigureParameters> {
        None
    }

    /// View this system through [`PreUpdate`], if implemented.
    fn as_pre_update(&mut self) -> Option<&mut dyn PreUpdate> {
        None
    }

    /// View this system through [`Update`], if implemented.
    fn as_update(&mut self) -> Option<&mut dyn Update> {
        None
    }

    /// View this system through [`PostUpdate`], if implemented.
    fn as_post_update(&mut self) -> Option<&mut dyn PostUpdate> {
        None
    }
}

/// One-time setup, called right after the instance is created and again only
/// on an explicit host reconfigure.
pub trait Configure {
    /// Configure the system.
    ///
    /// # Errors
    ///
    /// An error marks the instance as degraded. It stays attached and its
    /// per-step phases keep running.
    fn configure(&mut self, ctx: ConfigureContext<'_>) -> anyhow::Result<()>;
}

/// Declares runtime-tunable parameters. Called once on attach, right after
/// Configure.
pub trait ConfigureParameters {
    /// Declare this system's parameters in `registry`.
    ///
    /// The registry handle may be cloned and kept to read the values back
    /// during the per-step phases.
    ///
    /// # Errors
    ///
    /// An error marks the instance as degraded, like a failed Configure.
    fn configure_parameters(
        &mut self,
        registry: &ParameterRegistry,
        store: &mut dyn ComponentStore,
    ) -> anyhow::Result<()>;
}

/// First per-step phase. Typically used to apply commands and inputs.
pub trait PreUpdate {
    /// # Errors
    ///
    /// An error is reported as a fault of this instance for the current step.
    fn pre_update(&mut self, info: &UpdateInfo, store: &mut dyn ComponentStore)
    -> anyhow::Result<()>;
}

/// Second per-step phase. Typically used to advance the simulation state.
pub trait Update {
    /// # Errors
    ///
    /// An error is reported as a fault of this instance for the current step.
    fn update(&mut self, info: &UpdateInfo, store: &mut dyn ComponentStore) -> anyhow::Result<()>;
}

/// Last per-step phase. Sees the settled state of the step, read-only.
pub trait PostUpdate {
    /// # Errors
    ///
    /// An error is reported as a fault of this instance for the current step.
    fn post_update(&mut self, info: &UpdateInfo, store: &dyn ComponentStore) -> anyhow::Result<()>;
}

/// Where in the lifecycle a call happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The one-time Configure call.
    Configure,
    /// The one-time parameter declaration, after Configure.
    ConfigureParameters,
    /// Delivery of pending query callbacks, before PreUpdate.
    Queries,
    /// [`PreUpdate`].
    PreUpdate,
    /// [`Update`].
    Update,
    /// [`PostUpdate`].
    PostUpdate,
}

impl Phase {
    /// The per-step phases, in execution order.
    pub const STEP: [Phase; 3] = [Phase::PreUpdate, Phase::Update, Phase::PostUpdate];
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Configure => "configure",
            Phase::ConfigureParameters => "configure_parameters",
            Phase::Queries => "queries",
            Phase::PreUpdate => "pre_update",
            Phase::Update => "update",
            Phase::PostUpdate => "post_update",
        })
    }
}

/// The interfaces a system instance supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Implements [`Configure`].
    pub configure: bool,
    /// Implements [`ConfigureParameters`].
    pub configure_parameters: bool,
    /// Implements [`PreUpdate`].
    pub pre_update: bool,
    /// Implements [`Update`].
    pub update: bool,
    /// Implements [`PostUpdate`].
    pub post_update: bool,
}

impl Capabilities {
    /// Probe each view of `system` once.
    #[must_use]
    pub fn resolve(system: &mut dyn System) -> Self {
        Self {
            configure: system.as_configure().is_some(),
            configure_parameters: system.as_configure_parameters().is_some(),
            pre_update: system.as_pre_update().is_some(),
            update: system.as_update().is_some(),
            post_update: system.as_post_update().is_some(),
        }
    }

    /// Returns `true` if the interface for `phase` is supported.
    ///
    /// [`Phase::Queries`] is not an interface and always reports `false`.
    #[must_use]
    pub fn supports(&self, phase: Phase) -> bool {
        match phase {
            Phase::Configure => self.configure,
            Phase::ConfigureParameters => self.configure_parameters,
            Phase::PreUpdate => self.pre_update,
            Phase::Update => self.update,
            Phase::PostUpdate => self.post_update,
            Phase::Queries => false,
        }
    }

    /// Returns `true` if no interface is supported. Such an instance is inert.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.configure
            || self.configure_parameters
            || self.pre_update
            || self.update
            || self.post_update)
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = [
            Phase::Configure,
            Phase::ConfigureParameters,
            Phase::PreUpdate,
            Phase::Update,
            Phase::PostUpdate,
        ]
        .into_iter()
        .filter(|&phase| self.supports(phase))
        .map(|phase| phase.to_string())
        .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl System for Inert {}

    struct Stepper;

    impl System for Stepper {
        fn name(&self) -> &str {
            "stepper"
        }

        fn as_pre_update(&mut self) -> Option<&mut dyn PreUpdate> {
            Some(self)
        }

        fn as_post_update(&mut self) -> Option<&mut dyn PostUpdate> {
            Some(self)
        }
    }

    impl PreUpdate for Stepper {
        fn pre_update(&mut self, _: &UpdateInfo, _: &mut dyn ComponentStore) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl PostUpdate for Stepper {
        fn post_update(&mut self, _: &UpdateInfo, _: &dyn ComponentStore) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_inert_system_has_no_capabilities() {
        let caps = Capabilities::resolve(&mut Inert);
        assert!(caps.is_empty());
        assert_eq!(caps.to_string(), "none");
        assert!(Inert.name().ends_with("Inert"), "default name is the type name");
    }

    #[test]
    fn test_resolve_subset() {
        let caps = Capabilities::resolve(&mut Stepper);
        assert!(!caps.configure);
        assert!(!caps.configure_parameters);
        assert!(caps.pre_update);
        assert!(!caps.update);
        assert!(caps.post_update);
        assert_eq!(caps.to_string(), "pre_update+post_update");
    }

    #[test]
    fn test_queries_is_not_a_capability() {
        let caps = Capabilities {
            configure: true,
            configure_parameters: true,
            pre_update: true,
            update: true,
            post_update: true,
        };
        assert!(!caps.supports(Phase::Queries));
    }
}
