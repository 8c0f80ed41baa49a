//! System-layer error types.

use std::any::Any;

use crate::config::ConfigError;
use crate::scheduler::SystemHandle;

/// Errors returned by the loader and the scheduler's host-facing operations.
///
/// Faults raised *inside* a phase call are not errors of this kind; they are
/// collected into a [`StepReport`](crate::StepReport) so stepping can go on.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// No factory is registered under this plugin name.
    #[error("unknown system plugin '{0}'")]
    UnknownPlugin(String),

    /// The factory failed to construct an instance.
    #[error("failed to construct system '{plugin}': {message}")]
    Construction {
        /// Plugin name the factory was registered under.
        plugin: String,
        /// The factory's error, formatted with its cause chain.
        message: String,
    },

    /// The handle does not name an attached system.
    #[error("no system attached with handle {0}")]
    UnknownHandle(SystemHandle),

    /// A configuration payload could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");

        let caught = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "code 7");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_error_display() {
        let err = SystemError::UnknownPlugin("thruster".into());
        assert_eq!(err.to_string(), "unknown system plugin 'thruster'");
    }
}
