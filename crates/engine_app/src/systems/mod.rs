//! Example systems shipped with the host.

mod accelerate;
mod pause_after;
mod sim_clock;
mod velocity_log;

use std::sync::Arc;

use engine_system::{EventManager, SystemLoader};

pub use accelerate::Accelerate;
pub use pause_after::PauseAfter;
pub use sim_clock::SimClock;
pub use velocity_log::VelocityLog;

/// Register every built-in plugin with `loader`.
///
/// `events` is handed to plugins that emit host events from inside a phase.
pub fn register_builtin(loader: &mut SystemLoader, events: &Arc<EventManager>) {
    loader.register_fn("accelerate", |_, entity| Ok(Accelerate::new(entity)));
    loader.register_fn("velocity_log", VelocityLog::from_config);
    loader.register_fn("sim_clock", |_, _| Ok(SimClock::new()));
    let events = Arc::clone(events);
    loader.register_fn("pause_after", move |config, _| {
        PauseAfter::from_config(config, Arc::clone(&events))
    });
}

#[cfg(test)]
mod tests {
    use engine_system::PluginSpec;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_builtin_plugins_load() {
        let events = Arc::new(EventManager::new());
        let mut loader = SystemLoader::new();
        register_builtin(&mut loader, &events);
        assert_eq!(
            loader.names(),
            ["accelerate", "pause_after", "sim_clock", "velocity_log"]
        );

        for spec in [
            PluginSpec::new("accelerate"),
            PluginSpec::new("velocity_log"),
            PluginSpec::new("sim_clock"),
            PluginSpec::new("pause_after").with_config(json!({ "after": 10 })),
        ] {
            let handle = loader.load(&spec).unwrap();
            assert_eq!(handle.plugin_name(), spec.name);
        }
        assert!(loader.load(&PluginSpec::new("pause_after")).is_err());
    }
}
