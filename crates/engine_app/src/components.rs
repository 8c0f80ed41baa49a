//! Components used by the example systems.

use engine_component::Component;
use glam::Vec3;

/// Human-readable entity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name(pub String);

impl Component for Name {
    fn type_name() -> &'static str {
        "Name"
    }
}

/// Linear velocity in world units per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity(pub Vec3);

impl Component for Velocity {
    fn type_name() -> &'static str {
        "Velocity"
    }
}
