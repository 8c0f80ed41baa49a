//! Periodic log of every moving entity.

use anyhow::Result;
use engine_component::{ComponentStore, Entity, QueryDescriptor};
use engine_system::{ConfigPayload, PostUpdate, System, UpdateInfo};
use tracing::info;

use crate::components::{Name, Velocity};

/// Logs the velocity of every entity that has one, every `every` steps.
///
/// If bound to an entity, only that entity is logged.
#[derive(Debug)]
pub struct VelocityLog {
    entity: Entity,
    every: u64,
    query: QueryDescriptor,
    lines: u64,
}

impl VelocityLog {
    /// Build from the `every` config key (default 60, minimum 1).
    ///
    /// # Errors
    ///
    /// Returns an error if `every` is not an unsigned integer.
    pub fn from_config(config: &ConfigPayload, entity: Entity) -> Result<Self> {
        let every: u64 = config.get_or("every", 60)?;
        Ok(Self {
            entity,
            every: every.max(1),
            query: QueryDescriptor::new().with_component::<Velocity>(),
            lines: 0,
        })
    }

    /// Number of lines logged so far.
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }
}

impl System for VelocityLog {
    fn name(&self) -> &str {
        "velocity_log"
    }

    fn as_post_update(&mut self) -> Option<&mut dyn PostUpdate> {
        Some(self)
    }
}

impl PostUpdate for VelocityLog {
    fn post_update(&mut self, info: &UpdateInfo, store: &dyn ComponentStore) -> Result<()> {
        if info.iterations % self.every != 0 {
            return Ok(());
        }
        for entity in store.query(&self.query) {
            if !self.entity.is_null() && entity != self.entity {
                continue;
            }
            let Some(velocity) = store.component::<Velocity>(entity) else {
                continue;
            };
            let name = store.component::<Name>(entity).map_or("-", |name| name.0.as_str());
            info!(
                iteration = info.iterations,
                sim_time = info.sim_seconds(),
                %entity,
                name,
                velocity = ?velocity.0,
                speed = velocity.0.length(),
                "velocity"
            );
            self.lines += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use engine_component::World;
    use glam::Vec3;
    use serde_json::json;

    use super::*;

    fn world() -> (World, Entity, Entity) {
        let mut world = World::new();
        let a = world.spawn();
        world.insert(a, Velocity(Vec3::X)).unwrap();
        world.insert(a, Name("a".into())).unwrap();
        let b = world.spawn();
        world.insert(b, Velocity(Vec3::Y)).unwrap();
        world.spawn();
        (world, a, b)
    }

    fn run(log: &mut VelocityLog, world: &World, steps: u64) {
        let mut info = UpdateInfo::new(Duration::from_millis(10));
        for _ in 0..steps {
            log.post_update(&info, world).unwrap();
            info = info.next(Duration::ZERO, false);
        }
    }

    #[test]
    fn test_logs_every_moving_entity_on_schedule() {
        let (world, _, _) = world();
        let mut log = VelocityLog::from_config(&json!({ "every": 2 }).into(), Entity::NULL).unwrap();
        run(&mut log, &world, 4);
        // Iterations 0 and 2, two moving entities each.
        assert_eq!(log.lines(), 4);
    }

    #[test]
    fn test_bound_entity_only() {
        let (world, _, b) = world();
        let mut log = VelocityLog::from_config(&json!({ "every": 1 }).into(), b).unwrap();
        run(&mut log, &world, 3);
        assert_eq!(log.lines(), 3);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let log = VelocityLog::from_config(&json!({ "every": 0 }).into(), Entity::NULL).unwrap();
        assert_eq!(log.every, 1);
        assert!(VelocityLog::from_config(&json!({ "every": "often" }).into(), Entity::NULL).is_err());
    }
}
