//! Constant acceleration applied to the bound entity's velocity.
//!
//! The acceleration is scaled by the runtime parameter
//! `accelerate.<entity id>.gain`, declared with a default of `1.0`.

use anyhow::{Result, bail};
use engine_component::{ComponentStore, Entity};
use engine_system::{
    Configure, ConfigureContext, ConfigureParameters, ParameterRegistry, System, Update, UpdateInfo,
};
use glam::Vec3;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::components::Velocity;

#[derive(Debug, Deserialize)]
struct Params {
    acceleration: Vec3,
    #[serde(default)]
    max_speed: Option<f32>,
}

/// Adds `acceleration * dt` to the entity's [`Velocity`] every unpaused step.
#[derive(Debug, Default)]
pub struct Accelerate {
    entity: Entity,
    acceleration: Vec3,
    max_speed: Option<f32>,
    gain: Option<(ParameterRegistry, String)>,
}

impl Accelerate {
    /// Bind to `entity`; parameters are read in Configure.
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            ..Self::default()
        }
    }
}

impl System for Accelerate {
    fn name(&self) -> &str {
        "accelerate"
    }

    fn as_configure(&mut self) -> Option<&mut dyn Configure> {
        Some(self)
    }

    fn as_configure_parameters(&mut self) -> Option<&mut dyn ConfigureParameters> {
        Some(self)
    }

    fn as_update(&mut self) -> Option<&mut dyn Update> {
        Some(self)
    }
}

impl Configure for Accelerate {
    fn configure(&mut self, ctx: ConfigureContext<'_>) -> Result<()> {
        if ctx.entity.is_null() || !ctx.store.contains(ctx.entity) {
            bail!("accelerate needs an existing entity, got {}", ctx.entity);
        }
        let params: Params = ctx.config.parse()?;
        self.entity = ctx.entity;
        self.acceleration = params.acceleration;
        self.max_speed = params.max_speed;

        if !ctx.store.has_component::<Velocity>(ctx.entity) {
            debug!(entity = %ctx.entity, "no velocity yet; starting at rest");
        }
        Ok(())
    }
}

impl ConfigureParameters for Accelerate {
    fn configure_parameters(
        &mut self,
        registry: &ParameterRegistry,
        _store: &mut dyn ComponentStore,
    ) -> Result<()> {
        let name = format!("accelerate.{}.gain", self.entity.id());
        registry.declare(&name, 1.0)?;
        self.gain = Some((registry.clone(), name));
        Ok(())
    }
}

impl Accelerate {
    fn gain(&self) -> f32 {
        let Some((registry, name)) = &self.gain else {
            return 1.0;
        };
        match registry.get_as::<f32>(name) {
            Ok(gain) => gain.unwrap_or(1.0),
            Err(err) => {
                warn!(error = %err, "ignoring gain");
                1.0
            }
        }
    }
}

impl Update for Accelerate {
    fn update(&mut self, info: &UpdateInfo, store: &mut dyn ComponentStore) -> Result<()> {
        if info.paused || self.acceleration == Vec3::ZERO {
            return Ok(());
        }
        let Some(velocity) = store.component_mut::<Velocity>(self.entity) else {
            return Ok(());
        };
        velocity.0 += self.acceleration * self.gain() * info.dt_seconds() as f32;
        if let Some(max) = self.max_speed {
            velocity.0 = velocity.0.clamp_length_max(max);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use engine_component::World;
    use engine_system::{ConfigPayload, EventManager, PluginHandle, SystemScheduler};
    use serde_json::json;

    use super::*;

    fn setup(config: serde_json::Value) -> (SystemScheduler, World, Entity) {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Velocity::default()).unwrap();
        let mut scheduler = SystemScheduler::new(Arc::new(EventManager::new()));
        scheduler.attach_plugin(
            PluginHandle::new("accelerate", Box::new(Accelerate::new(entity))),
            entity,
            ConfigPayload::new(config),
            &mut world,
        );
        (scheduler, world, entity)
    }

    #[test]
    fn test_velocity_grows_by_acceleration_times_dt() {
        let (mut scheduler, mut world, entity) = setup(json!({ "acceleration": [0.0, 2.0, 0.0] }));
        let info = UpdateInfo::new(Duration::from_millis(500));
        scheduler.run_step(&info, &mut world);
        scheduler.run_step(&info.next(Duration::ZERO, false), &mut world);

        let velocity = world.get::<Velocity>(entity).unwrap();
        assert!((velocity.0 - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_paused_step_leaves_velocity() {
        let (mut scheduler, mut world, entity) = setup(json!({ "acceleration": [1.0, 0.0, 0.0] }));
        let info = UpdateInfo::new(Duration::from_secs(1)).next(Duration::ZERO, true);
        scheduler.run_step(&info, &mut world);
        assert_eq!(world.get::<Velocity>(entity), Some(&Velocity::default()));
    }

    #[test]
    fn test_max_speed_clamps() {
        let (mut scheduler, mut world, entity) =
            setup(json!({ "acceleration": [10.0, 0.0, 0.0], "max_speed": 3.0 }));
        scheduler.run_step(&UpdateInfo::new(Duration::from_secs(1)), &mut world);
        let velocity = world.get::<Velocity>(entity).unwrap();
        assert!((velocity.0.length() - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_missing_acceleration_is_degraded() {
        let (scheduler, _, _) = setup(json!({}));
        let handle = scheduler.handles()[0];
        assert!(scheduler.instance(handle).unwrap().is_degraded());
    }

    #[test]
    fn test_gain_parameter_scales_acceleration() {
        let (mut scheduler, mut world, entity) = setup(json!({ "acceleration": [4.0, 0.0, 0.0] }));
        let name = format!("accelerate.{}.gain", entity.id());
        assert_eq!(scheduler.parameters().get_as::<f32>(&name).unwrap(), Some(1.0));

        scheduler.parameters().set(&name, 0.25).unwrap();
        scheduler.run_step(&UpdateInfo::new(Duration::from_secs(1)), &mut world);
        let velocity = world.get::<Velocity>(entity).unwrap();
        assert!((velocity.0 - Vec3::X).length() < 1e-5);
    }
}
