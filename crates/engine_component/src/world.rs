//! In-memory entity/component storage.
//!
//! The [`World`] is the storage engine used by the host binary and by tests.
//! Components are stored as type-erased boxes keyed by [`ComponentTypeId`],
//! one map per entity. Entities are kept in a `BTreeMap` so iteration (and
//! therefore query results) is in ascending entity order.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::component::{Component, ComponentTypeId};
use crate::entity::{Entity, EntityAllocator};
use crate::store::ComponentStore;

/// Errors returned by [`World`] mutations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The entity does not exist (never spawned, or already despawned).
    #[error("{0} not found")]
    EntityNotFound(Entity),
}

type ComponentBox = Box<dyn Any + Send + Sync>;

/// Entity/component storage.
#[derive(Debug, Default)]
pub struct World {
    /// Entity ID allocator.
    allocator: EntityAllocator,
    /// Component data of every live entity.
    entities: BTreeMap<Entity, HashMap<ComponentTypeId, ComponentBox>>,
}

impl World {
    /// Create a new empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new entity without any components.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.entities.insert(entity, HashMap::new());
        entity
    }

    /// Attach (or replace) a component on an entity.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::EntityNotFound`] if the entity is not alive.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> Result<(), WorldError> {
        let components = self
            .entities
            .get_mut(&entity)
            .ok_or(WorldError::EntityNotFound(entity))?;
        components.insert(T::component_type_id(), Box::new(component));
        Ok(())
    }

    /// Detach a component from an entity, returning it if present.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let boxed = self
            .entities
            .get_mut(&entity)?
            .remove(&T::component_type_id())?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }

    /// Typed read access to a component.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.entities
            .get(&entity)?
            .get(&T::component_type_id())?
            .downcast_ref::<T>()
    }

    /// Typed write access to a component.
    #[must_use]
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.entities
            .get_mut(&entity)?
            .get_mut(&T::component_type_id())?
            .downcast_mut::<T>()
    }

    /// Destroy an entity together with all its components.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::EntityNotFound`] if the entity is not alive.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), WorldError> {
        let components = self
            .entities
            .remove(&entity)
            .ok_or(WorldError::EntityNotFound(entity))?;
        debug!(%entity, components = components.len(), "despawned entity");
        Ok(())
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the number of components attached to `entity`.
    #[must_use]
    pub fn component_count(&self, entity: Entity) -> usize {
        self.entities.get(&entity).map_or(0, HashMap::len)
    }
}

impl ComponentStore for World {
    fn entities(&self) -> Vec<Entity> {
        self.entities.keys().copied().collect()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.entities.contains_key(&entity)
    }

    fn has_component_type(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|components| components.contains_key(&type_id))
    }

    fn component_any(&self, entity: Entity, type_id: ComponentTypeId) -> Option<&dyn Any> {
        let boxed = self.entities.get(&entity)?.get(&type_id)?;
        Some(&**boxed)
    }

    fn component_any_mut(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Option<&mut dyn Any> {
        let boxed = self.entities.get_mut(&entity)?.get_mut(&type_id)?;
        Some(&mut **boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryDescriptor;

    #[derive(Debug, Clone, PartialEq)]
    struct Name(String);

    impl Component for Name {
        fn type_name() -> &'static str {
            "Name"
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Speed(f32);

    impl Component for Speed {
        fn type_name() -> &'static str {
            "Speed"
        }
    }

    #[test]
    fn test_spawn_and_insert() {
        let mut world = World::new();
        let e = world.spawn();
        assert!(!e.is_null());
        world.insert(e, Name("box".into())).unwrap();
        assert_eq!(world.get::<Name>(e), Some(&Name("box".into())));
        assert_eq!(world.component_count(e), 1);
    }

    #[test]
    fn test_insert_on_missing_entity_fails() {
        let mut world = World::new();
        let err = world.insert(Entity::from_raw(99), Speed(1.0)).unwrap_err();
        assert!(matches!(err, WorldError::EntityNotFound(e) if e.id() == 99));
    }

    #[test]
    fn test_remove_returns_component() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Speed(2.5)).unwrap();
        assert_eq!(world.remove::<Speed>(e), Some(Speed(2.5)));
        assert_eq!(world.remove::<Speed>(e), None);
    }

    #[test]
    fn test_despawn() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Speed(1.0)).unwrap();
        world.despawn(e).unwrap();
        assert_eq!(world.entity_count(), 0);
        assert!(!world.contains(e));
        assert!(world.despawn(e).is_err());
    }

    #[test]
    fn test_query_through_dyn_store() {
        let mut world = World::new();
        let a = world.spawn();
        let b = world.spawn();
        let c = world.spawn();
        world.insert(a, Name("a".into())).unwrap();
        world.insert(a, Speed(1.0)).unwrap();
        world.insert(b, Name("b".into())).unwrap();
        world.insert(c, Speed(3.0)).unwrap();

        let store: &dyn ComponentStore = &world;
        let named = store.query(&QueryDescriptor::new().with_component::<Name>());
        assert_eq!(named, vec![a, b]);

        let still = store.query(
            &QueryDescriptor::new()
                .with_component::<Name>()
                .without_component::<Speed>(),
        );
        assert_eq!(still, vec![b]);
        assert_eq!(store.component::<Speed>(c), Some(&Speed(3.0)));
        assert!(store.has_component::<Name>(a));
    }

    #[test]
    fn test_component_mut_through_dyn_store() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Speed(1.0)).unwrap();

        let store: &mut dyn ComponentStore = &mut world;
        if let Some(speed) = store.component_mut::<Speed>(e) {
            speed.0 = 4.0;
        }
        assert_eq!(world.get::<Speed>(e), Some(&Speed(4.0)));
    }
}
