//! The storage interface systems run against.
//!
//! The scheduler never looks inside the store. It only hands the same
//! `&mut dyn ComponentStore` to every phase call of a step, so any storage
//! engine that implements this trait can back a simulation.

use std::any::Any;

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;
use crate::query::QueryDescriptor;

/// Object-safe access to entity/component storage.
///
/// Typed access goes through the helpers on `dyn ComponentStore`
/// ([`component`](trait.ComponentStore.html#method.component) and friends).
pub trait ComponentStore {
    /// All live entities, in ascending order.
    fn entities(&self) -> Vec<Entity>;

    /// Returns `true` if `entity` is alive.
    fn contains(&self, entity: Entity) -> bool;

    /// Returns `true` if `entity` carries a component of type `type_id`.
    fn has_component_type(&self, entity: Entity, type_id: ComponentTypeId) -> bool;

    /// Type-erased read access to a single component.
    fn component_any(&self, entity: Entity, type_id: ComponentTypeId) -> Option<&dyn Any>;

    /// Type-erased write access to a single component.
    fn component_any_mut(&mut self, entity: Entity, type_id: ComponentTypeId)
    -> Option<&mut dyn Any>;

    /// Entities matching a component signature, in ascending order.
    fn query(&self, query: &QueryDescriptor) -> Vec<Entity> {
        if query.is_contradictory() {
            return Vec::new();
        }
        self.entities()
            .into_iter()
            .filter(|&entity| query.matches(|ty| self.has_component_type(entity, ty)))
            .collect()
    }
}

impl dyn ComponentStore + '_ {
    /// Look up the `T` component of `entity`.
    #[must_use]
    pub fn component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.component_any(entity, T::component_type_id())?
            .downcast_ref::<T>()
    }

    /// Look up the `T` component of `entity` for writing.
    #[must_use]
    pub fn component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.component_any_mut(entity, T::component_type_id())?
            .downcast_mut::<T>()
    }

    /// Returns `true` if `entity` carries a `T` component.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.has_component_type(entity, T::component_type_id())
    }
}
