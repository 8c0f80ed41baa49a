//! Query descriptors: component signatures used to select entities.
//!
//! A [`QueryDescriptor`] names the component types an entity must carry and
//! the ones it must not carry. Systems hand descriptors to the store directly
//! during a phase, or register them as pending queries that the scheduler
//! evaluates once per step.

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentTypeId};

/// A component signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Component types a matching entity must have.
    pub with: Vec<ComponentTypeId>,
    /// Component types a matching entity must not have.
    pub without: Vec<ComponentTypeId>,
}

impl QueryDescriptor {
    /// Create an empty descriptor. It matches every entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a component type.
    #[must_use]
    pub fn with(mut self, type_id: ComponentTypeId) -> Self {
        if !self.with.contains(&type_id) {
            self.with.push(type_id);
        }
        self
    }

    /// Exclude a component type.
    #[must_use]
    pub fn without(mut self, type_id: ComponentTypeId) -> Self {
        if !self.without.contains(&type_id) {
            self.without.push(type_id);
        }
        self
    }

    /// Require the component type `T`.
    #[must_use]
    pub fn with_component<T: Component>(self) -> Self {
        self.with(T::component_type_id())
    }

    /// Exclude the component type `T`.
    #[must_use]
    pub fn without_component<T: Component>(self) -> Self {
        self.without(T::component_type_id())
    }

    /// Returns `true` if an entity for which `has` reports its component set
    /// satisfies this signature.
    #[must_use]
    pub fn matches(&self, has: impl Fn(ComponentTypeId) -> bool) -> bool {
        self.with.iter().all(|&ty| has(ty)) && !self.without.iter().any(|&ty| has(ty))
    }

    /// Returns `true` if the descriptor can never match anything, i.e. a type
    /// is both required and excluded.
    #[must_use]
    pub fn is_contradictory(&self) -> bool {
        self.with.iter().any(|ty| self.without.contains(ty))
    }
}
