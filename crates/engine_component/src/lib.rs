//! # engine_component
//!
//! The "E" and "C" in ECS: what an entity is, how component types are
//! identified, and the storage interface systems are stepped against.
//!
//! This crate provides:
//!
//! - [`Entity`]: lightweight `u64` entity identifiers with a null sentinel.
//! - [`EntityAllocator`]: monotonically increasing ID allocator.
//! - [`Component`] trait: the contract all ECS data must satisfy.
//! - [`QueryDescriptor`]: component signatures for selecting entities.
//! - [`ComponentStore`]: the object-safe storage interface.
//! - [`World`]: an in-memory [`ComponentStore`].

pub mod component;
pub mod entity;
pub mod query;
pub mod store;
pub mod world;

pub use component::{Component, ComponentTypeId};
pub use entity::{Entity, EntityAllocator};
pub use query::QueryDescriptor;
pub use store::ComponentStore;
pub use world::{World, WorldError};
