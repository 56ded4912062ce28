//! Model module for model_sync
//!
//! This module owns the in-memory model graph, the table-mapping catalog
//! and the validator.

pub mod catalog;
pub mod graph;
pub mod items;
pub mod validate;

// Re-export key types
pub use catalog::{ColumnMapping, MappingCatalog};
pub use graph::{AssociationSpec, ModelGraph};
pub use items::{
    Association, AssociationEnd, DataType, ItemId, Module, Multiplicity, NavigationProperty,
    ResourceType, ScalarProperty,
};
pub use validate::validate;
