//! Table/column-mapping catalog
//!
//! The authoritative record of which property maps to which physical
//! column, plus the discriminator map and the relationship-row counts read
//! from the backend. The catalog is supplied to the engine, updated in
//! place by the generators, and handed back to the caller.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::model::items::ItemId;

/// Column names of the shared entity table that can never be claimed by a
/// property mapping.
const RESERVED_COLUMNS: &[&str] = &["id", "discriminator"];

/// Binding of a scalar or navigation property to a physical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub table: String,
    pub column: String,
}

/// Mutable synchronization context threaded through the generators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingCatalog {
    mappings: IndexMap<ItemId, ColumnMapping>,
    discriminators: IndexMap<ItemId, i32>,
    next_discriminator: i32,
    /// Relationship rows per predicate, read from the backend snapshot.
    relationship_rows: IndexMap<ItemId, u64>,
    /// Navigation properties whose mapping the DDL generator changed as a
    /// side effect (for example a pure multiplicity change dropping a
    /// foreign key). The DML generator consumes this for its corrective
    /// catalog pass.
    touched_navigations: IndexSet<ItemId>,
}

impl MappingCatalog {
    pub fn new() -> Self {
        Self {
            next_discriminator: 1,
            ..Self::default()
        }
    }

    pub fn mapping(&self, property: ItemId) -> Option<&ColumnMapping> {
        self.mappings.get(&property)
    }

    /// Record a scalar property mapping
    pub fn set_mapping(&mut self, property: ItemId, table: &str, column: &str) {
        self.mappings.insert(
            property,
            ColumnMapping {
                table: table.to_string(),
                column: column.to_string(),
            },
        );
    }

    /// Remove a scalar property mapping
    pub fn remove_mapping(&mut self, property: ItemId) {
        self.mappings.shift_remove(&property);
    }

    /// Record a navigation property mapping and mark it touched
    pub fn map_navigation(&mut self, property: ItemId, table: &str, column: &str) {
        self.set_mapping(property, table, column);
        self.touched_navigations.insert(property);
    }

    /// Remove a navigation property mapping and mark it touched
    pub fn unmap_navigation(&mut self, property: ItemId) {
        self.remove_mapping(property);
        self.touched_navigations.insert(property);
    }

    pub fn touched_navigations(&self) -> &IndexSet<ItemId> {
        &self.touched_navigations
    }

    /// Reset the touched set. Runs at the start of every synchronization
    /// so one run's side effects never leak into the next.
    pub fn clear_touched_navigations(&mut self) {
        self.touched_navigations.clear();
    }

    pub fn discriminator(&self, resource_type: ItemId) -> Option<i32> {
        self.discriminators.get(&resource_type).copied()
    }

    /// Assign the next monotonic discriminator to a resource type.
    /// Discriminators are never reused, even after a type is deleted.
    pub fn assign_discriminator(&mut self, resource_type: ItemId) -> i32 {
        if let Some(existing) = self.discriminators.get(&resource_type) {
            return *existing;
        }
        let discriminator = self.next_discriminator;
        self.next_discriminator += 1;
        self.discriminators.insert(resource_type, discriminator);
        discriminator
    }

    /// Record a discriminator read back from the store
    pub fn set_discriminator(&mut self, resource_type: ItemId, discriminator: i32) {
        self.discriminators.insert(resource_type, discriminator);
        if discriminator >= self.next_discriminator {
            self.next_discriminator = discriminator + 1;
        }
    }

    pub fn release_discriminator(&mut self, resource_type: ItemId) {
        self.discriminators.shift_remove(&resource_type);
    }

    pub fn relationship_rows(&self, predicate: ItemId) -> u64 {
        self.relationship_rows.get(&predicate).copied().unwrap_or(0)
    }

    pub fn set_relationship_rows(&mut self, predicate: ItemId, rows: u64) {
        self.relationship_rows.insert(predicate, rows);
    }

    /// Derive a free column name in `table` from a desired name. The name
    /// is assigned once and never renamed; collisions get a numeric suffix.
    pub fn allocate_column(&self, table: &str, desired: &str) -> String {
        let taken = |candidate: &str| {
            RESERVED_COLUMNS.contains(&candidate)
                || self
                    .mappings
                    .values()
                    .any(|m| m.table == table && m.column == candidate)
        };

        if !taken(desired) {
            return desired.to_string();
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{}_{}", desired, suffix);
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Iterate all property mappings
    pub fn mappings(&self) -> impl Iterator<Item = (ItemId, &ColumnMapping)> {
        self.mappings.iter().map(|(id, m)| (*id, m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn discriminators_are_monotonic_and_never_reused() {
        let mut catalog = MappingCatalog::new();
        let a = ItemId::new();
        let b = ItemId::new();
        let c = ItemId::new();

        assert_eq!(catalog.assign_discriminator(a), 1);
        assert_eq!(catalog.assign_discriminator(b), 2);
        // Re-assigning is idempotent
        assert_eq!(catalog.assign_discriminator(a), 1);

        catalog.release_discriminator(b);
        assert_eq!(catalog.assign_discriminator(c), 3);
    }

    #[test]
    fn loaded_discriminators_advance_the_counter() {
        let mut catalog = MappingCatalog::new();
        let existing = ItemId::new();
        catalog.set_discriminator(existing, 41);
        assert_eq!(catalog.assign_discriminator(ItemId::new()), 42);
    }

    #[test]
    fn column_allocation_avoids_collisions_and_reserved_names() {
        let mut catalog = MappingCatalog::new();
        assert_eq!(catalog.allocate_column("resources", "id"), "id_2");

        let first = ItemId::new();
        catalog.set_mapping(first, "resources", "total");
        assert_eq!(catalog.allocate_column("resources", "total"), "total_2");

        let second = ItemId::new();
        catalog.set_mapping(second, "resources", "total_2");
        assert_eq!(catalog.allocate_column("resources", "total"), "total_3");

        // Same name in a different table is free
        assert_eq!(catalog.allocate_column("relationships", "total"), "total");
    }

    #[test]
    fn navigation_mapping_changes_are_marked_touched() {
        let mut catalog = MappingCatalog::new();
        let nav = ItemId::new();

        catalog.map_navigation(nav, "resources", "document");
        assert!(catalog.touched_navigations().contains(&nav));
        assert_eq!(
            catalog.mapping(nav),
            Some(&ColumnMapping {
                table: "resources".to_string(),
                column: "document".to_string()
            })
        );

        catalog.unmap_navigation(nav);
        assert!(catalog.mapping(nav).is_none());
        assert!(catalog.touched_navigations().contains(&nav));
    }
}
