//! DDL generation
//!
//! Turns an adjusted diff into ordered physical schema statements. The
//! phase order is fixed so referential dependencies always resolve:
//! deletions first (columns, association objects, foreign keys, type
//! bookkeeping), then additions (discriminators, columns, foreign keys,
//! association objects), then in-place updates, and finally procedure
//! regeneration for every type whose flattened column set changed.

use indexmap::IndexSet;
use tracing::debug;

use crate::diff::differ::GraphDiff;
use crate::error::{Error, Result};
use crate::model::catalog::MappingCatalog;
use crate::model::graph::ModelGraph;
use crate::model::items::{Association, ItemId, Multiplicity};
use crate::script::{Statement, ENTITY_TABLE, RELATIONSHIP_TABLE};
use crate::sort;
use crate::utils::naming;

/// Physical schema statement generator
pub struct DdlGenerator<'a> {
    diff: &'a GraphDiff,
    original: &'a ModelGraph,
    catalog: &'a mut MappingCatalog,
    statements: Vec<Statement>,
}

impl<'a> DdlGenerator<'a> {
    pub fn new(
        diff: &'a GraphDiff,
        original: &'a ModelGraph,
        catalog: &'a mut MappingCatalog,
    ) -> Self {
        Self {
            diff,
            original,
            catalog,
            statements: Vec::new(),
        }
    }

    /// Generate the DDL half of the script. Assigns discriminators and
    /// view names into `new` as a side effect.
    pub fn generate(mut self, new: &mut ModelGraph) -> Result<Vec<Statement>> {
        self.drop_deleted_scalar_columns();
        self.drop_deleted_associations()?;
        self.drop_deleted_navigation_columns();
        self.retire_deleted_resource_types();
        self.assign_discriminators(new)?;
        self.add_scalar_columns(new);
        self.add_navigation_columns(new);
        self.create_added_associations(new)?;
        self.alter_updated_scalar_properties(new);
        self.alter_updated_associations(new)?;
        self.regenerate_procedures(new)?;
        Ok(self.statements)
    }

    fn push(&mut self, sql: String) {
        self.statements.push(Statement::ddl(sql));
    }

    /// Deleted scalar properties lose their physical column
    fn drop_deleted_scalar_columns(&mut self) {
        for id in &self.diff.scalar_properties.deleted {
            let Some(mapping) = self.catalog.mapping(*id).cloned() else {
                continue; // never reached the store
            };
            self.statements.push(Statement::ddl(format!(
                "ALTER TABLE {} DROP COLUMN {};",
                mapping.table, mapping.column
            )));
            self.catalog.remove_mapping(*id);
        }
    }

    /// Deleted associations lose their view, index, procedures and rows.
    /// A `One`-ended association with live relationship rows cannot be
    /// deleted without orphaning data.
    fn drop_deleted_associations(&mut self) -> Result<()> {
        let deleted: Vec<ItemId> = self.diff.associations.deleted.iter().copied().collect();
        for id in deleted {
            let Some(association) = self.original.association(id).cloned() else {
                continue;
            };
            let rows = self.catalog.relationship_rows(association.predicate);
            if association.has_one_end() && rows > 0 {
                return Err(Error::UnsupportedDeletion(format!(
                    "association '{}' still has {} relationship rows; delete them first",
                    association.name, rows
                )));
            }

            let view = association
                .view_name
                .clone()
                .unwrap_or_else(|| naming::view_name(&association.name, association.predicate));
            debug!(association = %association.name, view = %view, "dropping association objects");

            if rows > 0 {
                self.push(format!(
                    "DELETE FROM {} WHERE predicate_id = '{}';",
                    RELATIONSHIP_TABLE, association.predicate
                ));
            }
            self.drop_association_objects(&association, &view);
            self.catalog.set_relationship_rows(association.predicate, 0);
        }
        Ok(())
    }

    fn drop_association_objects(&mut self, association: &Association, view: &str) {
        if association.needs_procedures() {
            for operation in ["insert", "delete"] {
                self.push(format!(
                    "DROP PROCEDURE IF EXISTS {};",
                    naming::view_procedure_name(view, operation)
                ));
            }
        }
        self.push(format!("DROP INDEX IF EXISTS {};", naming::index_name(view)));
        self.push(format!("DROP VIEW IF EXISTS {};", view));
    }

    /// Deleted (or force-deleted) navigation properties lose their
    /// foreign-key column when they had one
    fn drop_deleted_navigation_columns(&mut self) {
        for id in &self.diff.navigation_properties.deleted {
            let Some(mapping) = self.catalog.mapping(*id).cloned() else {
                continue; // unmapped side, nothing physical
            };
            self.statements.push(Statement::ddl(format!(
                "ALTER TABLE {} DROP COLUMN {};",
                mapping.table, mapping.column
            )));
            self.catalog.unmap_navigation(*id);
        }
    }

    /// Deleted resource types lose their rows, procedures and
    /// discriminator
    fn retire_deleted_resource_types(&mut self) {
        for id in &self.diff.resource_types.deleted {
            let Some(resource_type) = self.original.resource_type(*id) else {
                continue;
            };
            let name = resource_type.name.clone();
            if let Some(discriminator) = self.catalog.discriminator(*id) {
                self.statements.push(Statement::ddl(format!(
                    "DELETE FROM {} WHERE discriminator = {};",
                    ENTITY_TABLE, discriminator
                )));
            }
            for operation in ["insert", "update", "delete"] {
                self.statements.push(Statement::ddl(format!(
                    "DROP PROCEDURE IF EXISTS {};",
                    naming::procedure_name(&name, operation)
                )));
            }
            self.catalog.release_discriminator(*id);
        }
    }

    /// Added resource types get the next monotonic discriminator, in
    /// module order then hierarchy order so a base type is always tagged
    /// before its derived types.
    fn assign_discriminators(&mut self, new: &mut ModelGraph) -> Result<()> {
        let module_ids = sort::module_order(new)?;
        for module_id in module_ids {
            let type_ids = {
                let module = new
                    .module(module_id)
                    .ok_or_else(|| Error::Generation(format!("unknown module {}", module_id)))?;
                sort::hierarchy_order(module)?
            };
            for type_id in type_ids {
                if self.diff.resource_types.added.contains(&type_id) {
                    let discriminator = self.catalog.assign_discriminator(type_id);
                    debug!(%type_id, discriminator, "assigned discriminator");
                }
                // Reflect catalog state into the graph for the caller
                if let Some(discriminator) = self.catalog.discriminator(type_id) {
                    if let Some(resource_type) = new.resource_type_mut(type_id) {
                        resource_type.discriminator = Some(discriminator);
                    }
                }
            }
        }
        Ok(())
    }

    /// Added scalar properties get a column on the shared entity table.
    /// Property columns are physically nullable regardless of the model's
    /// nullability: rows of unrelated discriminators share the table.
    fn add_scalar_columns(&mut self, new: &ModelGraph) {
        for id in &self.diff.scalar_properties.added {
            let Some(property) = new.scalar_property(*id) else {
                continue;
            };
            if self.catalog.mapping(*id).is_some() {
                continue;
            }
            let column = self
                .catalog
                .allocate_column(ENTITY_TABLE, &naming::column_name(&property.name));
            self.statements.push(Statement::ddl(format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                ENTITY_TABLE,
                column,
                property.data_type.sql_type()
            )));
            self.catalog.set_mapping(*id, ENTITY_TABLE, &column);
        }
    }

    /// Added navigation properties opposite a `One` end get a nullable
    /// foreign-key column for direct, non-generic access
    fn add_navigation_columns(&mut self, new: &ModelGraph) {
        for id in &self.diff.navigation_properties.added {
            let Some(property) = new.navigation_property(*id) else {
                continue;
            };
            let Some(association) = new.association(property.association) else {
                continue;
            };
            if association.fk_navigation() != Some(*id) || self.catalog.mapping(*id).is_some() {
                continue;
            }
            let column = self
                .catalog
                .allocate_column(ENTITY_TABLE, &naming::column_name(&property.name));
            self.statements.push(Statement::ddl(format!(
                "ALTER TABLE {} ADD COLUMN {} uuid REFERENCES {}(id);",
                ENTITY_TABLE, column, ENTITY_TABLE
            )));
            self.catalog.map_navigation(*id, ENTITY_TABLE, &column);
        }
    }

    /// Added associations get their view, cardinality index and, when not
    /// foreign-key-backed, insert/delete procedures
    fn create_added_associations(&mut self, new: &mut ModelGraph) -> Result<()> {
        let added: Vec<ItemId> = self.diff.associations.added.iter().copied().collect();
        for id in added {
            let association = new
                .association(id)
                .cloned()
                .ok_or_else(|| Error::Generation(format!("unknown association {}", id)))?;
            if association.subject_multiplicity == Multiplicity::One
                && association.object_multiplicity == Multiplicity::One
            {
                return Err(Error::UnsupportedConfiguration(format!(
                    "association '{}': one-to-one multiplicity is not supported",
                    association.name
                )));
            }

            let view = association
                .view_name
                .clone()
                .unwrap_or_else(|| naming::view_name(&association.name, association.predicate));
            if let Some(mutable) = new.association_mut(id) {
                mutable.view_name = Some(view.clone());
            }

            self.create_association_objects(&association, &view);
        }
        Ok(())
    }

    fn create_association_objects(&mut self, association: &Association, view: &str) {
        self.push(format!(
            "CREATE VIEW {} AS SELECT subject_id, object_id FROM {} WHERE predicate_id = '{}';",
            view, RELATIONSHIP_TABLE, association.predicate
        ));
        // For One–ZeroOrOne only the One end gets the index; the FK column
        // stays without uniqueness so a pairwise swap of zero-or-one
        // relationships remains a legal two-step update. The ZeroOrOne end
        // is enforced by the backend trigger collaborator.
        self.push(format!(
            "CREATE UNIQUE INDEX {} ON {} ({}) WHERE predicate_id = '{}';",
            naming::index_name(view),
            RELATIONSHIP_TABLE,
            association.unique_index_columns().join(", "),
            association.predicate
        ));
        if association.needs_procedures() {
            self.create_view_procedures(association.predicate, view);
        }
    }

    fn create_view_procedures(&mut self, predicate: ItemId, view: &str) {
        self.push(format!(
            "CREATE PROCEDURE {}(p_subject uuid, p_object uuid)\nLANGUAGE sql\nAS $$\nINSERT INTO {} (subject_id, object_id, predicate_id) VALUES (p_subject, p_object, '{}');\n$$;",
            naming::view_procedure_name(view, "insert"),
            RELATIONSHIP_TABLE,
            predicate
        ));
        self.push(format!(
            "CREATE PROCEDURE {}(p_subject uuid, p_object uuid)\nLANGUAGE sql\nAS $$\nDELETE FROM {} WHERE subject_id = p_subject AND object_id = p_object AND predicate_id = '{}';\n$$;",
            naming::view_procedure_name(view, "delete"),
            RELATIONSHIP_TABLE,
            predicate
        ));
    }

    /// Updated scalar properties alter in place when the data-type
    /// transition widens; otherwise the column is dropped and recreated
    /// under the same physical name
    fn alter_updated_scalar_properties(&mut self, new: &ModelGraph) {
        for id in &self.diff.scalar_properties.updated {
            let (Some(old), Some(next)) = (
                self.original.scalar_property(*id),
                new.scalar_property(*id),
            ) else {
                continue;
            };
            if old.data_type == next.data_type {
                continue; // rename or nullability change: catalog metadata only
            }
            let Some(mapping) = self.catalog.mapping(*id).cloned() else {
                continue;
            };
            let sql_type = next.data_type.sql_type();
            if old.data_type.alter_compatible(&next.data_type) {
                self.statements.push(Statement::ddl(format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                    mapping.table, mapping.column, sql_type, mapping.column, sql_type
                )));
            } else {
                debug!(property = %next.name, "incompatible type change, recreating column");
                self.statements.push(Statement::ddl(format!(
                    "ALTER TABLE {} DROP COLUMN {};",
                    mapping.table, mapping.column
                )));
                self.statements.push(Statement::ddl(format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    mapping.table, mapping.column, sql_type
                )));
            }
        }
    }

    /// Updated associations carry only compatible multiplicity changes
    /// after adjustment: reshape the unique index, create or drop the
    /// write procedures, and drop a foreign key that is no longer needed
    fn alter_updated_associations(&mut self, new: &mut ModelGraph) -> Result<()> {
        let updated: Vec<ItemId> = self.diff.associations.updated.iter().copied().collect();
        for id in updated {
            let old = self
                .original
                .association(id)
                .cloned()
                .ok_or_else(|| Error::Generation(format!("unknown association {}", id)))?;
            let mut next = new
                .association(id)
                .cloned()
                .ok_or_else(|| Error::Generation(format!("unknown association {}", id)))?;

            // The physical view name is frozen at first creation
            let view = old
                .view_name
                .clone()
                .unwrap_or_else(|| naming::view_name(&old.name, old.predicate));
            next.view_name = Some(view.clone());
            if let Some(mutable) = new.association_mut(id) {
                mutable.view_name = Some(view.clone());
            }

            if old.unique_index_columns() != next.unique_index_columns() {
                self.push(format!("DROP INDEX IF EXISTS {};", naming::index_name(&view)));
                self.push(format!(
                    "CREATE UNIQUE INDEX {} ON {} ({}) WHERE predicate_id = '{}';",
                    naming::index_name(&view),
                    RELATIONSHIP_TABLE,
                    next.unique_index_columns().join(", "),
                    next.predicate
                ));
            }

            if old.needs_procedures() && !next.needs_procedures() {
                for operation in ["insert", "delete"] {
                    self.push(format!(
                        "DROP PROCEDURE IF EXISTS {};",
                        naming::view_procedure_name(&view, operation)
                    ));
                }
            } else if !old.needs_procedures() && next.needs_procedures() {
                self.create_view_procedures(next.predicate, &view);
            }

            let old_fk = old.fk_navigation();
            let next_fk = next.fk_navigation();
            if old_fk != next_fk {
                if let Some(navigation) = old_fk {
                    if let Some(mapping) = self.catalog.mapping(navigation).cloned() {
                        self.statements.push(Statement::ddl(format!(
                            "ALTER TABLE {} DROP COLUMN {};",
                            mapping.table, mapping.column
                        )));
                        self.catalog.unmap_navigation(navigation);
                    }
                }
                if let Some(navigation) = next_fk {
                    if self.catalog.mapping(navigation).is_none() {
                        if let Some(property) = new.navigation_property(navigation) {
                            let column = self
                                .catalog
                                .allocate_column(ENTITY_TABLE, &naming::column_name(&property.name));
                            self.statements.push(Statement::ddl(format!(
                                "ALTER TABLE {} ADD COLUMN {} uuid REFERENCES {}(id);",
                                ENTITY_TABLE, column, ENTITY_TABLE
                            )));
                            self.catalog.map_navigation(navigation, ENTITY_TABLE, &column);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Regenerate insert/update/delete procedures for every resource type
    /// that was added, renamed, or whose flattened column set changed.
    /// Procedures encode the fully flattened property list, so a property
    /// change anywhere in the base chain invalidates every derived type.
    fn regenerate_procedures(&mut self, new: &ModelGraph) -> Result<()> {
        let mut affected: IndexSet<ItemId> = IndexSet::new();
        let mut dropped_names: Vec<String> = Vec::new();

        for id in &self.diff.resource_types.added {
            if new.resource_type(*id).is_some() {
                affected.insert(*id);
            }
        }
        for id in &self.diff.resource_types.updated {
            let (Some(old), Some(next)) =
                (self.original.resource_type(*id), new.resource_type(*id))
            else {
                continue;
            };
            affected.insert(*id);
            if old.name != next.name {
                dropped_names.push(old.name.clone());
            }
        }
        for id in self
            .diff
            .scalar_properties
            .added
            .iter()
            .chain(&self.diff.scalar_properties.updated)
        {
            if let Some(property) = new.scalar_property(*id) {
                affected.insert(property.owner);
            }
        }
        for id in &self.diff.scalar_properties.deleted {
            if let Some(property) = self.original.scalar_property(*id) {
                if new.resource_type(property.owner).is_some() {
                    affected.insert(property.owner);
                }
            }
        }
        for id in self.catalog.touched_navigations().iter() {
            if let Some(property) = new.navigation_property(*id) {
                affected.insert(property.owner);
            } else if let Some(property) = self.original.navigation_property(*id) {
                if new.resource_type(property.owner).is_some() {
                    affected.insert(property.owner);
                }
            }
        }

        let seeds: Vec<ItemId> = affected.iter().copied().collect();
        for seed in seeds {
            for derived in new.derived_types(seed) {
                affected.insert(derived);
            }
        }
        for id in &self.diff.resource_types.deleted {
            affected.shift_remove(id);
        }

        if affected.is_empty() && dropped_names.is_empty() {
            return Ok(());
        }

        for name in &dropped_names {
            for operation in ["insert", "update", "delete"] {
                self.statements.push(Statement::ddl(format!(
                    "DROP PROCEDURE IF EXISTS {};",
                    naming::procedure_name(name, operation)
                )));
            }
        }

        let module_ids = sort::module_order(new)?;
        for module_id in module_ids {
            let type_ids = {
                let module = new
                    .module(module_id)
                    .ok_or_else(|| Error::Generation(format!("unknown module {}", module_id)))?;
                sort::hierarchy_order(module)?
            };
            for type_id in type_ids {
                if !affected.contains(&type_id) {
                    continue;
                }
                if !self.diff.resource_types.added.contains(&type_id) {
                    let name = new
                        .resource_type(type_id)
                        .map(|t| t.name.clone())
                        .unwrap_or_default();
                    for operation in ["insert", "update", "delete"] {
                        self.statements.push(Statement::ddl(format!(
                            "DROP PROCEDURE IF EXISTS {};",
                            naming::procedure_name(&name, operation)
                        )));
                    }
                }
                self.emit_type_procedures(new, type_id)?;
            }
        }
        Ok(())
    }

    fn emit_type_procedures(&mut self, new: &ModelGraph, type_id: ItemId) -> Result<()> {
        let resource_type = new
            .resource_type(type_id)
            .ok_or_else(|| Error::Generation(format!("unknown resource type {}", type_id)))?;
        let discriminator = self.catalog.discriminator(type_id).ok_or_else(|| {
            Error::Generation(format!(
                "resource type '{}' has no discriminator",
                resource_type.name
            ))
        })?;

        // Flattened column list: scalars plus foreign-key-backed
        // navigations, base chain first
        let mut columns: Vec<(String, String)> = Vec::new();
        for property in new.flattened_scalar_properties(type_id) {
            if let Some(mapping) = self.catalog.mapping(property.id) {
                columns.push((mapping.column.clone(), property.data_type.sql_type()));
            }
        }
        for property in new.flattened_navigation_properties(type_id) {
            if let Some(mapping) = self.catalog.mapping(property.id) {
                columns.push((mapping.column.clone(), "uuid".to_string()));
            }
        }

        let name = &resource_type.name;
        let mut params = vec!["p_id uuid".to_string()];
        params.extend(
            columns
                .iter()
                .map(|(column, sql_type)| format!("p_{} {}", column, sql_type)),
        );

        let mut insert_columns = vec!["id".to_string(), "discriminator".to_string()];
        insert_columns.extend(columns.iter().map(|(column, _)| column.clone()));
        let mut insert_values = vec!["p_id".to_string(), discriminator.to_string()];
        insert_values.extend(columns.iter().map(|(column, _)| format!("p_{}", column)));

        self.push(format!(
            "CREATE PROCEDURE {}({})\nLANGUAGE sql\nAS $$\nINSERT INTO {} ({}) VALUES ({});\n$$;",
            naming::procedure_name(name, "insert"),
            params.join(", "),
            ENTITY_TABLE,
            insert_columns.join(", "),
            insert_values.join(", ")
        ));

        let assignments = if columns.is_empty() {
            format!("discriminator = {}", discriminator)
        } else {
            columns
                .iter()
                .map(|(column, _)| format!("{} = p_{}", column, column))
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.push(format!(
            "CREATE PROCEDURE {}({})\nLANGUAGE sql\nAS $$\nUPDATE {} SET {} WHERE id = p_id AND discriminator = {};\n$$;",
            naming::procedure_name(name, "update"),
            params.join(", "),
            ENTITY_TABLE,
            assignments,
            discriminator
        ));

        self.push(format!(
            "CREATE PROCEDURE {}(p_id uuid)\nLANGUAGE sql\nAS $$\nDELETE FROM {} WHERE id = p_id AND discriminator = {};\n$$;",
            naming::procedure_name(name, "delete"),
            ENTITY_TABLE,
            discriminator
        ));
        Ok(())
    }
}
