//! DML generation
//!
//! Emits the catalog (metadata table) statements reflecting the new graph:
//! upserts for added/updated items in dependency order, deletes for
//! removed items in reverse order, the whole batch bracketed by a drop and
//! recreate of the catalog uniqueness constraints. A delete+add pair
//! touching the same logical name would transiently violate uniqueness
//! otherwise.

use crate::diff::differ::GraphDiff;
use crate::error::{Error, Result};
use crate::model::catalog::MappingCatalog;
use crate::model::graph::ModelGraph;
use crate::model::items::ItemId;
use crate::script::{
    Statement, CATALOG_ASSOCIATIONS, CATALOG_MODULES, CATALOG_NAVIGATION_PROPERTIES,
    CATALOG_RESOURCE_TYPES, CATALOG_SCALAR_PROPERTIES,
};

/// Name-uniqueness constraints on the catalog tables, dropped and
/// recreated around every batch
const CATALOG_UNIQUES: &[(&str, &str, &str)] = &[
    (CATALOG_MODULES, "uq_catalog_modules_namespace", "namespace"),
    (CATALOG_RESOURCE_TYPES, "uq_catalog_resource_types_name", "name"),
    (
        CATALOG_SCALAR_PROPERTIES,
        "uq_catalog_scalar_properties_owner_name",
        "owner_id, name",
    ),
    (
        CATALOG_NAVIGATION_PROPERTIES,
        "uq_catalog_navigation_properties_owner_name",
        "owner_id, name",
    ),
    (
        CATALOG_ASSOCIATIONS,
        "uq_catalog_associations_name",
        "module_id, name",
    ),
];

/// Catalog statement generator
pub struct DmlGenerator<'a> {
    diff: &'a GraphDiff,
    new: &'a ModelGraph,
    catalog: &'a MappingCatalog,
}

impl<'a> DmlGenerator<'a> {
    pub fn new(diff: &'a GraphDiff, new: &'a ModelGraph, catalog: &'a MappingCatalog) -> Self {
        Self { diff, new, catalog }
    }

    /// Generate the DML half of the script
    pub fn generate(&self) -> Result<Vec<Statement>> {
        let mut body = Vec::new();
        self.upserts(&mut body)?;
        self.deletes(&mut body);
        let corrective = self.corrective_navigation_updates();

        if body.is_empty() && corrective.is_empty() {
            return Ok(Vec::new());
        }

        let mut statements = Vec::new();
        for (table, constraint, _) in CATALOG_UNIQUES {
            statements.push(Statement::dml(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                table, constraint
            )));
        }
        statements.extend(body);
        for (table, constraint, columns) in CATALOG_UNIQUES {
            statements.push(Statement::dml(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});",
                table, constraint, columns
            )));
        }
        // After the constraints are back, correct any navigation property
        // whose mapping changed purely as a side effect of a multiplicity
        // change
        statements.extend(corrective);
        Ok(statements)
    }

    /// Catalog upserts in dependency order: module, resource type, scalar
    /// property, navigation property, association
    fn upserts(&self, out: &mut Vec<Statement>) -> Result<()> {
        for id in self.changed(&self.diff.modules) {
            let module = self
                .new
                .module(id)
                .ok_or_else(|| Error::Generation(format!("unknown module {}", id)))?;
            out.push(Statement::dml(format!(
                "INSERT INTO {} (id, namespace, uri, description, is_system) VALUES ('{}', {}, {}, {}, {}) \
                 ON CONFLICT (id) DO UPDATE SET namespace = EXCLUDED.namespace, uri = EXCLUDED.uri, \
                 description = EXCLUDED.description, is_system = EXCLUDED.is_system;",
                CATALOG_MODULES,
                module.id,
                quote(&module.namespace),
                quote_opt(module.uri.as_deref()),
                quote_opt(module.description.as_deref()),
                if module.system { "TRUE" } else { "FALSE" },
            )));
        }

        for id in self.changed(&self.diff.resource_types) {
            let resource_type = self
                .new
                .resource_type(id)
                .ok_or_else(|| Error::Generation(format!("unknown resource type {}", id)))?;
            let discriminator = self
                .catalog
                .discriminator(id)
                .map(|d| d.to_string())
                .unwrap_or_else(|| "NULL".to_string());
            out.push(Statement::dml(format!(
                "INSERT INTO {} (id, module_id, name, description, base_id, discriminator) VALUES ('{}', '{}', {}, {}, {}, {}) \
                 ON CONFLICT (id) DO UPDATE SET module_id = EXCLUDED.module_id, name = EXCLUDED.name, \
                 description = EXCLUDED.description, base_id = EXCLUDED.base_id, discriminator = EXCLUDED.discriminator;",
                CATALOG_RESOURCE_TYPES,
                resource_type.id,
                resource_type.module,
                quote(&resource_type.name),
                quote_opt(resource_type.description.as_deref()),
                quote_id_opt(resource_type.base),
                discriminator,
            )));
        }

        for id in self.changed(&self.diff.scalar_properties) {
            let property = self
                .new
                .scalar_property(id)
                .ok_or_else(|| Error::Generation(format!("unknown scalar property {}", id)))?;
            let mapping = self.catalog.mapping(id);
            out.push(Statement::dml(format!(
                "INSERT INTO {} (id, owner_id, name, data_type, nullable, table_name, column_name) VALUES ('{}', '{}', {}, {}, {}, {}, {}) \
                 ON CONFLICT (id) DO UPDATE SET owner_id = EXCLUDED.owner_id, name = EXCLUDED.name, \
                 data_type = EXCLUDED.data_type, nullable = EXCLUDED.nullable, table_name = EXCLUDED.table_name, \
                 column_name = EXCLUDED.column_name;",
                CATALOG_SCALAR_PROPERTIES,
                property.id,
                property.owner,
                quote(&property.name),
                quote(&property.data_type.to_string()),
                if property.nullable { "TRUE" } else { "FALSE" },
                quote_opt(mapping.map(|m| m.table.as_str())),
                quote_opt(mapping.map(|m| m.column.as_str())),
            )));
        }

        for id in self.changed(&self.diff.navigation_properties) {
            let property = self
                .new
                .navigation_property(id)
                .ok_or_else(|| Error::Generation(format!("unknown navigation property {}", id)))?;
            let mapping = self.catalog.mapping(id);
            out.push(Statement::dml(format!(
                "INSERT INTO {} (id, owner_id, name, end_role, association_id, table_name, column_name) VALUES ('{}', '{}', {}, {}, '{}', {}, {}) \
                 ON CONFLICT (id) DO UPDATE SET owner_id = EXCLUDED.owner_id, name = EXCLUDED.name, \
                 end_role = EXCLUDED.end_role, association_id = EXCLUDED.association_id, \
                 table_name = EXCLUDED.table_name, column_name = EXCLUDED.column_name;",
                CATALOG_NAVIGATION_PROPERTIES,
                property.id,
                property.owner,
                quote(&property.name),
                quote(&property.end.to_string()),
                property.association,
                quote_opt(mapping.map(|m| m.table.as_str())),
                quote_opt(mapping.map(|m| m.column.as_str())),
            )));
        }

        for id in self.changed(&self.diff.associations) {
            let association = self
                .new
                .association(id)
                .ok_or_else(|| Error::Generation(format!("unknown association {}", id)))?;
            out.push(Statement::dml(format!(
                "INSERT INTO {} (id, module_id, name, description, predicate_id, subject_id, object_id, \
                 subject_multiplicity, object_multiplicity, view_name) VALUES ('{}', '{}', {}, {}, '{}', '{}', '{}', {}, {}, {}) \
                 ON CONFLICT (id) DO UPDATE SET module_id = EXCLUDED.module_id, name = EXCLUDED.name, \
                 description = EXCLUDED.description, predicate_id = EXCLUDED.predicate_id, \
                 subject_id = EXCLUDED.subject_id, object_id = EXCLUDED.object_id, \
                 subject_multiplicity = EXCLUDED.subject_multiplicity, \
                 object_multiplicity = EXCLUDED.object_multiplicity, view_name = EXCLUDED.view_name;",
                CATALOG_ASSOCIATIONS,
                association.id,
                association.module,
                quote(&association.name),
                quote_opt(association.description.as_deref()),
                association.predicate,
                association.subject,
                association.object,
                quote(&association.subject_multiplicity.to_string()),
                quote(&association.object_multiplicity.to_string()),
                quote_opt(association.view_name.as_deref()),
            )));
        }

        Ok(())
    }

    /// Catalog deletes in reverse dependency order. An identity that was
    /// reclassified as delete+add keeps its row; the upsert already
    /// rewrote it.
    fn deletes(&self, out: &mut Vec<Statement>) {
        let kinds = [
            (&self.diff.associations, CATALOG_ASSOCIATIONS),
            (&self.diff.navigation_properties, CATALOG_NAVIGATION_PROPERTIES),
            (&self.diff.scalar_properties, CATALOG_SCALAR_PROPERTIES),
            (&self.diff.resource_types, CATALOG_RESOURCE_TYPES),
            (&self.diff.modules, CATALOG_MODULES),
        ];
        for (set, table) in kinds {
            for id in &set.deleted {
                if set.added.contains(id) {
                    continue; // recreated under the same identity
                }
                out.push(Statement::dml(format!(
                    "DELETE FROM {} WHERE id = '{}';",
                    table, id
                )));
            }
        }
    }

    /// Navigation properties whose physical mapping changed without being
    /// added, updated or deleted themselves get a corrective catalog
    /// update
    fn corrective_navigation_updates(&self) -> Vec<Statement> {
        let mut out = Vec::new();
        for id in self.catalog.touched_navigations() {
            if self.diff.navigation_properties.touches(*id) {
                continue;
            }
            if self.new.navigation_property(*id).is_none() {
                continue;
            }
            let mapping = self.catalog.mapping(*id);
            out.push(Statement::dml(format!(
                "UPDATE {} SET table_name = {}, column_name = {} WHERE id = '{}';",
                CATALOG_NAVIGATION_PROPERTIES,
                quote_opt(mapping.map(|m| m.table.as_str())),
                quote_opt(mapping.map(|m| m.column.as_str())),
                id
            )));
        }
        out
    }

    /// Added and updated identities of a change set, added first
    fn changed(&self, set: &crate::diff::differ::ChangeSet) -> Vec<ItemId> {
        set.added.iter().chain(&set.updated).copied().collect()
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_opt(value: Option<&str>) -> String {
    match value {
        Some(v) => quote(v),
        None => "NULL".to_string(),
    }
}

fn quote_id_opt(value: Option<ItemId>) -> String {
    match value {
        Some(id) => format!("'{}'", id),
        None => "NULL".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::differ::GraphDiff;
    use crate::model::items::{DataType, Module, ResourceType, ScalarProperty};
    use pretty_assertions::assert_eq;

    fn fixture() -> (ModelGraph, ModelGraph, ItemId, ItemId) {
        let mut module = Module::new("Core");
        let root = module.add_resource_type(ResourceType::new("Resource", module.id));
        let mut graph = ModelGraph::new();
        graph.add_module(module);

        let mut new = graph.clone();
        let module_id = *new.modules.keys().next().unwrap();
        let invoice = {
            let t = ResourceType::new("Invoice", module_id).derived_from(root);
            new.module_mut(module_id).unwrap().add_resource_type(t)
        };
        let property = ScalarProperty::new(
            "Total",
            DataType::Decimal { precision: 19, scale: 4 },
            invoice,
        );
        let property_id = property.id;
        new.resource_type_mut(invoice)
            .unwrap()
            .scalar_properties
            .insert(property_id, property);

        (graph, new, invoice, property_id)
    }

    #[test]
    fn batch_is_bracketed_by_uniqueness_constraints() {
        let (original, new, invoice, property_id) = fixture();
        let mut catalog = MappingCatalog::new();
        catalog.set_discriminator(invoice, 7);
        catalog.set_mapping(property_id, "resources", "total");

        let diff = GraphDiff::generate(&original, &new);
        let statements = DmlGenerator::new(&diff, &new, &catalog).generate().unwrap();

        let first = &statements.first().unwrap().sql;
        let last = &statements.last().unwrap().sql;
        assert!(first.contains("DROP CONSTRAINT IF EXISTS uq_catalog_modules_namespace"));
        assert!(last.contains("ADD CONSTRAINT uq_catalog_associations_name"));
    }

    #[test]
    fn upserts_run_type_before_property_and_carry_the_discriminator() {
        let (original, new, invoice, _) = fixture();
        let mut catalog = MappingCatalog::new();
        catalog.set_discriminator(invoice, 7);

        let diff = GraphDiff::generate(&original, &new);
        let statements = DmlGenerator::new(&diff, &new, &catalog).generate().unwrap();
        let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();

        let type_pos = sql
            .iter()
            .position(|s| s.contains("catalog_resource_types") && s.contains("'Invoice'"))
            .expect("resource type upsert");
        let property_pos = sql
            .iter()
            .position(|s| s.contains("catalog_scalar_properties") && s.contains("'Total'"))
            .expect("scalar property upsert");
        assert!(type_pos < property_pos);
        assert!(sql[type_pos].contains(", 7;") || sql[type_pos].contains(", 7)"));
    }

    #[test]
    fn recreated_identities_are_not_deleted() {
        let (original, new, invoice, _) = fixture();
        let catalog = MappingCatalog::new();
        let mut diff = GraphDiff::generate(&original, &new);
        // Simulate a recreate: same identity in both sets
        diff.resource_types.force_deleted(invoice);
        diff.resource_types.force_added(invoice);

        let statements = DmlGenerator::new(&diff, &new, &catalog).generate().unwrap();
        let delete = statements
            .iter()
            .find(|s| s.sql.starts_with("DELETE FROM catalog_resource_types"));
        assert!(delete.is_none());
    }

    #[test]
    fn empty_diff_produces_no_statements() {
        let (original, ..) = fixture();
        let catalog = MappingCatalog::new();
        let diff = GraphDiff::generate(&original, &original.clone());
        let statements = DmlGenerator::new(&diff, &original, &catalog)
            .generate()
            .unwrap();
        assert_eq!(statements.len(), 0);
    }

    #[test]
    fn side_effect_mapping_changes_get_a_corrective_update() {
        let (original, ..) = fixture();
        let mut catalog = MappingCatalog::new();
        // A navigation property untouched by the diff whose FK column the
        // DDL generator dropped
        let navigation = ItemId::new();
        catalog.map_navigation(navigation, "resources", "customer");
        catalog.unmap_navigation(navigation);

        // The corrective pass only reports navigations that still exist in
        // the new graph; wire one up artificially
        let mut new = original.clone();
        let module_id = *new.modules.keys().next().unwrap();
        let root = new.resource_type_by_name("Resource").unwrap().id;
        let mut property = crate::model::NavigationProperty::new(
            "Customer",
            crate::model::AssociationEnd::Subject,
            ItemId::new(),
            root,
        );
        property.id = navigation;
        new.module_mut(module_id)
            .unwrap()
            .resource_types
            .get_mut(&root)
            .unwrap()
            .navigation_properties
            .insert(navigation, property);

        let diff = GraphDiff::generate(&original, &original.clone());
        let statements = DmlGenerator::new(&diff, &new, &catalog).generate().unwrap();

        let corrective = statements
            .iter()
            .find(|s| s.sql.starts_with("UPDATE catalog_navigation_properties"))
            .expect("corrective update");
        assert!(corrective.sql.contains("table_name = NULL"));
        assert!(corrective.sql.contains(&navigation.to_string()));
    }
}
