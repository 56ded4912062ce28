//! Snapshot backend read
//!
//! Reconstructs the deployed model graph and its mapping catalog from the
//! catalog tables, together with the relationship-row counts per
//! predicate. Everything is read inside one `REPEATABLE READ` transaction
//! so the metadata is never newer than the mappings or vice versa.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::catalog::MappingCatalog;
use crate::model::graph::ModelGraph;
use crate::model::items::{
    Association, ItemId, Module, NavigationProperty, ResourceType, ScalarProperty,
};
use crate::script::{
    CATALOG_ASSOCIATIONS, CATALOG_MODULES, CATALOG_NAVIGATION_PROPERTIES,
    CATALOG_RESOURCE_TYPES, CATALOG_SCALAR_PROPERTIES, RELATIONSHIP_TABLE,
};

/// Read the deployed graph and catalog in one snapshot
pub async fn read_backend(pool: &PgPool) -> Result<(ModelGraph, MappingCatalog)> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    let mut graph = ModelGraph::new();
    let mut catalog = MappingCatalog::new();

    let rows = sqlx::query(&format!(
        "SELECT id, namespace, uri, description, is_system FROM {} ORDER BY namespace",
        CATALOG_MODULES
    ))
    .fetch_all(&mut *tx)
    .await?;
    for row in rows {
        let namespace: String = row.try_get("namespace")?;
        let mut module = Module::new(&namespace);
        module.id = ItemId::from(row.try_get::<Uuid, _>("id")?);
        module.uri = row.try_get("uri")?;
        module.description = row.try_get("description")?;
        module.system = row.try_get("is_system")?;
        graph.modules.insert(module.id, module);
    }

    let rows = sqlx::query(&format!(
        "SELECT id, module_id, name, description, base_id, discriminator FROM {} ORDER BY discriminator",
        CATALOG_RESOURCE_TYPES
    ))
    .fetch_all(&mut *tx)
    .await?;
    for row in rows {
        let module_id = ItemId::from(row.try_get::<Uuid, _>("module_id")?);
        let name: String = row.try_get("name")?;
        let mut resource_type = ResourceType::new(&name, module_id);
        resource_type.id = ItemId::from(row.try_get::<Uuid, _>("id")?);
        resource_type.description = row.try_get("description")?;
        resource_type.base = row
            .try_get::<Option<Uuid>, _>("base_id")?
            .map(ItemId::from);
        resource_type.discriminator = row.try_get("discriminator")?;
        if let Some(discriminator) = resource_type.discriminator {
            catalog.set_discriminator(resource_type.id, discriminator);
        }
        let module = graph.modules.get_mut(&module_id).ok_or_else(|| {
            Error::Validation(format!(
                "catalog resource type '{}' references unknown module {}",
                name, module_id
            ))
        })?;
        module
            .resource_types
            .insert(resource_type.id, resource_type);
    }

    let rows = sqlx::query(&format!(
        "SELECT id, owner_id, name, data_type, nullable, table_name, column_name FROM {} ORDER BY name",
        CATALOG_SCALAR_PROPERTIES
    ))
    .fetch_all(&mut *tx)
    .await?;
    for row in rows {
        let owner = ItemId::from(row.try_get::<Uuid, _>("owner_id")?);
        let name: String = row.try_get("name")?;
        let data_type = row
            .try_get::<String, _>("data_type")?
            .parse()
            .map_err(Error::Validation)?;
        let mut property = ScalarProperty::new(&name, data_type, owner);
        property.id = ItemId::from(row.try_get::<Uuid, _>("id")?);
        property.nullable = row.try_get("nullable")?;
        record_mapping(&mut catalog, property.id, &row)?;
        let resource_type = graph.resource_type_mut(owner).ok_or_else(|| {
            Error::Validation(format!(
                "catalog scalar property '{}' references unknown owner {}",
                name, owner
            ))
        })?;
        resource_type.scalar_properties.insert(property.id, property);
    }

    let rows = sqlx::query(&format!(
        "SELECT id, owner_id, name, end_role, association_id, table_name, column_name FROM {} ORDER BY name",
        CATALOG_NAVIGATION_PROPERTIES
    ))
    .fetch_all(&mut *tx)
    .await?;
    for row in rows {
        let owner = ItemId::from(row.try_get::<Uuid, _>("owner_id")?);
        let name: String = row.try_get("name")?;
        let end = row
            .try_get::<String, _>("end_role")?
            .parse()
            .map_err(Error::Validation)?;
        let association = ItemId::from(row.try_get::<Uuid, _>("association_id")?);
        let mut property = NavigationProperty::new(&name, end, association, owner);
        property.id = ItemId::from(row.try_get::<Uuid, _>("id")?);
        record_mapping(&mut catalog, property.id, &row)?;
        let resource_type = graph.resource_type_mut(owner).ok_or_else(|| {
            Error::Validation(format!(
                "catalog navigation property '{}' references unknown owner {}",
                name, owner
            ))
        })?;
        resource_type
            .navigation_properties
            .insert(property.id, property);
    }

    let rows = sqlx::query(&format!(
        "SELECT id, module_id, name, description, predicate_id, subject_id, object_id, \
         subject_multiplicity, object_multiplicity, view_name FROM {} ORDER BY name",
        CATALOG_ASSOCIATIONS
    ))
    .fetch_all(&mut *tx)
    .await?;
    for row in rows {
        let module_id = ItemId::from(row.try_get::<Uuid, _>("module_id")?);
        let name: String = row.try_get("name")?;
        let association = Association {
            id: ItemId::from(row.try_get::<Uuid, _>("id")?),
            name: name.clone(),
            description: row.try_get("description")?,
            predicate: ItemId::from(row.try_get::<Uuid, _>("predicate_id")?),
            subject: ItemId::from(row.try_get::<Uuid, _>("subject_id")?),
            object: ItemId::from(row.try_get::<Uuid, _>("object_id")?),
            subject_multiplicity: row
                .try_get::<String, _>("subject_multiplicity")?
                .parse()
                .map_err(Error::Validation)?,
            object_multiplicity: row
                .try_get::<String, _>("object_multiplicity")?
                .parse()
                .map_err(Error::Validation)?,
            view_name: row.try_get("view_name")?,
            module: module_id,
        };
        let module = graph.modules.get_mut(&module_id).ok_or_else(|| {
            Error::Validation(format!(
                "catalog association '{}' references unknown module {}",
                name, module_id
            ))
        })?;
        module.associations.insert(association.id, association);
    }

    let rows = sqlx::query(&format!(
        "SELECT predicate_id, COUNT(*) AS row_count FROM {} GROUP BY predicate_id",
        RELATIONSHIP_TABLE
    ))
    .fetch_all(&mut *tx)
    .await?;
    for row in rows {
        let predicate = ItemId::from(row.try_get::<Uuid, _>("predicate_id")?);
        let count: i64 = row.try_get("row_count")?;
        catalog.set_relationship_rows(predicate, count.max(0) as u64);
    }

    tx.commit().await?;
    Ok((graph, catalog))
}

fn record_mapping(
    catalog: &mut MappingCatalog,
    property: ItemId,
    row: &sqlx::postgres::PgRow,
) -> Result<()> {
    let table: Option<String> = row.try_get("table_name")?;
    let column: Option<String> = row.try_get("column_name")?;
    if let (Some(table), Some(column)) = (table, column) {
        catalog.set_mapping(property, &table, &column);
    }
    Ok(())
}
