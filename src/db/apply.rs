//! Script execution
//!
//! Writes the generated script to disk, executes it inside one
//! all-or-nothing transaction and records the run in the history table.
//! Any statement failure rolls back every change made so far, leaving the
//! store exactly as it was.

use std::fs;
use std::path::Path;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::script::{
    SyncScript, CATALOG_ASSOCIATIONS, CATALOG_MODULES, CATALOG_NAVIGATION_PROPERTIES,
    CATALOG_RESOURCE_TYPES, CATALOG_SCALAR_PROPERTIES, ENTITY_TABLE, RELATIONSHIP_TABLE,
};

/// Apply a synchronization script to the database
pub async fn apply_script(pool: &PgPool, script: &SyncScript, config: &SyncConfig) -> Result<()> {
    fs::create_dir_all(&config.script_directory)?;

    let script_id = generate_script_id();
    let filename = format!("{}_model_sync.sql", script_id);
    let filepath = Path::new(&config.script_directory).join(&filename);
    let sql_text = script.to_sql();
    fs::write(&filepath, &sql_text)?;

    if config.dry_run {
        for (i, statement) in script.iter().enumerate() {
            info!(statement_number = i + 1, sql = %statement.sql, "Sync statement (dry run)");
        }
        return Ok(());
    }

    ensure_base_schema(pool).await?;
    ensure_history_table(pool, &config.history_table).await?;

    let mut tx = pool.begin().await?;
    for statement in script.iter() {
        if let Err(e) = sqlx::query(&statement.sql).execute(&mut *tx).await {
            error!(sql = %statement.sql, "Statement failed, rolling back");
            let _ = tx.rollback().await;
            return Err(e.into());
        }
    }
    tx.commit().await?;

    let checksum = format!("{:x}", md5::compute(sql_text.as_bytes()));
    record_script(pool, &config.history_table, &script_id, &filename, &checksum, script.len())
        .await?;

    info!(script_id = %script_id, statements = script.len(), "Synchronization script applied");
    Ok(())
}

/// Ensure the fixed physical skeleton exists: the shared entity and
/// relationship tables plus the catalog tables
pub async fn ensure_base_schema(pool: &PgPool) -> Result<()> {
    let statements = [
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id uuid PRIMARY KEY,
                discriminator integer NOT NULL
            )",
            ENTITY_TABLE
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{}_discriminator ON {} (discriminator)",
            ENTITY_TABLE, ENTITY_TABLE
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                subject_id uuid NOT NULL REFERENCES {}(id),
                object_id uuid NOT NULL REFERENCES {}(id),
                predicate_id uuid NOT NULL
            )",
            RELATIONSHIP_TABLE, ENTITY_TABLE, ENTITY_TABLE
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{}_predicate ON {} (predicate_id)",
            RELATIONSHIP_TABLE, RELATIONSHIP_TABLE
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id uuid PRIMARY KEY,
                namespace varchar(256) NOT NULL,
                uri varchar(512) NULL,
                description varchar(4000) NULL,
                is_system boolean NOT NULL DEFAULT FALSE,
                CONSTRAINT uq_catalog_modules_namespace UNIQUE (namespace)
            )",
            CATALOG_MODULES
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id uuid PRIMARY KEY,
                module_id uuid NOT NULL REFERENCES {}(id),
                name varchar(256) NOT NULL,
                description varchar(4000) NULL,
                base_id uuid NULL,
                discriminator integer NULL,
                CONSTRAINT uq_catalog_resource_types_name UNIQUE (name)
            )",
            CATALOG_RESOURCE_TYPES, CATALOG_MODULES
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id uuid PRIMARY KEY,
                owner_id uuid NOT NULL REFERENCES {}(id),
                name varchar(256) NOT NULL,
                data_type varchar(64) NOT NULL,
                nullable boolean NOT NULL,
                table_name varchar(256) NULL,
                column_name varchar(256) NULL,
                CONSTRAINT uq_catalog_scalar_properties_owner_name UNIQUE (owner_id, name)
            )",
            CATALOG_SCALAR_PROPERTIES, CATALOG_RESOURCE_TYPES
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id uuid PRIMARY KEY,
                owner_id uuid NOT NULL REFERENCES {}(id),
                name varchar(256) NOT NULL,
                end_role varchar(16) NOT NULL,
                association_id uuid NOT NULL,
                table_name varchar(256) NULL,
                column_name varchar(256) NULL,
                CONSTRAINT uq_catalog_navigation_properties_owner_name UNIQUE (owner_id, name)
            )",
            CATALOG_NAVIGATION_PROPERTIES, CATALOG_RESOURCE_TYPES
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id uuid PRIMARY KEY,
                module_id uuid NOT NULL REFERENCES {}(id),
                name varchar(256) NOT NULL,
                description varchar(4000) NULL,
                predicate_id uuid NOT NULL,
                subject_id uuid NOT NULL,
                object_id uuid NOT NULL,
                subject_multiplicity varchar(16) NOT NULL,
                object_multiplicity varchar(16) NOT NULL,
                view_name varchar(128) NULL,
                CONSTRAINT uq_catalog_associations_name UNIQUE (module_id, name)
            )",
            CATALOG_ASSOCIATIONS, CATALOG_MODULES
        ),
    ];

    for sql in &statements {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

/// Ensure the history table exists
async fn ensure_history_table(pool: &PgPool, table_name: &str) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id SERIAL PRIMARY KEY,
            script_id VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
            checksum VARCHAR(64) NULL,
            statement_count INTEGER NULL
        )",
        table_name
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

/// Record an applied script in the history table
async fn record_script(
    pool: &PgPool,
    table_name: &str,
    script_id: &str,
    filename: &str,
    checksum: &str,
    statement_count: usize,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (script_id, name, checksum, statement_count) VALUES ($1, $2, $3, $4)",
        table_name
    );
    sqlx::query(&sql)
        .bind(script_id)
        .bind(filename)
        .bind(checksum)
        .bind(statement_count as i32)
        .execute(pool)
        .await?;
    Ok(())
}

/// Generate a script ID based on timestamp
fn generate_script_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}
