//! model_sync: a schema synchronization engine for typed resource models
//!
//! model_sync maintains a versioned, strongly-typed object model (modules,
//! resource types, properties, associations) projected onto a relational
//! store. Given the deployed graph and an edited graph it computes the
//! minimal, dependency-ordered DDL and catalog statements that transform
//! the store from one to the other, without renaming physical objects and
//! without losing data.

pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod model;
pub mod script;
pub mod sort;
pub mod utils;

// Re-export main types for easier access
pub use config::Config;
pub use db::Database;
pub use diff::{ProtectedModules, SystemFlagProtection};
pub use error::{Error, Result};
pub use model::{
    Association, AssociationEnd, AssociationSpec, DataType, ItemId, MappingCatalog, ModelGraph,
    Module, Multiplicity, NavigationProperty, ResourceType, ScalarProperty,
};
pub use script::{Statement, StatementKind, SyncScript};

use diff::GraphDiff;
use script::{DdlGenerator, DmlGenerator};
use tracing::info;

/// Consumes the synchronized graph and the updated mapping catalog to
/// produce ORM-runtime metadata. Never invoked before synchronization
/// completes; implementations live outside this crate.
pub trait ArtifactGenerator {
    fn generate(&self, graph: &ModelGraph, catalog: &MappingCatalog) -> Result<()>;
}

/// Compute the synchronization script for a pair of graphs.
///
/// Pure: no I/O. Validates the new graph, diffs, adjusts, refuses
/// protected-module changes, and generates DDL then DML. Discriminators
/// and view names are assigned into `new` and the catalog as a side
/// effect; the caller gets both back along with the script.
pub fn synchronize(
    original: &ModelGraph,
    new: &mut ModelGraph,
    catalog: &mut MappingCatalog,
) -> Result<SyncScript> {
    synchronize_with(original, new, catalog, &SystemFlagProtection)
}

/// [`synchronize`] with an explicit protected-module registry
pub fn synchronize_with(
    original: &ModelGraph,
    new: &mut ModelGraph,
    catalog: &mut MappingCatalog,
    protection: &dyn ProtectedModules,
) -> Result<SyncScript> {
    model::validate(new)?;

    let mut diff = GraphDiff::generate(original, new);
    if diff.is_empty() {
        info!("model graphs are identical, nothing to synchronize");
        return Ok(SyncScript::new());
    }

    diff::adjust(&mut diff, original, new);
    diff::check_protected(&diff, original, new, protection)?;

    catalog.clear_touched_navigations();
    let mut script = SyncScript::new();
    script.extend(DdlGenerator::new(&diff, original, catalog).generate(new)?);
    script.extend(DmlGenerator::new(&diff, new, catalog).generate()?);

    info!(statements = script.len(), "synchronization script generated");
    Ok(script)
}

/// Initialize model_sync with the specified configuration file
pub async fn init(config_path: &str) -> Result<SyncEngine> {
    let config = config::load_from_file(config_path)?;
    utils::logging::init_logging(&config.logging)?;
    SyncEngine::connect(config).await
}

/// The main client for running synchronizations against a live store
pub struct SyncEngine {
    config: Config,
    database: Database,
}

impl SyncEngine {
    /// Create a new engine from configuration
    pub async fn connect(config: Config) -> Result<Self> {
        let database = Database::connect(&config.database).await?;
        Ok(Self { config, database })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Read the deployed graph and catalog in one snapshot transaction
    pub async fn read_backend(&self) -> Result<(ModelGraph, MappingCatalog)> {
        db::reader::read_backend(self.database.pool()).await
    }

    /// Complete workflow: read the backend snapshot, compute the script
    /// and apply it in one all-or-nothing transaction. Returns the script
    /// that was applied (or would be, under dry run).
    pub async fn sync_database(&self, new: &mut ModelGraph) -> Result<SyncScript> {
        let (original, mut catalog) = self.read_backend().await?;
        let script = synchronize(&original, new, &mut catalog)?;

        if script.is_empty() {
            info!("store is already in sync with the model");
            return Ok(script);
        }

        db::apply::apply_script(self.database.pool(), &script, &self.config.sync).await?;
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Module, ResourceType};

    #[test]
    fn identical_graphs_yield_an_empty_script() {
        let mut module = Module::new("Core");
        module.add_resource_type(ResourceType::new("Resource", module.id));
        let mut graph = ModelGraph::new();
        graph.add_module(module);

        let original = graph.clone();
        let mut catalog = MappingCatalog::new();
        let script = synchronize(&original, &mut graph, &mut catalog).unwrap();
        assert!(script.is_empty());
    }

    #[test]
    fn validation_runs_before_any_generation() {
        let mut module = Module::new("Core");
        module.add_resource_type(ResourceType::new("Bad Name", module.id));
        let mut graph = ModelGraph::new();
        graph.add_module(module);

        let original = ModelGraph::new();
        let mut catalog = MappingCatalog::new();
        let err = synchronize(&original, &mut graph, &mut catalog).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn protected_modules_abort_the_run() {
        let original = ModelGraph::new();
        let mut graph = ModelGraph::new();
        let mut module = Module::new("System_Library").system();
        module.add_resource_type(ResourceType::new("Resource", module.id));
        graph.add_module(module);

        let mut catalog = MappingCatalog::new();
        let err = synchronize(&original, &mut graph, &mut catalog).unwrap_err();
        assert!(matches!(err, Error::ProtectedItem { .. }));
    }
}
