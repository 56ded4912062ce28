//! Diff module for model_sync
//!
//! Produces the itemized change sets between two model graphs and
//! normalizes them so structurally-incompatible updates become coordinated
//! delete+add pairs.

pub mod adjust;
pub mod differ;

// Re-export key types
pub use adjust::{adjust, check_protected, ProtectedModules, SystemFlagProtection};
pub use differ::{ChangeSet, GraphDiff};
