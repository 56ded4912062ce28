//! Utilities for model_sync
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod naming;

// Re-export key utility functions
pub use naming::{
    association_base, column_name, index_name, is_valid_identifier, procedure_name,
    sanitize_identifier, truncate_identifier, view_name, view_procedure_name,
};
