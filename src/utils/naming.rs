//! Naming utilities for model_sync
//!
//! Identifier syntax validation and derivation of physical names. Physical
//! names are derived once, when an object is first created, and are never
//! renamed afterwards; model-item renames touch catalog metadata only.

use inflector::Inflector;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::ItemId;

/// Longest physical identifier we emit (PostgreSQL truncates at 63 bytes).
pub const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Whether a user-facing name is a syntactically valid identifier
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Replace characters that are not valid in an identifier
pub fn sanitize_identifier(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if sanitized
        .chars()
        .next()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(true)
    {
        sanitized.insert(0, '_');
    }

    sanitized
}

/// Truncate an identifier to a maximum length
pub fn truncate_identifier(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    name.chars().take(max_len).collect()
}

/// Derive a column name from a property name
pub fn column_name(property_name: &str) -> String {
    truncate_identifier(
        &sanitize_identifier(&property_name.to_snake_case()),
        MAX_IDENTIFIER_LEN,
    )
}

/// Base physical name of an association. The predicate suffix keeps
/// derived names unique even when association names collide across
/// modules.
pub fn association_base(association_name: &str, predicate: ItemId) -> String {
    let base = sanitize_identifier(&association_name.to_snake_case());
    let suffix = predicate.short();
    // Leave room for the longest prefix ("ux_"), "_" and the suffix
    let base = truncate_identifier(&base, MAX_IDENTIFIER_LEN - suffix.len() - 11);
    format!("{}_{}", base, suffix)
}

/// Derive a view name for an association
pub fn view_name(association_name: &str, predicate: ItemId) -> String {
    format!("v_{}", association_base(association_name, predicate))
}

/// Unique index name backing an association view
pub fn index_name(view_name: &str) -> String {
    let base = view_name.strip_prefix("v_").unwrap_or(view_name);
    truncate_identifier(&format!("ux_{}", base), MAX_IDENTIFIER_LEN)
}

/// Insert/delete procedure name for an association view
pub fn view_procedure_name(view_name: &str, operation: &str) -> String {
    let base = view_name.strip_prefix("v_").unwrap_or(view_name);
    truncate_identifier(&format!("p_{}_{}", base, operation), MAX_IDENTIFIER_LEN)
}

/// Procedure name for a resource type operation (`insert`, `update`,
/// `delete`) or an association view operation
pub fn procedure_name(owner_name: &str, operation: &str) -> String {
    let base = sanitize_identifier(&owner_name.to_snake_case());
    let base = truncate_identifier(&base, MAX_IDENTIFIER_LEN - operation.len() - 3);
    format!("p_{}_{}", base, operation)
}
