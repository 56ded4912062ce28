//! Model graph validation
//!
//! Runs every structural and business-rule check on a candidate graph
//! before any synchronization is attempted. Checks run in a fixed order
//! and the first violation aborts; no partial validation state is kept.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::error::{Error, Result};
use crate::model::graph::ModelGraph;
use crate::model::items::{
    AssociationEnd, DataType, ItemId, Multiplicity, MAX_DESCRIPTION_LEN, MAX_NAME_LEN,
    MAX_TYPE_PROPERTIES, MAX_URI_LEN,
};
use crate::sort;
use crate::utils::naming::is_valid_identifier;

/// Validate a model graph. Returns the first violation found.
pub fn validate(graph: &ModelGraph) -> Result<()> {
    check_duplicate_type_names(graph)?;
    check_identity_uniqueness(graph)?;
    check_reverse_paths(graph)?;
    check_acyclicity(graph)?;
    check_structural_rules(graph)?;
    check_identifier_syntax(graph)?;
    Ok(())
}

/// (a) Resource-type names are unique across all modules
fn check_duplicate_type_names(graph: &ModelGraph) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for module in graph.modules.values() {
        for resource_type in module.resource_types.values() {
            if let Some(previous) = seen.insert(&resource_type.name, &module.namespace) {
                return Err(Error::Validation(format!(
                    "duplicate resource type name '{}' in modules '{}' and '{}'",
                    resource_type.name, previous, module.namespace
                )));
            }
        }
    }
    Ok(())
}

/// (b) Every reachable item identity is unique. An association is reached
/// a second time through each navigation end; that is legal only when the
/// reference resolves to the same owned instance.
fn check_identity_uniqueness(graph: &ModelGraph) -> Result<()> {
    let mut ids: IndexSet<ItemId> = IndexSet::new();
    let mut claim = |id: ItemId, what: &str| -> Result<()> {
        if !ids.insert(id) {
            return Err(Error::Validation(format!(
                "identity {} is claimed by more than one item ({})",
                id, what
            )));
        }
        Ok(())
    };

    for module in graph.modules.values() {
        claim(module.id, "module")?;
        for resource_type in module.resource_types.values() {
            claim(resource_type.id, "resource type")?;
            for property in resource_type.scalar_properties.values() {
                claim(property.id, "scalar property")?;
            }
            for property in resource_type.navigation_properties.values() {
                claim(property.id, "navigation property")?;
            }
        }
        for association in module.associations.values() {
            claim(association.id, "association")?;
        }
    }

    // The double-reach exception: both navigation ends must resolve to an
    // association instance the graph actually owns.
    for resource_type in graph.resource_types() {
        for property in resource_type.navigation_properties.values() {
            if graph.association(property.association).is_none() {
                return Err(Error::Validation(format!(
                    "navigation property '{}' references unknown association {}",
                    property.name, property.association
                )));
            }
        }
    }

    // Predicate identities are never shared across associations
    let mut predicates: IndexSet<ItemId> = IndexSet::new();
    for association in graph.associations() {
        if !predicates.insert(association.predicate) {
            return Err(Error::Validation(format!(
                "predicate {} is shared by more than one association",
                association.predicate
            )));
        }
    }

    Ok(())
}

/// (c) Every item's recorded parent back-reference equals the collection
/// it was found in. Rejects sharing an item across two parents.
fn check_reverse_paths(graph: &ModelGraph) -> Result<()> {
    for (module_id, module) in &graph.modules {
        if module.id != *module_id {
            return Err(Error::Validation(format!(
                "module '{}' is keyed under a foreign identity",
                module.namespace
            )));
        }
        for resource_type in module.resource_types.values() {
            if resource_type.module != module.id {
                return Err(Error::Validation(format!(
                    "resource type '{}' records module {} but was found in '{}'",
                    resource_type.name, resource_type.module, module.namespace
                )));
            }
            for property in resource_type.scalar_properties.values() {
                if property.owner != resource_type.id {
                    return Err(Error::Validation(format!(
                        "scalar property '{}' records owner {} but was found in '{}'",
                        property.name, property.owner, resource_type.name
                    )));
                }
            }
            for property in resource_type.navigation_properties.values() {
                if property.owner != resource_type.id {
                    return Err(Error::Validation(format!(
                        "navigation property '{}' records owner {} but was found in '{}'",
                        property.name, property.owner, resource_type.name
                    )));
                }
            }
        }
        for association in module.associations.values() {
            if association.module != module.id {
                return Err(Error::Validation(format!(
                    "association '{}' records module {} but was found in '{}'",
                    association.name, association.module, module.namespace
                )));
            }
        }
    }
    Ok(())
}

/// (d) Module dependency graph and every module's inheritance hierarchy
/// are acyclic. Delegates to the topological sorter.
fn check_acyclicity(graph: &ModelGraph) -> Result<()> {
    sort::module_order(graph)?;
    for module in graph.modules.values() {
        sort::hierarchy_order(module)?;
    }
    Ok(())
}

/// (e) Per-item structural rules
fn check_structural_rules(graph: &ModelGraph) -> Result<()> {
    let mut roots = 0usize;

    for module in graph.modules.values() {
        check_len("module namespace", &module.namespace, MAX_NAME_LEN)?;
        if let Some(uri) = &module.uri {
            check_len("module uri", uri, MAX_URI_LEN)?;
        }
        if let Some(description) = &module.description {
            check_len("module description", description, MAX_DESCRIPTION_LEN)?;
        }
    }

    for resource_type in graph.resource_types() {
        check_len("resource type name", &resource_type.name, MAX_NAME_LEN)?;
        if let Some(description) = &resource_type.description {
            check_len("resource type description", description, MAX_DESCRIPTION_LEN)?;
        }
        match resource_type.base {
            None => roots += 1,
            Some(base) => {
                if graph.resource_type(base).is_none() {
                    return Err(Error::Validation(format!(
                        "resource type '{}' references unknown base type {}",
                        resource_type.name, base
                    )));
                }
            }
        }

        let flattened = graph.flattened_property_count(resource_type.id);
        if flattened > MAX_TYPE_PROPERTIES {
            return Err(Error::Validation(format!(
                "resource type '{}' has {} flattened properties (limit {})",
                resource_type.name, flattened, MAX_TYPE_PROPERTIES
            )));
        }

        let mut property_names: IndexSet<&str> = IndexSet::new();
        for property in graph.flattened_scalar_properties(resource_type.id) {
            if !property_names.insert(&property.name) {
                return Err(Error::Validation(format!(
                    "resource type '{}' has duplicate property name '{}' in its flattened set",
                    resource_type.name, property.name
                )));
            }
        }
        for property in graph.flattened_navigation_properties(resource_type.id) {
            if !property_names.insert(&property.name) {
                return Err(Error::Validation(format!(
                    "resource type '{}' has duplicate property name '{}' in its flattened set",
                    resource_type.name, property.name
                )));
            }
        }
    }

    if roots > 1 {
        return Err(Error::Validation(format!(
            "{} resource types have no base type; exactly one root is allowed",
            roots
        )));
    }

    for resource_type in graph.resource_types() {
        for property in resource_type.scalar_properties.values() {
            check_len("scalar property name", &property.name, MAX_NAME_LEN)?;
            match property.data_type {
                DataType::String { max_len } | DataType::Binary { max_len } if max_len == 0 => {
                    return Err(Error::Validation(format!(
                        "scalar property '{}' has a zero length facet",
                        property.name
                    )));
                }
                DataType::Decimal { precision, scale } if scale > precision || precision == 0 => {
                    return Err(Error::Validation(format!(
                        "scalar property '{}' has invalid decimal facets ({},{})",
                        property.name, precision, scale
                    )));
                }
                _ => {}
            }
        }
    }

    for module in graph.modules.values() {
        for association in module.associations.values() {
            check_len("association name", &association.name, MAX_NAME_LEN)?;
            if let Some(description) = &association.description {
                check_len("association description", description, MAX_DESCRIPTION_LEN)?;
            }

            if association.subject_multiplicity == Multiplicity::One
                && association.object_multiplicity == Multiplicity::One
            {
                return Err(Error::UnsupportedConfiguration(format!(
                    "association '{}': one-to-one multiplicity is not supported",
                    association.name
                )));
            }
            if association.subject == association.object {
                return Err(Error::Validation(format!(
                    "association '{}' uses the same navigation property for both ends",
                    association.name
                )));
            }

            for end in [AssociationEnd::Subject, AssociationEnd::Object] {
                let nav_id = association.navigation(end);
                let property = graph.navigation_property(nav_id).ok_or_else(|| {
                    Error::Validation(format!(
                        "association '{}' references unknown navigation property {}",
                        association.name, nav_id
                    ))
                })?;
                check_len("navigation property name", &property.name, MAX_NAME_LEN)?;
                if property.end != end {
                    return Err(Error::Validation(format!(
                        "navigation property '{}' records the {} end but fills the {} slot of '{}'",
                        property.name, property.end, end, association.name
                    )));
                }
                if property.association != association.id {
                    return Err(Error::Validation(format!(
                        "navigation property '{}' does not point back to association '{}'",
                        property.name, association.name
                    )));
                }
                let owner = graph.resource_type(property.owner).ok_or_else(|| {
                    Error::Validation(format!(
                        "navigation property '{}' has unknown owner {}",
                        property.name, property.owner
                    ))
                })?;
                if owner.module != association.module {
                    return Err(Error::Validation(format!(
                        "association '{}' and the owner of '{}' live in different modules",
                        association.name, property.name
                    )));
                }
            }
        }
    }

    Ok(())
}

/// (f) Identifier-syntax validity for every user-facing name. Module
/// namespaces are dotted; each segment must be a valid identifier.
fn check_identifier_syntax(graph: &ModelGraph) -> Result<()> {
    for module in graph.modules.values() {
        if module.namespace.is_empty()
            || !module.namespace.split('.').all(is_valid_identifier)
        {
            return Err(Error::Validation(format!(
                "module namespace '{}' is not a valid dotted identifier",
                module.namespace
            )));
        }
    }
    for resource_type in graph.resource_types() {
        if !is_valid_identifier(&resource_type.name) {
            return Err(Error::Validation(format!(
                "resource type name '{}' is not a valid identifier",
                resource_type.name
            )));
        }
        for property in resource_type.scalar_properties.values() {
            if !is_valid_identifier(&property.name) {
                return Err(Error::Validation(format!(
                    "scalar property name '{}' is not a valid identifier",
                    property.name
                )));
            }
        }
        for property in resource_type.navigation_properties.values() {
            if !is_valid_identifier(&property.name) {
                return Err(Error::Validation(format!(
                    "navigation property name '{}' is not a valid identifier",
                    property.name
                )));
            }
        }
    }
    for association in graph.associations() {
        if !is_valid_identifier(&association.name) {
            return Err(Error::Validation(format!(
                "association name '{}' is not a valid identifier",
                association.name
            )));
        }
    }
    Ok(())
}

fn check_len(what: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        let prefix: String = value.chars().take(32).collect();
        return Err(Error::Validation(format!(
            "{} exceeds {} characters: '{}…'",
            what, max, prefix
        )));
    }
    Ok(())
}
