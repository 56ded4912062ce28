//! The in-memory model graph
//!
//! A graph owns its modules; modules own resource types and associations;
//! resource types own properties. Cross-references (base types, association
//! ends) are identities resolved through the graph, never shared pointers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::items::{
    Association, AssociationEnd, ItemId, Module, Multiplicity, NavigationProperty, ResourceType,
    ScalarProperty,
};

/// Everything needed to wire a new association between two resource types
#[derive(Debug, Clone)]
pub struct AssociationSpec<'a> {
    pub name: &'a str,
    pub subject_type: ItemId,
    pub subject_navigation: &'a str,
    pub subject_multiplicity: Multiplicity,
    pub object_type: ItemId,
    pub object_navigation: &'a str,
    pub object_multiplicity: Multiplicity,
}

/// A complete model graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelGraph {
    pub modules: IndexMap<ItemId, Module>,
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the graph
    pub fn add_module(&mut self, module: Module) -> ItemId {
        let id = module.id;
        self.modules.insert(id, module);
        id
    }

    pub fn module(&self, id: ItemId) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn module_mut(&mut self, id: ItemId) -> Option<&mut Module> {
        self.modules.get_mut(&id)
    }

    pub fn resource_type(&self, id: ItemId) -> Option<&ResourceType> {
        self.modules
            .values()
            .find_map(|m| m.resource_types.get(&id))
    }

    pub fn resource_type_mut(&mut self, id: ItemId) -> Option<&mut ResourceType> {
        self.modules
            .values_mut()
            .find_map(|m| m.resource_types.get_mut(&id))
    }

    pub fn association(&self, id: ItemId) -> Option<&Association> {
        self.modules.values().find_map(|m| m.associations.get(&id))
    }

    pub fn association_mut(&mut self, id: ItemId) -> Option<&mut Association> {
        self.modules
            .values_mut()
            .find_map(|m| m.associations.get_mut(&id))
    }

    pub fn scalar_property(&self, id: ItemId) -> Option<&ScalarProperty> {
        self.resource_types()
            .find_map(|t| t.scalar_properties.get(&id))
    }

    pub fn navigation_property(&self, id: ItemId) -> Option<&NavigationProperty> {
        self.resource_types()
            .find_map(|t| t.navigation_properties.get(&id))
    }

    /// Iterate every resource type in module insertion order
    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.modules.values().flat_map(|m| m.resource_types.values())
    }

    /// Iterate every association in module insertion order
    pub fn associations(&self) -> impl Iterator<Item = &Association> {
        self.modules.values().flat_map(|m| m.associations.values())
    }

    /// Find a resource type by name anywhere in the graph
    pub fn resource_type_by_name(&self, name: &str) -> Option<&ResourceType> {
        self.resource_types().find(|t| t.name == name)
    }

    /// Walk the base chain from `id` up to the root, self first.
    ///
    /// Stops if a base reference does not resolve or revisits a type; the
    /// validator rejects such graphs before the engine relies on this.
    pub fn base_chain(&self, id: ItemId) -> Vec<&ResourceType> {
        let mut chain = Vec::new();
        let mut seen = indexmap::IndexSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                break;
            }
            match self.resource_type(current) {
                Some(t) => {
                    cursor = t.base;
                    chain.push(t);
                }
                None => break,
            }
        }
        chain
    }

    /// Flattened scalar properties of a type: inherited first (root
    /// outwards), then own, in declaration order.
    pub fn flattened_scalar_properties(&self, id: ItemId) -> Vec<&ScalarProperty> {
        let mut chain = self.base_chain(id);
        chain.reverse();
        chain
            .iter()
            .flat_map(|t| t.scalar_properties.values())
            .collect()
    }

    /// Flattened navigation properties, same ordering as scalars
    pub fn flattened_navigation_properties(&self, id: ItemId) -> Vec<&NavigationProperty> {
        let mut chain = self.base_chain(id);
        chain.reverse();
        chain
            .iter()
            .flat_map(|t| t.navigation_properties.values())
            .collect()
    }

    /// Total flattened property count (scalar + navigation)
    pub fn flattened_property_count(&self, id: ItemId) -> usize {
        self.flattened_scalar_properties(id).len()
            + self.flattened_navigation_properties(id).len()
    }

    /// All types that transitively derive from `id`
    pub fn derived_types(&self, id: ItemId) -> Vec<ItemId> {
        let mut derived = Vec::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for t in self.resource_types() {
                if t.base == Some(current) && !derived.contains(&t.id) {
                    derived.push(t.id);
                    frontier.push(t.id);
                }
            }
        }
        derived
    }

    /// Create an association in `module_id`, wiring a navigation property
    /// onto each participating type. Both types must live in the same
    /// module as the association.
    pub fn add_association(&mut self, module_id: ItemId, spec: AssociationSpec) -> Result<ItemId> {
        if spec.subject_multiplicity == Multiplicity::One
            && spec.object_multiplicity == Multiplicity::One
        {
            return Err(Error::UnsupportedConfiguration(format!(
                "association '{}': one-to-one multiplicity is not supported",
                spec.name
            )));
        }

        let module = self
            .modules
            .get(&module_id)
            .ok_or_else(|| Error::Validation(format!("unknown module: {}", module_id)))?;
        for end_type in [spec.subject_type, spec.object_type] {
            if !module.resource_types.contains_key(&end_type) {
                return Err(Error::Validation(format!(
                    "association '{}': type {} is not owned by module '{}'",
                    spec.name, end_type, module.namespace
                )));
            }
        }

        let association_id = ItemId::new();
        let subject_nav = NavigationProperty::new(
            spec.subject_navigation,
            AssociationEnd::Subject,
            association_id,
            spec.subject_type,
        );
        let object_nav = NavigationProperty::new(
            spec.object_navigation,
            AssociationEnd::Object,
            association_id,
            spec.object_type,
        );
        let association = Association {
            id: association_id,
            name: spec.name.to_string(),
            description: None,
            predicate: ItemId::new(),
            subject: subject_nav.id,
            object: object_nav.id,
            subject_multiplicity: spec.subject_multiplicity,
            object_multiplicity: spec.object_multiplicity,
            view_name: None,
            module: module_id,
        };

        let module = self.modules.get_mut(&module_id).expect("checked above");
        module
            .resource_types
            .get_mut(&spec.subject_type)
            .expect("checked above")
            .navigation_properties
            .insert(subject_nav.id, subject_nav);
        module
            .resource_types
            .get_mut(&spec.object_type)
            .expect("checked above")
            .navigation_properties
            .insert(object_nav.id, object_nav);
        module.associations.insert(association_id, association);

        Ok(association_id)
    }

    /// Remove an association and both of its navigation properties.
    /// Physical retirement of any foreign-key column is the engine's job
    /// during the next synchronization.
    pub fn remove_association(&mut self, id: ItemId) -> Result<()> {
        let (module_id, subject, object) = {
            let association = self
                .association(id)
                .ok_or_else(|| Error::Validation(format!("unknown association: {}", id)))?;
            (association.module, association.subject, association.object)
        };

        let module = self
            .modules
            .get_mut(&module_id)
            .ok_or_else(|| Error::Validation(format!("unknown module: {}", module_id)))?;
        for t in module.resource_types.values_mut() {
            t.navigation_properties.shift_remove(&subject);
            t.navigation_properties.shift_remove(&object);
        }
        module.associations.shift_remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::items::DataType;
    use pretty_assertions::assert_eq;

    fn graph_with_chain() -> (ModelGraph, ItemId, ItemId, ItemId) {
        let mut module = Module::new("System.Library");
        let root = module.add_resource_type(ResourceType::new("Resource", module.id));
        let mid = {
            let t = ResourceType::new("Document", module.id).derived_from(root);
            module.add_resource_type(t)
        };
        let leaf = {
            let t = ResourceType::new("Invoice", module.id).derived_from(mid);
            module.add_resource_type(t)
        };

        module
            .resource_types
            .get_mut(&root)
            .unwrap()
            .add_scalar_property(ScalarProperty::new("Id", DataType::Guid, root));
        module
            .resource_types
            .get_mut(&mid)
            .unwrap()
            .add_scalar_property(ScalarProperty::new(
                "Title",
                DataType::String { max_len: 256 },
                mid,
            ));
        module
            .resource_types
            .get_mut(&leaf)
            .unwrap()
            .add_scalar_property(ScalarProperty::new(
                "Total",
                DataType::Decimal { precision: 19, scale: 4 },
                leaf,
            ));

        let mut graph = ModelGraph::new();
        graph.add_module(module);
        (graph, root, mid, leaf)
    }

    #[test]
    fn flattened_properties_walk_the_base_chain_root_first() {
        let (graph, _, _, leaf) = graph_with_chain();

        let names: Vec<&str> = graph
            .flattened_scalar_properties(leaf)
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Id", "Title", "Total"]);
    }

    #[test]
    fn derived_types_are_transitive() {
        let (graph, root, mid, leaf) = graph_with_chain();

        let mut derived = graph.derived_types(root);
        derived.sort();
        let mut expected = vec![mid, leaf];
        expected.sort();
        assert_eq!(derived, expected);
        assert!(graph.derived_types(leaf).is_empty());
    }

    #[test]
    fn add_association_wires_both_ends() {
        let (mut graph, _, mid, leaf) = graph_with_chain();
        let module_id = *graph.modules.keys().next().unwrap();

        let association_id = graph
            .add_association(
                module_id,
                AssociationSpec {
                    name: "InvoiceForDocument",
                    subject_type: leaf,
                    subject_navigation: "Document",
                    subject_multiplicity: Multiplicity::Many,
                    object_type: mid,
                    object_navigation: "Invoices",
                    object_multiplicity: Multiplicity::One,
                },
            )
            .unwrap();

        let association = graph.association(association_id).unwrap();
        let subject_nav = graph.navigation_property(association.subject).unwrap();
        let object_nav = graph.navigation_property(association.object).unwrap();

        assert_eq!(subject_nav.end, AssociationEnd::Subject);
        assert_eq!(subject_nav.owner, leaf);
        assert_eq!(subject_nav.association, association_id);
        assert_eq!(object_nav.end, AssociationEnd::Object);
        assert_eq!(object_nav.owner, mid);
        assert_eq!(association.fk_navigation(), Some(association.subject));
    }

    #[test]
    fn one_to_one_association_is_rejected() {
        let (mut graph, _, mid, leaf) = graph_with_chain();
        let module_id = *graph.modules.keys().next().unwrap();

        let result = graph.add_association(
            module_id,
            AssociationSpec {
                name: "Bad",
                subject_type: leaf,
                subject_navigation: "A",
                subject_multiplicity: Multiplicity::One,
                object_type: mid,
                object_navigation: "B",
                object_multiplicity: Multiplicity::One,
            },
        );
        assert!(matches!(
            result,
            Err(crate::error::Error::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn remove_association_detaches_navigation_properties() {
        let (mut graph, _, mid, leaf) = graph_with_chain();
        let module_id = *graph.modules.keys().next().unwrap();
        let association_id = graph
            .add_association(
                module_id,
                AssociationSpec {
                    name: "InvoiceForDocument",
                    subject_type: leaf,
                    subject_navigation: "Document",
                    subject_multiplicity: Multiplicity::Many,
                    object_type: mid,
                    object_navigation: "Invoices",
                    object_multiplicity: Multiplicity::One,
                },
            )
            .unwrap();

        graph.remove_association(association_id).unwrap();

        assert!(graph.association(association_id).is_none());
        assert!(graph
            .resource_type(leaf)
            .unwrap()
            .navigation_properties
            .is_empty());
        assert!(graph
            .resource_type(mid)
            .unwrap()
            .navigation_properties
            .is_empty());
    }
}
