//! Graph differencer
//!
//! Compares an original and a new model graph and produces, per entity
//! kind, the added, deleted and updated identity sets. Matching is
//! strictly by identity, never by name; instances are resolved from the
//! two graphs when the sets are consumed.

use indexmap::{IndexMap, IndexSet};

use crate::model::graph::ModelGraph;
use crate::model::items::{
    Association, ItemId, Module, NavigationProperty, ResourceType, ScalarProperty,
};

/// Added/deleted/updated identities for one entity kind
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: IndexSet<ItemId>,
    pub deleted: IndexSet<ItemId>,
    pub updated: IndexSet<ItemId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }

    /// Whether any set contains the identity
    pub fn touches(&self, id: ItemId) -> bool {
        self.added.contains(&id) || self.deleted.contains(&id) || self.updated.contains(&id)
    }

    /// Reclassify an identity into the added set
    pub fn force_added(&mut self, id: ItemId) {
        self.updated.shift_remove(&id);
        self.added.insert(id);
    }

    /// Reclassify an identity into the deleted set
    pub fn force_deleted(&mut self, id: ItemId) {
        self.updated.shift_remove(&id);
        self.deleted.insert(id);
    }
}

/// Itemized differences between two model graphs
#[derive(Debug, Clone, Default)]
pub struct GraphDiff {
    pub modules: ChangeSet,
    pub resource_types: ChangeSet,
    pub scalar_properties: ChangeSet,
    pub navigation_properties: ChangeSet,
    pub associations: ChangeSet,
}

impl GraphDiff {
    /// Generate the diff between two graphs
    pub fn generate(original: &ModelGraph, new: &ModelGraph) -> Self {
        let original_items = Collected::from(original);
        let new_items = Collected::from(new);

        GraphDiff {
            modules: compare(&original_items.modules, &new_items.modules, |a, b| {
                a.same_definition(b)
            }),
            resource_types: compare(
                &original_items.resource_types,
                &new_items.resource_types,
                |a, b| a.same_definition(b),
            ),
            scalar_properties: compare(
                &original_items.scalar_properties,
                &new_items.scalar_properties,
                |a, b| a.same_definition(b),
            ),
            navigation_properties: compare(
                &original_items.navigation_properties,
                &new_items.navigation_properties,
                |a, b| a.same_definition(b),
            ),
            associations: compare(
                &original_items.associations,
                &new_items.associations,
                |a, b| a.same_definition(b),
            ),
        }
    }

    /// Whether the two graphs were identical
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
            && self.resource_types.is_empty()
            && self.scalar_properties.is_empty()
            && self.navigation_properties.is_empty()
            && self.associations.is_empty()
    }
}

/// Per-kind identity indexes over one graph
struct Collected<'a> {
    modules: IndexMap<ItemId, &'a Module>,
    resource_types: IndexMap<ItemId, &'a ResourceType>,
    scalar_properties: IndexMap<ItemId, &'a ScalarProperty>,
    navigation_properties: IndexMap<ItemId, &'a NavigationProperty>,
    associations: IndexMap<ItemId, &'a Association>,
}

impl<'a> Collected<'a> {
    fn from(graph: &'a ModelGraph) -> Self {
        let mut collected = Collected {
            modules: IndexMap::new(),
            resource_types: IndexMap::new(),
            scalar_properties: IndexMap::new(),
            navigation_properties: IndexMap::new(),
            associations: IndexMap::new(),
        };
        for module in graph.modules.values() {
            collected.modules.insert(module.id, module);
            for resource_type in module.resource_types.values() {
                collected.resource_types.insert(resource_type.id, resource_type);
                for property in resource_type.scalar_properties.values() {
                    collected.scalar_properties.insert(property.id, property);
                }
                for property in resource_type.navigation_properties.values() {
                    collected
                        .navigation_properties
                        .insert(property.id, property);
                }
            }
            for association in module.associations.values() {
                collected.associations.insert(association.id, association);
            }
        }
        collected
    }
}

fn compare<T>(
    original: &IndexMap<ItemId, &T>,
    new: &IndexMap<ItemId, &T>,
    same: impl Fn(&T, &T) -> bool,
) -> ChangeSet {
    let mut set = ChangeSet::default();
    for (id, new_item) in new {
        match original.get(id) {
            None => {
                set.added.insert(*id);
            }
            Some(original_item) if !same(original_item, new_item) => {
                set.updated.insert(*id);
            }
            Some(_) => {}
        }
    }
    for id in original.keys() {
        if !new.contains_key(id) {
            set.deleted.insert(*id);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::AssociationSpec;
    use crate::model::items::{DataType, Multiplicity};
    use crate::model::{Module, ResourceType, ScalarProperty};
    use pretty_assertions::assert_eq;

    fn base_graph() -> (ModelGraph, ItemId, ItemId) {
        let mut module = Module::new("Core");
        let root = module.add_resource_type(ResourceType::new("Resource", module.id));
        let customer = {
            let t = ResourceType::new("Customer", module.id).derived_from(root);
            module.add_resource_type(t)
        };
        module
            .resource_types
            .get_mut(&customer)
            .unwrap()
            .add_scalar_property(ScalarProperty::new(
                "Name",
                DataType::String { max_len: 256 },
                customer,
            ));
        let mut graph = ModelGraph::new();
        let module_id = graph.add_module(module);
        (graph, module_id, customer)
    }

    #[test]
    fn identical_graphs_produce_an_empty_diff() {
        let (graph, ..) = base_graph();
        let diff = GraphDiff::generate(&graph, &graph.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn an_added_property_appears_only_in_the_scalar_set() {
        let (original, _, customer) = base_graph();
        let mut new = original.clone();
        let property = ScalarProperty::new("Age", DataType::Int32, customer);
        let property_id = property.id;
        new.resource_type_mut(customer)
            .unwrap()
            .scalar_properties
            .insert(property_id, property);

        let diff = GraphDiff::generate(&original, &new);
        assert_eq!(
            diff.scalar_properties.added.iter().copied().collect::<Vec<_>>(),
            vec![property_id]
        );
        assert!(diff.resource_types.is_empty());
        assert!(diff.modules.is_empty());
    }

    #[test]
    fn matching_is_by_identity_not_name() {
        let (original, _, customer) = base_graph();
        let mut new = original.clone();
        // Replace "Name" with an identically named but freshly minted property
        let old_id = *new
            .resource_type(customer)
            .unwrap()
            .scalar_properties
            .keys()
            .next()
            .unwrap();
        new.resource_type_mut(customer)
            .unwrap()
            .scalar_properties
            .shift_remove(&old_id);
        let replacement =
            ScalarProperty::new("Name", DataType::String { max_len: 256 }, customer);
        let new_id = replacement.id;
        new.resource_type_mut(customer)
            .unwrap()
            .scalar_properties
            .insert(new_id, replacement);

        let diff = GraphDiff::generate(&original, &new);
        assert!(diff.scalar_properties.deleted.contains(&old_id));
        assert!(diff.scalar_properties.added.contains(&new_id));
        assert!(diff.scalar_properties.updated.is_empty());
    }

    #[test]
    fn an_attribute_change_is_an_update() {
        let (original, _, customer) = base_graph();
        let mut new = original.clone();
        let property_id = *new
            .resource_type(customer)
            .unwrap()
            .scalar_properties
            .keys()
            .next()
            .unwrap();
        new.resource_type_mut(customer)
            .unwrap()
            .scalar_properties
            .get_mut(&property_id)
            .unwrap()
            .data_type = DataType::String { max_len: 512 };

        let diff = GraphDiff::generate(&original, &new);
        assert_eq!(
            diff.scalar_properties.updated.iter().copied().collect::<Vec<_>>(),
            vec![property_id]
        );
    }

    #[test]
    fn deleting_a_type_deletes_its_owned_properties() {
        let (original, _, customer) = base_graph();
        let property_id = *original
            .resource_type(customer)
            .unwrap()
            .scalar_properties
            .keys()
            .next()
            .unwrap();
        let mut new = original.clone();
        let module_id = *new.modules.keys().next().unwrap();
        new.module_mut(module_id)
            .unwrap()
            .resource_types
            .shift_remove(&customer);

        let diff = GraphDiff::generate(&original, &new);
        assert!(diff.resource_types.deleted.contains(&customer));
        assert!(diff.scalar_properties.deleted.contains(&property_id));
    }

    #[test]
    fn association_changes_are_tracked_per_kind() {
        let (mut original, module_id, customer) = base_graph();
        let order = {
            let root = original.resource_type_by_name("Resource").unwrap().id;
            let t = ResourceType::new("Order", module_id).derived_from(root);
            original.module_mut(module_id).unwrap().add_resource_type(t)
        };
        let association_id = original
            .add_association(
                module_id,
                AssociationSpec {
                    name: "OrderPlacedBy",
                    subject_type: order,
                    subject_navigation: "Customer",
                    subject_multiplicity: Multiplicity::Many,
                    object_type: customer,
                    object_navigation: "Orders",
                    object_multiplicity: Multiplicity::One,
                },
            )
            .unwrap();

        let mut new = original.clone();
        new.association_mut(association_id)
            .unwrap()
            .object_multiplicity = Multiplicity::Many;

        let diff = GraphDiff::generate(&original, &new);
        assert_eq!(
            diff.associations.updated.iter().copied().collect::<Vec<_>>(),
            vec![association_id]
        );
        assert!(diff.navigation_properties.is_empty());
    }
}
