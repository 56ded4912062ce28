//! Topological orderings over the model graph
//!
//! Two reusable orderings built with Kahn's algorithm: resource-type
//! hierarchy order within a module (base before derived) and module
//! dependency order (a module before every module whose types derive from
//! its types). Both are used by diff adjustment and script generation so a
//! derived type is always processed after its base.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::model::{ItemId, ModelGraph, Module};

/// Order the resource types of one module, base before derived.
///
/// Roots are types whose base is absent from the module's own set; a base
/// living in a different (already processed) module makes its derived type
/// a root here. An ordered count short of the input count signals a cycle.
pub fn hierarchy_order(module: &Module) -> Result<Vec<ItemId>> {
    let members: IndexSet<ItemId> = module.resource_types.keys().copied().collect();

    let mut in_degree: IndexMap<ItemId, usize> = IndexMap::new();
    for (id, resource_type) in &module.resource_types {
        let internal_base = resource_type
            .base
            .map(|b| members.contains(&b))
            .unwrap_or(false);
        in_degree.insert(*id, usize::from(internal_base));
    }

    let mut queue: VecDeque<ItemId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut ordered = Vec::with_capacity(members.len());
    while let Some(current) = queue.pop_front() {
        ordered.push(current);
        for (id, resource_type) in &module.resource_types {
            if resource_type.base == Some(current) {
                if let Some(degree) = in_degree.get_mut(id) {
                    if *degree > 0 {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*id);
                        }
                    }
                }
            }
        }
    }

    if ordered.len() != members.len() {
        let remaining: Vec<String> = members
            .iter()
            .filter(|id| !ordered.contains(id))
            .map(|id| {
                module
                    .resource_types
                    .get(id)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| id.to_string())
            })
            .collect();
        return Err(Error::Validation(format!(
            "inheritance cycle in module '{}' involving: {}",
            module.namespace,
            remaining.join(", ")
        )));
    }

    Ok(ordered)
}

/// Order the modules of a graph so a module precedes every module whose
/// types derive from a type it owns.
pub fn module_order(graph: &ModelGraph) -> Result<Vec<ItemId>> {
    // module -> modules it depends on (owning a base of one of its types)
    let mut dependencies: IndexMap<ItemId, IndexSet<ItemId>> = IndexMap::new();
    for (module_id, module) in &graph.modules {
        let mut deps = IndexSet::new();
        for resource_type in module.resource_types.values() {
            if let Some(base_id) = resource_type.base {
                if let Some(base) = graph.resource_type(base_id) {
                    if base.module != *module_id {
                        deps.insert(base.module);
                    }
                }
            }
        }
        dependencies.insert(*module_id, deps);
    }

    let mut in_degree: IndexMap<ItemId, usize> = dependencies
        .iter()
        .map(|(id, deps)| (*id, deps.len()))
        .collect();

    let mut queue: VecDeque<ItemId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut ordered = Vec::with_capacity(graph.modules.len());
    while let Some(current) = queue.pop_front() {
        ordered.push(current);
        for (id, deps) in &dependencies {
            if deps.contains(&current) {
                if let Some(degree) = in_degree.get_mut(id) {
                    if *degree > 0 {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*id);
                        }
                    }
                }
            }
        }
    }

    if ordered.len() != graph.modules.len() {
        let remaining: Vec<String> = graph
            .modules
            .iter()
            .filter(|(id, _)| !ordered.contains(id))
            .map(|(_, m)| m.namespace.clone())
            .collect();
        return Err(Error::Validation(format!(
            "module dependency cycle involving: {}",
            remaining.join(", ")
        )));
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceType;
    use pretty_assertions::assert_eq;

    #[test]
    fn hierarchy_order_puts_base_before_derived() {
        let mut module = Module::new("Core");
        // Insert leaf first to prove ordering is structural, not positional
        let root_id = ItemId::new();
        let mid_id = ItemId::new();
        let leaf_id = ItemId::new();

        let mut leaf = ResourceType::new("Leaf", module.id).derived_from(mid_id);
        leaf.id = leaf_id;
        let mut mid = ResourceType::new("Mid", module.id).derived_from(root_id);
        mid.id = mid_id;
        let mut root = ResourceType::new("Root", module.id);
        root.id = root_id;

        module.resource_types.insert(leaf_id, leaf);
        module.resource_types.insert(mid_id, mid);
        module.resource_types.insert(root_id, root);

        let order = hierarchy_order(&module).unwrap();
        let pos = |id: ItemId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(root_id) < pos(mid_id));
        assert!(pos(mid_id) < pos(leaf_id));
    }

    #[test]
    fn external_base_makes_a_type_a_root() {
        let mut module = Module::new("Extension");
        let external_base = ItemId::new();
        let t = ResourceType::new("Derived", module.id).derived_from(external_base);
        let id = module.add_resource_type(t);

        let order = hierarchy_order(&module).unwrap();
        assert_eq!(order, vec![id]);
    }

    #[test]
    fn hierarchy_cycle_is_an_error() {
        let mut module = Module::new("Broken");
        let a_id = ItemId::new();
        let b_id = ItemId::new();
        let mut a = ResourceType::new("A", module.id).derived_from(b_id);
        a.id = a_id;
        let mut b = ResourceType::new("B", module.id).derived_from(a_id);
        b.id = b_id;
        module.resource_types.insert(a_id, a);
        module.resource_types.insert(b_id, b);

        let err = hierarchy_order(&module).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn module_order_follows_base_type_ownership() {
        let mut graph = ModelGraph::new();

        let mut base_module = Module::new("System.Library");
        let root = base_module.add_resource_type(ResourceType::new("Resource", base_module.id));
        let base_module_id = graph.add_module(base_module);

        let mut extension = Module::new("Billing");
        let t = ResourceType::new("Invoice", extension.id).derived_from(root);
        extension.add_resource_type(t);
        let extension_id = graph.add_module(extension);

        let order = module_order(&graph).unwrap();
        let pos = |id: ItemId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(base_module_id) < pos(extension_id));
    }

    #[test]
    fn module_cycle_is_an_error() {
        let mut graph = ModelGraph::new();

        let mut first = Module::new("First");
        let mut second = Module::new("Second");

        let first_root_id = ItemId::new();
        let second_root_id = ItemId::new();

        let mut first_root = ResourceType::new("FirstRoot", first.id);
        first_root.id = first_root_id;
        first_root.base = Some(second_root_id);
        let mut second_root = ResourceType::new("SecondRoot", second.id);
        second_root.id = second_root_id;
        second_root.base = Some(first_root_id);

        first.resource_types.insert(first_root_id, first_root);
        second.resource_types.insert(second_root_id, second_root);
        graph.add_module(first);
        graph.add_module(second);

        let err = module_order(&graph).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
