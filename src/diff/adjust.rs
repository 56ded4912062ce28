//! Change adjustment
//!
//! A raw diff can understate the physical work a change requires. The
//! adjuster normalizes it: association re-wiring, navigation-property
//! re-parenting and incompatible cardinality changes become coordinated
//! delete+add pairs, and `One`-ended associations pull their opposite
//! navigation property into the deleted/added sets so the backing foreign
//! key is retired or created with them.

use tracing::debug;

use crate::diff::differ::GraphDiff;
use crate::error::{Error, Result};
use crate::model::graph::ModelGraph;
use crate::model::items::{Association, ItemId, Module, Multiplicity};

/// Normalize a raw diff in place
pub fn adjust(diff: &mut GraphDiff, original: &ModelGraph, new: &ModelGraph) {
    reclassify_incompatible_associations(diff, original, new);
    reclassify_reparented_navigations(diff, original, new);
    force_fk_ends_of_deleted_associations(diff, original);
    force_fk_ends_of_added_associations(diff, new);
}

/// Whether an association update can be applied without recreating the
/// association: both ends must transition compatibly.
fn multiplicities_compatible(old: &Association, new: &Association) -> bool {
    old.subject_multiplicity.can_become(new.subject_multiplicity)
        && old.object_multiplicity.can_become(new.object_multiplicity)
}

/// Rule 1: an updated association whose navigation ends changed identity,
/// or whose multiplicity change is incompatible, becomes delete-old +
/// add-new; both ends follow it into the deleted/added sets.
fn reclassify_incompatible_associations(
    diff: &mut GraphDiff,
    original: &ModelGraph,
    new: &ModelGraph,
) {
    let updated: Vec<ItemId> = diff.associations.updated.iter().copied().collect();
    for id in updated {
        let (Some(old), Some(next)) = (original.association(id), new.association(id)) else {
            continue;
        };
        let ends_changed = old.subject != next.subject || old.object != next.object;
        if ends_changed || !multiplicities_compatible(old, next) {
            debug!(association = %old.name, "reclassifying association update as recreate");
            recreate_association(diff, old, next);
        }
    }
}

fn recreate_association(diff: &mut GraphDiff, old: &Association, new: &Association) {
    diff.associations.force_deleted(old.id);
    diff.associations.force_added(new.id);
    for navigation in [old.subject, old.object] {
        diff.navigation_properties.force_deleted(navigation);
    }
    for navigation in [new.subject, new.object] {
        diff.navigation_properties.force_added(navigation);
    }
}

/// Rule 2: an updated navigation property whose owner changed becomes
/// delete-old + add-new; the re-classification cascades to its owning
/// association and to the association's other end.
fn reclassify_reparented_navigations(
    diff: &mut GraphDiff,
    original: &ModelGraph,
    new: &ModelGraph,
) {
    let updated: Vec<ItemId> = diff.navigation_properties.updated.iter().copied().collect();
    for id in updated {
        let (Some(old), Some(next)) = (
            original.navigation_property(id),
            new.navigation_property(id),
        ) else {
            continue;
        };
        if old.owner == next.owner {
            continue;
        }
        debug!(navigation = %old.name, "reclassifying re-parented navigation property");
        diff.navigation_properties.force_deleted(id);
        diff.navigation_properties.force_added(id);

        let Some(old_association) = original.association(old.association) else {
            continue;
        };
        diff.associations.force_deleted(old_association.id);
        if new.association(old_association.id).is_some() {
            diff.associations.force_added(old_association.id);
        }

        let other = if old_association.subject == id {
            old_association.object
        } else {
            old_association.subject
        };
        diff.navigation_properties.force_deleted(other);
        if new.navigation_property(other).is_some() {
            diff.navigation_properties.force_added(other);
        }
    }
}

/// Rule 3: a deleted association with a `One` end forces the opposite
/// navigation property into the deleted set; its foreign key column must
/// be dropped even though no explicit deletion was requested.
fn force_fk_ends_of_deleted_associations(diff: &mut GraphDiff, original: &ModelGraph) {
    let deleted: Vec<ItemId> = diff.associations.deleted.iter().copied().collect();
    for id in deleted {
        let Some(association) = original.association(id) else {
            continue;
        };
        if association.object_multiplicity == Multiplicity::One {
            diff.navigation_properties.force_deleted(association.subject);
        }
        if association.subject_multiplicity == Multiplicity::One {
            diff.navigation_properties.force_deleted(association.object);
        }
    }
}

/// Rule 4, symmetric: an added association with a `One` end forces the
/// opposite navigation property into the added set so the foreign key is
/// created even when the property itself was not modified.
fn force_fk_ends_of_added_associations(diff: &mut GraphDiff, new: &ModelGraph) {
    let added: Vec<ItemId> = diff.associations.added.iter().copied().collect();
    for id in added {
        let Some(association) = new.association(id) else {
            continue;
        };
        if association.object_multiplicity == Multiplicity::One {
            diff.navigation_properties.force_added(association.subject);
        }
        if association.subject_multiplicity == Multiplicity::One {
            diff.navigation_properties.force_added(association.object);
        }
    }
}

/// Flags modules whose items must not be structurally changed by a
/// synchronization.
pub trait ProtectedModules {
    fn is_protected(&self, module: &Module) -> bool;
}

/// Default registry: a module's own `system` flag decides.
pub struct SystemFlagProtection;

impl ProtectedModules for SystemFlagProtection {
    fn is_protected(&self, module: &Module) -> bool {
        module.system
    }
}

/// Refuse any add/delete/update touching a protected module's items.
pub fn check_protected(
    diff: &GraphDiff,
    original: &ModelGraph,
    new: &ModelGraph,
    registry: &dyn ProtectedModules,
) -> Result<()> {
    let check = |graph: &ModelGraph, id: ItemId, what: &str| -> Result<()> {
        let module_id = owning_module(graph, id);
        if let Some(module_id) = module_id {
            if let Some(module) = graph.module(module_id) {
                if registry.is_protected(module) {
                    return Err(Error::ProtectedItem {
                        id,
                        reason: format!(
                            "{} belongs to protected module '{}'",
                            what, module.namespace
                        ),
                    });
                }
            }
        }
        Ok(())
    };

    let sets = [
        (&diff.modules, "module"),
        (&diff.resource_types, "resource type"),
        (&diff.scalar_properties, "scalar property"),
        (&diff.navigation_properties, "navigation property"),
        (&diff.associations, "association"),
    ];
    for (set, what) in sets {
        for id in &set.added {
            check(new, *id, what)?;
        }
        for id in &set.updated {
            check(new, *id, what)?;
        }
        for id in &set.deleted {
            check(original, *id, what)?;
        }
    }
    Ok(())
}

/// Resolve the module that owns an item of any kind
fn owning_module(graph: &ModelGraph, id: ItemId) -> Option<ItemId> {
    if graph.module(id).is_some() {
        return Some(id);
    }
    if let Some(resource_type) = graph.resource_type(id) {
        return Some(resource_type.module);
    }
    if let Some(association) = graph.association(id) {
        return Some(association.module);
    }
    if let Some(property) = graph.scalar_property(id) {
        return graph.resource_type(property.owner).map(|t| t.module);
    }
    if let Some(property) = graph.navigation_property(id) {
        return graph.resource_type(property.owner).map(|t| t.module);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::AssociationSpec;
    use crate::model::items::{DataType, ResourceType, ScalarProperty};

    struct Fixture {
        original: ModelGraph,
        module: ItemId,
        customer: ItemId,
        order: ItemId,
        association: ItemId,
    }

    /// Customer 1 : N Order, foreign key on the Order side
    fn fixture() -> Fixture {
        let mut module = Module::new("Sales");
        let root = module.add_resource_type(ResourceType::new("Resource", module.id));
        let customer = {
            let t = ResourceType::new("Customer", module.id).derived_from(root);
            module.add_resource_type(t)
        };
        let order = {
            let t = ResourceType::new("Order", module.id).derived_from(root);
            module.add_resource_type(t)
        };
        module
            .resource_types
            .get_mut(&order)
            .unwrap()
            .add_scalar_property(ScalarProperty::new(
                "Total",
                DataType::Decimal { precision: 19, scale: 4 },
                order,
            ));

        let mut original = ModelGraph::new();
        let module_id = original.add_module(module);
        let association = original
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

        Fixture {
            original,
            module: module_id,
            customer,
            order,
            association,
        }
    }

    #[test]
    fn compatible_multiplicity_change_stays_an_update() {
        let fx = fixture();
        let mut new = fx.original.clone();
        new.association_mut(fx.association)
            .unwrap()
            .object_multiplicity = Multiplicity::Many;

        let mut diff = GraphDiff::generate(&fx.original, &new);
        adjust(&mut diff, &fx.original, &new);

        assert!(diff.associations.updated.contains(&fx.association));
        assert!(diff.associations.deleted.is_empty());
        assert!(diff.associations.added.is_empty());
        assert!(diff.navigation_properties.is_empty());
    }

    #[test]
    fn incompatible_multiplicity_change_forces_a_recreate() {
        let fx = fixture();
        let mut new = fx.original.clone();
        {
            let association = new.association_mut(fx.association).unwrap();
            // Many–One to One–Many: the subject end tightens, which is
            // never compatible.
            association.subject_multiplicity = Multiplicity::One;
            association.object_multiplicity = Multiplicity::Many;
        }

        let mut diff = GraphDiff::generate(&fx.original, &new);
        adjust(&mut diff, &fx.original, &new);

        let old = fx.original.association(fx.association).unwrap();
        assert!(diff.associations.deleted.contains(&fx.association));
        assert!(diff.associations.added.contains(&fx.association));
        assert!(diff.associations.updated.is_empty());
        assert!(diff.navigation_properties.deleted.contains(&old.subject));
        assert!(diff.navigation_properties.deleted.contains(&old.object));
        assert!(diff.navigation_properties.added.contains(&old.subject));
        assert!(diff.navigation_properties.added.contains(&old.object));
    }

    #[test]
    fn rewired_association_forces_a_recreate() {
        let fx = fixture();
        let mut new = fx.original.clone();

        // Point the subject end at a fresh navigation property
        let old_subject = new.association(fx.association).unwrap().subject;
        let replacement = crate::model::NavigationProperty::new(
            "Buyer",
            crate::model::AssociationEnd::Subject,
            fx.association,
            fx.order,
        );
        let replacement_id = replacement.id;
        new.resource_type_mut(fx.order)
            .unwrap()
            .navigation_properties
            .shift_remove(&old_subject);
        new.resource_type_mut(fx.order)
            .unwrap()
            .navigation_properties
            .insert(replacement_id, replacement);
        new.association_mut(fx.association).unwrap().subject = replacement_id;

        let mut diff = GraphDiff::generate(&fx.original, &new);
        adjust(&mut diff, &fx.original, &new);

        assert!(diff.associations.deleted.contains(&fx.association));
        assert!(diff.associations.added.contains(&fx.association));
        assert!(diff.navigation_properties.deleted.contains(&old_subject));
        assert!(diff.navigation_properties.added.contains(&replacement_id));
    }

    #[test]
    fn reparented_navigation_cascades_to_the_association_and_other_end() {
        let fx = fixture();
        let mut new = fx.original.clone();

        // Move the Orders navigation from Customer onto the root type
        let root = new.resource_type_by_name("Resource").unwrap().id;
        let object_nav = new.association(fx.association).unwrap().object;
        let mut property = new
            .resource_type_mut(fx.customer)
            .unwrap()
            .navigation_properties
            .shift_remove(&object_nav)
            .unwrap();
        property.owner = root;
        new.resource_type_mut(root)
            .unwrap()
            .navigation_properties
            .insert(object_nav, property);

        let mut diff = GraphDiff::generate(&fx.original, &new);
        adjust(&mut diff, &fx.original, &new);

        let subject_nav = fx.original.association(fx.association).unwrap().subject;
        assert!(diff.navigation_properties.deleted.contains(&object_nav));
        assert!(diff.navigation_properties.added.contains(&object_nav));
        assert!(diff.associations.deleted.contains(&fx.association));
        assert!(diff.associations.added.contains(&fx.association));
        // The untouched other end is deleted and re-added by identity
        assert!(diff.navigation_properties.deleted.contains(&subject_nav));
        assert!(diff.navigation_properties.added.contains(&subject_nav));
    }

    #[test]
    fn deleting_a_one_ended_association_retires_the_fk_navigation() {
        let fx = fixture();
        let mut new = fx.original.clone();
        new.remove_association(fx.association).unwrap();

        let mut diff = GraphDiff::generate(&fx.original, &new);
        adjust(&mut diff, &fx.original, &new);

        let old = fx.original.association(fx.association).unwrap();
        // Subject navigation sits opposite the One end and carries the FK
        assert!(diff.navigation_properties.deleted.contains(&old.subject));
    }

    #[test]
    fn protected_modules_reject_structural_changes() {
        let mut fx = fixture();
        fx.original.module_mut(fx.module).unwrap().system = true;
        let mut new = fx.original.clone();
        let property = ScalarProperty::new("Nickname", DataType::String { max_len: 64 }, fx.customer);
        let property_id = property.id;
        new.resource_type_mut(fx.customer)
            .unwrap()
            .scalar_properties
            .insert(property_id, property);

        let mut diff = GraphDiff::generate(&fx.original, &new);
        adjust(&mut diff, &fx.original, &new);

        let err =
            check_protected(&diff, &fx.original, &new, &SystemFlagProtection).unwrap_err();
        match err {
            Error::ProtectedItem { id, .. } => assert_eq!(id, property_id),
            other => panic!("expected ProtectedItem, got {}", other),
        }
    }

    #[test]
    fn unprotected_changes_pass_the_protection_check() {
        let fx = fixture();
        let mut new = fx.original.clone();
        let property = ScalarProperty::new("Nickname", DataType::String { max_len: 64 }, fx.customer);
        new.resource_type_mut(fx.customer)
            .unwrap()
            .scalar_properties
            .insert(property.id, property);

        let mut diff = GraphDiff::generate(&fx.original, &new);
        adjust(&mut diff, &fx.original, &new);
        check_protected(&diff, &fx.original, &new, &SystemFlagProtection).unwrap();
    }
}
