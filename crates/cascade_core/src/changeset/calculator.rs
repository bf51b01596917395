//! Change set calculator.
//!
//! Pairs incoming children with prior children using the variant's identity
//! rule. Pairs whose fields differ become updates, unpaired prior children
//! become deletes and unpaired incoming children become inserts.

use crate::model::child::ChildRecord;
use serde::Serialize;

/// Disjoint child operations needed to turn a prior snapshot into an
/// incoming one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet<C> {
    /// Incoming children with no prior counterpart.
    pub to_insert: Vec<C>,
    /// Prior children with no incoming counterpart.
    pub to_delete: Vec<C>,
    /// Incoming state of paired children whose fields changed.
    pub to_update: Vec<C>,
    /// Paired children with no field change.
    pub unchanged: usize,
}

impl<C> Default for ChangeSet<C> {
    fn default() -> Self {
        Self {
            to_insert: Vec::new(),
            to_delete: Vec::new(),
            to_update: Vec::new(),
            unchanged: 0,
        }
    }
}

impl<C: ChildRecord> ChangeSet<C> {
    /// Returns whether applying this change set writes nothing.
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty() && self.to_update.is_empty()
    }

    /// Number of child rows this change set writes.
    pub fn write_count(&self) -> usize {
        self.to_insert.len() + self.to_delete.len() + self.to_update.len()
    }

    /// Applies the change set to `prior` in memory.
    ///
    /// Deletes run first, then updates replace their paired member, then
    /// inserts are appended. This mirrors the order used against storage.
    pub fn apply_to(&self, prior: &[C]) -> Vec<C> {
        let mut result: Vec<C> = prior
            .iter()
            .filter(|child| !self.to_delete.contains(*child))
            .cloned()
            .collect();

        for updated in &self.to_update {
            if let Some(slot) = result
                .iter_mut()
                .find(|existing| existing.same_identity(updated))
            {
                *slot = updated.clone();
            }
        }

        result.extend(self.to_insert.iter().cloned());
        result
    }
}

/// Computes the change set turning `prior` into `incoming`.
///
/// Both slices are expected to have set semantics under `C`'s identity rule.
pub fn compute_change_set<C: ChildRecord>(prior: &[C], incoming: &[C]) -> ChangeSet<C> {
    let mut change_set = ChangeSet::default();
    let mut paired = vec![false; prior.len()];

    for child in incoming {
        let partner = prior
            .iter()
            .enumerate()
            .find(|(index, candidate)| !paired[*index] && candidate.same_identity(child));

        match partner {
            Some((index, previous)) => {
                paired[index] = true;
                if previous == child {
                    change_set.unchanged += 1;
                } else {
                    change_set.to_update.push(child.clone());
                }
            }
            None => change_set.to_insert.push(child.clone()),
        }
    }

    change_set.to_delete = prior
        .iter()
        .zip(paired)
        .filter(|(_, was_paired)| !was_paired)
        .map(|(child, _)| child.clone())
        .collect();

    change_set
}

/// Returns whether two child collections hold exactly the same members,
/// ignoring order.
pub fn same_child_set<C: ChildRecord>(left: &[C], right: &[C]) -> bool {
    left.len() == right.len()
        && left.iter().all(|child| right.contains(child))
        && right.iter().all(|child| left.contains(child))
}

#[cfg(test)]
mod tests {
    use super::{compute_change_set, same_child_set};
    use crate::model::child::{EmbeddedChild, ReferencedChild};
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};

    fn referenced_pair() -> Vec<ReferencedChild> {
        vec![
            ReferencedChild::new(1, "c1desc"),
            ReferencedChild::new(2, "c2desc"),
        ]
    }

    fn embedded_pair() -> Vec<EmbeddedChild> {
        vec![
            EmbeddedChild::new(1, "c1desc"),
            EmbeddedChild::new(2, "c2desc"),
        ]
    }

    #[test]
    fn referenced_unmodified_merge_is_a_no_op() {
        let prior = referenced_pair();
        let change_set = compute_change_set(&prior, &referenced_pair());

        assert!(change_set.is_empty());
        assert_eq!(change_set.unchanged, 2);
    }

    #[test]
    fn referenced_edit_becomes_update_in_place() {
        let prior = referenced_pair();
        let incoming = vec![
            ReferencedChild::new(1, "c1desc"),
            ReferencedChild::new(2, "modified"),
        ];

        let change_set = compute_change_set(&prior, &incoming);

        assert!(change_set.to_insert.is_empty());
        assert!(change_set.to_delete.is_empty());
        assert_eq!(change_set.to_update, vec![ReferencedChild::new(2, "modified")]);
        assert_eq!(change_set.unchanged, 1);
    }

    #[test]
    fn embedded_edit_becomes_delete_and_insert() {
        let prior = embedded_pair();
        let incoming = vec![
            EmbeddedChild::new(1, "c1desc"),
            EmbeddedChild::new(2, "modified"),
        ];

        let change_set = compute_change_set(&prior, &incoming);

        assert_eq!(change_set.to_delete, vec![EmbeddedChild::new(2, "c2desc")]);
        assert_eq!(change_set.to_insert, vec![EmbeddedChild::new(2, "modified")]);
        assert!(change_set.to_update.is_empty());
        assert_eq!(change_set.unchanged, 1);
    }

    #[test]
    fn empty_incoming_deletes_everything() {
        let prior = referenced_pair();
        let change_set = compute_change_set(&prior, &[]);

        assert_eq!(change_set.to_delete, prior);
        assert!(change_set.to_insert.is_empty());
        assert!(change_set.to_update.is_empty());
    }

    #[test]
    fn empty_prior_inserts_everything() {
        let incoming = embedded_pair();
        let change_set = compute_change_set(&[], &incoming);

        assert_eq!(change_set.to_insert, incoming);
        assert!(change_set.to_delete.is_empty());
        assert!(change_set.to_update.is_empty());
        assert_eq!(change_set.write_count(), 2);
    }

    #[test]
    fn referenced_replacement_mixes_all_three_operations() {
        let prior = referenced_pair();
        let incoming = vec![
            ReferencedChild::new(2, "c2 edited"),
            ReferencedChild::new(3, "c3desc"),
        ];

        let change_set = compute_change_set(&prior, &incoming);

        assert_eq!(change_set.to_delete, vec![ReferencedChild::new(1, "c1desc")]);
        assert_eq!(change_set.to_insert, vec![ReferencedChild::new(3, "c3desc")]);
        assert_eq!(change_set.to_update, vec![ReferencedChild::new(2, "c2 edited")]);
        assert!(same_child_set(&change_set.apply_to(&prior), &incoming));
    }

    fn embedded_set() -> impl Strategy<Value = Vec<EmbeddedChild>> {
        prop::collection::hash_set(
            (
                prop::option::of(0_i64..4),
                prop::option::of(prop::sample::select(vec!["a", "b", "c"])),
            ),
            0..6,
        )
        .prop_map(|values: HashSet<(Option<i64>, Option<&'static str>)>| {
            values
                .into_iter()
                .map(|(id, description)| EmbeddedChild {
                    id,
                    description: description.map(str::to_string),
                })
                .collect()
        })
    }

    fn referenced_set() -> impl Strategy<Value = Vec<ReferencedChild>> {
        prop::collection::hash_map(1_i64..8, prop::sample::select(vec!["a", "b", "c"]), 0..6)
            .prop_map(|values: HashMap<i64, &'static str>| {
                values
                    .into_iter()
                    .map(|(id, description)| ReferencedChild::new(id, description))
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn embedded_change_set_reproduces_incoming(prior in embedded_set(), incoming in embedded_set()) {
            let change_set = compute_change_set(&prior, &incoming);

            prop_assert!(change_set.to_update.is_empty());
            prop_assert!(same_child_set(&change_set.apply_to(&prior), &incoming));
            for deleted in &change_set.to_delete {
                prop_assert!(!incoming.contains(deleted));
            }
            for inserted in &change_set.to_insert {
                prop_assert!(!prior.contains(inserted));
            }
        }

        #[test]
        fn referenced_change_set_reproduces_incoming(prior in referenced_set(), incoming in referenced_set()) {
            let change_set = compute_change_set(&prior, &incoming);

            prop_assert!(same_child_set(&change_set.apply_to(&prior), &incoming));
            prop_assert_eq!(
                change_set.to_update.len() + change_set.unchanged + change_set.to_insert.len(),
                incoming.len()
            );
            prop_assert_eq!(
                change_set.to_update.len() + change_set.unchanged + change_set.to_delete.len(),
                prior.len()
            );
        }

        #[test]
        fn referenced_merge_of_same_snapshot_is_idempotent(children in referenced_set()) {
            let change_set = compute_change_set(&children, &children);

            prop_assert!(change_set.is_empty());
            prop_assert_eq!(change_set.unchanged, children.len());
        }
    }
}
