// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::graph::{ObjectId, Parent};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Reference bookkeeping for one element within one transaction.
///
/// Records which parent links the transaction adds to and removes from the element, relative to
/// the committed links. The two sets are kept disjoint: adding a link that was removed earlier in
/// the same transaction cancels the removal, and vice versa. Moving an element out of one
/// container and back in therefore leaves no trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRef {
    added: SmallVec<[Parent; 2]>,
    removed: SmallVec<[Parent; 2]>,
}

impl ChangeRef {
    pub fn added(&self) -> &[Parent] {
        &self.added
    }

    pub fn removed(&self) -> &[Parent] {
        &self.removed
    }

    /// Net change in the number of references.
    pub fn delta(&self) -> isize {
        self.added.len() as isize - self.removed.len() as isize
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub(crate) fn add(&mut self, parent: Parent) {
        if let Some(idx) = self.removed.iter().position(|p| *p == parent) {
            self.removed.swap_remove(idx);
        } else {
            self.added.push(parent);
        }
    }

    pub(crate) fn remove(&mut self, parent: Parent) {
        if let Some(idx) = self.added.iter().position(|p| *p == parent) {
            self.added.swap_remove(idx);
        } else {
            self.removed.push(parent);
        }
    }

    /// Committed links with this record's changes applied.
    pub(crate) fn project(&self, committed: &[Parent]) -> SmallVec<[Parent; 2]> {
        let mut parents: SmallVec<[Parent; 2]> = committed
            .iter()
            .filter(|p| !self.removed.contains(p))
            .copied()
            .collect();
        parents.extend(self.added.iter().copied());
        parents
    }
}

/// How a commit changed whether an element is referenced at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum RefTransition {
    /// Referenced before and after, or unreferenced before and after.
    Unchanged,
    /// Was unreferenced, is now referenced by at least one parent.
    Adopted,
    /// Was referenced, is now referenced by no parent.
    Orphaned,
}

impl RefTransition {
    pub(crate) fn between(before: usize, after: usize) -> Self {
        match (before, after) {
            (0, 1..) => RefTransition::Adopted,
            (1.., 0) => RefTransition::Orphaned,
            _ => RefTransition::Unchanged,
        }
    }
}

/// All [`ChangeRef`]s of one transaction.
///
/// Every reference mutation of a transaction funnels through here, never directly between
/// containers.
#[derive(Debug, Clone, Default)]
pub(crate) struct RefRegistry {
    refs: BTreeMap<ObjectId, ChangeRef>,
}

impl RefRegistry {
    pub(crate) fn ensure(&mut self, element: ObjectId) -> &mut ChangeRef {
        self.refs.entry(element).or_default()
    }

    pub(crate) fn get(&self, element: ObjectId) -> Option<&ChangeRef> {
        self.refs.get(&element)
    }

    pub(crate) fn add(&mut self, element: ObjectId, parent: Parent) {
        self.ensure(element).add(parent);
    }

    pub(crate) fn remove(&mut self, element: ObjectId, parent: Parent) {
        self.ensure(element).remove(parent);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ObjectId, &ChangeRef)> {
        self.refs.iter().map(|(id, r)| (*id, r))
    }

    pub(crate) fn clear(&mut self) {
        self.refs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyId;

    #[test]
    fn add_cancels_remove() {
        let list = Parent::element(ObjectId(1));
        let mut r = ChangeRef::default();
        r.remove(list);
        assert_eq!(r.delta(), -1);
        r.add(list);
        assert!(r.is_empty());
    }

    #[test]
    fn moving_between_containers_is_tracked_once() {
        let a = Parent::element(ObjectId(1));
        let b = Parent::property(ObjectId(2), PropertyId(0));
        let mut r = ChangeRef::default();
        r.remove(a);
        r.add(b);
        r.add(b);
        r.remove(b);
        assert_eq!(r.added(), &[b]);
        assert_eq!(r.removed(), &[a]);
        assert_eq!(r.project(&[a]).as_slice(), &[b]);
    }

    #[test]
    fn transitions() {
        assert_eq!(RefTransition::between(0, 2), RefTransition::Adopted);
        assert_eq!(RefTransition::between(1, 0), RefTransition::Orphaned);
        assert_eq!(RefTransition::between(1, 3), RefTransition::Unchanged);
        assert_eq!(RefTransition::between(0, 0), RefTransition::Unchanged);
    }
}
