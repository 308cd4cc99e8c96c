// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Atomic edits to one property or one list container.
use crate::{
    error::{Error, Result},
    graph::{Comparer, ElementKey, ListState, ObjectId, Parent},
    schema::PropertyId,
    transaction::change_ref::RefRegistry,
    value::{PropertyState, Value},
};
use std::fmt;

/// Reference side effects of a primitive change.
///
/// `prepare` runs when the change is recorded, `cancel` when it is dropped again before commit.
/// Both go through the transaction's [`RefRegistry`], and `cancel` exactly undoes `prepare`.
pub(crate) trait Primitive {
    fn prepare(&self, owner: ObjectId, refs: &mut RefRegistry);
    fn cancel(&self, owner: ObjectId, refs: &mut RefRegistry);
}

/// Replacement of one property's value and state.
///
/// `value_old`/`state_old` are always the committed (pre-transaction) contents of the property,
/// no matter how many times the property was set within the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Replace {
    pub(crate) property: PropertyId,
    pub(crate) value_old: Value,
    pub(crate) value_new: Value,
    pub(crate) state_old: PropertyState,
    pub(crate) state_new: PropertyState,
}

impl Replace {
    pub fn property(&self) -> PropertyId {
        self.property
    }

    pub fn value_old(&self) -> &Value {
        &self.value_old
    }

    pub fn value_new(&self) -> &Value {
        &self.value_new
    }

    pub fn state_old(&self) -> PropertyState {
        self.state_old
    }

    pub fn state_new(&self) -> PropertyState {
        self.state_new
    }

    pub(crate) fn apply(&self, slots: &mut [(Value, PropertyState)]) -> Result<()> {
        let slot = slots.get_mut(self.property.index()).ok_or_else(|| {
            Error::invalid_operation(format!("no slot for property {}", self.property.index()))
        })?;
        *slot = (self.value_new.clone(), self.state_new);
        Ok(())
    }
}

impl Primitive for Replace {
    fn prepare(&self, owner: ObjectId, refs: &mut RefRegistry) {
        let parent = Parent::property(owner, self.property);
        if let Some(old) = self.value_old.as_object() {
            refs.remove(old, parent);
        }
        if let Some(new) = self.value_new.as_object() {
            refs.add(new, parent);
        }
    }

    fn cancel(&self, owner: ObjectId, refs: &mut RefRegistry) {
        let parent = Parent::property(owner, self.property);
        if let Some(new) = self.value_new.as_object() {
            refs.remove(new, parent);
        }
        if let Some(old) = self.value_old.as_object() {
            refs.add(old, parent);
        }
    }
}

/// One recorded operation on a list container.
///
/// Indices refer to the container state right before the change is applied. For `Move`, `to` is
/// the index in the container after the moved elements have been taken out.
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    Add {
        elements: Vec<ObjectId>,
        keys: Vec<ElementKey>,
        index: usize,
    },
    Remove {
        elements: Vec<ObjectId>,
        index: usize,
    },
    Move {
        elements: Vec<ObjectId>,
        from: usize,
        to: usize,
    },
    Sort {
        comparer: Comparer,
        /// The elements in the order the comparer put them in when the sort was recorded.
        order: Vec<ObjectId>,
    },
    Clear {
        /// What the container held when it was cleared.
        elements: Vec<ObjectId>,
    },
}

impl ListChange {
    pub fn elements(&self) -> &[ObjectId] {
        match self {
            ListChange::Add { elements, .. }
            | ListChange::Remove { elements, .. }
            | ListChange::Move { elements, .. }
            | ListChange::Clear { elements } => elements,
            ListChange::Sort { .. } => &[],
        }
    }

    /// Applies the change onto `state`.
    ///
    /// A `Sort` reorders `state` into its recorded order without consulting the comparer again,
    /// so later changes recorded against the sorted projection keep fitting.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] if the indices do not fit `state`, which means the change was
    /// recorded against a different container state.
    pub(crate) fn apply(&self, state: &mut ListState) -> Result<()> {
        let stale = || Error::invalid_operation(format!("{self} does not fit the list"));
        match self {
            ListChange::Add {
                elements,
                keys,
                index,
            } => {
                if *index > state.len() || elements.len() != keys.len() {
                    return Err(stale());
                }
                state
                    .elements
                    .splice(*index..*index, elements.iter().copied());
                state.keys.splice(*index..*index, keys.iter().cloned());
            }
            ListChange::Remove { elements, index } => {
                let range = *index..*index + elements.len();
                if range.end > state.len() || state.elements[range.clone()] != elements[..] {
                    return Err(stale());
                }
                state.elements.drain(range.clone());
                state.keys.drain(range);
            }
            ListChange::Move { elements, from, to } => {
                let range = *from..*from + elements.len();
                if range.end > state.len() || state.elements[range.clone()] != elements[..] {
                    return Err(stale());
                }
                let moved: Vec<_> = state.elements.drain(range.clone()).collect();
                let keys: Vec<_> = state.keys.drain(range).collect();
                if *to > state.len() {
                    return Err(stale());
                }
                state.elements.splice(*to..*to, moved);
                state.keys.splice(*to..*to, keys);
            }
            ListChange::Sort { order, .. } => {
                if order.len() != state.len() {
                    return Err(stale());
                }
                let mut slots = crate::create_map_with_capacity(state.len());
                for (element, key) in state.elements.iter().zip(&state.keys) {
                    slots.insert(*element, key.clone());
                }
                let keys = order
                    .iter()
                    .map(|element| slots.remove(element))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(stale)?;
                state.elements.clone_from(order);
                state.keys = keys;
            }
            ListChange::Clear { .. } => {
                state.elements.clear();
                state.keys.clear();
            }
        }
        Ok(())
    }
}

impl Primitive for ListChange {
    fn prepare(&self, owner: ObjectId, refs: &mut RefRegistry) {
        let parent = Parent::element(owner);
        match self {
            ListChange::Add { elements, .. } => {
                for e in elements {
                    refs.add(*e, parent);
                }
            }
            ListChange::Remove { elements, .. } | ListChange::Clear { elements } => {
                for e in elements {
                    refs.remove(*e, parent);
                }
            }
            ListChange::Move { .. } | ListChange::Sort { .. } => {}
        }
    }

    fn cancel(&self, owner: ObjectId, refs: &mut RefRegistry) {
        let parent = Parent::element(owner);
        match self {
            ListChange::Add { elements, .. } => {
                for e in elements {
                    refs.remove(*e, parent);
                }
            }
            ListChange::Remove { elements, .. } | ListChange::Clear { elements } => {
                for e in elements {
                    refs.add(*e, parent);
                }
            }
            ListChange::Move { .. } | ListChange::Sort { .. } => {}
        }
    }
}

struct Ids<'a>(&'a [ObjectId]);

impl fmt::Display for Ids<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for ListChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListChange::Add {
                elements, index, ..
            } => write!(f, "add {} at {index}", Ids(elements)),
            ListChange::Remove { elements, index } => {
                write!(f, "remove {} at {index}", Ids(elements))
            }
            ListChange::Move { elements, from, to } => {
                write!(f, "move {} {from} -> {to}", Ids(elements))
            }
            ListChange::Sort { .. } => f.write_str("sort"),
            ListChange::Clear { elements } => write!(f, "clear {}", Ids(elements)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: &[u32]) -> Vec<ObjectId> {
        n.iter().copied().map(ObjectId).collect()
    }

    fn state(n: &[u32]) -> ListState {
        let elements = ids(n);
        let keys = elements.iter().copied().map(ElementKey::Identity).collect();
        ListState { elements, keys }
    }

    fn by_id() -> Comparer {
        Comparer::new(|_, a, b| a.cmp(&b))
    }

    #[test]
    fn sort_replays_its_recorded_order() {
        let mut s = state(&[1, 2, 3]);
        let sort = ListChange::Sort {
            comparer: by_id(),
            order: ids(&[3, 1, 2]),
        };
        sort.apply(&mut s).unwrap();
        assert_eq!(s, state(&[3, 1, 2]));

        let mut other = state(&[1, 4, 3]);
        assert!(matches!(
            sort.apply(&mut other),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(other, state(&[1, 4, 3]));
    }

    #[test]
    fn move_targets_post_removal_index() {
        let mut s = state(&[1, 2, 3, 4]);
        ListChange::Move {
            elements: ids(&[1, 2]),
            from: 0,
            to: 2,
        }
        .apply(&mut s)
        .unwrap();
        assert_eq!(s, state(&[3, 4, 1, 2]));
    }

    #[test]
    fn stale_changes_are_rejected() {
        let mut s = state(&[1, 2]);
        let remove = ListChange::Remove {
            elements: ids(&[3]),
            index: 1,
        };
        assert!(matches!(
            remove.apply(&mut s),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(s, state(&[1, 2]));
    }

    #[test]
    fn prepare_and_cancel_are_inverse() {
        let mut refs = RefRegistry::default();
        let list = ObjectId(9);
        let add = ListChange::Add {
            elements: ids(&[1, 2]),
            keys: vec![],
            index: 0,
        };
        add.prepare(list, &mut refs);
        assert_eq!(refs.get(ObjectId(1)).unwrap().delta(), 1);
        add.cancel(list, &mut refs);
        assert!(refs.get(ObjectId(1)).unwrap().is_empty());

        let replace = Replace {
            property: PropertyId(0),
            value_old: Value::Object(ObjectId(1)),
            value_new: Value::Object(ObjectId(2)),
            state_old: PropertyState::Specified,
            state_new: PropertyState::Specified,
        };
        replace.prepare(ObjectId(5), &mut refs);
        assert_eq!(refs.get(ObjectId(1)).unwrap().delta(), -1);
        assert_eq!(refs.get(ObjectId(2)).unwrap().delta(), 1);
        replace.cancel(ObjectId(5), &mut refs);
        assert!(refs.get(ObjectId(1)).unwrap().is_empty());
        assert!(refs.get(ObjectId(2)).unwrap().is_empty());
    }

    #[test]
    fn display() {
        let change = ListChange::Move {
            elements: ids(&[2]),
            from: 1,
            to: 2,
        };
        assert_eq!(change.to_string(), "move [#2] 1 -> 2");
    }
}
