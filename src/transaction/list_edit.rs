// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::Transaction;
use crate::{
    changeset::{ChangesetRef, SetOptions},
    error::{Error, Result},
    graph::{Comparer, ObjectId, ObjectKind},
};

/// Edit handle for one list container inside a [`Transaction`].
///
/// Positions refer to the pending contents of the container, that is, the committed elements
/// with every change of the transaction applied in order.
///
/// # Example
///
/// ```
/// # use txgraph::{Graph, PropertyDecl, SchemaBuilder, ValueKind, Comparer};
/// # let mut builder = SchemaBuilder::new();
/// # builder.complex("Crate").property(PropertyDecl::list("items", "Item"));
/// # builder.complex("Item").property(PropertyDecl::scalar("rank", ValueKind::I64));
/// # let mut graph = Graph::new(builder.build().unwrap());
/// # let krate = graph.create("Crate").unwrap();
/// # let items = graph.list_of(krate, "items").unwrap();
/// let mut tx = graph.transact();
/// let a = tx.create("Item").unwrap();
/// let b = tx.create("Item").unwrap();
/// tx.object(a).unwrap().set("rank", 2).unwrap();
/// tx.object(b).unwrap().set("rank", 1).unwrap();
///
/// let mut list = tx.list(items).unwrap();
/// list.push(&[a, b]).unwrap();
/// list.sort(Comparer::by_property("rank")).unwrap();
/// assert_eq!(list.elements().unwrap(), vec![b, a]);
/// tx.commit().unwrap();
///
/// assert_eq!(graph.elements(items).unwrap(), &[b, a]);
/// ```
pub struct ListEdit<'t, 'g> {
    tx: &'t mut Transaction<'g>,
    id: ObjectId,
}

impl<'t, 'g> ListEdit<'t, 'g> {
    pub(crate) fn new(tx: &'t mut Transaction<'g>, id: ObjectId) -> Result<Self> {
        match tx.graph.object(id)?.kind() {
            ObjectKind::List(_) => Ok(Self { tx, id }),
            ObjectKind::Complex(_) => Err(Error::invalid_argument(format!(
                "{id} is a complex object, not a list"
            ))),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Reconciles the container with `elements`; see [`SetOptions`].
    ///
    /// Elements are matched by key. New keys are added, missing keys removed, and matched
    /// elements reordered, each class only if its option is enabled. Returns whether anything
    /// was recorded.
    pub fn set(&mut self, elements: &[ObjectId], options: SetOptions) -> Result<bool> {
        self.tx.list_set(self.id, elements, options)
    }

    /// Inserts `elements` at `index`.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentInvalid`] if `index` is past the end, an element has the wrong type, or
    /// an element's key is already in the container.
    pub fn insert(&mut self, index: usize, elements: &[ObjectId]) -> Result<()> {
        self.tx.list_insert(self.id, elements, index)
    }

    /// Appends `elements`.
    pub fn push(&mut self, elements: &[ObjectId]) -> Result<()> {
        self.tx.list_push(self.id, elements)
    }

    /// Removes the given elements, ignoring those not in the container.
    pub fn remove(&mut self, elements: &[ObjectId]) -> Result<usize> {
        self.tx.list_remove(self.id, elements)
    }

    /// Removes up to `count` elements starting at `start`, which counts from the end if negative.
    pub fn remove_at(&mut self, start: isize, count: usize) -> Result<usize> {
        self.tx.list_remove_at(self.id, start, count)
    }

    /// Moves `element` to `index`, clamped to the last position.
    pub fn move_to(&mut self, element: ObjectId, index: usize) -> Result<bool> {
        self.tx.list_move(self.id, element, index)
    }

    pub fn sort(&mut self, comparer: Comparer) -> Result<()> {
        self.tx.list_sort(self.id, comparer)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.tx.list_clear(self.id)
    }

    /// The pending elements.
    pub fn elements(&mut self) -> Result<Vec<ObjectId>> {
        Ok(self.tx.projection(self.id)?.elements)
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.tx.projection(self.id)?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The changeset recorded for this container, if any.
    pub fn changeset(&self) -> Option<ChangesetRef<'_>> {
        self.tx.changeset(self.id)
    }
}
