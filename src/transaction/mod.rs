// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Transactions over a [`Graph`].
//!
//! A [`Transaction`] records edits to complex objects and list containers without touching the
//! graph. Reads through the transaction see the pending contents; reads through the graph keep
//! seeing the committed contents until [`Transaction::commit`] applies everything at once.
//!
//! ```
//! use txgraph::{Graph, PropertyDecl, SchemaBuilder, ValueKind};
//!
//! let mut builder = SchemaBuilder::new();
//! builder
//!     .complex("Order")
//!     .property(PropertyDecl::scalar("status", ValueKind::String).with_default("new"))
//!     .property(PropertyDecl::list("lines", "Line"));
//! builder
//!     .complex("Line")
//!     .property(PropertyDecl::scalar("qty", ValueKind::I64));
//! let mut graph = Graph::new(builder.build().unwrap());
//! let order = graph.create("Order").unwrap();
//! let line = graph.create("Line").unwrap();
//!
//! let mut tx = graph.transact();
//! tx.object(order).unwrap().set("status", "open").unwrap();
//! tx.object(line).unwrap().set("qty", 3).unwrap();
//! tx.object(order).unwrap().list("lines").unwrap().push(&[line]).unwrap();
//!
//! // IMPORTANT: dropping the transaction instead discards every change
//! let delta = tx.commit().unwrap();
//! assert!(delta.0.changeset(order).unwrap().has_changes());
//!
//! let lines = graph.list_of(order, "lines").unwrap();
//! assert_eq!(graph.elements(lines).unwrap(), &[line]);
//! assert_eq!(graph.ref_count(line).unwrap(), 1);
//! ```
//!
//! # Lifecycle
//!
//! - **On creation**: the transaction borrows the graph exclusively.
//! - **During operations**: every edit is validated first and then recorded in the changeset of
//!   its target, creating that changeset (and the changesets of the target's parents) on demand.
//!   A call that fails records nothing.
//! - **On commit**: changesets are applied in descending net order, reference links are updated,
//!   and the applied log is returned as a [`Delta`].
//! - **On drop**: an open transaction is rejected.
//!
//! Once committed or rejected, a transaction is inert and every further operation fails with
//! [`Error::InvalidOperation`].
//!
//! # Scopes
//!
//! [`Transaction::enter_scope`] returns a [`Scope`] guard. Scopes nest; accepting the outermost
//! one commits, rejecting any of them (or dropping one without accepting it) rejects the whole
//! transaction.
use crate::{
    changeset::{Body, ChangeLog, Changeset, ChangesetId, ChangesetRef, ChangesetStatus},
    error::{Error, Result},
    graph::{Graph, ListState, Lookup, ObjectId, ObjectKind, Parent, Slot},
    schema::{PropertyId, Schema},
    sentinel::{DummySentinel, ListSentinel, ReplaceSentinel, Visit},
    value::{PropertyState, Value},
};
use smallvec::SmallVec;
use std::{collections::BTreeMap, fmt};

pub(crate) mod change_ref;
mod complex_edit;
mod delta;
mod list_edit;
mod scope;

pub use change_ref::{ChangeRef, RefTransition};
pub use complex_edit::ComplexEdit;
pub use delta::Delta;
pub use list_edit::ListEdit;
pub use scope::{Scope, ScopeExit};

use change_ref::RefRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Committed,
    Rejected,
}

/// An edit session over a [`Graph`]; see the [module documentation](self).
pub struct Transaction<'g> {
    pub(crate) graph: &'g mut Graph,
    pub(crate) log: ChangeLog,
    pub(crate) refs: RefRegistry,
    pub(crate) version: u64,
    depth: usize,
    status: Status,
}

impl<'g> Transaction<'g> {
    pub(crate) fn new(graph: &'g mut Graph) -> Self {
        let log = ChangeLog::new(graph.shared_schema());
        let version = graph.version;
        Self {
            graph,
            log,
            refs: RefRegistry::default(),
            version,
            depth: 0,
            status: Status::Open,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.status {
            Status::Open => Ok(()),
            Status::Committed => Err(Error::invalid_operation(
                "the transaction was already committed",
            )),
            Status::Rejected => Err(Error::invalid_operation(
                "the transaction was already rejected",
            )),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == Status::Open
    }

    /// Whether the transaction is open and at least one [`Scope`] is entered.
    pub fn is_current(&self) -> bool {
        self.is_open() && self.depth > 0
    }

    /// The most recently taken version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Consumes the next version. Every recorded mutation takes exactly one.
    pub(crate) fn take_next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn schema(&self) -> &Schema {
        self.graph.schema()
    }

    /// The live change log of this transaction.
    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    /// The changeset recorded for `target`, if any.
    pub fn changeset(&self, target: ObjectId) -> Option<ChangesetRef<'_>> {
        self.log.changeset(target)
    }

    /// Reference bookkeeping of `element` within this transaction, if any.
    pub fn change_ref(&self, element: ObjectId) -> Option<&ChangeRef> {
        self.refs.get(element)
    }

    /// Returns the reference bookkeeping of `element`, creating an empty record if needed.
    pub fn ensure_change_ref(&mut self, element: ObjectId) -> Result<&ChangeRef> {
        self.ensure_open()?;
        self.graph.object(element)?;
        Ok(self.refs.ensure(element))
    }

    /// Committed parent links of `id` with this transaction's reference changes applied.
    pub fn pending_parents(&self, id: ObjectId) -> Result<SmallVec<[Parent; 2]>> {
        let committed = &self.graph.object(id)?.parents;
        Ok(match self.refs.get(id) {
            Some(r) => r.project(committed),
            None => committed.clone(),
        })
    }

    /// Returns the changeset of `target`, opening one if this transaction has none yet.
    ///
    /// Opening a changeset also opens the changesets of every pending parent of `target` and
    /// attaches the new changeset beneath them.
    pub fn ensure_changeset(&mut self, target: ObjectId) -> Result<ChangesetId> {
        self.ensure_open()?;
        if let Some(id) = self.log.by_target.get(&target) {
            return Ok(*id);
        }
        let object = self.graph.object(target)?;
        let id = self.log.insert(Changeset::new(
            target,
            object.kind(),
            object.version,
            self.version,
        ));
        tracing::trace!(%target, changeset = id.0, "opened changeset");
        self.on_child_changeset_created(target, id)?;
        Ok(id)
    }

    /// Attaches the new changeset `child` of `target` beneath the changesets of its parents.
    fn on_child_changeset_created(&mut self, target: ObjectId, child: ChangesetId) -> Result<()> {
        for parent in self.pending_parents(target)? {
            let parent_cs = self.ensure_changeset(parent.container)?;
            match parent.slot {
                Slot::Property(property) => self.attach_nested_property(parent_cs, property, child),
                Slot::Element => self.attach_nested_element(parent_cs, target, child)?,
            }
        }
        Ok(())
    }

    /// Called when a property of the changeset `container` starts referencing `element`.
    pub(crate) fn add_complex_element(&mut self, container: ChangesetId, element: ObjectId) {
        if self.log.read_only {
            return;
        }
        if let Some(child) = self.log.by_target.get(&element).copied() {
            self.log.attach(container, child);
        }
    }

    /// Called when a property of the changeset `container` stops referencing `element`.
    pub(crate) fn remove_complex_element(&mut self, container: ChangesetId, element: ObjectId) {
        if self.log.read_only {
            return;
        }
        if let Some(child) = self.log.by_target.get(&element).copied() {
            tracing::trace!(container = container.0, %element, "detached element");
            self.log.reset_net_order(child);
        }
    }

    /// Creates a new complex object of type `type_name`.
    ///
    /// The object is allocated right away but stays unreferenced until an edit of this
    /// transaction references it and that edit is committed.
    pub fn create(&mut self, type_name: &str) -> Result<ObjectId> {
        self.ensure_open()?;
        self.graph.create(type_name)
    }

    /// An edit handle for the complex object `id`.
    pub fn object(&mut self, id: ObjectId) -> Result<ComplexEdit<'_, 'g>> {
        ComplexEdit::new(self, id)
    }

    /// An edit handle for the list container `id`.
    pub fn list(&mut self, id: ObjectId) -> Result<ListEdit<'_, 'g>> {
        ListEdit::new(self, id)
    }

    /// Reads the pending value of a property.
    pub fn get(&self, id: ObjectId, property: impl crate::schema::AsProperty) -> Result<Value> {
        (self as &dyn Lookup).get(id, property)
    }

    /// Reads the pending state of a property.
    pub fn get_state(
        &self,
        id: ObjectId,
        property: impl crate::schema::AsProperty,
    ) -> Result<PropertyState> {
        let ty = (self as &dyn Lookup).complex_type(id)?;
        let property = property.resolve(self.schema().complex(ty)?)?;
        Lookup::state(self, id, property)
    }

    /// The list container owned by the list-typed `property` of `id`.
    pub fn list_of(
        &self,
        id: ObjectId,
        property: impl crate::schema::AsProperty,
    ) -> Result<ObjectId> {
        self.graph.list_of(id, property)
    }

    /// Reads the committed value of a property, ignoring pending changes.
    pub fn get_old(&self, id: ObjectId, property: impl crate::schema::AsProperty) -> Result<Value> {
        self.graph.get(id, property)
    }

    /// Pending elements of a list container.
    pub fn elements(&self, list: ObjectId) -> Result<Vec<ObjectId>> {
        Lookup::elements(self, list)
    }

    /// Opens a nested scope; see [`Scope`].
    pub fn enter_scope(&mut self) -> Result<Scope<'_, 'g>> {
        self.ensure_open()?;
        self.depth += 1;
        Ok(Scope::new(self))
    }

    pub(crate) fn leave_scope(&mut self) -> usize {
        self.depth = self.depth.saturating_sub(1);
        self.depth
    }

    /// Discards the changes of `target`'s changeset without applying them.
    ///
    /// With `recursive`, the changesets reachable from it are cleared as well, deepest first
    /// (descending net order), before the changeset's own changes. The changesets stay
    /// registered, so later edits reuse them.
    pub fn clear_changes(&mut self, target: ObjectId, recursive: bool) -> Result<()> {
        self.ensure_open()?;
        let Some(root) = self.log.by_target.get(&target).copied() else {
            return Ok(());
        };
        let ids = if recursive {
            let subtree = self.log.subtree(root);
            self.log.descending_net_order(subtree)
        } else {
            vec![root]
        };
        for id in ids {
            self.clear_changeset(id)?;
        }
        Ok(())
    }

    fn clear_changeset(&mut self, id: ChangesetId) -> Result<()> {
        use crate::changeset::primitive::Primitive;

        let target = self.log.get(id).target;
        let version = self.take_next_version();
        self.log.get_mut(id).transaction_version = version;
        match &mut self.log.get_mut(id).body {
            Body::Complex(body) => {
                let replaced: Vec<_> = body.replaces().cloned().collect();
                body.changes
                    .retain(|_, entry| matches!(entry, crate::changeset::ChangeEntry::Nested(_)));
                for replace in replaced.iter().rev() {
                    replace.cancel(target, &mut self.refs);
                }
                for replace in replaced {
                    if let Some(new) = replace.value_new.as_object() {
                        self.remove_complex_element(id, new);
                    }
                    let committed = replace.value_old.as_object();
                    if let Some(child) = committed.and_then(|o| self.log.by_target.get(&o).copied())
                    {
                        self.attach_nested_property(id, replace.property, child);
                    }
                }
            }
            Body::List(body) => {
                let changes = std::mem::take(&mut body.changes);
                body.by_key.clear();
                body.last_clear = None;
                body.mock = None;
                for change in changes.iter().rev() {
                    change.cancel(target, &mut self.refs);
                }
                for change in &changes {
                    for element in change.elements() {
                        if let Some(child) = self.log.by_target.get(element).copied() {
                            self.log.reset_net_order(child);
                        }
                    }
                }
                // committed elements keep their nested changesets
                let committed = self.graph.list_state(target)?.elements.clone();
                for element in committed {
                    if let Some(child) = self.log.by_target.get(&element).copied() {
                        self.attach_nested_element(id, element, child)?;
                    }
                }
            }
        }
        tracing::trace!(%target, changeset = id.0, "cleared changeset");
        Ok(())
    }

    /// Applies every recorded change to the graph.
    ///
    /// Returns the applied change log together with the reference transitions the commit caused.
    /// Consumes the transaction; use [`Transaction::commit_with`] to keep it around after a veto.
    pub fn commit(mut self) -> Result<Delta<ChangeLog>> {
        self.commit_with(&mut DummySentinel)
    }

    /// Shows every recorded change to `sentinel` before applying anything.
    ///
    /// If the sentinel refuses a change, the commit fails with [`Error::Vetoed`], and the graph
    /// and the transaction are left as they were.
    pub fn commit_with<S>(&mut self, sentinel: &mut S) -> Result<Delta<ChangeLog>>
    where
        S: Visit + ReplaceSentinel + ListSentinel,
        S::Error: fmt::Display,
    {
        self.ensure_open()?;
        let order = self.log.descending_net_order(
            (0..self.log.len()).map(|i| ChangesetId(i as u32)),
        );
        self.observe(&order, sentinel)
            .map_err(|err| Error::Vetoed(err.to_string()))?;

        let mut lists = BTreeMap::new();
        for id in &order {
            if let Body::List(_) = self.log.get(*id).body {
                lists.insert(*id, self.committed_list_state(*id)?);
            }
        }
        self.apply(&order, lists)?;

        self.status = Status::Committed;
        let mut log = std::mem::replace(&mut self.log, ChangeLog::new(self.graph.shared_schema()));
        log.read_only = true;
        for changeset in &mut log.changesets {
            if let Body::List(body) = &mut changeset.body {
                body.mock = None;
            }
        }
        for (element, r) in self.refs.iter() {
            if r.is_empty() {
                continue;
            }
            let after = self.graph.object(element)?.parents.len();
            let before = (after as isize - r.delta()) as usize;
            match RefTransition::between(before, after) {
                RefTransition::Unchanged => {}
                transition => {
                    log.transitions.insert(element, transition);
                }
            }
        }
        self.refs.clear();
        tracing::debug!(
            changesets = log.len(),
            version = self.version,
            "committed transaction"
        );
        Ok(Delta(log))
    }

    fn observe<S>(&self, order: &[ChangesetId], sentinel: &mut S) -> Result<(), S::Error>
    where
        S: Visit + ReplaceSentinel + ListSentinel,
    {
        let schema = self.graph.schema();
        for id in order {
            let cs = self.log.get(*id);
            if !cs.has_own_changes() {
                continue;
            }
            sentinel.enter(cs.target)?;
            match (&cs.body, cs.kind) {
                (Body::Complex(body), ObjectKind::Complex(ty)) => {
                    let ty = schema.complex(ty).ok();
                    for replace in body.replaces() {
                        let name = ty
                            .and_then(|ty| ty.property(replace.property).ok())
                            .map(|p| p.name())
                            .unwrap_or_default();
                        sentinel.replace(name, replace)?;
                    }
                }
                (Body::List(body), _) => {
                    for change in &body.changes {
                        sentinel.list_change(change)?;
                    }
                }
                _ => {}
            }
            sentinel.exit()?;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        order: &[ChangesetId],
        mut lists: BTreeMap<ChangesetId, ListState>,
    ) -> Result<()> {
        let version = self.version;
        for id in order {
            let target = self.log.get(*id).target;
            if let Some(state) = lists.remove(id) {
                self.write_list_state(target, state)?;
            } else {
                self.apply_complex(*id)?;
            }
            // objects keep the version of the last commit that changed them
            if self.log.has_changes(*id) {
                self.graph.object_mut(target)?.version = version;
            }
            self.log.get_mut(*id).status = ChangesetStatus::Applied;
        }
        for (element, r) in self.refs.iter() {
            if r.is_empty() {
                continue;
            }
            let object = self.graph.object_mut(element)?;
            object.parents = r.project(&object.parents);
        }
        self.graph.version = version;
        Ok(())
    }

    /// Discards every recorded change. The transaction is inert afterwards.
    pub fn reject(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.reject_inner();
        Ok(())
    }

    pub(crate) fn reject_inner(&mut self) {
        if self.status != Status::Open {
            return;
        }
        self.status = Status::Rejected;
        let changesets = self.log.len();
        self.log = ChangeLog::new(self.graph.shared_schema());
        self.refs.clear();
        tracing::debug!(changesets, "rejected transaction");
    }

    pub(crate) fn commit_inner(&mut self) -> Result<Delta<ChangeLog>> {
        self.commit_with(&mut DummySentinel)
    }

    /// A JSON snapshot of `id` and everything below it, as this transaction sees it.
    #[cfg(feature = "json")]
    pub fn to_json(&self, id: ObjectId) -> Result<serde_json::Value> {
        crate::json::to_json(self, id)
    }
}

impl Lookup for Transaction<'_> {
    fn schema(&self) -> &Schema {
        self.graph.schema()
    }

    fn object_kind(&self, id: ObjectId) -> Result<ObjectKind> {
        Ok(self.graph.object(id)?.kind())
    }

    fn value(&self, id: ObjectId, property: PropertyId) -> Result<Value> {
        match self.log.pending_replace(id, property) {
            Some(replace) => Ok(replace.value_new.clone()),
            None => Lookup::value(&*self.graph, id, property),
        }
    }

    fn state(&self, id: ObjectId, property: PropertyId) -> Result<PropertyState> {
        match self.log.pending_replace(id, property) {
            Some(replace) => Ok(replace.state_new),
            None => Lookup::state(&*self.graph, id, property),
        }
    }

    fn elements(&self, list: ObjectId) -> Result<Vec<ObjectId>> {
        match self.log.by_target.get(&list) {
            Some(cs) => Ok(self.projected_state(*cs)?.elements),
            None => Lookup::elements(&*self.graph, list),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.reject_inner();
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("version", &self.version)
            .field("depth", &self.depth)
            .field("status", &self.status)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
