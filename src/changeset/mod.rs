// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Per-target change logs.
//!
//! A [`ChangeLog`] is an arena of [`Changeset`]s, one per edited object, indexed by
//! [`ChangesetId`] and looked up by target through a registry. Changesets never point at each
//! other directly: a complex changeset refers to the changeset of a nested object by id
//! ([`ChangeEntry::Nested`]), and a list changeset keeps a map from element key to the element's
//! changeset id. The same element changeset can therefore be referenced from several parents,
//! which is exactly how shared elements behave in the graph.
//!
//! Every changeset carries a *net order*, its topological depth below the changesets referencing
//! it. Attaching a child raises the child's net order to at least one more than its parent's;
//! detaching it recomputes the net order of its subtree. Commit and recursive clearing visit
//! changesets in descending net order, so descendants are always processed before the
//! changesets that reference them, regardless of the order in which edits were made.
//!
//! Read access goes through [`ChangesetRef`], a cheap view that also offers
//! [`compose`](ChangesetRef::compose).
use crate::{
    GraphRandomState, create_map,
    error::{Error, Result},
    graph::{ElementKey, ObjectId, ObjectKind},
    schema::{AsProperty, PropertyId, Schema},
    transaction::change_ref::RefTransition,
    value::PropertyState,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    ops::ControlFlow,
    sync::Arc,
};

pub(crate) mod complex;
mod compose;
pub(crate) mod list;
pub mod primitive;
pub(crate) mod reconcile;

pub use complex::ChangeEntry;
pub use compose::Composed;
pub use primitive::{ListChange, Replace};
pub use reconcile::SetOptions;

use complex::ComplexBody;
use list::ListBody;

/// Index of a [`Changeset`] in its [`ChangeLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangesetId(pub(crate) u32);

impl ChangesetId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetStatus {
    /// Still recording changes.
    Open,
    /// Pushed into its target by a commit.
    Applied,
    /// Produced by [`ChangesetRef::compose`]; never applied.
    Composed,
}

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Complex(ComplexBody),
    List(ListBody),
}

/// The change log of one target object within one transaction.
#[derive(Debug, Clone)]
pub struct Changeset {
    pub(crate) target: ObjectId,
    pub(crate) kind: ObjectKind,
    /// Committed version of the target when the changeset was opened.
    pub(crate) target_version: u64,
    /// Last transaction version that touched this changeset.
    pub(crate) transaction_version: u64,
    pub(crate) net_order: u32,
    pub(crate) read_only: bool,
    pub(crate) status: ChangesetStatus,
    pub(crate) body: Body,
}

impl Changeset {
    pub(crate) fn new(
        target: ObjectId,
        kind: ObjectKind,
        target_version: u64,
        version: u64,
    ) -> Self {
        let body = match kind {
            ObjectKind::Complex(_) => Body::Complex(ComplexBody::default()),
            ObjectKind::List(_) => Body::List(ListBody::default()),
        };
        Self {
            target,
            kind,
            target_version,
            transaction_version: version,
            net_order: 0,
            read_only: false,
            status: ChangesetStatus::Open,
            body,
        }
    }

    /// Whether the changeset records primitive changes of its own, ignoring nested changesets.
    pub(crate) fn has_own_changes(&self) -> bool {
        match &self.body {
            Body::Complex(body) => body.replaces().next().is_some(),
            Body::List(body) => !body.changes.is_empty(),
        }
    }
}

/// An arena of changesets plus the registry mapping targets to them.
///
/// Transactions record into a `ChangeLog`; [`Transaction::commit`](crate::Transaction::commit)
/// hands it back as a read-only record of what was applied, and
/// [`ChangesetRef::compose`] produces a read-only one holding the composed changesets.
#[derive(Clone)]
pub struct ChangeLog {
    schema: Arc<Schema>,
    pub(crate) changesets: Vec<Changeset>,
    pub(crate) by_target: HashMap<ObjectId, ChangesetId, GraphRandomState>,
    pub(crate) read_only: bool,
    pub(crate) transitions: BTreeMap<ObjectId, RefTransition>,
}

impl ChangeLog {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            changesets: Vec::new(),
            by_target: create_map(),
            read_only: false,
            transitions: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn shared_schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Whether this log is a committed or composed record rather than a live transaction log.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    /// The changeset recorded for `target`, if any.
    pub fn changeset(&self, target: ObjectId) -> Option<ChangesetRef<'_>> {
        self.by_target
            .get(&target)
            .map(|id| ChangesetRef { log: self, id: *id })
    }

    /// All changesets in creation order.
    pub fn iter(&self) -> impl Iterator<Item = ChangesetRef<'_>> {
        (0..self.changesets.len()).map(|i| ChangesetRef {
            log: self,
            id: ChangesetId(i as u32),
        })
    }

    /// Reference transitions caused by the commit that produced this log.
    pub fn transitions(&self) -> &BTreeMap<ObjectId, RefTransition> {
        &self.transitions
    }

    pub fn transition(&self, element: ObjectId) -> RefTransition {
        self.transitions
            .get(&element)
            .copied()
            .unwrap_or(RefTransition::Unchanged)
    }

    pub(crate) fn insert(&mut self, changeset: Changeset) -> ChangesetId {
        let id = ChangesetId(self.changesets.len() as u32);
        self.by_target.entry(changeset.target).or_insert(id);
        self.changesets.push(changeset);
        id
    }

    pub(crate) fn get(&self, id: ChangesetId) -> &Changeset {
        &self.changesets[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: ChangesetId) -> &mut Changeset {
        &mut self.changesets[id.index()]
    }

    pub(crate) fn complex_body_mut(&mut self, id: ChangesetId) -> Result<&mut ComplexBody> {
        match &mut self.get_mut(id).body {
            Body::Complex(body) => Ok(body),
            Body::List(_) => Err(Error::invalid_argument("not a complex changeset")),
        }
    }

    pub(crate) fn list_body(&self, id: ChangesetId) -> Result<&ListBody> {
        match &self.get(id).body {
            Body::List(body) => Ok(body),
            Body::Complex(_) => Err(Error::invalid_argument("not a list changeset")),
        }
    }

    pub(crate) fn list_body_mut(&mut self, id: ChangesetId) -> Result<&mut ListBody> {
        match &mut self.get_mut(id).body {
            Body::List(body) => Ok(body),
            Body::Complex(_) => Err(Error::invalid_argument("not a list changeset")),
        }
    }

    /// Visits every changeset directly reachable from `id`.
    ///
    /// This includes the changesets of objects that a recorded `Replace` assigns, since those
    /// objects become part of the target once the change is applied.
    pub(crate) fn each_child<B>(
        &self,
        id: ChangesetId,
        mut f: impl FnMut(ChangesetId) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        match &self.get(id).body {
            Body::Complex(body) => {
                for entry in body.changes.values() {
                    match entry {
                        ChangeEntry::Nested(child) => f(*child)?,
                        ChangeEntry::Replace(replace) => {
                            if let Some(child) = replace
                                .value_new
                                .as_object()
                                .and_then(|o| self.by_target.get(&o))
                            {
                                f(*child)?;
                            }
                        }
                    }
                }
            }
            Body::List(body) => {
                for child in body.by_key.values() {
                    f(*child)?;
                }
            }
        }
        ControlFlow::Continue(())
    }

    pub(crate) fn children(&self, id: ChangesetId) -> Vec<ChangesetId> {
        let mut children = Vec::new();
        let _ = self.each_child::<()>(id, |child| {
            children.push(child);
            ControlFlow::Continue(())
        });
        children
    }

    /// `true` if `id` or anything reachable from it records at least one primitive change.
    pub(crate) fn has_changes(&self, id: ChangesetId) -> bool {
        let mut visited = HashSet::new();
        self.has_changes_inner(id, &mut visited)
    }

    fn has_changes_inner(&self, id: ChangesetId, visited: &mut HashSet<ChangesetId>) -> bool {
        if !visited.insert(id) {
            return false;
        }
        if self.get(id).has_own_changes() {
            return true;
        }
        self.each_child(id, |child| {
            if self.has_changes_inner(child, visited) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .is_break()
    }

    /// Every changeset reachable from `root`, `root` included.
    pub(crate) fn subtree(&self, root: ChangesetId) -> Vec<ChangesetId> {
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        let mut out = Vec::new();
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                out.push(id);
                stack.extend(self.children(id));
            }
        }
        out
    }

    /// Raises the net order of `id` (and transitively its children) to at least `min`.
    pub(crate) fn raise_net_order(&mut self, id: ChangesetId, min: u32) {
        let mut on_path = HashSet::new();
        self.raise_inner(id, min, &mut on_path);
    }

    fn raise_inner(&mut self, id: ChangesetId, min: u32, on_path: &mut HashSet<ChangesetId>) {
        if self.get(id).net_order >= min || !on_path.insert(id) {
            return;
        }
        self.get_mut(id).net_order = min;
        tracing::trace!(changeset = id.0, net_order = min, "raised net order");
        for child in self.children(id) {
            self.raise_inner(child, min + 1, on_path);
        }
        on_path.remove(&id);
    }

    /// Records that `child` is now referenced from `parent`.
    ///
    /// The child ends up deeper than `parent` and at least as recent, and so does everything
    /// below it.
    pub(crate) fn attach(&mut self, parent: ChangesetId, child: ChangesetId) {
        let parent = self.get(parent);
        let (min, version) = (parent.net_order + 1, parent.transaction_version);
        self.raise_net_order(child, min);
        self.raise_transaction_version(child, version);
    }

    /// Raises the transaction version of `id` and everything reachable from it to `version`.
    fn raise_transaction_version(&mut self, id: ChangesetId, version: u64) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let cs = self.get_mut(id);
            if cs.transaction_version >= version {
                continue;
            }
            cs.transaction_version = version;
            stack.extend(self.children(id));
        }
    }

    /// Recomputes the net order of the subtree below `root` from the changesets that still
    /// reference it.
    pub(crate) fn reset_net_order(&mut self, root: ChangesetId) {
        let subtree: HashSet<_> = self.subtree(root).into_iter().collect();
        for id in &subtree {
            self.get_mut(*id).net_order = 0;
        }
        for idx in 0..self.changesets.len() {
            let parent = ChangesetId(idx as u32);
            for child in self.children(parent) {
                if subtree.contains(&child) {
                    self.attach(parent, child);
                }
            }
        }
        tracing::trace!(changeset = root.0, "reset net order");
    }

    /// Changeset ids in descending net order, ties broken by creation order.
    pub(crate) fn descending_net_order(
        &self,
        ids: impl IntoIterator<Item = ChangesetId>,
    ) -> Vec<ChangesetId> {
        let mut ids: Vec<_> = ids.into_iter().collect();
        ids.sort_by_key(|id| (std::cmp::Reverse(self.get(*id).net_order), *id));
        ids
    }
}

impl fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeLog")
            .field("changesets", &self.changesets)
            .field("read_only", &self.read_only)
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}

fn state_name(state: PropertyState) -> &'static str {
    match state {
        PropertyState::Default => "default",
        PropertyState::Specified => "specified",
    }
}

impl fmt::Display for ChangeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cs in &self.changesets {
            match cs.kind {
                ObjectKind::Complex(ty) => {
                    let ty = self.schema.complex(ty).map_err(|_| fmt::Error)?;
                    writeln!(f, "{} {} (net {})", cs.target, ty.name(), cs.net_order)?;
                    let body = match &cs.body {
                        Body::Complex(body) => body,
                        Body::List(_) => return Err(fmt::Error),
                    };
                    for (property, entry) in &body.changes {
                        let name = ty.property(*property).map_err(|_| fmt::Error)?.name();
                        match entry {
                            ChangeEntry::Replace(r) => {
                                write!(f, "  {name}: {} -> {}", r.value_old, r.value_new)?;
                                if r.state_old != r.state_new {
                                    write!(
                                        f,
                                        " ({} -> {})",
                                        state_name(r.state_old),
                                        state_name(r.state_new)
                                    )?;
                                }
                                writeln!(f)?;
                            }
                            ChangeEntry::Nested(child) => {
                                writeln!(f, "  {name}: nested {}", self.get(*child).target)?;
                            }
                        }
                    }
                }
                ObjectKind::List(kind) => {
                    let element = self.schema.complex(kind.element).map_err(|_| fmt::Error)?;
                    writeln!(
                        f,
                        "{} list of {} (net {})",
                        cs.target,
                        element.name(),
                        cs.net_order
                    )?;
                    let body = match &cs.body {
                        Body::List(body) => body,
                        Body::Complex(_) => return Err(fmt::Error),
                    };
                    for change in &body.changes {
                        writeln!(f, "  {change}")?;
                    }
                    for (key, child) in &body.by_key {
                        writeln!(f, "  [{key}]: nested {}", self.get(*child).target)?;
                    }
                }
            }
        }
        for (element, transition) in &self.transitions {
            if *transition != RefTransition::Unchanged {
                writeln!(f, "{element} {transition:?}")?;
            }
        }
        Ok(())
    }
}

/// A recorded change of one property, as seen through [`ChangesetRef::get_change`].
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    Replace(&'a Replace),
    Nested(ChangesetRef<'a>),
}

/// Read-only view of one changeset in a [`ChangeLog`].
#[derive(Clone, Copy)]
pub struct ChangesetRef<'a> {
    pub(crate) log: &'a ChangeLog,
    pub(crate) id: ChangesetId,
}

impl<'a> ChangesetRef<'a> {
    pub(crate) fn raw(&self) -> &'a Changeset {
        self.log.get(self.id)
    }

    pub fn id(&self) -> ChangesetId {
        self.id
    }

    pub fn log(&self) -> &'a ChangeLog {
        self.log
    }

    pub fn target(&self) -> ObjectId {
        self.raw().target
    }

    pub fn target_kind(&self) -> ObjectKind {
        self.raw().kind
    }

    pub fn target_version(&self) -> u64 {
        self.raw().target_version
    }

    pub fn transaction_version(&self) -> u64 {
        self.raw().transaction_version
    }

    pub fn net_order(&self) -> u32 {
        self.raw().net_order
    }

    pub fn status(&self) -> ChangesetStatus {
        self.raw().status
    }

    /// Composed changesets and the changesets of a committed log are inert snapshots.
    pub fn is_read_only(&self) -> bool {
        self.raw().read_only || self.log.read_only
    }

    /// `true` iff this changeset or any changeset reachable from it records a primitive change.
    ///
    /// Nested changesets whose edits were all reverted do not count.
    pub fn has_changes(&self) -> bool {
        self.log.has_changes(self.id)
    }

    fn complex_body(&self) -> Result<&'a ComplexBody> {
        match &self.raw().body {
            Body::Complex(body) => Ok(body),
            Body::List(_) => Err(Error::invalid_argument(format!(
                "changeset of {} is not a complex changeset",
                self.target()
            ))),
        }
    }

    fn list_body(&self) -> Result<&'a ListBody> {
        match &self.raw().body {
            Body::List(body) => Ok(body),
            Body::Complex(_) => Err(Error::invalid_argument(format!(
                "changeset of {} is not a list changeset",
                self.target()
            ))),
        }
    }

    fn resolve(&self, property: impl AsProperty) -> Result<PropertyId> {
        match self.raw().kind {
            ObjectKind::Complex(ty) => property.resolve(self.log.schema.complex(ty)?),
            ObjectKind::List(_) => Err(Error::invalid_argument(format!(
                "changeset of {} is not a complex changeset",
                self.target()
            ))),
        }
    }

    fn view(&self, entry: &'a ChangeEntry) -> Change<'a> {
        match entry {
            ChangeEntry::Replace(r) => Change::Replace(r),
            ChangeEntry::Nested(id) => Change::Nested(ChangesetRef {
                log: self.log,
                id: *id,
            }),
        }
    }

    /// The change recorded for `property`.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentInvalid`] if the target's type does not declare `property`, or if this
    /// is a list changeset.
    pub fn get_change(&self, property: impl AsProperty) -> Result<Option<Change<'a>>> {
        let property = self.resolve(property)?;
        Ok(self
            .complex_body()?
            .changes
            .get(&property)
            .map(|entry| self.view(entry)))
    }

    /// Whether `property` has a pending change: a `Replace`, or a nested changeset that still
    /// has changes.
    pub fn has_change(&self, property: impl AsProperty) -> Result<bool> {
        Ok(match self.get_change(property)? {
            None => false,
            Some(Change::Replace(_)) => true,
            Some(Change::Nested(nested)) => nested.has_changes(),
        })
    }

    /// All entries of a complex changeset in property declaration order.
    pub fn changes(&self) -> Result<Vec<(PropertyId, Change<'a>)>> {
        Ok(self
            .complex_body()?
            .changes
            .iter()
            .map(|(p, entry)| (*p, self.view(entry)))
            .collect())
    }

    /// Every primitive change of a list changeset, including those made dead by a later clear.
    pub fn primitive_changes(&self) -> Result<&'a [ListChange]> {
        Ok(&self.list_body()?.changes)
    }

    /// The primitive changes that still matter: those since the most recent clear.
    pub fn live_changes(&self) -> Result<&'a [ListChange]> {
        let body = self.list_body()?;
        Ok(&body.changes[body.last_clear.unwrap_or(0)..])
    }

    /// The nested changeset of the element with key `key` in a list changeset.
    pub fn changeset_for_key(&self, key: &ElementKey) -> Result<Option<ChangesetRef<'a>>> {
        Ok(self.list_body()?.by_key.get(key).map(|id| ChangesetRef {
            log: self.log,
            id: *id,
        }))
    }

    /// Visits every nested changeset reachable in one step, stopping early on `Break`.
    pub fn each_child_changeset<B>(
        &self,
        mut f: impl FnMut(ChangesetRef<'a>) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        let log = self.log;
        log.each_child(self.id, |id| f(ChangesetRef { log, id }))
    }
}

impl fmt::Debug for ChangesetRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesetRef")
            .field("id", &self.id)
            .field("target", &self.target())
            .finish()
    }
}
