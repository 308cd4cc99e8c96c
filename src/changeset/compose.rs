// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Composition of two sequential changesets of the same target.
use super::{
    Body, ChangeEntry, ChangeLog, Changeset, ChangesetId, ChangesetRef, ChangesetStatus, Replace,
    complex::ComplexBody, list::ListBody,
};
use crate::{
    GraphRandomState, create_map,
    error::{Error, Result},
};
use std::{
    collections::{BTreeSet, HashMap},
    ptr,
    sync::Arc,
};

/// The read-only result of [`ChangesetRef::compose`].
///
/// Owns a [`ChangeLog`] holding the composed root changeset together with every nested changeset
/// reachable from it, composed or copied from the inputs.
#[derive(Debug, Clone)]
pub struct Composed {
    log: ChangeLog,
    root: ChangesetId,
}

impl Composed {
    pub fn root(&self) -> ChangesetRef<'_> {
        ChangesetRef {
            log: &self.log,
            id: self.root,
        }
    }

    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn into_log(self) -> ChangeLog {
        self.log
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    A,
    B,
}

struct Composer<'a> {
    a: &'a ChangeLog,
    b: &'a ChangeLog,
    out: ChangeLog,
    copies: HashMap<(Source, ChangesetId), ChangesetId, GraphRandomState>,
    pairs: HashMap<(ChangesetId, ChangesetId), ChangesetId, GraphRandomState>,
}

impl<'a> Composer<'a> {
    fn log(&self, source: Source) -> &'a ChangeLog {
        match source {
            Source::A => self.a,
            Source::B => self.b,
        }
    }

    /// Reserves a slot in the output for a changeset of the same target as `like`.
    fn reserve(&mut self, like: &Changeset, target_version: u64, version: u64) -> ChangesetId {
        let mut cs = Changeset::new(like.target, like.kind, target_version, version);
        cs.net_order = like.net_order;
        cs.read_only = true;
        cs.status = ChangesetStatus::Composed;
        self.out.insert(cs)
    }

    /// Deep-copies a changeset of one input, preserving sharing between nested changesets.
    fn copy(&mut self, source: Source, id: ChangesetId) -> ChangesetId {
        if let Some(copied) = self.copies.get(&(source, id)) {
            return *copied;
        }
        let log = self.log(source);
        let original = log.get(id);
        let new = self.reserve(
            original,
            original.target_version,
            original.transaction_version,
        );
        self.copies.insert((source, id), new);
        let body = match &original.body {
            Body::Complex(body) => {
                let mut changes = std::collections::BTreeMap::new();
                for (property, entry) in &body.changes {
                    changes.insert(*property, self.copy_entry(source, entry));
                }
                Body::Complex(ComplexBody { changes })
            }
            Body::List(body) => Body::List(ListBody {
                changes: body.changes.clone(),
                by_key: body
                    .by_key
                    .iter()
                    .map(|(key, child)| (key.clone(), self.copy(source, *child)))
                    .collect(),
                last_clear: body.last_clear,
                mock: None,
            }),
        };
        self.out.get_mut(new).body = body;
        new
    }

    fn copy_entry(&mut self, source: Source, entry: &ChangeEntry) -> ChangeEntry {
        match entry {
            ChangeEntry::Nested(child) => ChangeEntry::Nested(self.copy(source, *child)),
            ChangeEntry::Replace(replace) => {
                self.copy_value_changeset(source, replace);
                ChangeEntry::Replace(replace.clone())
            }
        }
    }

    /// Carries over the changeset of an assigned object, so it stays reachable.
    fn copy_value_changeset(&mut self, source: Source, replace: &Replace) {
        if let Some(child) = replace
            .value_new
            .as_object()
            .and_then(|o| self.log(source).by_target.get(&o).copied())
        {
            self.copy(source, child);
        }
    }

    /// Composes changeset `a` of the first input with changeset `b` of the second.
    fn compose(&mut self, a: ChangesetId, b: ChangesetId) -> Result<ChangesetId> {
        if let Some(composed) = self.pairs.get(&(a, b)) {
            return Ok(*composed);
        }
        let (ca, cb) = (self.a.get(a), self.b.get(b));
        if ca.target != cb.target {
            return Ok(self.copy(Source::B, b));
        }
        let new = self.reserve(
            cb,
            ca.target_version,
            ca.transaction_version.max(cb.transaction_version),
        );
        self.pairs.insert((a, b), new);

        let body = match (&ca.body, &cb.body) {
            (Body::Complex(ba), Body::Complex(bb)) => {
                let keys: BTreeSet<_> = ba.changes.keys().chain(bb.changes.keys()).collect();
                let mut changes = std::collections::BTreeMap::new();
                for property in keys {
                    let entry = match (ba.changes.get(property), bb.changes.get(property)) {
                        (Some(ea), None) => self.copy_entry(Source::A, ea),
                        (None, Some(eb)) => self.copy_entry(Source::B, eb),
                        (Some(ChangeEntry::Nested(x)), Some(ChangeEntry::Nested(y))) => {
                            ChangeEntry::Nested(self.compose(*x, *y)?)
                        }
                        (Some(ChangeEntry::Replace(ra)), Some(ChangeEntry::Replace(rb))) => {
                            self.copy_value_changeset(Source::B, rb);
                            ChangeEntry::Replace(Replace {
                                property: rb.property,
                                value_old: ra.value_old.clone(),
                                state_old: ra.state_old,
                                value_new: rb.value_new.clone(),
                                state_new: rb.state_new,
                            })
                        }
                        (Some(ChangeEntry::Replace(ra)), Some(ChangeEntry::Nested(y))) => {
                            // The later edits happened inside the object assigned first
                            let assigned = ra
                                .value_new
                                .as_object()
                                .and_then(|o| self.a.by_target.get(&o).copied());
                            match assigned {
                                Some(x) => {
                                    self.compose(x, *y)?;
                                }
                                None => {
                                    self.copy(Source::B, *y);
                                }
                            }
                            ChangeEntry::Replace(ra.clone())
                        }
                        (Some(ChangeEntry::Nested(_)), Some(eb)) => self.copy_entry(Source::B, eb),
                        (None, None) => continue,
                    };
                    changes.insert(*property, entry);
                }
                Body::Complex(ComplexBody { changes })
            }
            (Body::List(la), Body::List(lb)) => {
                let mut changes = Vec::new();
                let mut last_clear = None;
                if lb.last_clear.is_none() {
                    changes.extend_from_slice(&la.changes[la.last_clear.unwrap_or(0)..]);
                    if la.last_clear.is_some() {
                        last_clear = Some(0);
                    }
                }
                let offset = changes.len();
                changes.extend_from_slice(&lb.changes[lb.last_clear.unwrap_or(0)..]);
                if lb.last_clear.is_some() {
                    last_clear = Some(offset);
                }

                let mut by_key = std::collections::BTreeMap::new();
                for (key, x) in &la.by_key {
                    let child = match lb.by_key.get(key) {
                        Some(y) => self.compose(*x, *y)?,
                        None => self.copy(Source::A, *x),
                    };
                    by_key.insert(key.clone(), child);
                }
                for (key, y) in &lb.by_key {
                    if !la.by_key.contains_key(key) {
                        let child = self.copy(Source::B, *y);
                        by_key.insert(key.clone(), child);
                    }
                }
                Body::List(ListBody {
                    changes,
                    by_key,
                    last_clear,
                    mock: None,
                })
            }
            _ => {
                return Err(Error::invalid_argument(
                    "cannot compose a complex changeset with a list changeset",
                ));
            }
        };
        self.out.get_mut(new).body = body;
        Ok(new)
    }
}

impl ChangesetRef<'_> {
    /// Composes this changeset with `other`, a later changeset of the same target.
    ///
    /// The result is the net effect of applying `self` and then `other`. Keys touched by only
    /// one side are carried over as they are. For keys touched by both, nested changesets of the
    /// same object are composed recursively and two `Replace`s combine into one from the old
    /// contents of `self` to the new contents of `other`. A `Replace` in `self` followed by nested
    /// edits in `other` stays a `Replace`, with the nested edits folded into the changeset of the
    /// assigned object. A `Replace` in `other` wins over nested edits in `self`. For lists, the
    /// changes of `other` follow the live changes of `self`, and a clear in `other` drops those
    /// of `self` entirely.
    ///
    /// Neither input is modified.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentInvalid`] if `other` is this very changeset, belongs to a graph with
    /// another schema, describes another target, or was opened at an older target version.
    pub fn compose(&self, other: &ChangesetRef<'_>) -> Result<Composed> {
        if ptr::eq(self.log, other.log) && self.id == other.id {
            return Err(Error::invalid_argument(
                "cannot compose a changeset with itself",
            ));
        }
        if !Arc::ptr_eq(self.log.shared_schema(), other.log.shared_schema()) {
            return Err(Error::invalid_argument(
                "cannot compose changesets of different schemas",
            ));
        }
        if self.target() != other.target() {
            return Err(Error::invalid_argument(format!(
                "cannot compose a changeset of {} with one of {}",
                self.target(),
                other.target()
            )));
        }
        if self.target_kind() != other.target_kind() {
            return Err(Error::invalid_argument(
                "cannot compose changesets of different kinds",
            ));
        }
        if other.target_version() < self.target_version() {
            return Err(Error::invalid_argument(format!(
                "target version {} of the later changeset is older than {}",
                other.target_version(),
                self.target_version()
            )));
        }

        let mut out = ChangeLog::new(Arc::clone(self.log.shared_schema()));
        out.read_only = true;
        let mut composer = Composer {
            a: self.log,
            b: other.log,
            out,
            copies: create_map(),
            pairs: create_map(),
        };
        let root = composer.compose(self.id, other.id)?;
        let mut log = composer.out;
        log.reset_net_order(root);
        tracing::debug!(object = %self.target(), changesets = log.len(), "composed changesets");
        Ok(Composed { log, root })
    }
}
