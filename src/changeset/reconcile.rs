// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Reconciling a list against a desired sequence of elements.
//!
//! [`plan_set`] compares the projected contents of a list with the desired elements and derives
//! a short sequence of `Remove`, `Add`, and `Move` changes that turns the former into the latter:
//!
//! 1. Desired elements are classified by key as unchanged, updated (same key, other instance),
//!    or new.
//! 2. Current elements whose key is not desired, or whose instance is superseded, are removed.
//!    Positions are processed from the highest down and adjacent ones share one `Remove`.
//! 3. Each run of consecutive new elements becomes one `Add`, placed right after the preceding
//!    desired element (or before the following one).
//! 4. A left-to-right scan keeps a watermark of the highest position taken by a desired element
//!    so far. Any desired element found below the watermark is moved right behind it. Consecutive
//!    moves from the same position to the same position are merged into one multi-element `Move`.
use super::ListChange;
use crate::{
    create_map,
    error::{Error, Result},
    graph::{ElementKey, ListState, Lookup, ObjectId, element_key},
    schema::{PropertyId, PropertyKind},
    transaction::Transaction,
    value::{PropertyState, Value},
};
use std::collections::HashSet;

/// Which operation classes [`ListEdit::set`](crate::transaction::ListEdit::set) may use.
///
/// The default permits everything and places leading new elements before the first kept one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Insert desired elements that are not in the list.
    pub add: bool,
    /// Merge a desired element into the listed element with the same key.
    pub update: bool,
    /// Remove listed elements that are not desired.
    pub remove: bool,
    /// Reorder listed elements to follow the desired order.
    pub reorder: bool,
    /// Where new elements without a preceding desired element go; `None` means before the next
    /// desired element, or at the end.
    pub index: Option<usize>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            add: true,
            update: true,
            remove: true,
            reorder: true,
            index: None,
        }
    }
}

impl SetOptions {
    /// Permits nothing; combine with the `with_*` setters.
    pub fn none() -> Self {
        Self {
            add: false,
            update: false,
            remove: false,
            reorder: false,
            index: None,
        }
    }

    pub fn with_add(mut self, add: bool) -> Self {
        self.add = add;
        self
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn with_remove(mut self, remove: bool) -> Self {
        self.remove = remove;
        self
    }

    pub fn with_reorder(mut self, reorder: bool) -> Self {
        self.reorder = reorder;
        self
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    /// Stays, possibly under another instance of the same key.
    Keep(ObjectId),
    New,
    Skip,
}

/// The outcome of [`plan_set`].
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Plan {
    pub(crate) changes: Vec<ListChange>,
    /// `(listed, desired)` pairs whose contents are to be merged.
    pub(crate) merges: Vec<(ObjectId, ObjectId)>,
}

/// Accumulates single-element moves, merging runs from the same position to the same position.
struct MoveBatch {
    elements: Vec<ObjectId>,
    from: usize,
    single_to: usize,
}

impl MoveBatch {
    fn into_change(self) -> ListChange {
        let n = self.elements.len();
        ListChange::Move {
            elements: self.elements,
            from: self.from,
            to: self.single_to + 1 - n,
        }
    }
}

/// Computes the changes turning `current` into `desired`, given as `(element, key)` pairs.
///
/// # Errors
///
/// [`Error::ArgumentInvalid`] if two desired elements share a key.
pub(crate) fn plan_set(
    current: &ListState,
    desired: &[(ObjectId, ElementKey)],
    options: SetOptions,
) -> Result<Plan> {
    let mut desired_keys = HashSet::with_capacity(desired.len());
    for (_, key) in desired {
        if !desired_keys.insert(key) {
            return Err(Error::invalid_argument(format!(
                "key {key} appears more than once"
            )));
        }
    }
    let mut current_index = create_map();
    for (idx, key) in current.keys.iter().enumerate() {
        current_index.insert(key, idx);
    }

    let mut plan = Plan::default();
    let mut removals = Vec::new();
    let fates: Vec<Fate> = desired
        .iter()
        .map(|(element, key)| match current_index.get(key) {
            Some(&idx) => {
                let listed = current.elements[idx];
                if listed == *element {
                    Fate::Keep(listed)
                } else if options.update {
                    plan.merges.push((listed, *element));
                    Fate::Keep(listed)
                } else if options.add && options.remove {
                    removals.push(idx);
                    Fate::New
                } else {
                    Fate::Keep(listed)
                }
            }
            None if options.add => Fate::New,
            None => Fate::Skip,
        })
        .collect();
    if options.remove {
        for (idx, key) in current.keys.iter().enumerate() {
            if !desired_keys.contains(key) {
                removals.push(idx);
            }
        }
    }

    let mut work = current.clone();
    removals.sort_unstable_by(|a, b| b.cmp(a));
    removals.dedup();
    for run in super::list::descending_runs(&removals) {
        let change = ListChange::Remove {
            elements: work.elements[run.clone()].to_vec(),
            index: run.start,
        };
        work.elements.drain(run.clone());
        work.keys.drain(run);
        plan.changes.push(change);
    }

    let present = |work: &ListState, i: usize| match fates[i] {
        Fate::Keep(element) => work.position(element),
        Fate::New => work.position(desired[i].0),
        Fate::Skip => None,
    };
    let mut i = 0;
    while i < desired.len() {
        if fates[i] != Fate::New {
            i += 1;
            continue;
        }
        let start = i;
        while i < desired.len() && fates[i] == Fate::New {
            i += 1;
        }
        let after_previous = (0..start).rev().find_map(|j| present(&work, j)).map(|p| p + 1);
        let index = match (after_previous, options.index) {
            (Some(index), _) => index,
            (None, Some(index)) => index.min(work.len()),
            (None, None) => (i..desired.len())
                .find_map(|j| present(&work, j))
                .unwrap_or(work.len()),
        };
        let (elements, keys): (Vec<_>, Vec<_>) = desired[start..i].iter().cloned().unzip();
        work.elements.splice(index..index, elements.iter().copied());
        work.keys.splice(index..index, keys.iter().cloned());
        plan.changes.push(ListChange::Add {
            elements,
            keys,
            index,
        });
    }

    if options.reorder {
        let mut watermark: Option<usize> = None;
        let mut batch: Option<MoveBatch> = None;
        for i in 0..desired.len() {
            let Some(pos) = present(&work, i) else {
                continue;
            };
            match watermark {
                Some(mark) if pos < mark => {
                    let element = work.elements.remove(pos);
                    let key = work.keys.remove(pos);
                    work.elements.insert(mark, element);
                    work.keys.insert(mark, key);
                    let extends =
                        matches!(&batch, Some(b) if b.from == pos && b.single_to == mark);
                    if let (true, Some(b)) = (extends, batch.as_mut()) {
                        b.elements.push(element);
                    } else {
                        let next = MoveBatch {
                            elements: vec![element],
                            from: pos,
                            single_to: mark,
                        };
                        if let Some(done) = batch.replace(next) {
                            plan.changes.push(done.into_change());
                        }
                    }
                }
                _ => watermark = Some(pos),
            }
        }
        if let Some(done) = batch {
            plan.changes.push(done.into_change());
        }
    }
    Ok(plan)
}

impl Transaction<'_> {
    /// Reconciles `list` with `desired` under `options`; see [`plan_set`].
    ///
    /// Everything is validated before the first change is recorded, so a failing call records
    /// nothing.
    pub(crate) fn list_set(
        &mut self,
        list: ObjectId,
        desired: &[ObjectId],
        options: SetOptions,
    ) -> Result<bool> {
        self.ensure_open()?;
        let state = self.projection(list)?;
        self.check_element_types(list, desired)?;
        let desired: Vec<_> = desired
            .iter()
            .map(|e| Ok((*e, element_key(&*self, *e)?)))
            .collect::<Result<_>>()?;
        let plan = plan_set(&state, &desired, options)?;

        if !plan.changes.is_empty() {
            self.ensure_writable(list)?;
        }
        let mut assignments = Vec::new();
        for (listed, incoming) in &plan.merges {
            assignments.extend(self.merge_assignments(*listed, *incoming)?);
        }

        let mut changed = !plan.changes.is_empty();
        for change in plan.changes {
            self.record_list_change(list, change)?;
        }
        for (target, property, value) in assignments {
            changed |= self.set_property(target, property, Some(value), false)?;
        }
        Ok(changed)
    }

    /// The property assignments that carry the specified contents of `incoming` into `listed`.
    fn merge_assignments(
        &self,
        listed: ObjectId,
        incoming: ObjectId,
    ) -> Result<Vec<(ObjectId, PropertyId, Value)>> {
        let lookup: &dyn Lookup = self;
        let ty = lookup.complex_type(listed)?;
        if lookup.complex_type(incoming)? != ty {
            return Err(Error::invalid_argument(format!(
                "cannot merge {incoming} into {listed} of another type"
            )));
        }
        let schema = self.graph.shared_schema();
        let complex = schema.complex(ty)?;
        let mut out = Vec::new();
        for property in complex.properties() {
            if matches!(property.kind(), PropertyKind::List(_))
                || lookup.state(incoming, property.id())? != PropertyState::Specified
            {
                continue;
            }
            let value = lookup.value(incoming, property.id())?;
            let unchanged = lookup.state(listed, property.id())? == PropertyState::Specified
                && property.values_equal(&value, &lookup.value(listed, property.id())?);
            if unchanged {
                continue;
            }
            if property.is_read_only() {
                return Err(Error::read_only(format!(
                    "property `{}.{}` is read-only",
                    complex.name(),
                    property.name()
                )));
            }
            let value = self.requested_value(property, Some(value))?.0;
            out.push((listed, property.id(), value));
        }
        Ok(out)
    }
}
