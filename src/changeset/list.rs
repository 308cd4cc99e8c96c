// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Change recording for list containers.
//!
//! A list changeset is an append-only sequence of [`ListChange`]s plus a map from element key to
//! the nested changeset of that element. Positions passed to list operations refer to the
//! *projected* container: the committed contents with all recorded changes applied. The
//! projection is cached in the changeset and refreshed incrementally, applying only the changes
//! recorded since the last refresh. A clear makes every earlier change irrelevant for the
//! projection, so refreshing never starts before the most recent clear.
use super::{ChangesetId, ListChange, primitive::Primitive};
use crate::{
    error::{Error, Result},
    graph::{Comparer, ElementKey, ListState, ObjectData, ObjectId, ObjectKind, element_key},
    schema::ListKind,
    transaction::Transaction,
};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
pub(crate) struct Mock {
    pub(crate) state: ListState,
    /// Number of changes already reflected in `state`.
    pub(crate) applied: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ListBody {
    pub(crate) changes: Vec<ListChange>,
    pub(crate) by_key: BTreeMap<ElementKey, ChangesetId>,
    /// Index of the most recent `Clear` in `changes`.
    pub(crate) last_clear: Option<usize>,
    pub(crate) mock: Option<Mock>,
}

impl ListBody {
    fn live_start(&self) -> usize {
        self.last_clear.unwrap_or(0)
    }

    fn fresh_mock(&self) -> Option<&Mock> {
        self.mock
            .as_ref()
            .filter(|mock| mock.applied == self.changes.len())
    }
}

impl Transaction<'_> {
    fn list_kind(&self, list: ObjectId) -> Result<ListKind> {
        match self.graph.object(list)?.kind() {
            ObjectKind::List(kind) => Ok(kind),
            ObjectKind::Complex(_) => Err(Error::invalid_argument(format!(
                "{list} is a complex object, not a list"
            ))),
        }
    }

    pub(crate) fn ensure_writable(&self, list: ObjectId) -> Result<()> {
        if self.list_kind(list)?.read_only {
            return Err(Error::read_only(format!("list {list} is read-only")));
        }
        Ok(())
    }

    /// Checks that every element is a complex object of the list's element type.
    pub(crate) fn check_element_types(&self, list: ObjectId, elements: &[ObjectId]) -> Result<()> {
        let kind = self.list_kind(list)?;
        for element in elements {
            if self.graph.object(*element)?.kind() != ObjectKind::Complex(kind.element) {
                return Err(Error::invalid_argument(format!(
                    "{element} is not a `{}`",
                    self.graph.schema().complex(kind.element)?.name()
                )));
            }
        }
        Ok(())
    }

    /// Brings the cached projection of the list changeset `cs` up to date.
    fn refresh_projection(&mut self, cs: ChangesetId) -> Result<()> {
        let target = self.log.get(cs).target;
        let body = self.log.list_body_mut(cs)?;
        let live_start = body.live_start();
        let len = body.changes.len();
        let mock = match body.mock.take() {
            Some(mock) if mock.applied >= live_start => Some(mock),
            _ => None,
        };
        let mut mock = match mock {
            Some(mock) => mock,
            None => Mock {
                state: self.graph.list_state(target)?.clone(),
                applied: live_start,
            },
        };
        if mock.applied < len {
            let pending = self.log.list_body(cs)?.changes[mock.applied..].to_vec();
            for change in &pending {
                change.apply(&mut mock.state)?;
            }
            mock.applied = len;
        }
        self.log.list_body_mut(cs)?.mock = Some(mock);
        Ok(())
    }

    /// The projected state of the list changeset `cs`, computed without touching the cache.
    pub(crate) fn projected_state(&self, cs: ChangesetId) -> Result<ListState> {
        let body = self.log.list_body(cs)?;
        if let Some(mock) = body.fresh_mock() {
            return Ok(mock.state.clone());
        }
        let target = self.log.get(cs).target;
        let (mut state, start) = match &body.mock {
            Some(mock) if mock.applied >= body.live_start() => (mock.state.clone(), mock.applied),
            _ => (self.graph.list_state(target)?.clone(), body.live_start()),
        };
        for change in &body.changes[start..] {
            change.apply(&mut state)?;
        }
        Ok(state)
    }

    /// The projected contents of `list`, refreshing its cached projection if it has a changeset.
    pub(crate) fn projection(&mut self, list: ObjectId) -> Result<ListState> {
        match self.log.by_target.get(&list).copied() {
            Some(cs) => {
                self.refresh_projection(cs)?;
                self.projected_state(cs)
            }
            None => Ok(self.graph.list_state(list)?.clone()),
        }
    }

    /// Records one list change on `list`, with all of its side effects.
    pub(crate) fn record_list_change(&mut self, list: ObjectId, change: ListChange) -> Result<()> {
        let cs = self.ensure_changeset(list)?;
        let version = self.take_next_version();
        self.log.get_mut(cs).transaction_version = version;
        change.prepare(list, &mut self.refs);
        tracing::trace!(%list, %change, "recorded list change");
        match &change {
            ListChange::Add { elements, keys, .. } => {
                for (element, key) in elements.iter().zip(keys) {
                    self.add_list_element(cs, *element, key.clone());
                }
            }
            ListChange::Remove { elements, .. } | ListChange::Clear { elements } => {
                for element in elements {
                    self.remove_list_element(cs, *element);
                }
            }
            ListChange::Move { .. } | ListChange::Sort { .. } => {}
        }
        let body = self.log.list_body_mut(cs)?;
        if matches!(change, ListChange::Clear { .. }) {
            body.last_clear = Some(body.changes.len());
        }
        body.changes.push(change);
        self.refresh_projection(cs)
    }

    /// Tracks the nested changeset of an element entering the list.
    fn add_list_element(&mut self, cs: ChangesetId, element: ObjectId, key: ElementKey) {
        if let Some(child) = self.log.by_target.get(&element).copied() {
            if let Ok(body) = self.log.list_body_mut(cs) {
                body.by_key.insert(key, child);
            }
            self.log.attach(cs, child);
        }
    }

    /// Drops the nested changeset of an element leaving the list.
    fn remove_list_element(&mut self, cs: ChangesetId, element: ObjectId) {
        if let Some(child) = self.log.by_target.get(&element).copied() {
            if let Ok(body) = self.log.list_body_mut(cs) {
                body.by_key.retain(|_, c| *c != child);
            }
            self.log.reset_net_order(child);
        }
    }

    /// Records `child` as the nested changeset of `element` within the list changeset `cs`.
    pub(crate) fn attach_nested_element(
        &mut self,
        cs: ChangesetId,
        element: ObjectId,
        child: ChangesetId,
    ) -> Result<()> {
        let state = self.projected_state(cs)?;
        let key = match state.position(element) {
            Some(idx) => state.keys[idx].clone(),
            None => element_key(&*self, element)?,
        };
        self.log.list_body_mut(cs)?.by_key.insert(key, child);
        self.log.attach(cs, child);
        Ok(())
    }

    /// Keys for `elements` as they would enter `state`.
    ///
    /// # Errors
    ///
    /// [`Error::ArgumentInvalid`] if two elements share a key or an element's key is already
    /// present in `state`.
    fn keys_for(&self, state: &ListState, elements: &[ObjectId]) -> Result<Vec<ElementKey>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(elements.len());
        for element in elements {
            let key = element_key(self, *element)?;
            if state.position_of_key(&key).is_some() || !seen.insert(key.clone()) {
                return Err(Error::invalid_argument(format!(
                    "an element with key {key} is already in the list"
                )));
            }
            keys.push(key);
        }
        Ok(keys)
    }

    pub(crate) fn list_insert(
        &mut self,
        list: ObjectId,
        elements: &[ObjectId],
        index: usize,
    ) -> Result<()> {
        self.ensure_open()?;
        if elements.is_empty() {
            return Ok(());
        }
        self.ensure_writable(list)?;
        self.check_element_types(list, elements)?;
        let state = self.projection(list)?;
        if index > state.len() {
            return Err(Error::invalid_argument(format!(
                "index {index} is out of bounds for a list of {}",
                state.len()
            )));
        }
        let keys = self.keys_for(&state, elements)?;
        self.record_list_change(
            list,
            ListChange::Add {
                elements: elements.to_vec(),
                keys,
                index,
            },
        )
    }

    pub(crate) fn list_push(&mut self, list: ObjectId, elements: &[ObjectId]) -> Result<()> {
        self.ensure_open()?;
        let len = self.projection(list)?.len();
        self.list_insert(list, elements, len)
    }

    /// Removes `elements` from `list`, one `Remove` per run of adjacent positions.
    ///
    /// Elements that are not in the list are ignored. Returns how many elements were removed.
    pub(crate) fn list_remove(&mut self, list: ObjectId, elements: &[ObjectId]) -> Result<usize> {
        self.ensure_open()?;
        let state = self.projection(list)?;
        let mut positions: Vec<usize> = elements
            .iter()
            .filter_map(|e| state.position(*e))
            .collect();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        if positions.is_empty() {
            return Ok(0);
        }
        self.ensure_writable(list)?;
        for run in descending_runs(&positions) {
            self.record_list_change(
                list,
                ListChange::Remove {
                    elements: state.elements[run.clone()].to_vec(),
                    index: run.start,
                },
            )?;
        }
        Ok(positions.len())
    }

    /// Removes `count` elements starting at `start`; a negative `start` counts from the end.
    ///
    /// Out-of-range starts are a no-op and `count` is clamped to the end of the list. Returns
    /// how many elements were removed.
    pub(crate) fn list_remove_at(
        &mut self,
        list: ObjectId,
        start: isize,
        count: usize,
    ) -> Result<usize> {
        self.ensure_open()?;
        let state = self.projection(list)?;
        let len = state.len();
        let start = if start < 0 {
            match len.checked_sub(start.unsigned_abs()) {
                Some(start) => start,
                None => return Ok(0),
            }
        } else {
            start.unsigned_abs()
        };
        if start >= len || count == 0 {
            return Ok(0);
        }
        let end = start + count.min(len - start);
        self.ensure_writable(list)?;
        self.record_list_change(
            list,
            ListChange::Remove {
                elements: state.elements[start..end].to_vec(),
                index: start,
            },
        )?;
        Ok(end - start)
    }

    /// Moves `element` to `index` (clamped to the list), returning whether anything moved.
    pub(crate) fn list_move(
        &mut self,
        list: ObjectId,
        element: ObjectId,
        index: usize,
    ) -> Result<bool> {
        self.ensure_open()?;
        let state = self.projection(list)?;
        let from = state
            .position(element)
            .ok_or_else(|| Error::invalid_argument(format!("{element} is not in list {list}")))?;
        let to = index.min(state.len()).min(state.len() - 1);
        if to == from {
            return Ok(false);
        }
        self.ensure_writable(list)?;
        self.record_list_change(
            list,
            ListChange::Move {
                elements: vec![element],
                from,
                to,
            },
        )?;
        Ok(true)
    }

    /// Sorts `list` against the pending contents of its elements.
    ///
    /// The resulting order is fixed when the sort is recorded. Edits made afterwards to the
    /// properties the comparer reads do not reorder the list again.
    pub(crate) fn list_sort(&mut self, list: ObjectId, comparer: Comparer) -> Result<()> {
        self.ensure_open()?;
        let state = self.projection(list)?;
        if state.len() < 2 {
            return Ok(());
        }
        self.ensure_writable(list)?;
        let mut order = state.elements;
        order.sort_by(|a, b| comparer.compare(&*self, *a, *b));
        self.record_list_change(list, ListChange::Sort { comparer, order })
    }

    pub(crate) fn list_clear(&mut self, list: ObjectId) -> Result<()> {
        self.ensure_open()?;
        let state = self.projection(list)?;
        if state.is_empty() {
            return Ok(());
        }
        self.ensure_writable(list)?;
        self.record_list_change(
            list,
            ListChange::Clear {
                elements: state.elements,
            },
        )
    }

    /// The state the list changeset `cs` leaves its target in.
    ///
    /// A fresh projection is taken as is, otherwise the live changes are replayed onto the
    /// committed contents.
    pub(crate) fn committed_list_state(&self, cs: ChangesetId) -> Result<ListState> {
        let body = self.log.list_body(cs)?;
        if let Some(mock) = body.fresh_mock() {
            return Ok(mock.state.clone());
        }
        let target = self.log.get(cs).target;
        let mut state = self.graph.list_state(target)?.clone();
        for change in &body.changes[body.live_start()..] {
            change.apply(&mut state)?;
        }
        Ok(state)
    }

    pub(crate) fn write_list_state(&mut self, list: ObjectId, new: ListState) -> Result<()> {
        match &mut self.graph.object_mut(list)?.data {
            ObjectData::List { state, .. } => {
                *state = new;
                Ok(())
            }
            ObjectData::Complex { .. } => Err(Error::invalid_operation(format!(
                "{list} is not a list"
            ))),
        }
    }
}

/// Groups positions sorted in descending order into ranges of adjacent positions, highest first.
pub(crate) fn descending_runs(positions: &[usize]) -> Vec<std::ops::Range<usize>> {
    let mut runs: Vec<std::ops::Range<usize>> = Vec::new();
    for &pos in positions {
        match runs.last_mut() {
            Some(run) if run.start == pos + 1 => run.start = pos,
            _ => runs.push(pos..pos + 1),
        }
    }
    runs
}
