// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Delta, Transaction};
use crate::{changeset::ChangeLog, error::Result};
use std::ops::{Deref, DerefMut};

/// What [`Scope::accept`] did.
#[derive(Debug)]
#[must_use]
pub enum ScopeExit {
    /// An enclosing scope is still entered, so the transaction stays open.
    Open,
    /// This was the outermost scope and the transaction was committed.
    Committed(Delta<ChangeLog>),
}

/// A nesting level of a [`Transaction`], returned by [`Transaction::enter_scope`].
///
/// The scope dereferences to its transaction, so edits go through it directly. Leaving a scope
/// requires a decision: [`Scope::accept`] keeps the changes (committing them when the outermost
/// scope is accepted), [`Scope::reject`] discards the whole transaction. A scope dropped without
/// either, for example while unwinding from an early `?` return, rejects the transaction.
///
/// # Example
///
/// ```
/// # use txgraph::{Graph, PropertyDecl, SchemaBuilder, ScopeExit, Value, ValueKind};
/// # let mut builder = SchemaBuilder::new();
/// # builder.complex("Note").property(PropertyDecl::scalar("text", ValueKind::String));
/// # let mut graph = Graph::new(builder.build().unwrap());
/// # let note = graph.create("Note").unwrap();
/// let mut tx = graph.transact();
/// let mut outer = tx.enter_scope().unwrap();
/// {
///     let mut inner = outer.enter_scope().unwrap();
///     inner.object(note).unwrap().set("text", "draft").unwrap();
///     assert!(matches!(inner.accept().unwrap(), ScopeExit::Open));
/// }
/// assert!(matches!(outer.accept().unwrap(), ScopeExit::Committed(_)));
/// # drop(tx);
/// assert_eq!(graph.get(note, "text").unwrap(), Value::from("draft"));
/// ```
pub struct Scope<'t, 'g> {
    tx: &'t mut Transaction<'g>,
    done: bool,
}

impl<'t, 'g> Scope<'t, 'g> {
    pub(crate) fn new(tx: &'t mut Transaction<'g>) -> Self {
        Self { tx, done: false }
    }

    /// Leaves the scope keeping its changes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`](crate::Error::InvalidOperation) if the transaction is no
    /// longer open, and whatever the commit fails with for the outermost scope.
    pub fn accept(mut self) -> Result<ScopeExit> {
        self.done = true;
        self.tx.ensure_open()?;
        if self.tx.leave_scope() > 0 {
            return Ok(ScopeExit::Open);
        }
        self.tx.commit_inner().map(ScopeExit::Committed)
    }

    /// Leaves the scope and rejects the whole transaction.
    pub fn reject(mut self) -> Result<()> {
        self.done = true;
        self.tx.leave_scope();
        self.tx.reject()
    }
}

impl<'g> Deref for Scope<'_, 'g> {
    type Target = Transaction<'g>;

    fn deref(&self) -> &Self::Target {
        self.tx
    }
}

impl DerefMut for Scope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tx
    }
}

impl Drop for Scope<'_, '_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.tx.leave_scope();
        if self.tx.is_open() {
            tracing::warn!("scope dropped without accept or reject, rejecting the transaction");
            self.tx.reject_inner();
        }
    }
}
