// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # txgraph: Optimistic Nested Transactions over Versioned Object Graphs
//!
//! This crate records edits to a graph of typed objects as **changesets** and applies them
//! atomically. Reads inside a transaction see the pending contents, while everyone else keeps
//! seeing the committed contents until the transaction commits. Dropping a transaction discards
//! its changes without a trace.
//!
//! ## Core Concepts
//!
//! - [`Schema`]: the complex types of a graph. Each type declares scalar properties,
//!   references to other complex objects, and owned **list containers**.
//! - [`Graph`]: an arena of objects conforming to a schema, with the committed contents and
//!   the parent links of every object.
//! - [`Transaction`]: an edit session. Every edit lands in the [`ChangesetRef`] of its target
//!   object; changesets of nested objects hang below the changesets of their parents, so a
//!   change deep down the graph is visible from the root.
//! - [`ChangeLog`]: the changesets of a transaction, handed back as a [`Delta`] on commit.
//!
//! ## Changesets
//!
//! A complex changeset records, per property, either a [`Replace`] (old and new value and
//! state) or the nested changeset of the object the property references. A list changeset
//! records an ordered sequence of [`ListChange`]s plus the nested changesets of its elements,
//! keyed by [`ElementKey`].
//!
//! Recording is normalizing: setting a property back to its committed value removes the replace
//! instead of stacking a second one, and [`ListEdit::set`] reconciles a list with a desired
//! sequence using as few primitive changes as it can.
//!
//! Changesets are ordered by **net order**, their depth below the changesets referencing them.
//! Commits apply changesets in descending net order, so nested objects are complete before the
//! objects holding them are written.
//!
//! ## Getting Started
//!
//! ```rust
//! use txgraph::{Comparer, Graph, PropertyDecl, SchemaBuilder, SetOptions, Value, ValueKind};
//!
//! // 1. SCHEMA
//! let mut builder = SchemaBuilder::new();
//! builder
//!     .complex("Order")
//!     .property(PropertyDecl::scalar("status", ValueKind::String).with_default("new"))
//!     .property(PropertyDecl::list("lines", "Line"));
//! builder
//!     .complex("Line")
//!     .key("sku")
//!     .property(PropertyDecl::scalar("sku", ValueKind::String))
//!     .property(PropertyDecl::scalar("qty", ValueKind::I64).with_default(1));
//! let mut graph = Graph::new(builder.build().unwrap());
//!
//! // 2. A FIRST TRANSACTION
//! let order = graph.create("Order").unwrap();
//! let lines = graph.list_of(order, "lines").unwrap();
//! let delta = {
//!     let mut tx = graph.transact();
//!     let a = tx.create("Line").unwrap();
//!     tx.object(a).unwrap().set("sku", "A-1").unwrap();
//!     let b = tx.create("Line").unwrap();
//!     tx.object(b).unwrap().set("sku", "B-7").unwrap();
//!     tx.list(lines).unwrap().set(&[b, a], SetOptions::default()).unwrap();
//!     tx.object(order).unwrap().set("status", "open").unwrap();
//!     tx.commit().unwrap()
//! };
//! // the order's changeset sees the list below it
//! assert!(delta.0.changeset(order).unwrap().has_change("lines").unwrap());
//!
//! // 3. READ COMMITTED CONTENTS
//! assert_eq!(graph.get(order, "status").unwrap(), Value::from("open"));
//! assert_eq!(graph.elements(lines).unwrap().len(), 2);
//!
//! // 4. REJECTED EDITS LEAVE NO TRACE
//! {
//!     let mut tx = graph.transact();
//!     tx.list(lines).unwrap().sort(Comparer::by_property("sku")).unwrap();
//!     tx.object(order).unwrap().set("status", "void").unwrap();
//!     // dropped without commit
//! }
//! assert_eq!(graph.get(order, "status").unwrap(), Value::from("open"));
//! ```
//!
//! ## Composition
//!
//! Two sequential changesets of the same object can be folded into one describing their net
//! effect with [`ChangesetRef::compose`]. Neither input is modified.
//!
//! ## Validation and Observation
//!
//! [`Transaction::commit_with`] shows every change to a [`Sentinel`](crate::sentinel::Sentinel)
//! before anything is applied. A sentinel error vetoes the commit and leaves the transaction
//! open.
//!
//! ## Features
//!
//! - `json`: Enables conversion of values and object subtrees to `serde_json::Value`. This
//!   feature is enabled by default.
//! - `serde`: Provides `serde` support for values, identifiers, and replaces.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for `Value`, useful for property-based
//!   testing.
//! - `ulid`: Enables values to hold ulids. This feature is enabled by default.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use ahash::RandomState;
use std::{
    hash::BuildHasher,
    sync::atomic::{AtomicBool, Ordering},
};

// Use a constant seed for hashing to make performance benchmarks have less variance.
pub(crate) const DETERMINISTIC_HASHER: RandomState = RandomState::with_seeds(48, 1516, 23, 42);

pub mod changeset;
pub use changeset::{
    Change, ChangeEntry, ChangeLog, Changeset, ChangesetId, ChangesetRef, ChangesetStatus,
    Composed, ListChange, Replace, SetOptions,
};
mod error;
pub use error::{Error, Result};
mod graph;
pub use graph::{
    Comparer, ElementKey, Graph, ListState, Lookup, ObjectId, ObjectKind, Parent, Slot,
};
#[cfg(feature = "json")]
pub mod json;
pub mod schema;
pub use schema::{
    ComplexType, ListKind, Property, PropertyDecl, PropertyId, Schema, SchemaBuilder, TypeId,
};
pub mod sentinel;
/// Transactions, edit handles, and scopes.
///
/// See [`transaction`] module documentation for details and examples.
pub mod transaction;
pub use transaction::{
    ChangeRef, ComplexEdit, Delta, ListEdit, RefTransition, Scope, ScopeExit, Transaction,
};
mod value;
pub use value::{PropertyState, Value, ValueKind};

static ENABLE_DETERMINISM: AtomicBool = AtomicBool::new(false);

/// Makes all hash maps of this crate hash deterministically.
///
/// This should only be enabled for testing and benchmarking, as it increases the odds of DoS
/// scenarios.
#[doc(hidden)]
pub fn enable_determinism() {
    ENABLE_DETERMINISM.store(true, Ordering::Release);
}

/// Checks if determinism is enabled.
#[doc(hidden)]
pub fn determinism_enabled() -> bool {
    ENABLE_DETERMINISM.load(Ordering::Acquire)
}

#[inline]
fn make_random_state() -> RandomState {
    if determinism_enabled() {
        DETERMINISTIC_HASHER
    } else {
        RandomState::new()
    }
}

fn create_map<K, V>() -> std::collections::HashMap<K, V, GraphRandomState> {
    std::collections::HashMap::with_hasher(GraphRandomState::default())
}

fn create_map_with_capacity<K, V>(
    capacity: usize,
) -> std::collections::HashMap<K, V, GraphRandomState> {
    std::collections::HashMap::with_capacity_and_hasher(capacity, GraphRandomState::default())
}

/// A small wrapper around [`ahash::RandomState`] that turns deterministic once
/// [`enable_determinism`] was called.
#[derive(Clone, Debug)]
pub struct GraphRandomState {
    inner: RandomState,
}

impl Default for GraphRandomState {
    #[inline]
    fn default() -> Self {
        Self {
            inner: make_random_state(),
        }
    }
}

impl BuildHasher for GraphRandomState {
    type Hasher = <RandomState as BuildHasher>::Hasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        self.inner.build_hasher()
    }
}
