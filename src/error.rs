// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Errors reported by graph, schema, and transaction operations.
//!
//! Every variant signals misuse of the API rather than a transient runtime condition. Operations
//! validate their arguments before touching any state, so a call that returns an error leaves
//! the transaction and its changesets exactly as they were.

/// Error returned by fallible `txgraph` operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An argument does not fit the call: an undeclared property name, a changeset for another
    /// target passed to `compose`, a value of the wrong kind, and similar.
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),

    /// A mandatory argument was left out.
    #[error("missing required argument `{0}`")]
    ArgumentRequired(&'static str),

    /// The receiver is in a state that does not permit the operation, typically because the
    /// transaction or changeset was already committed or rejected.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation would mutate a read-only property or a read-only container.
    #[error("read-only violation: {0}")]
    ReadOnlyViolation(String),

    /// A [`Sentinel`](crate::sentinel::Sentinel) refused the changes of a commit.
    #[error("commit vetoed: {0}")]
    Vetoed(String),
}

/// Shorthand for results carrying an [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::ArgumentInvalid(msg.into())
    }

    pub(crate) fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub(crate) fn read_only(msg: impl Into<String>) -> Self {
        Self::ReadOnlyViolation(msg.into())
    }
}
