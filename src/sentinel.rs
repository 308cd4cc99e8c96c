// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Observe and validate the changes of a transaction before they are committed.
//!
//! Sentinels inspect every recorded change right before [`Transaction::commit_with`] applies
//! anything. They are useful for validating changes against rules the schema cannot express, or
//! simply to observe the changes for any other purpose (for example, auditing or metrics).
//!
//! Changesets are visited in commit order, deepest first. For each changeset the sentinel is
//! told which object it is about to inspect via [`Visit`], and then sees its changes via
//! [`ReplaceSentinel`] or [`ListSentinel`].
//!
//! [`Transaction::commit_with`]: crate::Transaction::commit_with
use crate::{
    changeset::{ListChange, Replace},
    graph::ObjectId,
};
use std::convert::Infallible;

/// Observes and optionally stops a commit.
///
/// If Error = Infallible, the Sentinel is referred to as an Observer. If it can produce an error,
/// it may be referred to as a Validator. An error from any method vetoes the whole commit.
pub trait Sentinel {
    type Error;
}

/// Enables a Sentinel to keep track of which object's changes are being reported.
#[expect(unused_variables)]
pub trait Visit: Sentinel {
    /// Start reporting the changes of `target`.
    fn enter(&mut self, target: ObjectId) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Done with the current target.
    ///
    /// NOTE: not called if the Sentinel produced an Err for the current target.
    fn exit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Observe property replacements of complex objects.
#[expect(unused_variables)]
pub trait ReplaceSentinel: Sentinel {
    /// Observe and validate the replacement of `property` on the current target.
    fn replace(&mut self, property: &str, change: &Replace) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Observe primitive changes of list containers.
#[expect(unused_variables)]
pub trait ListSentinel: Sentinel {
    /// Observe and validate one change of the current target, in recording order.
    fn list_change(&mut self, change: &ListChange) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A Sentinel that does nothing.
///
/// This is what [`Transaction::commit`](crate::Transaction::commit) uses. Using it helps the
/// compiler optimise the inspection pass away.
pub struct DummySentinel;

impl Sentinel for DummySentinel {
    type Error = Infallible;
}

impl Visit for DummySentinel {}

impl ReplaceSentinel for DummySentinel {}

impl ListSentinel for DummySentinel {}
