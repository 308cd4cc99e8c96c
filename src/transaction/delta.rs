// (c) Copyright 2025 Helsing GmbH. All rights reserved.
/// What a commit changed, as opposed to the resulting graph state.
///
/// Returned by [`Transaction::commit`](crate::Transaction::commit). The wrapped value is usually a
/// read-only [`ChangeLog`](crate::ChangeLog); access it through the public field.
///
/// # Example
/// ```
/// use txgraph::{ChangeLog, Delta};
///
/// # fn example(delta: Delta<ChangeLog>) {
/// let log: ChangeLog = delta.0;
/// assert!(log.is_read_only());
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Delta<T>(pub T);

impl<T> Delta<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_new_and_into_inner() {
        let delta = Delta::new(vec![1, 2]);
        assert_eq!(delta.0, vec![1, 2]);
        assert_eq!(delta.into_inner(), vec![1, 2]);
    }
}
