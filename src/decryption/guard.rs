use std::sync::Arc;

use dashmap::DashSet;

use crate::error::Operation;

/// Per-operation try-acquire lock. A second first attempt of the same kind is
/// refused while a permit is alive.
#[derive(Clone, Default)]
pub struct InFlightGuard {
    active: Arc<DashSet<Operation>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, operation: Operation) -> Option<InFlightPermit> {
        self.active.insert(operation).then(|| InFlightPermit {
            active: Arc::clone(&self.active),
            operation,
        })
    }

    pub fn is_held(&self, operation: Operation) -> bool {
        self.active.contains(&operation)
    }
}

/// Releases its slot on drop, whichever way the holder exits.
#[must_use]
pub struct InFlightPermit {
    active: Arc<DashSet<Operation>>,
    operation: Operation,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.active.remove(&self.operation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;

    #[test]
    fn permits_are_exclusive_per_operation() {
        let guard = InFlightGuard::new();
        let hole = guard.try_acquire(Operation::HoleCards).unwrap();
        assert!(guard.try_acquire(Operation::HoleCards).is_none());
        assert!(guard.try_acquire(Operation::CommunityCards).is_some());

        drop(hole);
        assert!(!guard.is_held(Operation::HoleCards));
        assert!(guard.try_acquire(Operation::HoleCards).is_some());
    }

    #[test]
    fn permit_is_released_when_holder_panics() {
        let guard = InFlightGuard::new();
        let cloned = guard.clone();
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let _permit = cloned.try_acquire(Operation::CommunityCards);
            panic!("workflow failed");
        }));
        assert!(result.is_err());
        assert!(!guard.is_held(Operation::CommunityCards));
    }
}
