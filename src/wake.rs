//! Cross-thread hand-off (spec.md §5): "at most one outstanding hop" per
//! stream. A second wake while one is already pending coalesces into it
//! instead of queuing a duplicate.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Default)]
pub struct WakeSlot {
    pending: AtomicBool,
    notify: Notify,
}

impl WakeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a wake-up. A no-op if one is already pending.
    pub fn wake(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Wait for the next wake-up, clearing the pending flag on return.
    pub async fn waited(&self) {
        self.notify.notified().await;
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn second_wake_while_pending_is_coalesced() {
        let slot = Arc::new(WakeSlot::new());
        slot.wake();
        slot.wake();
        assert!(slot.is_pending());
        slot.waited().await;
        assert!(!slot.is_pending());
    }

    #[tokio::test]
    async fn wake_then_wait_resolves_immediately() {
        let slot = WakeSlot::new();
        slot.wake();
        tokio::time::timeout(std::time::Duration::from_millis(50), slot.waited())
            .await
            .expect("wake should have been observed without waiting");
    }
}
