//! Teardown-finished signals
//!
//! A closing dialog subscribes under its id and waits for the visual layer to
//! report that the exit animation finished. Subscriptions remove themselves
//! when dropped, so a signal that never arrives does not leak an entry.

use super::types::DialogId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

type Slot = (u64, oneshot::Sender<()>);
type Pending = Arc<Mutex<HashMap<DialogId, Slot>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<DialogId, Slot>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Why a teardown wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Signalled,
    TimedOut,
    /// The subscription was cancelled or replaced
    Abandoned,
}

#[derive(Default)]
pub struct TeardownSignals {
    pending: Pending,
    next_token: AtomicU64,
}

impl TeardownSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for the teardown signal of `id`, replacing any earlier listener
    pub fn subscribe(&self, id: DialogId) -> TeardownSubscription {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending).insert(id.clone(), (token, tx));
        trace!("Waiting for teardown signal of {}", id);
        TeardownSubscription {
            id,
            token,
            rx,
            pending: self.pending.clone(),
        }
    }

    /// Deliver the signal; false when nobody listens for `id`
    pub fn fire(&self, id: &DialogId) -> bool {
        match lock(&self.pending).remove(id) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, id: &DialogId) -> bool {
        lock(&self.pending).remove(id).is_some()
    }

    pub fn is_pending(&self, id: &DialogId) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

pub struct TeardownSubscription {
    id: DialogId,
    token: u64,
    rx: oneshot::Receiver<()>,
    pending: Pending,
}

impl TeardownSubscription {
    pub fn id(&self) -> &DialogId {
        &self.id
    }

    /// Wait for the signal, at most `timeout` when given
    pub async fn wait(mut self, timeout: Option<Duration>) -> TeardownReason {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => return TeardownReason::TimedOut,
            },
            None => (&mut self.rx).await,
        };

        match received {
            Ok(()) => TeardownReason::Signalled,
            Err(_) => TeardownReason::Abandoned,
        }
    }
}

impl Drop for TeardownSubscription {
    fn drop(&mut self) {
        let mut pending = lock(&self.pending);
        // Only drop our own sender; a newer subscription may own the slot.
        if pending.get(&self.id).is_some_and(|(token, _)| *token == self.token) {
            pending.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_wakes_subscriber() {
        let signals = TeardownSignals::new();
        let subscription = signals.subscribe(DialogId::from("dialog1"));

        assert!(signals.is_pending(&DialogId::from("dialog1")));
        assert!(signals.fire(&DialogId::from("dialog1")));
        assert_eq!(subscription.wait(None).await, TeardownReason::Signalled);
        assert_eq!(signals.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fire_without_subscriber() {
        let signals = TeardownSignals::new();
        assert!(!signals.fire(&DialogId::from("dialog9")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_leak() {
        let signals = TeardownSignals::new();
        let subscription = signals.subscribe(DialogId::from("dialog1"));

        let reason = subscription.wait(Some(Duration::from_millis(50))).await;
        assert_eq!(reason, TeardownReason::TimedOut);
        assert_eq!(signals.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_abandons() {
        let signals = TeardownSignals::new();
        let subscription = signals.subscribe(DialogId::from("dialog1"));

        assert!(signals.cancel(&DialogId::from("dialog1")));
        assert_eq!(subscription.wait(None).await, TeardownReason::Abandoned);
    }

    #[test]
    fn test_drop_releases_slot() {
        let signals = TeardownSignals::new();
        let subscription = signals.subscribe(DialogId::from("dialog1"));
        drop(subscription);
        assert_eq!(signals.pending_count(), 0);
    }
}
