//! Cooperative cancellation
//!
//! A [`CancelHandle`] owns the flag; any number of [`CancelSignal`]s observe
//! it. A signal can watch several handles at once (for example the scheduler
//! shutdown flag and a per-task flag), firing when any of them is cancelled.

use futures::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel every signal derived from this handle. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receivers: vec![self.tx.subscribe()],
        }
    }
}

/// Observer side of one or more [`CancelHandle`]s
///
/// The default signal never fires.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    receivers: Vec<watch::Receiver<bool>>,
}

impl CancelSignal {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.receivers.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once any watched handle is cancelled
    ///
    /// A handle dropped without being cancelled never fires.
    pub async fn cancelled(&self) {
        if self.receivers.is_empty() {
            return std::future::pending().await;
        }

        let waits = self.receivers.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }

    /// Watch the handles of `other` as well
    pub fn merge(mut self, other: &CancelSignal) -> Self {
        self.receivers.extend(other.receivers.iter().cloned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let handle = CancelHandle::new();
        let signal = handle.signal();

        let waiter = tokio::spawn(async move { signal.cancelled().await });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_created_after_cancel_is_cancelled() {
        let handle = CancelHandle::new();
        handle.cancel();

        let signal = handle.signal();
        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_stays_pending() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());

        let result = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_does_not_fire() {
        let handle = CancelHandle::new();
        let signal = handle.signal();
        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_merged_signal_fires_on_either() {
        let shutdown = CancelHandle::new();
        let task = CancelHandle::new();
        let signal = shutdown.signal().merge(&task.signal());

        assert!(!signal.is_cancelled());
        task.cancel();
        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("merged signal should fire");
        assert!(!shutdown.is_cancelled());
    }
}
