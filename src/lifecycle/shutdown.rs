//! Shutdown coordination for the gateway.
//!
//! The HTTP server and the session reaper each hold a `ShutdownSignal`.
//! Firing is sticky: a signal taken after `trigger` resolves at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            fired: self.fired.clone(),
        }
    }

    /// Fire every signal. Later calls do nothing.
    pub fn trigger(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            let listeners = self.tx.send(()).unwrap_or(0);
            tracing::debug!(listeners, "Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Number of signals still held by running tasks.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's view of the shutdown coordinator.
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
    fired: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered or the coordinator is dropped.
    pub async fn fired(&mut self) {
        if self.fired.load(Ordering::Acquire) {
            return;
        }
        // Ok, Lagged and Closed all mean the coordinator is done with us
        let _ = self.rx.recv().await;
    }

    /// An independent signal for a spawned task.
    pub fn resubscribe(&self) -> Self {
        Self {
            rx: self.rx.resubscribe(),
            fired: self.fired.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut server = shutdown.subscribe();
        let mut reaper = server.resubscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        shutdown.trigger();
        server.fired().await;
        reaper.fired().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut late = shutdown.subscribe();
        tokio::time::timeout(Duration::from_millis(100), late.fired())
            .await
            .expect("late signal resolves immediately");
    }

    #[tokio::test]
    async fn test_dropped_coordinator_releases_tasks() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        drop(shutdown);

        tokio::time::timeout(Duration::from_millis(100), signal.fired())
            .await
            .expect("closed channel counts as shutdown");
    }

    #[tokio::test]
    async fn test_untriggered_signal_stays_pending() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.fired()).await;
        assert!(waited.is_err());
    }
}
