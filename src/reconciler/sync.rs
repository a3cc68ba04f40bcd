use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::Notify;

/// Stop flag for the periodic reconciliation task
///
/// `Notify::notify_waiters` only wakes tasks that are already waiting, so the flag
/// is checked before every wait to catch a stop requested between ticks.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    notify: Notify,
    stopped: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sleep for `interval` unless a stop arrives first
    ///
    /// Returns `true` when the caller should stop.
    pub async fn wait_timeout_or_shutdown(&self, interval: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }

        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep(interval) => self.is_shutdown(),
        }
    }

    /// Resolve once `shutdown` has been called
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutdown() {
            return;
        }
        notified.await;
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_without_shutdown_returns_false() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout_or_shutdown(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn shutdown_before_wait_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.shutdown();
        assert!(signal.wait_timeout_or_shutdown(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn shutdown_wakes_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait_timeout_or_shutdown(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.shutdown();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_returns_after_shutdown() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };

        signal.shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
