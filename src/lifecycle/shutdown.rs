//! Shutdown coordination for the service.

use std::sync::Arc;
use tokio::sync::watch;

/// Level-triggered shutdown signal.
///
/// Once triggered it stays triggered, so tasks that start watching after the
/// fact still observe it. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new, untriggered signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger the signal. Returns `true` only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let triggered = *rx.borrow_and_update();
            if triggered || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
