//! Explicit reconcile-completion signal.
//!
//! Replaces the fixed post-payment delays of the original design: instead
//! of sleeping and hoping dependents observed the flags, dependents await
//! this signal and the engine fires it exactly when reconciliation
//! confirms.

use tokio::sync::watch;

/// Completion signal shared between the checker, the payment callback, and
/// anything that wants to navigate only after reconciliation settled.
#[derive(Clone)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Reconciliation started; dependents should hold.
    pub fn begin(&self) {
        let _ = self.tx.send_replace(false);
    }

    /// Reconciliation confirmed; dependents may proceed.
    pub fn complete(&self) {
        let _ = self.tx.send_replace(true);
    }

    /// Current value without waiting.
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Wait until the signal reads true.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_not_ready() {
        let signal = ReadySignal::new();
        assert!(!signal.is_ready());
    }

    #[tokio::test]
    async fn complete_wakes_waiters() {
        let signal = ReadySignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        signal.complete();
        waiter.await.unwrap();
        assert!(signal.is_ready());
    }

    #[tokio::test]
    async fn begin_resets() {
        let signal = ReadySignal::new();
        signal.complete();
        assert!(signal.is_ready());
        signal.begin();
        assert!(!signal.is_ready());
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_ready() {
        let signal = ReadySignal::new();
        signal.complete();
        signal.wait().await;
    }
}
