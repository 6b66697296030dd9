//! One-shot lifecycle signals.
//!
//! A [`StopSignal`] starts open and can be closed exactly once. Any number of
//! tasks may wait for it to close; waiting on an already-closed signal
//! returns immediately.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{CoreError, Result};

/// A closable, cloneable stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    name: &'static str,
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    /// Create an open signal with a name used in errors and logs.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    /// The signal's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Close the signal, waking every waiter.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SignalAlreadyClosed` if the signal was closed before.
    pub fn close(&self) -> Result<()> {
        if self.tx.send_replace(true) {
            return Err(CoreError::SignalAlreadyClosed(self.name));
        }
        Ok(())
    }

    /// Whether the signal has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is closed.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn close_once() {
        let signal = StopSignal::new("test");
        assert!(!signal.is_closed());
        signal.close().unwrap();
        assert!(signal.is_closed());

        match signal.close() {
            Err(CoreError::SignalAlreadyClosed(name)) => assert_eq!(name, "test"),
            other => panic!("expected SignalAlreadyClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn waiters_wake_on_close() {
        let signal = StopSignal::new("test");
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.closed().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        signal.close().unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_returns_immediately_after_close() {
        let signal = StopSignal::new("test");
        signal.close().unwrap();
        tokio::time::timeout(Duration::from_millis(100), signal.closed())
            .await
            .expect("already closed");
    }
}
