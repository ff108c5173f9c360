//! Cooperative cancellation.
//!
//! Engines check the token before every network call and chunk send; the
//! scheduler trips it on shutdown or when the network constraint is lost.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Cloneable cancellation flag. All clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is tripped.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fail with `Cancelled` if the token is tripped.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once [`cancel`](Self::cancel) was called.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Await `fut`, abandoning it if the token trips first.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled`, or whatever `fut` returns.
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.checkpoint()?;
        tokio::select! {
            biased;
            () = self.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.checkpoint().is_ok());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.checkpoint(), Err(Error::Cancelled)));
        clone.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_abandons_pending_future() {
        let token = CancellationToken::new();
        let trip = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trip.cancel();
        });

        let result: Result<()> = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
