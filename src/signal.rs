//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM cancel a shared [`ShutdownToken`]; monitors wait on it
//! alongside their log stream and stop with their report intact.

use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

/// Cancellation shared by every monitor of a run.
#[derive(Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that cancels `token` on SIGINT or SIGTERM.
///
/// If no handler can be registered (restricted environments), the run keeps
/// going and can only be stopped by killing the process.
pub fn listen(token: ShutdownToken) {
    tokio::spawn(async move {
        let sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Failed to register SIGINT handler: {}", e);
                None
            }
        };

        let sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                None
            }
        };

        let name = match (sigint, sigterm) {
            (Some(mut int), Some(mut term)) => {
                tokio::select! {
                    _ = int.recv() => "SIGINT",
                    _ = term.recv() => "SIGTERM",
                }
            }
            (Some(mut int), None) => {
                int.recv().await;
                "SIGINT"
            }
            (None, Some(mut term)) => {
                term.recv().await;
                "SIGTERM"
            }
            (None, None) => {
                warn!("No signal handlers registered - graceful shutdown disabled");
                return;
            }
        };

        info!("Received {}, stopping monitors...", name);
        token.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_starts_active() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_visible_through_clones() {
        let token1 = ShutdownToken::new();
        let token2 = token1.clone();

        token1.cancel();
        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = ShutdownToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = ShutdownToken::default();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }
}
