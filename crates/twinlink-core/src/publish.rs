//! Property publishing seam and the completion handle it returns.

use tokio::sync::oneshot;

use crate::error::PublishError;
use crate::model::{PropertyPath, PropertyValue, TwinIdentity};

/// Result of a property update.
pub type PublishOutcome = Result<(), PublishError>;

/// Sends property updates to the twin store.
///
/// `publish` must not block: it starts the update and hands back a
/// [`PublishHandle`] that resolves once the destination answers. The
/// publisher is shared by every poll task and must be safe for concurrent use.
pub trait PropertyPublisher: Send + Sync {
    fn publish(&self, twin: &TwinIdentity, path: &PropertyPath, value: PropertyValue)
        -> PublishHandle;
}

/// Pending outcome of a publish.
#[derive(Debug)]
pub struct PublishHandle {
    rx: oneshot::Receiver<PublishOutcome>,
}

/// Producer side of a [`PublishHandle`].
#[derive(Debug)]
pub struct PublishCompleter {
    tx: oneshot::Sender<PublishOutcome>,
}

impl PublishHandle {
    /// A handle whose outcome is reported later through the completer.
    pub fn pending() -> (PublishCompleter, PublishHandle) {
        let (tx, rx) = oneshot::channel();
        (PublishCompleter { tx }, PublishHandle { rx })
    }

    /// A handle that is already complete.
    pub fn ready(outcome: PublishOutcome) -> Self {
        let (completer, handle) = Self::pending();
        completer.complete(outcome);
        handle
    }

    /// Wait for the outcome. A dropped completer reports
    /// [`PublishError::Abandoned`].
    pub async fn outcome(self) -> PublishOutcome {
        self.rx.await.unwrap_or(Err(PublishError::Abandoned))
    }

    /// Register an observer called with the outcome, without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_complete<F>(self, observer: F)
    where
        F: FnOnce(PublishOutcome) + Send + 'static,
    {
        tokio::spawn(async move {
            observer(self.outcome().await);
        });
    }
}

impl PublishCompleter {
    pub fn complete(self, outcome: PublishOutcome) {
        // The handle may already be gone; nobody is left to observe the outcome.
        let _ = self.tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_handle() {
        assert_eq!(PublishHandle::ready(Ok(())).outcome().await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_completer_is_abandoned() {
        let (completer, handle) = PublishHandle::pending();
        drop(completer);
        assert_eq!(handle.outcome().await, Err(PublishError::Abandoned));
    }

    #[tokio::test]
    async fn test_observer_sees_outcome() {
        let (completer, handle) = PublishHandle::pending();
        let (seen_tx, seen_rx) = oneshot::channel();
        handle.on_complete(move |outcome| {
            let _ = seen_tx.send(outcome);
        });

        completer.complete(Err(PublishError::Rejected {
            status: 403,
            message: "forbidden".to_string(),
        }));

        let seen = seen_rx.await.unwrap();
        assert!(matches!(seen, Err(PublishError::Rejected { status: 403, .. })));
    }
}
