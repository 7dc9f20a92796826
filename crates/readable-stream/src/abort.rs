//! Abort signals for cancelling an in-progress pipe.

use crate::error::{AbortError, Reason};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

#[derive(Debug)]
struct AbortState {
    reason: OnceLock<Reason>,
    notify: Notify,
}

/// Owner side of an abort signal.
///
/// Only the first call to [`abort`](Self::abort) has effect; later calls
/// are no-ops and the original reason is kept.
#[derive(Debug, Clone)]
pub struct AbortController {
    state: Arc<AbortState>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AbortState {
                reason: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Returns a signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            state: Arc::clone(&self.state),
        }
    }

    /// Fires the signal with `reason`.
    pub fn abort(&self, reason: Reason) {
        if self.state.reason.set(reason).is_ok() {
            tracing::debug!("abort signal fired");
            self.state.notify.notify_waiters();
        }
    }

    /// Fires the signal with an [`AbortError`] reason.
    pub fn abort_default(&self) {
        self.abort(Reason::new(AbortError));
    }
}

/// Cloneable observer of an [`AbortController`].
#[derive(Clone)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl AbortSignal {
    /// Returns `true` once the controller has fired.
    pub fn is_aborted(&self) -> bool {
        self.state.reason.get().is_some()
    }

    /// The abort reason, if fired.
    pub fn reason(&self) -> Option<Reason> {
        self.state.reason.get().cloned()
    }

    /// Waits until the signal fires and returns its reason.
    pub async fn aborted(&self) -> Reason {
        loop {
            // Register before checking so a concurrent abort is not missed.
            let notified = self.state.notify.notified();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_abort_wins() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());

        controller.abort(Reason::msg("first"));
        controller.abort(Reason::msg("second"));

        assert!(signal.is_aborted());
        assert_eq!(signal.reason().unwrap().as_message(), Some("first"));
        assert_eq!(signal.aborted().await.as_message(), Some("first"));
    }

    #[tokio::test]
    async fn waiter_wakes_on_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.aborted().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort_default();

        let reason = waiter.await.unwrap();
        assert!(reason.downcast_ref::<AbortError>().is_some());
    }
}
