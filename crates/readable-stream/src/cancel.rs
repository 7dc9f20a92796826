//! Cancellation coordination.
//!
//! Every consumer-initiated cancel (stream cancel, reader cancel, pipe
//! teardown, tee branch cancel) funnels through [`cancel_stream`], which
//! closes the stream and invokes the underlying source's `cancel` callback
//! at most once per stream. Later requests observe the first outcome.

use crate::error::{Reason, StreamError};
use crate::reader::wait_outcome;
use crate::stream::{StreamShared, StreamState};
use std::sync::Arc;
use tokio::sync::watch;

pub(crate) async fn cancel_stream<T: Send + 'static>(
    shared: &Arc<StreamShared<T>>,
    reason: Reason,
) -> Result<(), StreamError> {
    let outcome = {
        let mut inner = shared.lock();
        inner.disturbed = true;

        if let Some(outcome) = inner.cancel_outcome.clone() {
            outcome
        } else {
            match inner.state.clone() {
                StreamState::Closed => return Ok(()),
                StreamState::Errored(stored) => return Err(StreamError::Stream(stored)),
                StreamState::Readable => {}
            }

            tracing::debug!(%reason, queued = inner.queue.len(), "cancelling stream");
            inner.queue.clear();
            inner.finalize_close();

            let Some(source) = shared.source.clone() else {
                let (_, rx) = watch::channel(Some(Ok(())));
                inner.cancel_outcome = Some(rx);
                return Ok(());
            };

            let (tx, rx) = watch::channel(None);
            inner.cancel_outcome = Some(rx.clone());
            // The callback runs on its own task so the outcome is published
            // even if this caller stops waiting.
            tokio::spawn(async move {
                let result = source
                    .cancel_boxed(reason)
                    .await
                    .map_err(StreamError::Stream);
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "underlying source cancel failed");
                }
                tx.send_replace(Some(result));
            });
            rx
        }
    };

    wait_outcome(outcome).await
}
