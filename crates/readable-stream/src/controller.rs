//! Producer-side controller and the stream state machine it drives.

#[cfg(debug_assertions)]
use crate::invariants::{
    debug_assert_from_readable, debug_assert_no_waiting_reads, debug_assert_single_flight,
};
use crate::error::{Reason, StreamError};
use crate::reader::ReadResult;
use crate::stream::{
    ReadIntoRequest, ReadSender, ReaderSlot, StreamInner, StreamShared, StreamState,
};
use bytes::BytesMut;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Handle through which an underlying source feeds a stream.
///
/// The controller holds a weak reference: a source that keeps its
/// controller does not keep the stream alive. Operations on a controller
/// whose stream has been dropped fail with `InvalidState`.
pub struct ReadableStreamController<T> {
    shared: Weak<StreamShared<T>>,
}

impl<T> Clone for ReadableStreamController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ReadableStreamController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStreamController")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

fn dropped() -> StreamError {
    StreamError::invalid_state("the stream has been dropped")
}

impl<T: Send + 'static> ReadableStreamController<T> {
    pub(crate) fn new(shared: Weak<StreamShared<T>>) -> Self {
        Self { shared }
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<StreamShared<T>>> {
        self.shared.upgrade()
    }

    /// Appends a chunk, or hands it straight to the oldest pending read.
    pub fn enqueue(&self, chunk: T) -> Result<(), StreamError> {
        let shared = self.upgrade().ok_or_else(dropped)?;
        let mut inner = shared.lock();
        inner.enqueue(chunk)?;
        shared.call_pull_if_needed(&mut inner);
        Ok(())
    }

    /// Requests closure. Takes effect once every queued chunk has been read.
    pub fn close(&self) -> Result<(), StreamError> {
        let shared = self.upgrade().ok_or_else(dropped)?;
        let mut inner = shared.lock();
        inner.close()
    }

    /// Errors the stream with `reason`, discarding queued chunks.
    pub fn error(&self, reason: Reason) {
        if let Some(shared) = self.upgrade() {
            shared.lock().error(reason);
        }
    }

    /// See [`ReadableStream::desired_size`](crate::ReadableStream::desired_size).
    /// A dropped stream reports `None`.
    pub fn desired_size(&self) -> Option<f64> {
        self.upgrade()?.lock().desired_size()
    }

    /// Returns `true` while the stream can accept another chunk without
    /// exceeding its budget, or a reader is already waiting for one.
    pub(crate) fn wants_chunk(&self) -> Result<bool, Reason> {
        let shared = self
            .upgrade()
            .ok_or_else(|| Reason::new(dropped()))?;
        let inner = shared.lock();
        match &inner.state {
            StreamState::Errored(reason) => Err(reason.clone()),
            StreamState::Closed => Err(Reason::new(StreamError::invalid_state(
                "the readable side is closed",
            ))),
            StreamState::Readable if inner.close_requested => Err(Reason::new(
                StreamError::invalid_state("the readable side is closing"),
            )),
            StreamState::Readable => Ok(inner.desired_size().is_some_and(|d| d > 0.0)
                || inner.pending_reads() > 0),
        }
    }

    /// Notifier fired whenever queued chunks are consumed, reads are
    /// registered or the stream leaves `Readable`.
    pub(crate) fn notify(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.upgrade()?.lock().notify))
    }
}

/// Hands `chunk` to the oldest live default read request, returning it if
/// every waiting request has been dropped.
fn deliver<T>(slot: &mut ReaderSlot<T>, mut chunk: T) -> Option<T> {
    while let Some(tx) = slot.read_requests.pop_front() {
        match tx.send(Ok(ReadResult::chunk(chunk))) {
            Ok(()) => return None,
            Err(Ok(ReadResult {
                value: Some(returned),
                ..
            })) => chunk = returned,
            Err(_) => return None,
        }
    }
    Some(chunk)
}

impl<T> StreamInner<T> {
    pub(crate) fn enqueue(&mut self, chunk: T) -> Result<(), StreamError> {
        if self.close_requested || !self.state.is_readable() {
            return Err(StreamError::invalid_state(format!(
                "cannot enqueue into a stream that is {}",
                if self.close_requested && self.state.is_readable() {
                    "closing"
                } else {
                    "not readable"
                }
            )));
        }
        if let Some(hooks) = &self.bytes {
            if (hooks.byte_len)(&chunk) == 0 {
                return Err(StreamError::type_error(
                    "byte stream chunks must not be empty",
                ));
            }
        }

        let chunk = match self.reader.as_mut() {
            Some(slot) if !slot.read_requests.is_empty() => match deliver(slot, chunk) {
                None => return Ok(()),
                Some(chunk) => chunk,
            },
            _ => chunk,
        };

        let size = self.chunk_size(&chunk);
        if !size.is_finite() || size < 0.0 {
            let err = StreamError::Range(format!(
                "chunk size must be a finite, non-negative number, got {size}"
            ));
            self.error(Reason::new(err.clone()));
            return Err(err);
        }
        self.queue.push(chunk, size);

        if let Some(service) = self.bytes.as_ref().map(|hooks| hooks.service_read_into) {
            service(self);
        }

        #[cfg(debug_assertions)]
        debug_assert_no_waiting_reads!(self.queue.len(), self.pending_reads());

        Ok(())
    }

    fn chunk_size(&self, chunk: &T) -> f64 {
        match &self.size {
            Some(size) => size(chunk),
            None => match &self.bytes {
                Some(hooks) => (hooks.byte_len)(chunk) as f64,
                None => 1.0,
            },
        }
    }

    /// Puts back a chunk whose read was dropped before it was claimed. The
    /// chunk was the oldest one handed out, so it goes to the next waiting
    /// read or to the head of the queue.
    pub(crate) fn requeue(&mut self, chunk: T) {
        if !self.state.is_readable() {
            tracing::trace!(state = %self.state, "discarding chunk returned after the stream settled");
            return;
        }
        let chunk = match self.reader.as_mut() {
            Some(slot) if !slot.read_requests.is_empty() => match deliver(slot, chunk) {
                None => return,
                Some(chunk) => chunk,
            },
            _ => chunk,
        };
        let size = self.chunk_size(&chunk).max(0.0);
        self.queue.push_front(chunk, size);
        tracing::trace!(queued = self.queue.len(), "unclaimed chunk requeued");

        if let Some(service) = self.bytes.as_ref().map(|hooks| hooks.service_read_into) {
            service(self);
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn close(&mut self) -> Result<(), StreamError> {
        if self.close_requested || !self.state.is_readable() {
            return Err(StreamError::invalid_state(
                "the stream is not in a state that permits close",
            ));
        }
        self.close_requested = true;
        tracing::debug!(queued = self.queue.len(), "close requested");
        if self.queue.is_empty() {
            self.finalize_close();
        }
        Ok(())
    }

    /// Transitions to `Closed`, resolving pending reads with `done` and the
    /// reader's closed signal.
    pub(crate) fn finalize_close(&mut self) {
        if !self.state.is_readable() {
            return;
        }

        #[cfg(debug_assertions)]
        debug_assert_from_readable!(self.state);

        self.state = StreamState::Closed;
        if let Some(slot) = self.reader.as_mut() {
            for tx in slot.read_requests.drain(..) {
                let _ = tx.send(Ok(ReadResult::done()));
            }
            for request in slot.read_into_requests.drain(..) {
                let mut view = request.view;
                view.truncate(0);
                let _ = request.tx.send(Ok(ReadResult::done_with(view)));
            }
            slot.closed_tx.send_replace(Some(Ok(())));
        }
        self.notify.notify_waiters();
        tracing::debug!("stream closed");
    }

    /// Errors the stream. No-op unless the stream is still readable.
    pub(crate) fn error(&mut self, reason: Reason) {
        if !self.state.is_readable() {
            return;
        }

        #[cfg(debug_assertions)]
        debug_assert_from_readable!(self.state);

        tracing::debug!(%reason, "stream errored");
        self.queue.clear();
        self.state = StreamState::Errored(reason.clone());
        if let Some(slot) = self.reader.as_mut() {
            for tx in slot.read_requests.drain(..) {
                let _ = tx.send(Err(StreamError::Stream(reason.clone())));
            }
            for request in slot.read_into_requests.drain(..) {
                let _ = request.tx.send(Err(StreamError::Stream(reason.clone())));
            }
            slot.closed_tx
                .send_replace(Some(Err(StreamError::Stream(reason.clone()))));
        }
        self.notify.notify_waiters();
    }

    /// Pull precondition: started, readable, no close pending, and either
    /// budget remaining or a reader waiting.
    pub(crate) fn should_call_pull(&self) -> bool {
        if !self.started || !self.state.is_readable() || self.close_requested {
            return false;
        }
        if self.pending_reads() > 0 {
            return true;
        }
        self.desired_size().is_some_and(|d| d > 0.0)
    }
}

impl<T> StreamInner<T> {
    /// Bookkeeping after a read consumed queued data: wake writers waiting on
    /// backpressure and finish a deferred close once the queue drains.
    pub(crate) fn after_dequeue(&mut self) {
        self.notify.notify_waiters();
        if self.close_requested && self.queue.is_empty() {
            self.finalize_close();
        }
    }

    pub(crate) fn register_read_into(&mut self, view: BytesMut, tx: ReadSender<BytesMut>) {
        if let Some(slot) = self.reader.as_mut() {
            slot.read_into_requests
                .push_back(ReadIntoRequest { view, tx });
        }
        self.notify.notify_waiters();
    }
}

impl<T: Send + 'static> StreamShared<T> {
    pub(crate) fn spawn_start(shared: &Arc<Self>) {
        let Some(source) = shared.source.clone() else {
            return;
        };
        let controller = ReadableStreamController::new(Arc::downgrade(shared));
        tokio::spawn(async move {
            let result = source.start_boxed(&controller).await;
            let Some(shared) = controller.upgrade() else {
                return;
            };
            let mut inner = shared.lock();
            inner.started = true;
            match result {
                Ok(()) => {
                    tracing::trace!("underlying source started");
                    shared.call_pull_if_needed(&mut inner);
                }
                Err(reason) => inner.error(reason),
            }
        });
    }

    /// Issues a pull if the stream wants data. A request made while a pull
    /// is in flight is coalesced into one follow-up pull.
    pub(crate) fn call_pull_if_needed(self: &Arc<Self>, inner: &mut StreamInner<T>) {
        let Some(source) = self.source.clone() else {
            return;
        };
        if !inner.should_call_pull() {
            return;
        }
        if inner.pulling {
            inner.pull_again = true;
            return;
        }

        #[cfg(debug_assertions)]
        debug_assert_single_flight!(inner.pulling);

        inner.pulling = true;
        tracing::trace!(desired = ?inner.desired_size(), "pulling from underlying source");

        let controller = ReadableStreamController::new(Arc::downgrade(self));
        tokio::spawn(async move {
            let result = source.pull_boxed(&controller).await;
            let Some(shared) = controller.upgrade() else {
                return;
            };
            let mut inner = shared.lock();
            inner.pulling = false;
            match result {
                Ok(()) => {
                    if inner.pull_again {
                        inner.pull_again = false;
                        shared.call_pull_if_needed(&mut inner);
                    }
                }
                Err(reason) => inner.error(reason),
            }
        });
    }
}
