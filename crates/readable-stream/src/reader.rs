//! Exclusive default reader and the read future it hands out.

use crate::error::{Reason, StreamError};
use crate::stream::{Outcome, ReadableStream, StreamShared, StreamState};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};

/// Result of a read: a chunk, or `done` once the stream has closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult<T> {
    pub value: Option<T>,
    pub done: bool,
}

impl<T> ReadResult<T> {
    pub(crate) fn chunk(value: T) -> Self {
        Self {
            value: Some(value),
            done: false,
        }
    }

    pub(crate) fn done() -> Self {
        Self {
            value: None,
            done: true,
        }
    }

    pub(crate) fn done_with(value: T) -> Self {
        Self {
            value: Some(value),
            done: true,
        }
    }

    /// Returns the chunk unless this result marks the end of the stream.
    pub fn into_chunk(self) -> Option<T> {
        if self.done {
            None
        } else {
            self.value
        }
    }
}

enum ReadState<T> {
    Ready(Option<Result<ReadResult<T>, StreamError>>),
    Pending(oneshot::Receiver<Result<ReadResult<T>, StreamError>>),
}

/// Future returned by `read()`.
///
/// Everything that can be decided synchronously (dequeuing a buffered
/// chunk, reporting `done`, rejecting a released reader) happens when
/// `read()` is called; the future only suspends when the read has been
/// registered as a pending request. The future does not borrow the reader.
///
/// Dropping the future before it yields a chunk it already holds puts the
/// chunk back at the head of the stream's queue.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ReadFuture<T> {
    state: ReadState<T>,
    restore: Option<Restore<T>>,
}

/// Returns an undelivered chunk to its stream.
pub(crate) type Restore<T> = Box<dyn FnOnce(T) + Send + Sync>;

impl<T> ReadFuture<T> {
    pub(crate) fn ready(result: Result<ReadResult<T>, StreamError>) -> Self {
        Self {
            state: ReadState::Ready(Some(result)),
            restore: None,
        }
    }

    pub(crate) fn pending(rx: oneshot::Receiver<Result<ReadResult<T>, StreamError>>) -> Self {
        Self {
            state: ReadState::Pending(rx),
            restore: None,
        }
    }

    pub(crate) fn restoring(mut self, restore: Restore<T>) -> Self {
        self.restore = Some(restore);
        self
    }
}

impl<T> Drop for ReadFuture<T> {
    fn drop(&mut self) {
        let Some(restore) = self.restore.take() else {
            return;
        };
        let unclaimed = match &mut self.state {
            ReadState::Ready(result) => result.take(),
            ReadState::Pending(rx) => {
                // Later deliveries fail and fall through to the next request.
                rx.close();
                rx.try_recv().ok()
            }
        };
        if let Some(Ok(ReadResult {
            value: Some(chunk),
            done: false,
        })) = unclaimed
        {
            restore(chunk);
        }
    }
}

/// Restore hook that requeues a chunk on the default read path.
pub(crate) fn requeue<T: Send + 'static>(shared: &Arc<StreamShared<T>>) -> Restore<T> {
    let stream = Arc::downgrade(shared);
    Box::new(move |chunk| {
        if let Some(shared) = stream.upgrade() {
            shared.lock().requeue(chunk);
        }
    })
}

// Nothing in a `ReadFuture` is structurally pinned.
impl<T> Unpin for ReadFuture<T> {}

impl<T> fmt::Debug for ReadFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = matches!(self.state, ReadState::Pending(_));
        f.debug_struct("ReadFuture").field("pending", &pending).finish()
    }
}

impl<T> Future for ReadFuture<T> {
    type Output = Result<ReadResult<T>, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ReadState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(StreamError::invalid_state("read future polled after completion"))
            })),
            ReadState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(StreamError::type_error(
                    "the stream was dropped while a read was pending",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Waits for a closed-signal outcome.
pub(crate) async fn wait_outcome(mut rx: watch::Receiver<Outcome>) -> Result<(), StreamError> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
        Err(_) => Err(StreamError::type_error("the stream was dropped")),
    }
}

/// Exclusive reader returning chunks one at a time.
///
/// Holding a reader locks the stream. The lock is released by
/// [`release_lock`](Self::release_lock) or when the reader is dropped.
pub struct ReadableStreamDefaultReader<T> {
    stream: ReadableStream<T>,
    id: u64,
    closed: watch::Receiver<Outcome>,
}

impl<T> fmt::Debug for ReadableStreamDefaultReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStreamDefaultReader")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<T> ReadableStreamDefaultReader<T> {
    pub(crate) fn new(stream: ReadableStream<T>, id: u64, closed: watch::Receiver<Outcome>) -> Self {
        Self { stream, id, closed }
    }

    /// Returns `true` while this reader holds the stream's lock.
    pub fn is_attached(&self) -> bool {
        self.stream.shared.lock().is_attached(self.id)
    }

    /// Detaches this reader. Pending reads reject with a type error; the
    /// stream's state and queue are untouched.
    pub fn release_lock(&self) {
        self.stream.shared.release_reader(self.id);
    }

    /// Resolves when the stream closes, rejects when it errors or this
    /// reader is released.
    pub fn closed(&self) -> impl Future<Output = Result<(), StreamError>> + Send + 'static {
        wait_outcome(self.closed.clone())
    }

    /// The stream this reader is bound to.
    pub fn stream(&self) -> &ReadableStream<T> {
        &self.stream
    }
}

impl<T: Send + 'static> ReadableStreamDefaultReader<T> {
    /// Reads the next chunk.
    ///
    /// Resolves immediately if a chunk is buffered or the stream is closed;
    /// otherwise suspends until the next `enqueue`, `close` or `error`.
    pub fn read(&self) -> ReadFuture<T> {
        let shared = &self.stream.shared;
        let mut inner = shared.lock();
        if !inner.is_attached(self.id) {
            return ReadFuture::ready(Err(StreamError::type_error(
                "cannot read from a released reader",
            )));
        }
        inner.disturbed = true;

        match &inner.state {
            StreamState::Errored(reason) => {
                return ReadFuture::ready(Err(StreamError::Stream(reason.clone())));
            }
            StreamState::Closed => return ReadFuture::ready(Ok(ReadResult::done())),
            StreamState::Readable => {}
        }

        if let Some(chunk) = inner.queue.pop() {
            inner.after_dequeue();
            shared.call_pull_if_needed(&mut inner);
            return ReadFuture::ready(Ok(ReadResult::chunk(chunk))).restoring(requeue(shared));
        }

        let (tx, rx) = oneshot::channel();
        if let Some(slot) = inner.reader.as_mut() {
            slot.read_requests.push_back(tx);
        }
        inner.notify.notify_waiters();
        shared.call_pull_if_needed(&mut inner);
        ReadFuture::pending(rx).restoring(requeue(shared))
    }

    /// Cancels the stream through this reader.
    pub async fn cancel(&self, reason: Reason) -> Result<(), StreamError> {
        if !self.is_attached() {
            return Err(StreamError::type_error(
                "cannot cancel through a released reader",
            ));
        }
        crate::cancel::cancel_stream(&self.stream.shared, reason).await
    }
}

impl<T> Drop for ReadableStreamDefaultReader<T> {
    fn drop(&mut self) {
        self.stream.shared.release_reader(self.id);
    }
}
