//! Byte streams: BYOB ("bring your own buffer") reads into caller views.

use crate::error::{Reason, StreamError};
use crate::reader::{wait_outcome, ReadFuture, ReadResult, Restore};
use crate::stream::{
    ByteHooks, Outcome, ReadableStream, ReaderKind, StreamInner, StreamShared, StreamState,
};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

pub(crate) fn byte_hooks() -> ByteHooks<Bytes> {
    ByteHooks {
        byte_len: Bytes::len,
        service_read_into,
    }
}

/// Fills pending read-into requests from the queue, oldest first.
fn service_read_into(inner: &mut StreamInner<Bytes>) {
    let mut serviced = false;
    while !inner.queue.is_empty() {
        let Some(request) = inner
            .reader
            .as_mut()
            .and_then(|slot| slot.read_into_requests.pop_front())
        else {
            break;
        };
        let mut view = request.view;
        let filled = inner.queue.fill(&mut view[..]);
        view.truncate(filled);
        serviced = true;
        if let Err(Ok(ReadResult {
            value: Some(view), ..
        })) = request.tx.send(Ok(ReadResult::chunk(view)))
        {
            // The reader stopped waiting; keep its bytes for the next read.
            if !view.is_empty() {
                inner.queue.push_front(view.freeze(), filled as f64);
            }
        }
    }
    if serviced {
        inner.after_dequeue();
    }
}

/// Returns the bytes of a filled but unclaimed view to the queue.
fn requeue_view(shared: &Arc<StreamShared<Bytes>>) -> Restore<BytesMut> {
    let stream = Arc::downgrade(shared);
    Box::new(move |view: BytesMut| {
        if view.is_empty() {
            return;
        }
        if let Some(shared) = stream.upgrade() {
            shared.lock().requeue(view.freeze());
        }
    })
}

/// Exclusive reader that reads into caller-supplied buffers.
///
/// A read fills at most `view.len()` bytes, possibly spanning several
/// enqueued chunks, and resolves with the view truncated to the bytes
/// written. Once the stream closes, reads resolve `done` with an empty view.
pub struct ReadableStreamByobReader {
    stream: ReadableStream<Bytes>,
    id: u64,
    closed: watch::Receiver<Outcome>,
}

impl fmt::Debug for ReadableStreamByobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStreamByobReader")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl ReadableStreamByobReader {
    pub fn is_attached(&self) -> bool {
        self.stream.shared.lock().is_attached(self.id)
    }

    /// Reads into `view`, e.g. `BytesMut::zeroed(4096)`.
    pub fn read(&self, mut view: BytesMut) -> ReadFuture<BytesMut> {
        let shared = &self.stream.shared;
        let mut inner = shared.lock();
        if !inner.is_attached(self.id) {
            return ReadFuture::ready(Err(StreamError::type_error(
                "cannot read from a released reader",
            )));
        }
        if view.is_empty() {
            return ReadFuture::ready(Err(StreamError::type_error(
                "BYOB read view must not be empty",
            )));
        }
        inner.disturbed = true;

        match &inner.state {
            StreamState::Errored(reason) => {
                return ReadFuture::ready(Err(StreamError::Stream(reason.clone())));
            }
            StreamState::Closed => {
                view.truncate(0);
                return ReadFuture::ready(Ok(ReadResult::done_with(view)));
            }
            StreamState::Readable => {}
        }

        if !inner.queue.is_empty() {
            let filled = inner.queue.fill(&mut view[..]);
            view.truncate(filled);
            inner.after_dequeue();
            shared.call_pull_if_needed(&mut inner);
            return ReadFuture::ready(Ok(ReadResult::chunk(view))).restoring(requeue_view(shared));
        }

        let (tx, rx) = oneshot::channel();
        inner.register_read_into(view, tx);
        shared.call_pull_if_needed(&mut inner);
        ReadFuture::pending(rx).restoring(requeue_view(shared))
    }

    pub fn release_lock(&self) {
        self.stream.shared.release_reader(self.id);
    }

    pub async fn cancel(&self, reason: Reason) -> Result<(), StreamError> {
        if !self.is_attached() {
            return Err(StreamError::type_error(
                "cannot cancel through a released reader",
            ));
        }
        crate::cancel::cancel_stream(&self.stream.shared, reason).await
    }

    pub fn closed(&self) -> impl Future<Output = Result<(), StreamError>> + Send + 'static {
        wait_outcome(self.closed.clone())
    }
}

impl Drop for ReadableStreamByobReader {
    fn drop(&mut self) {
        self.stream.shared.release_reader(self.id);
    }
}

impl ReadableStream<Bytes> {
    /// Attaches a BYOB reader. Fails with a type error if the stream is
    /// locked or was not constructed as a byte stream.
    pub fn get_byob_reader(&self) -> Result<ReadableStreamByobReader, StreamError> {
        let (id, closed) = self.shared.acquire_reader(ReaderKind::Byob)?;
        Ok(ReadableStreamByobReader {
            stream: self.clone(),
            id,
            closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_spans_chunks_and_splits_remainder() {
        let (stream, controller) = ReadableStream::byte_channel(64.0).unwrap();
        controller.enqueue(Bytes::from_static(b"abc")).unwrap();
        controller.enqueue(Bytes::from_static(b"defg")).unwrap();

        let reader = stream.get_byob_reader().unwrap();
        let first = reader.read(BytesMut::zeroed(5)).await.unwrap();
        assert_eq!(&first.value.unwrap()[..], b"abcde");
        assert_eq!(stream.desired_size(), Some(62.0));

        let second = reader.read(BytesMut::zeroed(5)).await.unwrap();
        assert_eq!(&second.value.unwrap()[..], b"fg");
    }

    #[tokio::test]
    async fn pending_read_is_filled_by_enqueue() {
        let (stream, controller) = ReadableStream::byte_channel(0.0).unwrap();
        let reader = stream.get_byob_reader().unwrap();

        let read = reader.read(BytesMut::zeroed(4));
        controller.enqueue(Bytes::from_static(b"xyz")).unwrap();

        let result = read.await.unwrap();
        assert!(!result.done);
        assert_eq!(&result.value.unwrap()[..], b"xyz");
        assert_eq!(stream.desired_size(), Some(0.0));
    }

    #[tokio::test]
    async fn dropped_read_returns_bytes_to_queue() {
        let (stream, controller) = ReadableStream::byte_channel(16.0).unwrap();
        let reader = stream.get_byob_reader().unwrap();

        let read = reader.read(BytesMut::zeroed(4));
        controller.enqueue(Bytes::from_static(b"wxyz!")).unwrap();
        drop(read);

        assert_eq!(stream.desired_size(), Some(11.0));
        let result = reader.read(BytesMut::zeroed(8)).await.unwrap();
        assert_eq!(&result.value.unwrap()[..], b"wxyz!");
    }

    #[tokio::test]
    async fn closed_stream_returns_empty_view() {
        let (stream, controller) = ReadableStream::byte_channel(8.0).unwrap();
        let reader = stream.get_byob_reader().unwrap();
        let pending = reader.read(BytesMut::zeroed(4));
        controller.close().unwrap();

        let result = pending.await.unwrap();
        assert!(result.done);
        assert!(result.value.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_views_and_empty_chunks() {
        let (stream, controller) = ReadableStream::byte_channel(8.0).unwrap();
        let reader = stream.get_byob_reader().unwrap();

        let err = reader.read(BytesMut::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::Type(_)));

        let err = controller.enqueue(Bytes::new()).unwrap_err();
        assert!(matches!(err, StreamError::Type(_)));
    }

    #[tokio::test]
    async fn byob_reader_requires_unlocked_byte_stream() {
        let (plain, _controller) = crate::channel::<Bytes>(Default::default()).unwrap();
        assert!(matches!(
            plain.get_byob_reader().unwrap_err(),
            StreamError::Type(_)
        ));

        let (bytes, _controller) = ReadableStream::byte_channel(1.0).unwrap();
        let _reader = bytes.get_reader().unwrap();
        assert!(matches!(
            bytes.get_byob_reader().unwrap_err(),
            StreamError::Type(_)
        ));
    }
}
