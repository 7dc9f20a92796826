//! The readable stream handle and its shared state.

use crate::config::{QueuingStrategy, SizeFn, TeeOptions};
use crate::controller::ReadableStreamController;
use crate::descriptor::{CapabilityDescriptor, READABLE_STREAM};
use crate::error::{Reason, StreamError};
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_unlocked;
use crate::queue::Queue;
use crate::reader::{ReadResult, ReadableStreamDefaultReader};
use crate::source::{UnderlyingSource, UnderlyingSourceBoxed};
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch, Notify};

/// Opaque handle slot owned by the host embedding layer.
///
/// The engine stores it at construction and hands it back on request; it
/// never reads or interprets the value.
pub type EmbedderContext = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of a stream. `Closed` and `Errored` are absorbing.
#[derive(Debug, Clone)]
pub enum StreamState {
    Readable,
    Closed,
    Errored(Reason),
}

impl StreamState {
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Readable)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored(_))
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Readable => f.write_str("readable"),
            Self::Closed => f.write_str("closed"),
            Self::Errored(_) => f.write_str("errored"),
        }
    }
}

/// Outcome published through `watch` channels for closed and cancel signals.
pub(crate) type Outcome = Option<Result<(), StreamError>>;

pub(crate) type ReadSender<T> = oneshot::Sender<Result<ReadResult<T>, StreamError>>;

/// A pending BYOB read: the caller's view and where to deliver it.
pub(crate) struct ReadIntoRequest {
    pub(crate) view: BytesMut,
    pub(crate) tx: ReadSender<BytesMut>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderKind {
    Default,
    Byob,
}

/// Bookkeeping for the attached reader. Owned by the stream, not the reader.
pub(crate) struct ReaderSlot<T> {
    pub(crate) id: u64,
    pub(crate) kind: ReaderKind,
    pub(crate) read_requests: VecDeque<ReadSender<T>>,
    pub(crate) read_into_requests: VecDeque<ReadIntoRequest>,
    pub(crate) closed_tx: watch::Sender<Outcome>,
}

impl<T> ReaderSlot<T> {
    pub(crate) fn pending(&self) -> usize {
        self.read_requests.len() + self.read_into_requests.len()
    }
}

/// Byte-stream behaviour, installed only for `ReadableStream<Bytes>`.
///
/// Plain function pointers keep the generic state machine free of any
/// knowledge about `Bytes` while still letting it service BYOB requests.
pub(crate) struct ByteHooks<T> {
    pub(crate) byte_len: fn(&T) -> usize,
    pub(crate) service_read_into: fn(&mut StreamInner<T>),
}

/// Mutable stream state. Guarded by the `StreamShared` mutex, which is never
/// held across an await point.
pub(crate) struct StreamInner<T> {
    pub(crate) state: StreamState,
    pub(crate) queue: Queue<T>,
    pub(crate) high_water_mark: f64,
    pub(crate) size: Option<SizeFn<T>>,
    pub(crate) started: bool,
    pub(crate) pulling: bool,
    pub(crate) pull_again: bool,
    pub(crate) close_requested: bool,
    pub(crate) disturbed: bool,
    pub(crate) reader: Option<ReaderSlot<T>>,
    pub(crate) next_reader_id: u64,
    pub(crate) cancel_outcome: Option<watch::Receiver<Outcome>>,
    pub(crate) bytes: Option<ByteHooks<T>>,
    pub(crate) notify: Arc<Notify>,
}

pub(crate) struct StreamShared<T> {
    inner: Mutex<StreamInner<T>>,
    pub(crate) source: Option<Arc<dyn UnderlyingSourceBoxed<T>>>,
    pub(crate) embedder: Option<EmbedderContext>,
}

impl<T> StreamShared<T> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A readable stream of opaque chunks.
///
/// `ReadableStream` is a reference-counted handle: clones refer to the same
/// stream, and the stream is freed once the last handle, reader, pipe and
/// tee branch referring to it is dropped.
pub struct ReadableStream<T> {
    pub(crate) shared: Arc<StreamShared<T>>,
}

impl<T> Clone for ReadableStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ReadableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ReadableStream")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("locked", &inner.reader.is_some())
            .finish()
    }
}

/// Creates a push-only stream with no underlying-source callbacks.
///
/// The returned controller is the producer side; the stream is started
/// immediately and never pulls.
pub fn channel<T: Send + 'static>(
    strategy: QueuingStrategy<T>,
) -> Result<(ReadableStream<T>, ReadableStreamController<T>), StreamError> {
    let stream = ReadableStream::construct(None, strategy, None, None)?;
    let controller = stream.controller();
    Ok((stream, controller))
}

impl<T: Send + 'static> ReadableStream<T> {
    /// Static description of the attributes and operations this type exposes.
    pub const DESCRIPTOR: &'static CapabilityDescriptor = &READABLE_STREAM;

    /// Constructs a stream over `source` with the given queuing strategy.
    ///
    /// The source's `start` callback is spawned on the current tokio runtime;
    /// no pull is issued before it completes.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new<S: UnderlyingSource<T>>(
        source: S,
        strategy: QueuingStrategy<T>,
    ) -> Result<Self, StreamError> {
        Self::construct(Some(Arc::new(source)), strategy, None, None)
    }

    /// Like [`ReadableStream::new`], attaching an embedder context handle.
    pub fn new_with_context<S: UnderlyingSource<T>>(
        source: S,
        strategy: QueuingStrategy<T>,
        context: EmbedderContext,
    ) -> Result<Self, StreamError> {
        Self::construct(Some(Arc::new(source)), strategy, None, Some(context))
    }

    pub(crate) fn construct(
        source: Option<Arc<dyn UnderlyingSourceBoxed<T>>>,
        strategy: QueuingStrategy<T>,
        bytes: Option<ByteHooks<T>>,
        embedder: Option<EmbedderContext>,
    ) -> Result<Self, StreamError> {
        strategy.validate()?;

        let has_source = source.is_some();
        let inner = StreamInner {
            state: StreamState::Readable,
            queue: Queue::new(),
            high_water_mark: strategy.high_water_mark,
            size: strategy.size,
            started: !has_source,
            pulling: false,
            pull_again: false,
            close_requested: false,
            disturbed: false,
            reader: None,
            next_reader_id: 0,
            cancel_outcome: None,
            bytes,
            notify: Arc::new(Notify::new()),
        };
        let shared = Arc::new(StreamShared {
            inner: Mutex::new(inner),
            source,
            embedder,
        });

        if has_source {
            StreamShared::spawn_start(&shared);
        }

        Ok(Self { shared })
    }

    pub(crate) fn controller(&self) -> ReadableStreamController<T> {
        ReadableStreamController::new(Arc::downgrade(&self.shared))
    }

    /// Returns `true` iff a reader is currently attached.
    pub fn locked(&self) -> bool {
        self.shared.lock().reader.is_some()
    }

    /// Returns `true` once the stream has been read from or cancelled.
    pub fn is_disturbed(&self) -> bool {
        self.shared.lock().disturbed
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared.lock().state.clone()
    }

    /// `None` if errored, `Some(0.0)` if closed, otherwise
    /// `high_water_mark - queue_total_size`.
    pub fn desired_size(&self) -> Option<f64> {
        self.shared.lock().desired_size()
    }

    /// Returns `true` if the stream was built with [`ReadableStream::new_bytes`].
    pub fn is_byte_stream(&self) -> bool {
        self.shared.lock().bytes.is_some()
    }

    /// Returns the embedder context supplied at construction, untouched.
    pub fn embedder_context(&self) -> Option<&EmbedderContext> {
        self.shared.embedder.as_ref()
    }

    /// Cancels the stream, discarding queued chunks and forwarding `reason`
    /// to the underlying source.
    ///
    /// Fails with a type error if a reader is attached; cancel through the
    /// reader instead.
    pub async fn cancel(&self, reason: Reason) -> Result<(), StreamError> {
        if self.locked() {
            return Err(StreamError::type_error(
                "cannot cancel a stream that is locked to a reader",
            ));
        }
        crate::cancel::cancel_stream(&self.shared, reason).await
    }

    /// Attaches a default reader, locking the stream.
    pub fn get_reader(&self) -> Result<ReadableStreamDefaultReader<T>, StreamError> {
        let (id, closed) = self.shared.acquire_reader(ReaderKind::Default)?;
        Ok(ReadableStreamDefaultReader::new(self.clone(), id, closed))
    }

    /// Splits the stream into two branches sharing upstream chunks by clone
    /// of the handle.
    pub fn tee(&self) -> Result<(ReadableStream<T>, ReadableStream<T>), StreamError>
    where
        T: Clone,
    {
        crate::tee::tee(self, TeeOptions::shared())
    }

    /// Splits the stream into two branches with explicit options.
    pub fn tee_with(
        &self,
        options: TeeOptions<T>,
    ) -> Result<(ReadableStream<T>, ReadableStream<T>), StreamError>
    where
        T: Clone,
    {
        crate::tee::tee(self, options)
    }
}

impl ReadableStream<Bytes> {
    /// Constructs a byte stream. Chunks are sized by their length and a
    /// BYOB reader may be attached with [`ReadableStream::get_byob_reader`].
    pub fn new_bytes<S: UnderlyingSource<Bytes>>(
        source: S,
        high_water_mark: f64,
    ) -> Result<Self, StreamError> {
        Self::construct(
            Some(Arc::new(source)),
            QueuingStrategy::bytes(high_water_mark),
            Some(crate::byob::byte_hooks()),
            None,
        )
    }

    /// Push-only byte stream; the byte counterpart of [`channel`].
    pub fn byte_channel(
        high_water_mark: f64,
    ) -> Result<(Self, ReadableStreamController<Bytes>), StreamError> {
        let stream = Self::construct(
            None,
            QueuingStrategy::bytes(high_water_mark),
            Some(crate::byob::byte_hooks()),
            None,
        )?;
        let controller = stream.controller();
        Ok((stream, controller))
    }
}

impl<T> StreamShared<T> {
    /// Attaches a reader slot and returns its lock token and closed signal.
    pub(crate) fn acquire_reader(
        &self,
        kind: ReaderKind,
    ) -> Result<(u64, watch::Receiver<Outcome>), StreamError> {
        let mut inner = self.lock();
        if inner.reader.is_some() {
            return Err(StreamError::type_error(
                "ReadableStream is already locked to a reader",
            ));
        }
        if kind == ReaderKind::Byob && inner.bytes.is_none() {
            return Err(StreamError::type_error(
                "a BYOB reader requires a byte stream",
            ));
        }

        #[cfg(debug_assertions)]
        debug_assert_unlocked!(inner.reader.is_some());

        let initial = match &inner.state {
            StreamState::Readable => None,
            StreamState::Closed => Some(Ok(())),
            StreamState::Errored(reason) => Some(Err(StreamError::Stream(reason.clone()))),
        };
        let (closed_tx, closed_rx) = watch::channel(initial);

        inner.next_reader_id += 1;
        let id = inner.next_reader_id;
        inner.reader = Some(ReaderSlot {
            id,
            kind,
            read_requests: VecDeque::new(),
            read_into_requests: VecDeque::new(),
            closed_tx,
        });
        tracing::trace!(reader = id, ?kind, "reader attached");
        Ok((id, closed_rx))
    }

    /// Detaches the reader identified by `id`, rejecting its pending reads.
    /// Releasing an already-detached reader is a no-op.
    pub(crate) fn release_reader(&self, id: u64) {
        let mut inner = self.lock();
        if !inner.is_attached(id) {
            return;
        }
        if let Some(slot) = inner.reader.take() {
            let released = || StreamError::type_error("reader released while reading");
            for tx in slot.read_requests {
                let _ = tx.send(Err(released()));
            }
            for request in slot.read_into_requests {
                let _ = request.tx.send(Err(released()));
            }
            slot.closed_tx
                .send_replace(Some(Err(StreamError::type_error("reader was released"))));
            tracing::trace!(reader = id, kind = ?slot.kind, "reader released");
        }
    }
}

impl<T> StreamInner<T> {
    pub(crate) fn is_attached(&self, id: u64) -> bool {
        self.reader.as_ref().is_some_and(|slot| slot.id == id)
    }

    pub(crate) fn desired_size(&self) -> Option<f64> {
        match self.state {
            StreamState::Errored(_) => None,
            StreamState::Closed => Some(0.0),
            StreamState::Readable => Some(self.high_water_mark - self.queue.total_size()),
        }
    }

    pub(crate) fn pending_reads(&self) -> usize {
        self.reader.as_ref().map_or(0, ReaderSlot::pending)
    }
}
