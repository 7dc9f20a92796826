//! Pipe destinations.
//!
//! [`WritableSink`] is the minimal writable-side contract the pipe engine
//! drives. Two implementations ship with the crate: [`SinkWriter`] adapts
//! any `futures_sink::Sink`, and [`ControllerSink`] feeds another readable
//! stream, which is how [`identity_transform`] builds a pass-through pair.

use crate::config::QueuingStrategy;
use crate::controller::ReadableStreamController;
use crate::error::{Reason, StreamError};
use crate::stream::{channel, ReadableStream, StreamState};
use futures_sink::Sink;
use futures_util::future::poll_fn;
use futures_util::SinkExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

/// Observable state of a destination.
#[derive(Debug, Clone)]
pub enum SinkState {
    Writable,
    Closed,
    Errored(Reason),
}

/// Writable side of a pipe.
///
/// `ready` resolves once the destination can take another chunk and is the
/// backpressure point of [`pipe_to`](crate::ReadableStream::pipe_to): the
/// pipe never issues a write before it resolves and never has more than
/// one write in flight.
pub trait WritableSink<T: Send + 'static>: Send + Sync + 'static {
    fn state(&self) -> SinkState;

    fn ready(&self) -> impl Future<Output = Result<(), Reason>> + Send;

    fn write(&self, chunk: T) -> impl Future<Output = Result<(), Reason>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), Reason>> + Send;

    fn abort(&self, reason: Reason) -> impl Future<Output = Result<(), Reason>> + Send;
}

impl<T: Send + 'static, W: WritableSink<T>> WritableSink<T> for Arc<W> {
    fn state(&self) -> SinkState {
        (**self).state()
    }

    fn ready(&self) -> impl Future<Output = Result<(), Reason>> + Send {
        (**self).ready()
    }

    fn write(&self, chunk: T) -> impl Future<Output = Result<(), Reason>> + Send {
        (**self).write(chunk)
    }

    fn close(&self) -> impl Future<Output = Result<(), Reason>> + Send {
        (**self).close()
    }

    fn abort(&self, reason: Reason) -> impl Future<Output = Result<(), Reason>> + Send {
        (**self).abort(reason)
    }
}

/// Adapts a `futures_sink::Sink` into a pipe destination.
///
/// Each write is sent and flushed before it resolves. The first sink error
/// is latched as the destination's errored state.
pub struct SinkWriter<S> {
    sink: tokio::sync::Mutex<Pin<Box<S>>>,
    state: Mutex<SinkState>,
}

impl<S> fmt::Debug for SinkWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkWriter")
            .field("state", &self.current())
            .finish()
    }
}

impl<S> SinkWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: tokio::sync::Mutex::new(Box::pin(sink)),
            state: Mutex::new(SinkState::Writable),
        }
    }

    fn current(&self) -> SinkState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, next: SinkState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, SinkState::Writable) {
            *state = next;
        }
    }

    fn fail<E: Send + Sync + 'static>(&self, err: E) -> Reason {
        let reason = Reason::new(err);
        self.transition(SinkState::Errored(reason.clone()));
        reason
    }

    fn check_writable(&self) -> Result<(), Reason> {
        match self.current() {
            SinkState::Writable => Ok(()),
            SinkState::Errored(reason) => Err(reason),
            SinkState::Closed => Err(Reason::new(StreamError::type_error(
                "the destination is closed",
            ))),
        }
    }
}

impl<T, S> WritableSink<T> for SinkWriter<S>
where
    T: Send + 'static,
    S: Sink<T> + Send + 'static,
    S::Error: Send + Sync + 'static,
{
    fn state(&self) -> SinkState {
        self.current()
    }

    async fn ready(&self) -> Result<(), Reason> {
        self.check_writable()?;
        let mut sink = self.sink.lock().await;
        poll_fn(|cx| Sink::<T>::poll_ready(sink.as_mut(), cx))
            .await
            .map_err(|err| self.fail(err))
    }

    async fn write(&self, chunk: T) -> Result<(), Reason> {
        self.check_writable()?;
        let mut sink = self.sink.lock().await;
        SinkExt::<T>::send(&mut *sink, chunk)
            .await
            .map_err(|err| self.fail(err))
    }

    async fn close(&self) -> Result<(), Reason> {
        self.check_writable()?;
        let mut sink = self.sink.lock().await;
        SinkExt::<T>::close(&mut *sink)
            .await
            .map_err(|err| self.fail(err))?;
        self.transition(SinkState::Closed);
        Ok(())
    }

    async fn abort(&self, reason: Reason) -> Result<(), Reason> {
        self.transition(SinkState::Errored(reason));
        Ok(())
    }
}

/// Destination that enqueues into another readable stream.
///
/// `ready` waits until the target wants a chunk (positive desired size or
/// a waiting read), so backpressure propagates across the pair.
pub struct ControllerSink<T> {
    controller: ReadableStreamController<T>,
}

impl<T> Clone for ControllerSink<T> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

impl<T> fmt::Debug for ControllerSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerSink")
            .field("controller", &self.controller)
            .finish()
    }
}

impl<T: Send + 'static> ControllerSink<T> {
    pub fn new(controller: ReadableStreamController<T>) -> Self {
        Self { controller }
    }
}

impl<T: Send + 'static> WritableSink<T> for ControllerSink<T> {
    fn state(&self) -> SinkState {
        let Some(shared) = self.controller.upgrade() else {
            return SinkState::Closed;
        };
        let inner = shared.lock();
        match &inner.state {
            StreamState::Readable if inner.close_requested => SinkState::Closed,
            StreamState::Readable => SinkState::Writable,
            StreamState::Closed => SinkState::Closed,
            StreamState::Errored(reason) => SinkState::Errored(reason.clone()),
        }
    }

    async fn ready(&self) -> Result<(), Reason> {
        loop {
            let notify = self.controller.notify().ok_or_else(|| {
                Reason::new(StreamError::invalid_state("the readable side was dropped"))
            })?;
            // Register before checking so a wakeup between the two is kept.
            let notified = notify.notified();
            if self.controller.wants_chunk()? {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn write(&self, chunk: T) -> Result<(), Reason> {
        self.controller.enqueue(chunk).map_err(Reason::new)
    }

    async fn close(&self) -> Result<(), Reason> {
        self.controller.close().map_err(Reason::new)
    }

    async fn abort(&self, reason: Reason) -> Result<(), Reason> {
        self.controller.error(reason);
        Ok(())
    }
}

/// A writable side and the readable side it produces, for
/// [`pipe_through`](crate::ReadableStream::pipe_through).
#[derive(Debug)]
pub struct ReadableWritablePair<W, U> {
    pub writable: W,
    pub readable: ReadableStream<U>,
}

/// Pass-through pair: chunks written to `writable` come out of `readable`
/// unchanged, with `strategy` governing the readable side's buffering.
pub fn identity_transform<T: Send + 'static>(
    strategy: QueuingStrategy<T>,
) -> Result<ReadableWritablePair<ControllerSink<T>, T>, StreamError> {
    let (readable, controller) = channel(strategy)?;
    Ok(ReadableWritablePair {
        writable: ControllerSink::new(controller),
        readable,
    })
}
