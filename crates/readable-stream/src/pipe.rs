//! Pipe engine: pumps a readable stream into a writable destination.
//!
//! The pump waits for the destination to be ready, reads one chunk, writes
//! it, and repeats, so at most one write is ever in flight and chunks are
//! written in read order. Whatever stops the pump first (source closed or
//! errored, destination closed or errored, abort signal) becomes the shutdown
//! cause. A failed destination close is reported; failed cancel and abort
//! actions are logged and the original cause is kept.

use crate::abort::AbortSignal;
use crate::config::PipeOptions;
use crate::error::{Reason, StreamError};
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_pipe_transition;
use crate::reader::ReadableStreamDefaultReader;
use crate::sink::{ReadableWritablePair, SinkState, WritableSink};
use crate::stream::ReadableStream;
use futures_util::future::join;
use std::fmt;
use std::future::Future;

/// Why the pump stopped.
#[derive(Debug)]
enum Cause {
    SourceClosed,
    SourceErrored(Reason),
    DestinationClosed,
    DestinationErrored(Reason),
    Aborted(Reason),
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceClosed => f.write_str("source closed"),
            Self::SourceErrored(_) => f.write_str("source errored"),
            Self::DestinationClosed => f.write_str("destination closed"),
            Self::DestinationErrored(_) => f.write_str("destination errored"),
            Self::Aborted(_) => f.write_str("aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeState {
    Piping,
    ShuttingDown,
    Finished,
}

struct Pipe<T, W> {
    reader: ReadableStreamDefaultReader<T>,
    dest: W,
    options: PipeOptions,
    state: PipeState,
}

/// Resolves with the signal's reason, or never if there is no signal.
async fn aborted(signal: Option<&AbortSignal>) -> Reason {
    match signal {
        Some(signal) => signal.aborted().await,
        None => std::future::pending().await,
    }
}

fn read_failure(err: StreamError) -> Cause {
    Cause::SourceErrored(err.into_reason())
}

impl<T: Send + 'static, W: WritableSink<T>> Pipe<T, W> {
    async fn run(mut self) -> Result<(), StreamError> {
        let cause = self.pump().await;
        self.transition(PipeState::ShuttingDown);
        tracing::debug!(%cause, "pipe shutting down");

        let result = self.shutdown(cause).await;

        self.reader.release_lock();
        self.transition(PipeState::Finished);
        result
    }

    fn transition(&mut self, next: PipeState) {
        #[cfg(debug_assertions)]
        debug_assert_pipe_transition!(self.state, next);

        self.state = next;
    }

    async fn pump(&self) -> Cause {
        let signal = self.options.signal.as_ref();
        if let Some(reason) = signal.and_then(AbortSignal::reason) {
            return Cause::Aborted(reason);
        }
        match self.dest.state() {
            SinkState::Writable => {}
            SinkState::Closed => return Cause::DestinationClosed,
            SinkState::Errored(reason) => return Cause::DestinationErrored(reason),
        }

        // Observes the source settling while the pump is parked on the
        // destination. It only resolves once the queue has drained.
        let mut source_closed = Box::pin(self.reader.closed());

        loop {
            tokio::select! {
                biased;
                reason = aborted(signal) => return Cause::Aborted(reason),
                settled = &mut source_closed => return match settled {
                    Ok(()) => Cause::SourceClosed,
                    Err(err) => read_failure(err),
                },
                ready = self.dest.ready() => {
                    if let Err(reason) = ready {
                        return Cause::DestinationErrored(reason);
                    }
                }
            }

            let chunk = tokio::select! {
                biased;
                reason = aborted(signal) => return Cause::Aborted(reason),
                result = self.reader.read() => match result {
                    Ok(result) if result.done => return Cause::SourceClosed,
                    Ok(result) => match result.value {
                        Some(chunk) => chunk,
                        None => return Cause::SourceClosed,
                    },
                    Err(err) => return read_failure(err),
                },
            };

            // A write in flight always completes; an abort is picked up at
            // the top of the next iteration.
            if let Err(reason) = self.dest.write(chunk).await {
                return Cause::DestinationErrored(reason);
            }

            match self.dest.state() {
                SinkState::Writable => {}
                SinkState::Closed => return Cause::DestinationClosed,
                SinkState::Errored(reason) => return Cause::DestinationErrored(reason),
            }
        }
    }

    async fn cancel_source(&self, reason: Reason) {
        if self.options.prevent_cancel {
            return;
        }
        if let Err(err) = self.reader.cancel(reason).await {
            tracing::warn!(error = %err, "pipe: cancelling the source failed");
        }
    }

    async fn abort_dest(&self, reason: Reason) {
        if self.options.prevent_abort {
            return;
        }
        if let Err(err) = self.dest.abort(reason).await {
            tracing::warn!(error = %err, "pipe: aborting the destination failed");
        }
    }

    async fn shutdown(&self, cause: Cause) -> Result<(), StreamError> {
        match cause {
            Cause::SourceClosed => {
                if self.options.prevent_close {
                    return Ok(());
                }
                self.dest.close().await.map_err(StreamError::Stream)
            }
            Cause::SourceErrored(reason) => {
                self.abort_dest(reason.clone()).await;
                Err(StreamError::Stream(reason))
            }
            Cause::DestinationErrored(reason) => {
                self.cancel_source(reason.clone()).await;
                Err(StreamError::Stream(reason))
            }
            Cause::DestinationClosed => {
                let err = StreamError::type_error("the pipe destination is closed");
                self.cancel_source(Reason::new(err.clone())).await;
                Err(err)
            }
            Cause::Aborted(reason) => {
                join(
                    self.cancel_source(reason.clone()),
                    self.abort_dest(reason.clone()),
                )
                .await;
                Err(StreamError::Aborted(reason))
            }
        }
    }
}

impl<T: Send + 'static> ReadableStream<T> {
    fn start_pipe<W: WritableSink<T>>(
        &self,
        dest: W,
        options: PipeOptions,
    ) -> Result<impl Future<Output = Result<(), StreamError>> + Send + 'static, StreamError> {
        let reader = self.get_reader()?;
        let pipe = Pipe {
            reader,
            dest,
            options,
            state: PipeState::Piping,
        };
        Ok(pipe.run())
    }

    /// Pipes every chunk into `dest`.
    ///
    /// The stream is locked when `pipe_to` is called, not when the returned
    /// future is first polled; a locked stream yields a future that fails
    /// with a type error. The future is `'static` and may be spawned.
    pub fn pipe_to<W: WritableSink<T>>(
        &self,
        dest: W,
        options: PipeOptions,
    ) -> impl Future<Output = Result<(), StreamError>> + Send + 'static {
        let started = self.start_pipe(dest, options);
        async move { started?.await }
    }

    /// Pipes into `pair.writable` on a background task and returns
    /// `pair.readable`.
    ///
    /// Fails synchronously with a type error if this stream is locked. The
    /// background pipe's outcome is only logged.
    pub fn pipe_through<W, U>(
        &self,
        pair: ReadableWritablePair<W, U>,
        options: PipeOptions,
    ) -> Result<ReadableStream<U>, StreamError>
    where
        W: WritableSink<T>,
    {
        let pipe = self.start_pipe(pair.writable, options)?;
        tokio::spawn(async move {
            if let Err(err) = pipe.await {
                tracing::debug!(error = %err, "pipe_through finished with an error");
            }
        });
        Ok(pair.readable)
    }
}
