//! Underlying source traits and the adapter over `futures_core::Stream`.
//!
//! `UnderlyingSource` uses native `impl Future` returns, which are not
//! object-safe. The stream stores sources as `Arc<dyn UnderlyingSourceBoxed<T>>`;
//! a blanket implementation bridges the two, so implementors only ever
//! write the ergonomic trait.

use crate::config::QueuingStrategy;
use crate::controller::ReadableStreamController;
use crate::error::{Reason, StreamError};
use crate::stream::ReadableStream;
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_stream::StreamExt;

/// Producer callbacks driving a [`ReadableStream`].
///
/// Every callback is optional. A failing `start` or `pull` errors the
/// stream with the returned reason; a failing `cancel` rejects the cancel
/// request but leaves the stream closed.
///
/// # Example
///
/// ```ignore
/// struct Counter(AtomicU32);
///
/// impl UnderlyingSource<u32> for Counter {
///     async fn pull(&self, controller: &ReadableStreamController<u32>) -> Result<(), Reason> {
///         let n = self.0.fetch_add(1, Ordering::Relaxed);
///         controller.enqueue(n).map_err(Reason::new)
///     }
/// }
/// ```
pub trait UnderlyingSource<T: Send + 'static>: Send + Sync + 'static {
    /// Runs once at construction. No pull is issued until it completes.
    fn start(
        &self,
        controller: &ReadableStreamController<T>,
    ) -> impl Future<Output = Result<(), Reason>> + Send {
        let _ = controller;
        async { Ok(()) }
    }

    /// Called when the stream wants more data. Never overlaps itself.
    fn pull(
        &self,
        controller: &ReadableStreamController<T>,
    ) -> impl Future<Output = Result<(), Reason>> + Send {
        let _ = controller;
        async { Ok(()) }
    }

    /// Called at most once, when the consumer cancels the stream.
    fn cancel(&self, reason: Reason) -> impl Future<Output = Result<(), Reason>> + Send {
        let _ = reason;
        async { Ok(()) }
    }
}

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Reason>> + Send + 'a>>;

/// Object-safe form of [`UnderlyingSource`].
pub trait UnderlyingSourceBoxed<T: Send + 'static>: Send + Sync {
    fn start_boxed<'a>(&'a self, controller: &'a ReadableStreamController<T>) -> BoxFuture<'a>;

    fn pull_boxed<'a>(&'a self, controller: &'a ReadableStreamController<T>) -> BoxFuture<'a>;

    fn cancel_boxed(&self, reason: Reason) -> BoxFuture<'_>;
}

impl<T: Send + 'static, S: UnderlyingSource<T>> UnderlyingSourceBoxed<T> for S {
    fn start_boxed<'a>(&'a self, controller: &'a ReadableStreamController<T>) -> BoxFuture<'a> {
        Box::pin(UnderlyingSource::start(self, controller))
    }

    fn pull_boxed<'a>(&'a self, controller: &'a ReadableStreamController<T>) -> BoxFuture<'a> {
        Box::pin(UnderlyingSource::pull(self, controller))
    }

    fn cancel_boxed(&self, reason: Reason) -> BoxFuture<'_> {
        Box::pin(UnderlyingSource::cancel(self, reason))
    }
}

/// Pulls one item per `pull` from a wrapped `futures_core::Stream`.
///
/// The wrapped stream is dropped on cancel or once it is exhausted.
pub struct StreamSource<S> {
    inner: tokio::sync::Mutex<Option<Pin<Box<S>>>>,
    cancelled: AtomicBool,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(Some(Box::pin(stream))),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl<T, S> UnderlyingSource<T> for StreamSource<S>
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    async fn pull(&self, controller: &ReadableStreamController<T>) -> Result<(), Reason> {
        let mut guard = self.inner.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Ok(());
        };
        let next = stream.next().await;
        if self.cancelled.load(Ordering::Acquire) {
            guard.take();
            return Ok(());
        }
        match next {
            Some(item) => controller.enqueue(item).map_err(Reason::new),
            None => {
                guard.take();
                controller.close().map_err(Reason::new)
            }
        }
    }

    async fn cancel(&self, _reason: Reason) -> Result<(), Reason> {
        self.cancelled.store(true, Ordering::Release);
        // A pull blocked in `next()` holds the lock; it drops the stream
        // itself once it observes the flag.
        if let Ok(mut guard) = self.inner.try_lock() {
            guard.take();
        }
        Ok(())
    }
}

impl<T: Send + 'static> ReadableStream<T> {
    /// Wraps any `futures_core::Stream` as a pull-driven readable stream.
    pub fn from_stream<S>(stream: S, strategy: QueuingStrategy<T>) -> Result<Self, StreamError>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        ReadableStream::construct(Some(Arc::new(StreamSource::new(stream))), strategy, None, None)
    }
}
