//! Configuration for stream construction, piping and teeing.

use crate::abort::AbortSignal;
use crate::error::StreamError;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Per-chunk sizing function.
pub type SizeFn<T> = Arc<dyn Fn(&T) -> f64 + Send + Sync>;

/// Structured-clone function used by the cloning tee variant.
pub type CloneFn<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// Queuing strategy: when to signal backpressure and how to size chunks.
pub struct QueuingStrategy<T> {
    /// Total queued size at or above which backpressure is asserted.
    ///
    /// Default: 1
    pub high_water_mark: f64,

    /// Sizing function. `None` counts every chunk as 1.
    pub size: Option<SizeFn<T>>,
}

impl<T> Default for QueuingStrategy<T> {
    fn default() -> Self {
        Self {
            high_water_mark: 1.0,
            size: None,
        }
    }
}

impl<T> Clone for QueuingStrategy<T> {
    fn clone(&self) -> Self {
        Self {
            high_water_mark: self.high_water_mark,
            size: self.size.clone(),
        }
    }
}

impl<T> fmt::Debug for QueuingStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuingStrategy")
            .field("high_water_mark", &self.high_water_mark)
            .field("size", &self.size.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl<T> QueuingStrategy<T> {
    /// Counts chunks: every chunk has size 1.
    pub fn count(high_water_mark: f64) -> Self {
        Self {
            high_water_mark,
            size: None,
        }
    }

    /// Sets the high-water mark.
    pub fn with_high_water_mark(mut self, high_water_mark: f64) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Sets the sizing function.
    pub fn with_size(mut self, size: impl Fn(&T) -> f64 + Send + Sync + 'static) -> Self {
        self.size = Some(Arc::new(size));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        if self.high_water_mark.is_nan() || self.high_water_mark < 0.0 {
            return Err(StreamError::Range(format!(
                "high water mark must be a non-negative number, got {}",
                self.high_water_mark
            )));
        }
        Ok(())
    }
}

impl QueuingStrategy<Bytes> {
    /// Sizes byte chunks by their length.
    pub fn bytes(high_water_mark: f64) -> Self {
        Self::count(high_water_mark).with_size(|chunk: &Bytes| chunk.len() as f64)
    }
}

/// Teardown options for [`ReadableStream::pipe_to`](crate::ReadableStream::pipe_to).
#[derive(Debug, Clone, Default)]
pub struct PipeOptions {
    /// Do not close the destination when the source closes.
    pub prevent_close: bool,
    /// Do not abort the destination when the source errors.
    pub prevent_abort: bool,
    /// Do not cancel the source when the destination fails.
    pub prevent_cancel: bool,
    /// External signal that tears the pipe down when fired.
    pub signal: Option<AbortSignal>,
}

impl PipeOptions {
    /// Sets `prevent_close`.
    pub fn with_prevent_close(mut self, prevent: bool) -> Self {
        self.prevent_close = prevent;
        self
    }

    /// Sets `prevent_abort`.
    pub fn with_prevent_abort(mut self, prevent: bool) -> Self {
        self.prevent_abort = prevent;
        self
    }

    /// Sets `prevent_cancel`.
    pub fn with_prevent_cancel(mut self, prevent: bool) -> Self {
        self.prevent_cancel = prevent;
        self
    }

    /// Attaches an abort signal.
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Options for [`ReadableStream::tee_with`](crate::ReadableStream::tee_with).
pub struct TeeOptions<T> {
    /// When set, every chunk is cloned through this function once per
    /// branch instead of sharing the upstream value.
    pub clone_chunk: Option<CloneFn<T>>,
}

impl<T> Default for TeeOptions<T> {
    fn default() -> Self {
        Self { clone_chunk: None }
    }
}

impl<T> fmt::Debug for TeeOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeOptions")
            .field("cloning", &self.clone_chunk.is_some())
            .finish()
    }
}

impl<T> TeeOptions<T> {
    /// Shared-reference delivery (the default).
    pub fn shared() -> Self {
        Self::default()
    }

    /// Clone each chunk independently for both branches.
    pub fn cloning(clone: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        Self {
            clone_chunk: Some(Arc::new(clone)),
        }
    }
}
