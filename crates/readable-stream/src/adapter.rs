//! `futures_core::Stream` adapter over a default reader.

use crate::error::StreamError;
use crate::reader::{ReadFuture, ReadableStreamDefaultReader};
use crate::stream::ReadableStream;
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

pin_project! {
    /// Yields chunks until the stream closes.
    ///
    /// A stream error is yielded once as `Some(Err(_))`, after which the
    /// adapter is exhausted. Dropping the adapter releases the reader.
    pub struct ReaderStream<T> {
        reader: ReadableStreamDefaultReader<T>,
        #[pin]
        pending: Option<ReadFuture<T>>,
        finished: bool,
    }
}

impl<T: Send + 'static> ReaderStream<T> {
    pub fn new(reader: ReadableStreamDefaultReader<T>) -> Self {
        Self {
            reader,
            pending: None,
            finished: false,
        }
    }

    /// The reader this adapter drives.
    pub fn reader(&self) -> &ReadableStreamDefaultReader<T> {
        &self.reader
    }
}

impl<T: Send + 'static> Stream for ReaderStream<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        loop {
            if let Some(read) = this.pending.as_mut().as_pin_mut() {
                let result = ready!(read.poll(cx));
                this.pending.set(None);
                let item = match result {
                    Ok(result) => result.into_chunk().map(Ok),
                    Err(err) => Some(Err(err)),
                };
                if !matches!(item, Some(Ok(_))) {
                    *this.finished = true;
                }
                return Poll::Ready(item);
            }
            this.pending.set(Some(this.reader.read()));
        }
    }
}

impl<T: Send + 'static> ReadableStream<T> {
    /// Locks the stream and adapts it into a `futures_core::Stream`.
    pub fn into_stream(self) -> Result<ReaderStream<T>, StreamError> {
        Ok(ReaderStream::new(self.get_reader()?))
    }
}
