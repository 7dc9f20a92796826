//! Readable streams with backpressure for tokio
//!
//! This crate implements a pull-based readable stream engine: an underlying
//! source feeds chunks through a [`ReadableStreamController`] into a FIFO
//! queue, and a single exclusive reader drains it. Demand flows the other
//! way through the *desired size* (`high_water_mark - queued size`), which
//! gates when the source is asked for more.
//!
//! # Features
//!
//! - **Single-flight pulls**: the source is never asked for data while a
//!   previous pull is outstanding; extra demand is coalesced
//! - **Exclusive readers**: default and BYOB readers lock the stream
//! - **Pipes**: [`ReadableStream::pipe_to`] with close/abort/cancel
//!   propagation and [`AbortSignal`] support
//! - **Tee**: two branches over one upstream read loop
//! - **Adapters**: [`ReadableStream::from_stream`], [`ReadableStream::into_stream`]
//!   and [`SinkWriter`] bridge to `futures` streams and sinks
//!
//! # Example
//!
//! ```ignore
//! use readable_stream::{ReadableStream, ReadableStreamController, Reason, UnderlyingSource};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct Counter(AtomicU32);
//!
//! impl UnderlyingSource<u32> for Counter {
//!     async fn pull(&self, controller: &ReadableStreamController<u32>) -> Result<(), Reason> {
//!         let n = self.0.fetch_add(1, Ordering::Relaxed);
//!         if n == 3 {
//!             controller.close().map_err(Reason::new)
//!         } else {
//!             controller.enqueue(n).map_err(Reason::new)
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let stream = ReadableStream::new(Counter(AtomicU32::new(0)), Default::default()).unwrap();
//!     let reader = stream.get_reader().unwrap();
//!
//!     while let Some(n) = reader.read().await.unwrap().into_chunk() {
//!         println!("chunk: {n}");
//!     }
//! }
//! ```

mod abort;
mod adapter;
mod byob;
mod cancel;
mod config;
mod controller;
mod descriptor;
mod error;
mod invariants;
mod pipe;
mod queue;
mod reader;
mod sink;
mod source;
mod stream;
mod tee;

pub use abort::{AbortController, AbortSignal};
pub use adapter::ReaderStream;
pub use byob::ReadableStreamByobReader;
pub use config::{CloneFn, PipeOptions, QueuingStrategy, SizeFn, TeeOptions};
pub use controller::ReadableStreamController;
pub use descriptor::{AttributeDescriptor, CapabilityDescriptor, OperationDescriptor};
pub use error::{AbortError, CompositeReason, Reason, StreamError};
pub use reader::{ReadFuture, ReadResult, ReadableStreamDefaultReader};
pub use sink::{
    identity_transform, ControllerSink, ReadableWritablePair, SinkState, SinkWriter, WritableSink,
};
pub use source::{StreamSource, UnderlyingSource, UnderlyingSourceBoxed};
pub use stream::{channel, EmbedderContext, ReadableStream, StreamState};

// Re-export useful stream combinators
pub use tokio_stream::StreamExt;
