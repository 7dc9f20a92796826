//! Demonstration of readable-stream features.
//!
//! Run with: `cargo run -p readable-stream --features demo --bin demo`
//! Set `RUST_LOG=readable_stream=debug` to see lifecycle events.

use bytes::{Bytes, BytesMut};
use readable_stream::{
    channel, identity_transform, AbortController, PipeOptions, QueuingStrategy, ReadableStream,
    ReadableStreamController, Reason, StreamExt, UnderlyingSource,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== readable-stream Demo ===\n");

    demo_pull_source().await?;
    demo_backpressure().await?;
    demo_pipe_through().await?;
    demo_abort().await?;
    demo_tee().await?;
    demo_byob().await?;
    demo_futures_adapters().await?;

    println!("\n=== All demos completed successfully! ===");
    Ok(())
}

/// Source that counts up to a limit, one chunk per pull.
struct Counter {
    next: AtomicU32,
    limit: u32,
}

impl Counter {
    fn new(limit: u32) -> Self {
        Self {
            next: AtomicU32::new(0),
            limit,
        }
    }
}

impl UnderlyingSource<u32> for Counter {
    async fn pull(&self, controller: &ReadableStreamController<u32>) -> Result<(), Reason> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        if n >= self.limit {
            controller.close().map_err(Reason::new)
        } else {
            controller.enqueue(n).map_err(Reason::new)
        }
    }
}

/// Demo 1: A pull-driven source read through a default reader
async fn demo_pull_source() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 1: Pull Source ---");

    let stream = ReadableStream::new(Counter::new(5), QueuingStrategy::count(2.0))?;
    let reader = stream.get_reader()?;

    let mut received = Vec::new();
    while let Some(n) = reader.read().await?.into_chunk() {
        received.push(n);
    }
    println!("  Received: {:?}", received);
    println!("  State: {}", stream.state());
    println!();
    Ok(())
}

/// Demo 2: Desired size tracks the queue against the high-water mark
async fn demo_backpressure() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 2: Backpressure ---");

    let (stream, controller) = channel(QueuingStrategy::count(3.0))?;
    for n in 0..5 {
        controller.enqueue(n)?;
        println!("  enqueued {n}, desired size = {:?}", controller.desired_size());
    }

    let reader = stream.get_reader()?;
    while stream.desired_size().is_some_and(|d| d <= 0.0) {
        let chunk = reader.read().await?;
        println!("  read {:?}, desired size = {:?}", chunk.value, stream.desired_size());
    }
    println!();
    Ok(())
}

/// Demo 3: Piping through a pass-through transform
async fn demo_pipe_through() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 3: Pipe Through ---");

    let source = ReadableStream::new(Counter::new(4), QueuingStrategy::default())?;
    let pair = identity_transform(QueuingStrategy::count(1.0))?;
    let output = source.pipe_through(pair, PipeOptions::default())?;
    println!("  source locked by pipe: {}", source.locked());

    let reader = output.get_reader()?;
    while let Some(n) = reader.read().await?.into_chunk() {
        println!("  out: {n}");
    }
    println!();
    Ok(())
}

/// Demo 4: Aborting a pipe with a signal
async fn demo_abort() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 4: Abort Signal ---");

    let (source, _controller) = channel::<u32>(QueuingStrategy::default())?;
    let pair = identity_transform(QueuingStrategy::default())?;
    let output = pair.readable.clone();
    let abort = AbortController::new();

    let pipe = tokio::spawn(source.pipe_to(
        pair.writable,
        PipeOptions::default().with_signal(abort.signal()),
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    abort.abort(Reason::msg("user pressed stop"));

    let result = pipe.await?;
    println!("  pipe result: {:?}", result.err());
    println!("  source state: {}, output state: {}", source.state(), output.state());
    println!();
    Ok(())
}

/// Demo 5: Tee into two branches
async fn demo_tee() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 5: Tee ---");

    let source = ReadableStream::new(Counter::new(3), QueuingStrategy::default())?;
    let (left, right) = source.tee()?;

    let drain = |stream: ReadableStream<u32>| async move {
        let reader = stream.get_reader()?;
        let mut out = Vec::new();
        while let Some(n) = reader.read().await?.into_chunk() {
            out.push(n);
        }
        Ok::<_, readable_stream::StreamError>(out)
    };
    let (l, r) = tokio::join!(drain(left), drain(right));
    println!("  left:  {:?}", l?);
    println!("  right: {:?}", r?);

    let (left, right) = ReadableStream::new(Counter::new(10), QueuingStrategy::default())?.tee()?;
    let (a, b) = tokio::join!(
        left.cancel(Reason::msg("left done")),
        right.cancel(Reason::msg("right done"))
    );
    println!("  both branches cancelled: {:?}, {:?}", a, b);
    println!();
    Ok(())
}

/// Demo 6: BYOB reads into caller buffers
async fn demo_byob() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 6: BYOB Reader ---");

    let (stream, controller) = ReadableStream::byte_channel(64.0)?;
    controller.enqueue(Bytes::from_static(b"hello, "))?;
    controller.enqueue(Bytes::from_static(b"byte streams"))?;
    controller.close()?;

    let reader = stream.get_byob_reader()?;
    loop {
        let result = reader.read(BytesMut::zeroed(8)).await?;
        if result.done {
            break;
        }
        if let Some(view) = result.value {
            println!("  read {} bytes: {:?}", view.len(), String::from_utf8_lossy(&view));
        }
    }
    println!();
    Ok(())
}

/// Demo 7: Bridging to `futures` streams
async fn demo_futures_adapters() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 7: Stream Adapters ---");

    let stream = ReadableStream::from_stream(
        tokio_stream::iter(["alpha", "beta", "gamma"]),
        QueuingStrategy::count(2.0),
    )?;
    let upper: Vec<String> = stream
        .into_stream()?
        .map(|item| item.map(str::to_uppercase))
        .filter_map(Result::ok)
        .collect()
        .await;
    println!("  collected: {:?}", upper);
    Ok(())
}
