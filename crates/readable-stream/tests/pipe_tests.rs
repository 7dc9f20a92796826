//! Pipe engine tests: shutdown propagation, abort signals, pipe_through.

use readable_stream::{
    channel, identity_transform, AbortController, PipeOptions, QueuingStrategy, ReadableStream,
    ReadableStreamController, Reason, SinkState, SinkWriter, StreamError, UnderlyingSource,
    WritableSink,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Destination that records what the pipe does to it.
#[derive(Default)]
struct Recorder {
    written: Mutex<Vec<u32>>,
    closed: AtomicBool,
    aborted: Mutex<Option<Reason>>,
    failure: Mutex<Option<Reason>>,
    fail_on: Option<u32>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_delay: Option<Duration>,
}

impl Recorder {
    fn failing_on(chunk: u32) -> Self {
        Self {
            fail_on: Some(chunk),
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    fn written(&self) -> Vec<u32> {
        self.written.lock().unwrap().clone()
    }

    fn aborted(&self) -> Option<Reason> {
        self.aborted.lock().unwrap().clone()
    }
}

impl WritableSink<u32> for Recorder {
    fn state(&self) -> SinkState {
        if let Some(reason) = self.failure.lock().unwrap().clone() {
            return SinkState::Errored(reason);
        }
        if self.closed.load(Ordering::SeqCst) {
            return SinkState::Closed;
        }
        SinkState::Writable
    }

    async fn ready(&self) -> Result<(), Reason> {
        Ok(())
    }

    async fn write(&self, chunk: u32) -> Result<(), Reason> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.write_delay.unwrap_or(Duration::from_millis(1))).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on == Some(chunk) {
            let reason = Reason::msg("write failed");
            *self.failure.lock().unwrap() = Some(reason.clone());
            return Err(reason);
        }
        self.written.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&self) -> Result<(), Reason> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(&self, reason: Reason) -> Result<(), Reason> {
        *self.aborted.lock().unwrap() = Some(reason);
        Ok(())
    }
}

/// Source whose controller is driven by the test; records cancels.
#[derive(Default)]
struct ProbeState {
    controller: Mutex<Option<ReadableStreamController<u32>>>,
    cancels: Mutex<Vec<Reason>>,
}

struct Probe(Arc<ProbeState>);

impl UnderlyingSource<u32> for Probe {
    async fn start(&self, controller: &ReadableStreamController<u32>) -> Result<(), Reason> {
        *self.0.controller.lock().unwrap() = Some(controller.clone());
        Ok(())
    }

    async fn cancel(&self, reason: Reason) -> Result<(), Reason> {
        self.0.cancels.lock().unwrap().push(reason);
        Ok(())
    }
}

async fn probe_with(chunks: &[u32]) -> (ReadableStream<u32>, Arc<ProbeState>) {
    let state = Arc::new(ProbeState::default());
    let stream = ReadableStream::new(Probe(Arc::clone(&state)), QueuingStrategy::count(16.0))
        .expect("stream");
    settle().await;
    let controller = state.controller.lock().unwrap().clone().expect("started");
    for &chunk in chunks {
        controller.enqueue(chunk).expect("enqueue");
    }
    (stream, state)
}

fn closed_channel(chunks: impl IntoIterator<Item = u32>) -> ReadableStream<u32> {
    let (stream, controller) = channel(QueuingStrategy::count(16.0)).expect("channel");
    for chunk in chunks {
        controller.enqueue(chunk).expect("enqueue");
    }
    controller.close().expect("close");
    stream
}

#[tokio::test]
async fn test_pipe_copies_in_order_and_closes() {
    let stream = closed_channel(1..=10);
    let dest = Arc::new(Recorder::default());

    stream
        .pipe_to(Arc::clone(&dest), PipeOptions::default())
        .await
        .expect("pipe");

    assert_eq!(dest.written(), (1..=10).collect::<Vec<_>>());
    assert!(dest.closed.load(Ordering::SeqCst));
    assert_eq!(dest.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(!stream.locked());
}

#[tokio::test]
async fn test_prevent_close_leaves_destination_open() {
    let stream = closed_channel([1, 2]);
    let dest = Arc::new(Recorder::default());

    stream
        .pipe_to(
            Arc::clone(&dest),
            PipeOptions::default().with_prevent_close(true),
        )
        .await
        .expect("pipe");

    assert_eq!(dest.written(), vec![1, 2]);
    assert!(!dest.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_prevent_cancel_on_destination_error() {
    let (stream, probe) = probe_with(&[1, 2, 3]).await;
    let dest = Arc::new(Recorder::failing_on(2));

    let result = stream
        .pipe_to(
            Arc::clone(&dest),
            PipeOptions::default().with_prevent_cancel(true),
        )
        .await;

    match result {
        Err(StreamError::Stream(reason)) => assert_eq!(reason.as_message(), Some("write failed")),
        other => panic!("expected destination error, got {other:?}"),
    }
    settle().await;
    assert!(probe.cancels.lock().unwrap().is_empty());
    assert!(stream.state().is_readable());
    assert!(!stream.locked());
    assert_eq!(dest.written(), vec![1]);
}

#[tokio::test]
async fn test_destination_error_cancels_source() {
    let (stream, probe) = probe_with(&[1, 2, 3]).await;
    let dest = Arc::new(Recorder::failing_on(1));

    let err = stream
        .pipe_to(Arc::clone(&dest), PipeOptions::default())
        .await
        .expect_err("destination fails");

    let cancels = probe.cancels.lock().unwrap();
    assert_eq!(cancels.len(), 1);
    assert!(cancels[0].ptr_eq(err.reason().expect("carries reason")));
    assert!(stream.state().is_closed());
}

#[tokio::test]
async fn test_source_error_aborts_destination() {
    let (stream, controller) = channel::<u32>(QueuingStrategy::default()).expect("channel");
    let dest = Arc::new(Recorder::default());
    let pipe = tokio::spawn(stream.pipe_to(Arc::clone(&dest), PipeOptions::default()));

    controller.enqueue(1).expect("enqueue");
    settle().await;
    let reason = Reason::msg("source broke");
    controller.error(reason.clone());

    match pipe.await.expect("join") {
        Err(StreamError::Stream(got)) => assert!(got.ptr_eq(&reason)),
        other => panic!("expected source error, got {other:?}"),
    }
    assert_eq!(dest.written(), vec![1]);
    assert!(dest.aborted().expect("aborted").ptr_eq(&reason));
    assert!(!dest.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_prevent_abort_on_source_error() {
    let (stream, controller) = channel::<u32>(QueuingStrategy::default()).expect("channel");
    controller.error(Reason::msg("early"));
    let dest = Arc::new(Recorder::default());

    let result = stream
        .pipe_to(
            Arc::clone(&dest),
            PipeOptions::default().with_prevent_abort(true),
        )
        .await;

    assert!(matches!(result, Err(StreamError::Stream(_))));
    assert!(dest.aborted().is_none());
}

#[tokio::test]
async fn test_abort_signal_tears_down_both_ends() {
    let (stream, probe) = probe_with(&[]).await;
    let dest = Arc::new(Recorder::default());
    let abort = AbortController::new();

    let pipe = tokio::spawn(stream.pipe_to(
        Arc::clone(&dest),
        PipeOptions::default().with_signal(abort.signal()),
    ));
    settle().await;

    let reason = Reason::msg("user abort");
    abort.abort(reason.clone());

    match pipe.await.expect("join") {
        Err(StreamError::Aborted(got)) => assert!(got.ptr_eq(&reason)),
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(dest.aborted().expect("destination aborted").ptr_eq(&reason));
    let cancels = probe.cancels.lock().unwrap();
    assert_eq!(cancels.len(), 1);
    assert!(cancels[0].ptr_eq(&reason));
    assert!(!stream.locked());
}

#[tokio::test]
async fn test_abort_lets_write_in_flight_finish() {
    let (stream, state) = probe_with(&[1, 2]).await;
    let dest = Arc::new(Recorder::slow(Duration::from_millis(100)));
    let abort = AbortController::new();
    let options = PipeOptions::default()
        .with_prevent_cancel(true)
        .with_signal(abort.signal());

    let pipe = tokio::spawn(stream.pipe_to(Arc::clone(&dest), options));
    settle().await;
    abort.abort(Reason::msg("stop"));

    match pipe.await.expect("join") {
        Err(StreamError::Aborted(reason)) => assert_eq!(reason.as_message(), Some("stop")),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(dest.written(), vec![1]);
    assert_eq!(dest.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(dest.aborted().is_some());

    // The chunk the pipe never read is still in the source.
    assert!(state.cancels.lock().unwrap().is_empty());
    let reader = stream.get_reader().expect("released after abort");
    assert_eq!(reader.read().await.expect("read").value, Some(2));
}

#[tokio::test]
async fn test_source_close_finishes_pipe_under_backpressure() {
    let source = closed_channel([1]);
    let pair = identity_transform::<u32>(QueuingStrategy::count(1.0)).expect("pair");

    // Nobody reads the destination, so it stays backpressured after one chunk.
    tokio::time::timeout(
        Duration::from_millis(200),
        source.pipe_to(pair.writable, PipeOptions::default()),
    )
    .await
    .expect("pipe finishes once the source has closed")
    .expect("pipe");
    assert!(source.state().is_closed());

    let reader = pair.readable.get_reader().expect("reader");
    assert_eq!(reader.read().await.expect("read").value, Some(1));
    assert!(reader.read().await.expect("read").done);
}

#[tokio::test]
async fn test_prefired_signal_writes_nothing() {
    let stream = closed_channel([1, 2, 3]);
    let dest = Arc::new(Recorder::default());
    let abort = AbortController::new();
    abort.abort_default();

    let result = stream
        .pipe_to(
            Arc::clone(&dest),
            PipeOptions::default()
                .with_signal(abort.signal())
                .with_prevent_abort(true),
        )
        .await;

    match result {
        Err(StreamError::Aborted(reason)) => {
            assert!(reason.downcast_ref::<readable_stream::AbortError>().is_some());
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(dest.written().is_empty());
    assert!(dest.aborted().is_none());
}

#[tokio::test]
async fn test_closed_destination_cancels_source() {
    let (stream, probe) = probe_with(&[1]).await;
    let dest = Arc::new(Recorder::default());
    dest.closed.store(true, Ordering::SeqCst);

    let result = stream.pipe_to(Arc::clone(&dest), PipeOptions::default()).await;
    assert!(matches!(result, Err(StreamError::Type(_))));

    let cancels = probe.cancels.lock().unwrap();
    assert_eq!(cancels.len(), 1);
    assert!(matches!(
        cancels[0].downcast_ref::<StreamError>(),
        Some(StreamError::Type(_))
    ));
    assert!(dest.written().is_empty());
}

#[tokio::test]
async fn test_locked_source_is_rejected() {
    let stream = closed_channel([1]);
    let _reader = stream.get_reader().expect("reader");

    let result = stream
        .pipe_to(Arc::new(Recorder::default()), PipeOptions::default())
        .await;
    assert!(matches!(result, Err(StreamError::Type(_))));

    let pair = identity_transform::<u32>(QueuingStrategy::default()).expect("pair");
    assert!(matches!(
        stream.pipe_through(pair, PipeOptions::default()),
        Err(StreamError::Type(_))
    ));
}

#[tokio::test]
async fn test_pipe_to_locks_synchronously() {
    let stream = closed_channel([1]);
    let pipe = stream.pipe_to(Arc::new(Recorder::default()), PipeOptions::default());
    assert!(stream.locked());
    pipe.await.expect("pipe");
    assert!(!stream.locked());
}

#[tokio::test]
async fn test_pipe_through_identity() {
    let source = closed_channel(1..=5);
    let pair = identity_transform(QueuingStrategy::count(1.0)).expect("pair");

    let output = source
        .pipe_through(pair, PipeOptions::default())
        .expect("pipe_through");
    assert!(source.locked());

    let reader = output.get_reader().expect("reader");
    let mut received = Vec::new();
    while let Some(chunk) = reader.read().await.expect("read").into_chunk() {
        received.push(chunk);
    }
    assert_eq!(received, vec![1, 2, 3, 4, 5]);
    assert!(output.state().is_closed());
}

#[tokio::test]
async fn test_pipe_through_backpressure_reaches_source() {
    let (source, controller) = channel::<u32>(QueuingStrategy::count(2.0)).expect("channel");
    let pair = identity_transform(QueuingStrategy::count(1.0)).expect("pair");
    let output = source
        .pipe_through(pair, PipeOptions::default())
        .expect("pipe_through");

    for n in 0..4 {
        controller.enqueue(n).expect("enqueue");
    }
    settle().await;
    // Output is full after one chunk; the other three stay upstream.
    assert_eq!(output.desired_size(), Some(0.0));
    assert_eq!(source.desired_size(), Some(-1.0));

    let reader = output.get_reader().expect("reader");
    for expected in 0..4 {
        assert_eq!(reader.read().await.expect("read").value, Some(expected));
    }
}

#[tokio::test]
async fn test_pipe_into_futures_sink() {
    let stream = closed_channel([10, 20, 30]);
    let (tx, rx) = futures::channel::mpsc::channel::<u32>(1);

    let collector = tokio::spawn(async move {
        use futures::StreamExt;
        rx.collect::<Vec<_>>().await
    });
    stream
        .pipe_to(SinkWriter::new(tx), PipeOptions::default())
        .await
        .expect("pipe");

    assert_eq!(collector.await.expect("join"), vec![10, 20, 30]);
}
