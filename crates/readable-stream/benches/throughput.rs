use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use readable_stream::{
    channel, identity_transform, PipeOptions, QueuingStrategy, ReadableStream,
    ReadableStreamController, Reason, UnderlyingSource,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Runtime;

const CHUNKS: u64 = 100_000;

/// Pull source producing `CHUNKS` sequential integers.
struct Counter(AtomicU64);

impl UnderlyingSource<u64> for Counter {
    async fn pull(&self, controller: &ReadableStreamController<u64>) -> Result<(), Reason> {
        let n = self.0.fetch_add(1, Ordering::Relaxed);
        if n >= CHUNKS {
            controller.close().map_err(Reason::new)
        } else {
            controller.enqueue(n).map_err(Reason::new)
        }
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn bench_push_read(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("push_read");
    group.throughput(Throughput::Elements(CHUNKS));

    for hwm in [1.0, 64.0, 4096.0] {
        group.bench_with_input(BenchmarkId::from_parameter(hwm), &hwm, |b, &hwm| {
            b.to_async(&rt).iter(|| async move {
                let (stream, controller) = channel(QueuingStrategy::count(hwm)).unwrap();
                let reader = stream.get_reader().unwrap();
                for n in 0..CHUNKS {
                    controller.enqueue(n).unwrap();
                    black_box(reader.read().await.unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_pull_source(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pull_source");
    group.throughput(Throughput::Elements(CHUNKS));

    for hwm in [1.0, 64.0] {
        group.bench_with_input(BenchmarkId::from_parameter(hwm), &hwm, |b, &hwm| {
            b.to_async(&rt).iter(|| async move {
                let stream =
                    ReadableStream::new(Counter(AtomicU64::new(0)), QueuingStrategy::count(hwm))
                        .unwrap();
                let reader = stream.get_reader().unwrap();
                while let Some(n) = reader.read().await.unwrap().into_chunk() {
                    black_box(n);
                }
            });
        });
    }

    group.finish();
}

fn bench_pipe_through(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pipe_through");
    group.throughput(Throughput::Elements(CHUNKS));

    group.bench_function("identity", |b| {
        b.to_async(&rt).iter(|| async {
            let source =
                ReadableStream::new(Counter(AtomicU64::new(0)), QueuingStrategy::count(64.0))
                    .unwrap();
            let pair = identity_transform(QueuingStrategy::count(64.0)).unwrap();
            let output = source.pipe_through(pair, PipeOptions::default()).unwrap();
            let reader = output.get_reader().unwrap();
            while let Some(n) = reader.read().await.unwrap().into_chunk() {
                black_box(n);
            }
        });
    });

    group.finish();
}

fn bench_tee(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("tee");
    group.throughput(Throughput::Elements(CHUNKS));

    group.bench_function("two_branches", |b| {
        b.to_async(&rt).iter(|| async {
            let source =
                ReadableStream::new(Counter(AtomicU64::new(0)), QueuingStrategy::count(64.0))
                    .unwrap();
            let (left, right) = source.tee().unwrap();
            let drain = |stream: ReadableStream<u64>| async move {
                let reader = stream.get_reader().unwrap();
                while let Some(n) = reader.read().await.unwrap().into_chunk() {
                    black_box(n);
                }
            };
            tokio::join!(drain(left), drain(right));
        });
    });

    group.finish();
}

fn bench_byob(c: &mut Criterion) {
    const CHUNK: usize = 1024;
    let rt = runtime();
    let mut group = c.benchmark_group("byob");
    group.throughput(Throughput::Bytes(CHUNKS * CHUNK as u64));

    for view in [256usize, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(view), &view, |b, &view| {
            let payload = Bytes::from(vec![7u8; CHUNK]);
            b.to_async(&rt).iter(|| {
                let payload = payload.clone();
                async move {
                    let (stream, controller) =
                        ReadableStream::byte_channel((CHUNK * 16) as f64).unwrap();
                    let reader = stream.get_byob_reader().unwrap();
                    for _ in 0..CHUNKS {
                        controller.enqueue(payload.clone()).unwrap();
                        while stream.desired_size().unwrap_or(0.0) <= 0.0 {
                            black_box(reader.read(BytesMut::zeroed(view)).await.unwrap());
                        }
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_push_read,
    bench_pull_source,
    bench_pipe_through,
    bench_tee,
    bench_byob
);
criterion_main!(benches);
