//! Property-based tests for queue ordering and the desired-size law.
//!
//! Push-only streams need no runtime: every read below is satisfied
//! synchronously, so the returned futures are driven with `block_on`.

use bytes::{Bytes, BytesMut};
use futures::executor::block_on;
use proptest::prelude::*;
use readable_stream::{channel, QueuingStrategy, ReadableStream};

#[derive(Debug, Clone)]
enum Op {
    Enqueue(u32),
    Read,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u32>().prop_map(Op::Enqueue), Just(Op::Read)]
}

// =============================================================================
// FIFO: chunks are read in enqueue order, whatever the interleaving
// =============================================================================

proptest! {
    #[test]
    fn prop_fifo_under_interleaving(ops in proptest::collection::vec(op(), 0..200)) {
        let (stream, controller) = channel(QueuingStrategy::count(8.0)).unwrap();
        let reader = stream.get_reader().unwrap();

        let mut enqueued = Vec::new();
        let mut read = Vec::new();
        for op in ops {
            match op {
                Op::Enqueue(n) => {
                    controller.enqueue(n).unwrap();
                    enqueued.push(n);
                }
                Op::Read if read.len() < enqueued.len() => {
                    let result = block_on(reader.read()).unwrap();
                    read.push(result.value.unwrap());
                }
                Op::Read => {}
            }
        }
        controller.close().unwrap();
        while let Some(n) = block_on(reader.read()).unwrap().into_chunk() {
            read.push(n);
        }

        prop_assert_eq!(read, enqueued);
    }
}

// =============================================================================
// Desired size: high_water_mark - sum(queued sizes), until closed
// =============================================================================

proptest! {
    #[test]
    fn prop_desired_size_law(
        high_water_mark in 0.0f64..64.0,
        sizes in proptest::collection::vec(0.0f64..8.0, 0..40),
        reads in 0usize..40,
    ) {
        let strategy = QueuingStrategy::count(high_water_mark).with_size(|size: &f64| *size);
        let (stream, controller) = channel(strategy).unwrap();

        for &size in &sizes {
            controller.enqueue(size).unwrap();
        }
        let reader = stream.get_reader().unwrap();
        let reads = reads.min(sizes.len());
        for _ in 0..reads {
            block_on(reader.read()).unwrap();
        }

        let queued: f64 = sizes[reads..].iter().sum();
        let desired = stream.desired_size().unwrap();
        prop_assert!(
            (desired - (high_water_mark - queued)).abs() < 1e-6,
            "desired {} != {} - {}", desired, high_water_mark, queued
        );
        prop_assert!(desired <= high_water_mark + 1e-9);
    }
}

// =============================================================================
// Deferred close: every chunk queued before close is still delivered
// =============================================================================

proptest! {
    #[test]
    fn prop_close_drains_queue(chunks in proptest::collection::vec(any::<u16>(), 0..50)) {
        let (stream, controller) = channel(QueuingStrategy::count(1.0)).unwrap();
        for &chunk in &chunks {
            controller.enqueue(chunk).unwrap();
        }
        controller.close().unwrap();
        prop_assert_eq!(stream.state().is_closed(), chunks.is_empty());

        let reader = stream.get_reader().unwrap();
        let mut drained = Vec::new();
        while let Some(chunk) = block_on(reader.read()).unwrap().into_chunk() {
            drained.push(chunk);
        }
        prop_assert_eq!(drained, chunks);
        prop_assert!(stream.state().is_closed());
    }
}

// =============================================================================
// BYOB: arbitrary view sizes reassemble the enqueued bytes exactly
// =============================================================================

proptest! {
    #[test]
    fn prop_byob_reads_reassemble_bytes(
        chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..32), 1..16),
        view_len in 1usize..48,
    ) {
        let (stream, controller) = ReadableStream::byte_channel(1024.0).unwrap();
        let mut expected = Vec::new();
        for chunk in &chunks {
            expected.extend_from_slice(chunk);
            controller.enqueue(Bytes::from(chunk.clone())).unwrap();
        }
        controller.close().unwrap();

        let reader = stream.get_byob_reader().unwrap();
        let mut assembled = Vec::new();
        loop {
            let result = block_on(reader.read(BytesMut::zeroed(view_len))).unwrap();
            let view = result.value.unwrap();
            prop_assert!(view.len() <= view_len);
            if result.done {
                prop_assert!(view.is_empty());
                break;
            }
            assembled.extend_from_slice(&view);
        }
        prop_assert_eq!(assembled, expected);
    }
}
