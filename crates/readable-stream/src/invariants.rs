//! Debug assertion macros for stream state-machine invariants.
//!
//! These macros are only active in debug builds (`#[cfg(debug_assertions)]`),
//! so there is zero overhead in release builds.

// =============================================================================
// Single-flight pull
// =============================================================================

/// Assert that no pull is outstanding when a new one is issued.
///
/// **Invariant**: `pulling → no new pull until the current one settles`
///
/// Used in: `StreamShared::call_pull_if_needed()` before spawning a pull
macro_rules! debug_assert_single_flight {
    ($pulling:expr) => {
        debug_assert!(
            !$pulling,
            "single-flight pull violated: pull issued while another is in flight"
        )
    };
}

// =============================================================================
// Monotonic lifecycle
// =============================================================================

/// Assert that a terminal transition starts from `Readable`.
///
/// **Invariant**: `Closed` and `Errored` are absorbing states
///
/// Used in: `StreamInner::finalize_close()`, `StreamInner::error()`
macro_rules! debug_assert_from_readable {
    ($state:expr) => {
        debug_assert!(
            matches!($state, $crate::stream::StreamState::Readable),
            "lifecycle violated: terminal transition from {:?}",
            $state
        )
    };
}

// =============================================================================
// Queue accounting
// =============================================================================

/// Assert that the running queue size stays finite and non-negative.
///
/// **Invariant**: `0 ≤ queue_total_size < ∞`
///
/// Used in: `Queue::push()`, `Queue::pop()`
macro_rules! debug_assert_queue_total {
    ($total:expr) => {
        debug_assert!(
            $total.is_finite() && $total >= 0.0,
            "queue accounting violated: total size {}",
            $total
        )
    };
}

/// Assert that buffered chunks and pending read requests never coexist.
///
/// **Invariant**: `queue non-empty → no pending read request`
///
/// Used in: `StreamInner::enqueue()` after the fast path
macro_rules! debug_assert_no_waiting_reads {
    ($queued:expr, $pending:expr) => {
        debug_assert!(
            $queued == 0 || $pending == 0,
            "read ordering violated: {} chunks queued while {} reads wait",
            $queued,
            $pending
        )
    };
}

// =============================================================================
// Exclusive reader
// =============================================================================

/// Assert that a reader is only attached to an unlocked stream.
///
/// **Invariant**: `at most one reader attached per stream`
///
/// Used in: `StreamShared::acquire_reader()`
macro_rules! debug_assert_unlocked {
    ($locked:expr) => {
        debug_assert!(
            !$locked,
            "exclusive reader violated: attaching a second reader"
        )
    };
}

// =============================================================================
// Pipe lifecycle
// =============================================================================

/// Assert that a pipe only moves forward through its states.
///
/// **Invariant**: `Piping → ShuttingDown → Finished`, each entered once
///
/// Used in: `Pipe::transition()`
macro_rules! debug_assert_pipe_transition {
    ($from:expr, $to:expr) => {
        debug_assert!(
            matches!(
                ($from, $to),
                (
                    $crate::pipe::PipeState::Piping,
                    $crate::pipe::PipeState::ShuttingDown
                ) | (
                    $crate::pipe::PipeState::ShuttingDown,
                    $crate::pipe::PipeState::Finished
                )
            ),
            "pipe lifecycle violated: {:?} -> {:?}",
            $from,
            $to
        )
    };
}

pub(crate) use debug_assert_from_readable;
pub(crate) use debug_assert_no_waiting_reads;
pub(crate) use debug_assert_pipe_transition;
pub(crate) use debug_assert_queue_total;
pub(crate) use debug_assert_single_flight;
pub(crate) use debug_assert_unlocked;
