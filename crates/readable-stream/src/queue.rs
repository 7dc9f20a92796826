//! FIFO chunk queue with an incrementally maintained total size.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_queue_total;
use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug)]
struct Entry<T> {
    value: T,
    size: f64,
}

/// Ordered buffer of opaque chunks.
///
/// Push and pop are O(1) amortized. The total is updated on every mutation
/// and clamped at zero so floating-point drift from fractional sizes never
/// produces a negative desired-size budget.
#[derive(Debug)]
pub(crate) struct Queue<T> {
    entries: VecDeque<Entry<T>>,
    total_size: f64,
}

impl<T> Queue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            total_size: 0.0,
        }
    }

    /// Appends a chunk with a pre-validated size.
    pub(crate) fn push(&mut self, value: T, size: f64) {
        self.entries.push_back(Entry { value, size });
        self.total_size += size;

        #[cfg(debug_assertions)]
        debug_assert_queue_total!(self.total_size);
    }

    /// Puts a chunk back at the head of the queue.
    pub(crate) fn push_front(&mut self, value: T, size: f64) {
        self.entries.push_front(Entry { value, size });
        self.total_size += size;
    }

    /// Removes the oldest chunk.
    pub(crate) fn pop(&mut self) -> Option<T> {
        let entry = self.entries.pop_front()?;
        self.total_size = (self.total_size - entry.size).max(0.0);
        if self.entries.is_empty() {
            self.total_size = 0.0;
        }

        #[cfg(debug_assertions)]
        debug_assert_queue_total!(self.total_size);

        Some(entry.value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn total_size(&self) -> f64 {
        self.total_size
    }

    /// Drops every queued chunk.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.total_size = 0.0;
    }
}

impl Queue<Bytes> {
    /// Takes at most `max` bytes from the head chunk.
    ///
    /// A head chunk larger than `max` is split in place with
    /// [`Bytes::split_to`], which shares the allocation instead of copying.
    pub(crate) fn take_bytes(&mut self, max: usize) -> Option<Bytes> {
        let head = self.entries.front_mut()?;
        if head.value.len() <= max {
            return self.pop();
        }
        let taken = head.value.split_to(max);
        let consumed = taken.len() as f64;
        head.size = (head.size - consumed).max(0.0);
        self.total_size = (self.total_size - consumed).max(0.0);
        Some(taken)
    }

    /// Copies queued bytes into `view` from the front, returning the number
    /// of bytes written.
    pub(crate) fn fill(&mut self, view: &mut [u8]) -> usize {
        let mut written = 0;
        while written < view.len() {
            let Some(piece) = self.take_bytes(view.len() - written) else {
                break;
            };
            view[written..written + piece.len()].copy_from_slice(&piece);
            written += piece.len();
        }
        written
    }
}
