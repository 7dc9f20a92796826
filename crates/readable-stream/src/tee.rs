//! Tee: split one stream into two independently consumed branches.
//!
//! Both branches share one upstream reader and one read loop. A branch pull
//! issued while a read is in flight is coalesced into a single follow-up
//! read, so the upstream source sees the demand of the faster branch and
//! the slower branch buffers.

use crate::config::{CloneFn, QueuingStrategy, TeeOptions};
use crate::controller::ReadableStreamController;
use crate::error::{Reason, StreamError};
use crate::reader::{wait_outcome, ReadableStreamDefaultReader};
use crate::source::UnderlyingSource;
use crate::stream::{Outcome, ReadableStream};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct TeeFlags {
    reading: bool,
    read_again: bool,
    canceled: [bool; 2],
    reasons: [Option<Reason>; 2],
}

struct TeeState<T: Send + 'static> {
    reader: ReadableStreamDefaultReader<T>,
    clone_chunk: Option<CloneFn<T>>,
    flags: Mutex<TeeFlags>,
    branches: OnceLock<[ReadableStreamController<T>; 2]>,
    /// Flips to `true` once both branch controllers are installed.
    wired: watch::Sender<bool>,
    /// Outcome shared by both branch cancels.
    cancel_tx: watch::Sender<Outcome>,
}

impl<T: Clone + Send + 'static> TeeState<T> {
    fn flags(&self) -> MutexGuard<'_, TeeFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle_cancel(&self, outcome: Result<(), StreamError>) {
        self.cancel_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }

    async fn read_loop(&self) {
        loop {
            match self.reader.read().await {
                Ok(result) if !result.done => {
                    self.flags().read_again = false;
                    if let Some(chunk) = result.value {
                        self.deliver(chunk);
                    }
                }
                Ok(_) => {
                    self.flags().reading = false;
                    self.close_branches();
                    return;
                }
                Err(err) => {
                    self.flags().reading = false;
                    self.error_branches(err.into_reason());
                    return;
                }
            }

            let mut flags = self.flags();
            if !(flags.read_again && self.any_branch_wants(&flags)) {
                flags.read_again = false;
                flags.reading = false;
                return;
            }
            flags.read_again = false;
        }
    }

    fn any_branch_wants(&self, flags: &TeeFlags) -> bool {
        let Some(branches) = self.branches.get() else {
            return false;
        };
        branches
            .iter()
            .zip(flags.canceled)
            .any(|(branch, canceled)| !canceled && branch.wants_chunk().unwrap_or(false))
    }

    fn deliver(&self, chunk: T) {
        let Some(branches) = self.branches.get() else {
            return;
        };
        let canceled = self.flags().canceled;
        let targets: Vec<&ReadableStreamController<T>> = branches
            .iter()
            .zip(canceled)
            .filter(|(_, canceled)| !canceled)
            .map(|(branch, _)| branch)
            .collect();

        let enqueue = |branch: &ReadableStreamController<T>, chunk: T| {
            if let Err(err) = branch.enqueue(chunk) {
                tracing::trace!(error = %err, "tee branch rejected chunk");
            }
        };
        match &self.clone_chunk {
            Some(clone) => {
                for branch in targets {
                    enqueue(branch, clone(&chunk));
                }
            }
            None => {
                if let Some((last, rest)) = targets.split_last() {
                    for branch in rest {
                        enqueue(branch, chunk.clone());
                    }
                    enqueue(last, chunk);
                }
            }
        }
    }

    /// Resolves pending branch cancels when upstream settles first. Once both
    /// branches have cancelled, the upstream cancel outcome is published
    /// instead.
    fn settle_unless_both_canceled(&self, canceled: [bool; 2]) {
        if canceled != [true, true] {
            self.settle_cancel(Ok(()));
        }
    }

    fn close_branches(&self) {
        let canceled = self.flags().canceled;
        if let Some(branches) = self.branches.get() {
            for (branch, canceled) in branches.iter().zip(canceled) {
                if canceled {
                    continue;
                }
                if let Err(err) = branch.close() {
                    tracing::trace!(error = %err, "tee branch rejected close");
                }
            }
        }
        self.settle_unless_both_canceled(canceled);
    }

    fn error_branches(&self, reason: Reason) {
        tracing::debug!(%reason, "tee upstream errored");
        if let Some(branches) = self.branches.get() {
            for branch in branches {
                branch.error(reason.clone());
            }
        }
        let canceled = self.flags().canceled;
        self.settle_unless_both_canceled(canceled);
    }

    async fn cancel_branch(&self, index: usize, reason: Reason) -> Result<(), StreamError> {
        let composite = {
            let mut flags = self.flags();
            flags.canceled[index] = true;
            flags.reasons[index] = Some(reason);
            match &flags.reasons {
                [Some(first), Some(second)] if flags.canceled == [true, true] => {
                    Some(Reason::composite([first.clone(), second.clone()]))
                }
                _ => None,
            }
        };

        if let Some(composite) = composite {
            tracing::debug!("both tee branches cancelled; cancelling upstream");
            let result = self.reader.cancel(composite).await;
            self.settle_cancel(result);
        }
        wait_outcome(self.cancel_tx.subscribe()).await
    }
}

struct TeeBranchSource<T: Send + 'static> {
    state: Arc<TeeState<T>>,
    index: usize,
}

impl<T: Clone + Send + 'static> UnderlyingSource<T> for TeeBranchSource<T> {
    async fn start(&self, _controller: &ReadableStreamController<T>) -> Result<(), Reason> {
        let mut wired = self.state.wired.subscribe();
        // The sender lives in the shared state, so it cannot close first.
        let _ = wired.wait_for(|wired| *wired).await;
        Ok(())
    }

    async fn pull(&self, _controller: &ReadableStreamController<T>) -> Result<(), Reason> {
        {
            let mut flags = self.state.flags();
            if flags.reading {
                flags.read_again = true;
                return Ok(());
            }
            // The pull may have been scheduled before the read loop filled
            // both branches.
            if !self.state.any_branch_wants(&flags) {
                return Ok(());
            }
            flags.reading = true;
        }
        self.state.read_loop().await;
        Ok(())
    }

    async fn cancel(&self, reason: Reason) -> Result<(), Reason> {
        self.state
            .cancel_branch(self.index, reason)
            .await
            .map_err(StreamError::into_reason)
    }
}

pub(crate) fn tee<T: Clone + Send + 'static>(
    stream: &ReadableStream<T>,
    options: TeeOptions<T>,
) -> Result<(ReadableStream<T>, ReadableStream<T>), StreamError> {
    let reader = stream.get_reader()?;
    let state = Arc::new(TeeState {
        reader,
        clone_chunk: options.clone_chunk,
        flags: Mutex::new(TeeFlags::default()),
        branches: OnceLock::new(),
        wired: watch::Sender::new(false),
        cancel_tx: watch::Sender::new(None),
    });

    let branch = |index| {
        let source = TeeBranchSource {
            state: Arc::clone(&state),
            index,
        };
        ReadableStream::construct(Some(Arc::new(source)), QueuingStrategy::default(), None, None)
    };
    let first = branch(0)?;
    let second = branch(1)?;
    let _ = state.branches.set([first.controller(), second.controller()]);
    state.wired.send_replace(true);

    // Errors upstream while no read is in flight still reach the branches.
    let closed = state.reader.closed();
    let weak = Arc::downgrade(&state);
    tokio::spawn(async move {
        if let Err(err) = closed.await {
            if let Some(state) = weak.upgrade() {
                state.error_branches(err.into_reason());
            }
        }
    });

    tracing::debug!("stream teed");
    Ok((first, second))
}
