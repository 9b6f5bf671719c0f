use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::manager::WatchManagerInner;
use crate::ChangeEvent;
use crate::Result;
use crate::WatchError;

/// Why a watcher was removed by the engine, read by its stream once the
/// queue drains
pub(crate) type TerminationSlot = Arc<Mutex<Option<WatchError>>>;

/// Unregisters the watcher when dropped
pub struct WatcherHandleGuard {
    pub(super) id: u64,
    pub(super) manager: Arc<WatchManagerInner>,
}

impl Drop for WatcherHandleGuard {
    fn drop(&mut self) {
        self.manager.unregister(self.id);
        trace!(watcher_id = self.id, "Watcher unregistered via guard");
    }
}

/// Live subscription.
///
/// Yields `Ok(event)` in commit order. When the engine disconnects the
/// watcher (overrun or shutdown) the stream yields the events still queued,
/// then exactly one `Err`, then ends. Dropping the stream cancels the
/// subscription.
pub struct WatchStream {
    id: u64,
    receiver: mpsc::Receiver<ChangeEvent>,
    termination: TerminationSlot,
    finished: bool,
    _guard: WatcherHandleGuard,
}

impl WatchStream {
    pub(super) fn new(
        id: u64,
        receiver: mpsc::Receiver<ChangeEvent>,
        termination: TerminationSlot,
        guard: WatcherHandleGuard,
    ) -> Self {
        Self {
            id,
            receiver,
            termination,
            finished: false,
            _guard: guard,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next item, `None` after the terminal error.
    pub async fn next_event(&mut self) -> Option<Result<ChangeEvent>> {
        futures::StreamExt::next(self).await
    }
}

impl std::fmt::Debug for WatchStream {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchStream")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Stream for WatchStream {
    type Item = Result<ChangeEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => {
                self.finished = true;
                let reason = self
                    .termination
                    .lock()
                    .take()
                    .unwrap_or_else(|| WatchError::Closed("watcher disconnected".into()));
                Poll::Ready(Some(Err(reason.into())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
