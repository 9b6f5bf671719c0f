use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::stream::TerminationSlot;
use super::stream::WatchStream;
use super::stream::WatcherHandleGuard;
use crate::ChangeEvent;
use crate::ChangeFeed;
use crate::Result;
use crate::WatchConfig;
use crate::WatchError;
use crate::WatchRequest;
use crate::ACTIVE_WATCHERS;
use crate::WATCH_EVENTS_DELIVERED;
use crate::WATCH_OVERRUNS;

/// Registered subscriber
#[derive(Debug)]
struct Watcher {
    request: WatchRequest,

    /// Events at or below this revision were replayed or predate the
    /// subscription
    after_revision: u64,

    sender: mpsc::Sender<ChangeEvent>,

    termination: TerminationSlot,
}

#[derive(Debug)]
pub(crate) struct WatchManagerInner {
    watchers: DashMap<u64, Watcher>,

    /// Next watcher ID (monotonically increasing)
    next_id: AtomicU64,

    closed: AtomicBool,

    config: WatchConfig,
}

impl WatchManagerInner {
    pub(super) fn unregister(
        &self,
        id: u64,
    ) {
        if self.watchers.remove(&id).is_some() {
            ACTIVE_WATCHERS.dec();
        }
    }

    /// Removes the watcher and records why; its stream reports `reason`
    /// after draining the queue.
    fn disconnect(
        &self,
        id: u64,
        reason: WatchError,
    ) {
        if let Some((_, watcher)) = self.watchers.remove(&id) {
            ACTIVE_WATCHERS.dec();
            *watcher.termination.lock() = Some(reason);
        }
    }
}

struct Registration {
    request: WatchRequest,
    reply: oneshot::Sender<Result<WatchStream>>,
}

/// Client side of the watch engine
///
/// # Example
///
/// ```ignore
/// let (manager, dispatcher) = WatchManager::new(config, store.revision(), feed, shutdown_rx);
/// tokio::spawn(dispatcher.run());
///
/// let mut stream = manager.watch(WatchRequest::new("machine")).await?;
/// while let Some(event) = stream.next_event().await {
///     let event = event?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WatchManager {
    inner: Arc<WatchManagerInner>,

    registration_tx: mpsc::Sender<Registration>,
}

impl WatchManager {
    /// Creates the manager and the dispatcher that must be spawned to drive
    /// it. `base_revision` is the store revision the feed continues from.
    pub fn new(
        config: WatchConfig,
        base_revision: u64,
        feed: ChangeFeed,
        shutdown: watch::Receiver<()>,
    ) -> (Self, WatchDispatcher) {
        let (registration_tx, registration_rx) = mpsc::channel(config.registration_queue_size.max(1));
        let history_capacity = config.history_capacity;

        let inner = Arc::new(WatchManagerInner {
            watchers: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            config,
        });

        let dispatcher = WatchDispatcher {
            inner: inner.clone(),
            feed,
            registration_rx,
            shutdown,
            history: VecDeque::with_capacity(history_capacity),
            compacted_through: base_revision,
            last_revision: base_revision,
        };

        (Self { inner, registration_tx }, dispatcher)
    }

    /// Subscribes to changes matching `request`.
    ///
    /// Fails with `InvalidArgument` for a bad filter, `Compacted` when the
    /// start revision is no longer retained, and `Unavailable` when the
    /// engine is closed or at its watcher limit.
    pub async fn watch(
        &self,
        request: WatchRequest,
    ) -> Result<WatchStream> {
        request.validate()?;
        if self.is_closed() {
            return Err(closed().into());
        }

        let (reply, reply_rx) = oneshot::channel();
        self.registration_tx
            .send(Registration { request, reply })
            .await
            .map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())?
    }

    /// Get the number of active watchers
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

fn closed() -> WatchError {
    WatchError::Closed("watch engine is not running".into())
}

/// Single task consuming the change feed and serving registrations
pub struct WatchDispatcher {
    inner: Arc<WatchManagerInner>,

    feed: ChangeFeed,

    registration_rx: mpsc::Receiver<Registration>,

    shutdown: watch::Receiver<()>,

    /// Most recent events, oldest first
    history: VecDeque<ChangeEvent>,

    /// Highest revision that can no longer be replayed
    compacted_through: u64,

    /// Revision of the last dispatched event
    last_revision: u64,
}

impl WatchDispatcher {
    /// Runs until shutdown is signalled or the feed closes, then ends every
    /// live stream with an unavailable error.
    pub async fn run(mut self) {
        info!(revision = self.last_revision, "Watch dispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    info!("Watch dispatcher shutting down");
                    break;
                }

                // Ahead of the feed so a write burst cannot starve subscribers
                Some(registration) = self.registration_rx.recv() => {
                    self.register(registration);
                }

                event = self.feed.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        warn!("change feed closed");
                        break;
                    }
                },
            }
        }

        self.close();
        info!("Watch dispatcher stopped");
    }

    fn dispatch(
        &mut self,
        event: ChangeEvent,
    ) {
        self.last_revision = event.revision;

        let mut overrun = Vec::new();
        let mut gone = Vec::new();
        for entry in self.inner.watchers.iter() {
            let watcher = entry.value();
            if event.revision <= watcher.after_revision || !watcher.request.matches(&event) {
                continue;
            }
            match watcher.sender.try_send(event.clone()) {
                Ok(()) => WATCH_EVENTS_DELIVERED.inc(),
                Err(TrySendError::Full(_)) => overrun.push(*entry.key()),
                Err(TrySendError::Closed(_)) => gone.push(*entry.key()),
            }
        }

        // Registry mutation only after the iteration guard is released
        let capacity = self.inner.config.watcher_buffer_size;
        for watcher_id in overrun {
            warn!(watcher_id, revision = event.revision, "watcher overrun, disconnecting");
            WATCH_OVERRUNS.inc();
            self.inner.disconnect(watcher_id, WatchError::Overrun { watcher_id, capacity });
        }
        for id in gone {
            self.inner.unregister(id);
        }

        self.remember(event);
    }

    fn remember(
        &mut self,
        event: ChangeEvent,
    ) {
        let capacity = self.inner.config.history_capacity;
        if capacity == 0 {
            self.compacted_through = event.revision;
            return;
        }
        if self.history.len() == capacity {
            if let Some(oldest) = self.history.pop_front() {
                self.compacted_through = oldest.revision;
            }
        }
        self.history.push_back(event);
    }

    fn register(
        &mut self,
        Registration { request, reply }: Registration,
    ) {
        let result = self.try_register(request);
        if let Err(Ok(stream)) = reply.send(result) {
            // Caller went away; dropping the stream unregisters it
            trace!(watcher_id = stream.id(), "registration abandoned");
        }
    }

    fn try_register(
        &mut self,
        request: WatchRequest,
    ) -> Result<WatchStream> {
        let max = self.inner.config.max_watchers;
        if max > 0 && self.inner.watchers.len() >= max {
            return Err(WatchError::Closed(format!("watcher limit of {max} reached")).into());
        }

        let replay: Vec<ChangeEvent> = match request.start_revision {
            Some(start) => {
                if start < self.compacted_through {
                    return Err(WatchError::Compacted {
                        requested: start,
                        oldest: self.compacted_through + 1,
                    }
                    .into());
                }
                self.history
                    .iter()
                    .filter(|e| e.revision > start && request.matches(e))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        let after_revision = request.start_revision.unwrap_or(0).max(
            replay.last().map(|e| e.revision).unwrap_or(0),
        );

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel((self.inner.config.watcher_buffer_size + replay.len()).max(1));
        for event in replay.iter().cloned() {
            // Capacity covers the whole replay
            if sender.try_send(event).is_ok() {
                WATCH_EVENTS_DELIVERED.inc();
            }
        }

        let termination: TerminationSlot = Default::default();
        debug!(
            watcher_id = id,
            kind = %request.kind,
            replayed = replay.len(),
            after_revision,
            "Watcher registered"
        );
        self.inner.watchers.insert(
            id,
            Watcher {
                request,
                after_revision,
                sender,
                termination: termination.clone(),
            },
        );
        ACTIVE_WATCHERS.inc();

        let guard = WatcherHandleGuard {
            id,
            manager: self.inner.clone(),
        };
        Ok(WatchStream::new(id, receiver, termination, guard))
    }

    fn close(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.registration_rx.close();
        while let Ok(Registration { reply, .. }) = self.registration_rx.try_recv() {
            let _ = reply.send(Err(closed().into()));
        }

        let ids: Vec<u64> = self.inner.watchers.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.inner
                .disconnect(id, WatchError::Closed("watch engine shut down".into()));
        }
    }
}
