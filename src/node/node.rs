//! A running controller instance.
//!
//! ## Key Responsibilities
//! - Owns the resource store, watch engine and API wired by [`NodeBuilder`]
//! - Tracks readiness, which the gRPC service checks on every call
//! - Waits for the shutdown signal, then drains servers and stops the store
//!
//! ## Example Usage
//! ```rust,ignore
//! let node = NodeBuilder::init(config, shutdown_rx).build()?.ready()?;
//! tokio::spawn(async move {
//!     node.run().await.expect("controller execution failed");
//! });
//! ```
//!
//! [`NodeBuilder`]: crate::NodeBuilder

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;

use crate::ControllerConfig;
use crate::ResourceApi;
use crate::Result;

pub struct Node {
    pub(crate) api: ResourceApi,

    pub(crate) ready: Arc<AtomicBool>,

    /// Dispatcher and server tasks, joined on shutdown
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,

    pub(crate) shutdown_signal: watch::Receiver<()>,

    pub config: Arc<ControllerConfig>,
}

impl std::fmt::Debug for Node {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("ready", &self.server_is_ready())
            .field("revision", &self.api.store().revision())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// In-process API handle; also usable as a [`crate::ResourceClient`].
    pub fn api(&self) -> ResourceApi {
        self.api.clone()
    }

    /// Serves until the shutdown signal fires.
    ///
    /// Readiness flips on at start and off before teardown, so RPCs that
    /// race the shutdown fail with `Unavailable` instead of touching a
    /// stopping store.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown_signal.clone();
        self.api.store().start();
        self.set_ready(true);
        info!(revision = self.api.store().revision(), "controller is ready");

        // An error means every sender is gone, which is a shutdown too
        let _ = shutdown.changed().await;
        info!("shutdown signal received");
        self.set_ready(false);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("background task ended abnormally: {:?}", e);
            }
        }

        self.api.store().stop().await?;
        info!("controller stopped");
        Ok(())
    }

    pub fn set_ready(
        &self,
        is_ready: bool,
    ) {
        self.ready.store(is_ready, Ordering::SeqCst);
    }

    pub fn server_is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
