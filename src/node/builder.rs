//! A builder pattern implementation for constructing a controller [`Node`]
//! with configurable components.
//!
//! The [`NodeBuilder`] wires the control plane explicitly:
//! - Storage engine selection (sled or in-memory, or a caller supplied one)
//! - Resource store and its change feed
//! - Watch engine dispatcher
//! - Transport servers (gRPC, HTTP) and the metrics exporter
//!
//! ## Key Design Points
//! - **Explicit wiring**: every shared component is constructed here and
//!   handed out as an `Arc` or a cheap clone; there are no globals besides
//!   the prometheus statics.
//! - **Single shutdown signal**: the dispatcher, every server and
//!   [`Node::run`] observe the same `watch::Receiver<()>`.
//!
//! ## Typical Usage
//! ```rust,ignore
//! let node = NodeBuilder::init(config, shutdown_rx.clone())
//!     .build()?
//!     .start_metrics_server(shutdown_rx.clone())
//!     .start_rpc_server()?
//!     .start_http_server()?
//!     .ready()?;
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use super::Node;
use crate::async_task::spawn_task;
use crate::metrics;
use crate::network;
use crate::ControllerConfig;
use crate::ControllerService;
use crate::MemStorageEngine;
use crate::ResourceApi;
use crate::ResourceStore;
use crate::Result;
use crate::SledStorageEngine;
use crate::StorageBackend;
use crate::StorageEngine;
use crate::SystemError;
use crate::WatchManager;

pub struct NodeBuilder {
    pub(super) config: ControllerConfig,
    pub(super) storage_engine: Option<Arc<dyn StorageEngine>>,
    pub(super) shutdown_signal: watch::Receiver<()>,

    pub(super) node: Option<Arc<Node>>,
    pub(super) tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("backend", &self.config.storage.backend)
            .field("built", &self.node.is_some())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl NodeBuilder {
    /// Creates a builder from an already validated configuration.
    pub fn init(
        config: ControllerConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            storage_engine: None,
            shutdown_signal,
            node: None,
            tasks: Vec::new(),
        }
    }

    /// Sets a custom storage engine, bypassing `storage.backend`
    pub fn storage_engine(
        mut self,
        engine: Arc<dyn StorageEngine>,
    ) -> Self {
        self.storage_engine = Some(engine);
        self
    }

    /// Replaces the entire configuration
    pub fn config(
        mut self,
        config: ControllerConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Opens the store, spawns the watch dispatcher and constructs the node.
    ///
    /// # Errors
    /// Fails when the storage engine cannot be opened or its persisted
    /// revision cannot be decoded.
    pub fn build(mut self) -> Result<Self> {
        let engine = match self.storage_engine.take() {
            Some(engine) => engine,
            None => open_engine(&self.config)?,
        };

        let (store, feed) = ResourceStore::open(engine)?;
        let base_revision = store.revision();

        let (watch_manager, dispatcher) = WatchManager::new(
            self.config.watch.clone(),
            base_revision,
            feed,
            self.shutdown_signal.clone(),
        );
        self.tasks.push(tokio::spawn(dispatcher.run()));

        let request_timeout = Duration::from_millis(self.config.server.request_timeout_in_ms);
        let api = ResourceApi::new(Arc::new(store), watch_manager, request_timeout);

        self.node = Some(Arc::new(Node {
            api,
            ready: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            shutdown_signal: self.shutdown_signal.clone(),
            config: Arc::new(self.config.clone()),
        }));
        info!(revision = base_revision, "controller node built");
        Ok(self)
    }

    /// Starts the metrics server for monitoring node operations.
    ///
    /// Launches a Prometheus endpoint on the configured port when
    /// `monitoring.prometheus_enabled` is set.
    pub fn start_metrics_server(
        mut self,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        if !self.config.monitoring.prometheus_enabled {
            debug!("metrics server disabled");
            return self;
        }
        let port = self.config.monitoring.prometheus_port;
        spawn_task(
            "metrics server",
            move || async move {
                metrics::start_server(port, shutdown_signal).await;
                Ok(())
            },
            Some(&mut self.tasks),
        );
        self
    }

    /// Starts the gRPC `ControllerApi` server.
    ///
    /// # Errors
    /// Fails if the node hasn't been built or the listen address is invalid.
    pub fn start_rpc_server(mut self) -> Result<Self> {
        debug!("--- start RPC server --- ");
        let node = self.built()?;
        let listen_address = self.config.server.grpc_addr()?;
        let service = ControllerService::new(node.api(), node.ready.clone());
        let server_config = self.config.server.clone();
        let shutdown = self.shutdown_signal.clone();
        spawn_task(
            "rpc server",
            move || network::start_rpc_server(service, listen_address, server_config, shutdown),
            Some(&mut self.tasks),
        );
        Ok(self)
    }

    /// Starts the HTTP front end when `server.enable_http` is set.
    ///
    /// # Errors
    /// Fails if the node hasn't been built or the listen address is invalid.
    pub fn start_http_server(mut self) -> Result<Self> {
        if !self.config.server.enable_http {
            debug!("HTTP front end disabled");
            return Ok(self);
        }
        debug!("--- start HTTP server --- ");
        let api = self.built()?.api();
        let listen_address = self.config.server.http_addr()?;
        let shutdown = self.shutdown_signal.clone();
        spawn_task(
            "http server",
            move || network::start_http_server(api, listen_address, shutdown),
            Some(&mut self.tasks),
        );
        Ok(self)
    }

    /// Returns the built node, handing it every task spawned so far.
    ///
    /// # Errors
    /// Returns `SystemError::NodeStartFailed` if build hasn't completed
    pub fn ready(mut self) -> Result<Arc<Node>> {
        let node = self.built()?;
        node.tasks.lock().append(&mut self.tasks);
        Ok(node)
    }

    fn built(&self) -> Result<Arc<Node>> {
        self.node
            .clone()
            .ok_or_else(|| SystemError::NodeStartFailed("node has not been built".to_string()).into())
    }
}

fn open_engine(config: &ControllerConfig) -> Result<Arc<dyn StorageEngine>> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::Sled => {
            let engine = SledStorageEngine::open(
                storage.resource_db_path(),
                storage.cache_capacity_in_bytes,
                storage.flush_every_ms,
            )?;
            Ok(Arc::new(engine))
        }
        StorageBackend::Memory => Ok(Arc::new(MemStorageEngine::new())),
    }
}
