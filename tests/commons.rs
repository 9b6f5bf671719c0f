use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use rockferry::ClientBuilder;
use rockferry::ControllerClient;
use rockferry::ControllerConfig;
use rockferry::Node;
use rockferry::NodeBuilder;
use rockferry::Result;
use rockferry::StorageBackend;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

pub const WAIT_FOR_NODE_READY_IN_SEC: u64 = 5;

pub struct TestNode {
    pub node: Arc<Node>,
    pub endpoint: String,
    shutdown: watch::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl TestNode {
    pub async fn client(&self) -> ControllerClient {
        connect(&self.endpoint).await
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.send(()).expect("Should succeed to send shutdown");
        self.handle.await.expect("node task panicked")
    }
}

/// Picks a port the OS considers free right now.
pub fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    addr.to_string()
}

pub fn memory_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.monitoring.prometheus_enabled = false;
    config.server.enable_http = false;
    config.server.grpc_listen_address = free_addr();
    config.server.request_timeout_in_ms = 2000;
    config
}

pub fn sled_config(db_root_dir: &Path) -> ControllerConfig {
    let mut config = memory_config();
    config.storage.backend = StorageBackend::Sled;
    config.storage.db_root_dir = db_root_dir.to_path_buf();
    config
}

pub async fn start_node(config: ControllerConfig) -> Result<TestNode> {
    let (graceful_tx, graceful_rx) = watch::channel(());
    let endpoint = format!("http://{}", config.server.grpc_listen_address);

    let node = NodeBuilder::init(config, graceful_rx)
        .build()?
        .start_rpc_server()?
        .start_http_server()?
        .ready()?;

    let node_clone = node.clone();
    let handle = tokio::spawn(async move { node_clone.run().await });

    time::timeout(Duration::from_secs(WAIT_FOR_NODE_READY_IN_SEC), async {
        while !node.server_is_ready() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("node became ready");

    Ok(TestNode {
        node,
        endpoint,
        shutdown: graceful_tx,
        handle,
    })
}

/// Connects once the gRPC listener is up.
pub async fn connect(endpoint: &str) -> ControllerClient {
    let deadline = time::Instant::now() + Duration::from_secs(WAIT_FOR_NODE_READY_IN_SEC);
    loop {
        match ClientBuilder::new(endpoint).connect_timeout(Duration::from_millis(200)).build().await {
            Ok(client) => return client,
            Err(e) if time::Instant::now() < deadline => {
                debug!("controller not reachable yet: {:?}", e);
                time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("could not connect to {endpoint}: {e:?}"),
        }
    }
}

/// Polls `check` until it returns true or the timeout passes.
pub async fn eventually<F, Fut>(
    what: &str,
    mut check: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let waited = time::timeout(Duration::from_secs(WAIT_FOR_NODE_READY_IN_SEC), async {
        while !check().await {
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

lazy_static! {
    static ref LOGGER_INIT: () = {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    };
}

pub fn enable_logger() {
    *LOGGER_INIT;
}
