use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use tokio::sync::watch;

use crate::MemStorageEngine;
use crate::ResourceApi;
use crate::ResourceStore;
use crate::WatchConfig;
use crate::WatchManager;

pub(crate) const TEST_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// In-memory store, running dispatcher and API. Dropping the returned
/// sender shuts the watch engine down.
pub(crate) fn mem_api(watch_config: WatchConfig) -> (ResourceApi, watch::Sender<()>) {
    let (store, feed) = ResourceStore::open(Arc::new(MemStorageEngine::new())).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let (manager, dispatcher) = WatchManager::new(watch_config, store.revision(), feed, shutdown_rx);
    tokio::spawn(dispatcher.run());
    (
        ResourceApi::new(Arc::new(store), manager, TEST_REQUEST_TIMEOUT),
        shutdown_tx,
    )
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
    println!("setup logger for unit test.");
}
