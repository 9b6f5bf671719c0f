use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref RESOURCE_MUTATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("resource_mutations", "Committed resource mutations"),
        &["kind", "action"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS_DELIVERED: IntCounter = IntCounter::new(
        "watch_events_delivered",
        "Events queued to watchers"
    )
    .expect("metric can not be created");

    pub static ref WATCH_OVERRUNS: IntCounter = IntCounter::new(
        "watch_overruns",
        "Watchers disconnected because their queue was full"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCHERS: IntGauge =
        IntGauge::new("active_watchers", "Currently registered watchers")
            .expect("metric can not be created");

    pub static ref RECONCILE_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("reconcile_outcomes", "Reconciliation attempts by outcome"),
        &["kind", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(RESOURCE_MUTATIONS.clone()),
        Box::new(WATCH_EVENTS_DELIVERED.clone()),
        Box::new(WATCH_OVERRUNS.clone()),
        Box::new(ACTIVE_WATCHERS.clone()),
        Box::new(RECONCILE_OUTCOMES.clone()),
    ];
    for collector in collectors {
        // Registering twice (tests, restarts) is harmless
        if let Err(e) = registry.register(collector) {
            tracing::debug!("collector not registered: {}", e);
        }
    }
}

pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics(&REGISTRY);
    if let Err(e) = prometheus_exporter::try_init() {
        tracing::debug!("autometrics exporter already initialised: {}", e);
    }

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!("metrics server listening on port {}", port);
    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_metrics())
}

/// Text exposition of the custom registry followed by autometrics series.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    let mut res = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    });

    match prometheus_exporter::encode_to_string() {
        Ok(autometrics_metrics) => res.push_str(&autometrics_metrics),
        Err(e) => error!("could not encode autometrics metrics: {}", e),
    }
    res
}
