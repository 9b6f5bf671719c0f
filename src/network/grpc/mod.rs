//! gRPC transport for the `ControllerApi` service.
//!
//! Every RPC is served by [`ControllerService`]; store calls are bounded by
//! the API's request timeout and failures reach the client as typed
//! statuses.

mod controller_service;


pub use controller_service::*;

//-------------------------------------------------------------------------------
// Start RPC Server
use std::net::SocketAddr;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tonic::codec::CompressionEncoding;
use tonic_health::server::health_reporter;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::proto::controller_api_server::ControllerApiServer;
use crate::Result;
use crate::ServerConfig;
use crate::SystemError;

/// Serves `ControllerApi` and `grpc.health.v1` until `shutdown_signal` fires.
pub(crate) async fn start_rpc_server(
    service: ControllerService,
    listen_address: SocketAddr,
    config: ServerConfig,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<ControllerApiServer<ControllerService>>()
        .await;

    let mut api_server = ControllerApiServer::new(service);
    if config.enable_gzip {
        api_server = api_server
            .accept_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Gzip);
    }

    info!("gRPC ControllerApi listening on {}", listen_address);
    if let Err(e) = tonic::transport::Server::builder()
        .max_concurrent_streams(config.max_concurrent_streams)
        .tcp_keepalive(Some(Duration::from_secs(config.tcp_keepalive_in_secs)))
        .tcp_nodelay(true)
        .add_service(health_service)
        .add_service(api_server)
        .serve_with_shutdown(
            listen_address,
            shutdown_signal.changed().map(|_s| {
                warn!("Stopping RPC server. {}", listen_address);
            }),
        )
        .await
    {
        error!("error to start rpc server :{:?}.", e);
        return Err(SystemError::ServerUnavailable.into());
    }
    debug!("rpc service finished!");
    Ok(())
}
