use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::codec::CompressionEncoding;
use tonic_health::server::health_reporter;
use tracing::debug;

use crate::proto::controller_api_server::ControllerApiServer;
use crate::ControllerService;
use crate::ResourceApi;
use crate::Result;
use crate::StorageError;

pub struct MockController;

impl MockController {
    /// Serves `api` on an ephemeral local port until `rx` fires.
    pub async fn listener(
        api: ResourceApi,
        rx: oneshot::Receiver<()>,
        is_ready: bool,
    ) -> Result<SocketAddr> {
        let (mut health_reporter, health_service) = health_reporter();
        if is_ready {
            health_reporter
                .set_serving::<ControllerApiServer<ControllerService>>()
                .await;
        } else {
            health_reporter
                .set_not_serving::<ControllerApiServer<ControllerService>>()
                .await;
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(StorageError::IoError)?;
        let addr = listener.local_addr().map_err(StorageError::IoError)?;
        debug!("starting mock controller: addr={addr}");

        let service = ControllerService::new(api, Arc::new(AtomicBool::new(is_ready)));
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(health_service)
                .add_service(
                    ControllerApiServer::new(service)
                        .accept_compressed(CompressionEncoding::Gzip)
                        .send_compressed(CompressionEncoding::Gzip),
                )
                .serve_with_incoming_shutdown(tokio_stream::wrappers::TcpListenerStream::new(listener), async {
                    rx.await.ok();
                })
                .await
                .unwrap();
        });

        Ok(addr)
    }

    pub(crate) fn endpoint(addr: SocketAddr) -> String {
        format!("http://{addr}")
    }
}
