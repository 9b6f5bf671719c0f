//! `ControllerApi` gRPC service: decodes wire messages, calls
//! [`ResourceApi`] and maps every failure to a typed status.

use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use autometrics::autometrics;
use futures::Stream;
use futures::StreamExt;
use tokio::select;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::constants::GRPC_WATCH_FORWARD_BUFFER;
use crate::proto::controller_api_server::ControllerApi;
use crate::proto::CreateRequest;
use crate::proto::CreateResponse;
use crate::proto::DeleteRequest;
use crate::proto::DeleteResponse;
use crate::proto::GetRequest;
use crate::proto::GetResponse;
use crate::proto::ListRequest;
use crate::proto::ListResponse;
use crate::proto::PatchRequest;
use crate::proto::PatchResponse;
use crate::proto::WatchResponse;
use crate::ListQuery;
use crate::OwnerRef;
use crate::Resource;
use crate::ResourceApi;
use crate::Result;
use crate::WatchRequest;
use crate::WatchStream;
use crate::API_SLO;

pub type WatchResponseStream = Pin<Box<dyn Stream<Item = std::result::Result<WatchResponse, Status>> + Send>>;

#[derive(Debug, Clone)]
pub struct ControllerService {
    api: ResourceApi,
    ready: Arc<AtomicBool>,
}

impl ControllerService {
    pub fn new(
        api: ResourceApi,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self { api, ready }
    }

    fn check_ready(
        &self,
        rpc_name: &'static str,
    ) -> std::result::Result<(), Status> {
        if !self.ready.load(Ordering::Acquire) {
            warn!("[rpc|{}] controller is not ready!", rpc_name);
            return Err(Status::unavailable("Service is not ready"));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl ControllerApi for ControllerService {
    type WatchStream = WatchResponseStream;

    /// Streams matching change events until the client goes away or the
    /// engine ends the subscription, in which case the last item is the
    /// terminal status.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn watch(
        &self,
        request: Request<crate::proto::WatchRequest>,
    ) -> std::result::Result<Response<Self::WatchStream>, Status> {
        self.check_ready("watch")?;
        let request = WatchRequest::try_from(request.into_inner())?;
        let stream = handle_rpc(self.api.watch(request).await, "watch")?;

        let (tx, rx) = mpsc::channel(GRPC_WATCH_FORWARD_BUFFER);
        tokio::spawn(forward_watch(stream, tx));
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn list(
        &self,
        request: Request<ListRequest>,
    ) -> std::result::Result<Response<ListResponse>, Status> {
        self.check_ready("list")?;
        let req = request.into_inner();
        let query = ListQuery {
            kind: req.kind,
            id: req.id,
            owner: req.owner.map(OwnerRef::from),
        };
        let listed = handle_rpc(self.api.list(query).await, "list")?;
        Ok(Response::new(ListResponse {
            resources: listed.resources.into_iter().map(Into::into).collect(),
            revision: listed.revision,
        }))
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn get(
        &self,
        request: Request<GetRequest>,
    ) -> std::result::Result<Response<GetResponse>, Status> {
        self.check_ready("get")?;
        let req = request.into_inner();
        let resource = handle_rpc(self.api.get(&req.kind, &req.id).await, "get")?;
        Ok(Response::new(GetResponse {
            resource: Some(resource.into()),
        }))
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn create(
        &self,
        request: Request<CreateRequest>,
    ) -> std::result::Result<Response<CreateResponse>, Status> {
        self.check_ready("create")?;
        let resource = request
            .into_inner()
            .resource
            .map(Resource::from)
            .ok_or_else(|| Status::invalid_argument("resource is required"))?;
        let created = handle_rpc(self.api.create(resource).await, "create")?;
        Ok(Response::new(CreateResponse {
            resource: Some(created.into()),
        }))
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn patch(
        &self,
        request: Request<PatchRequest>,
    ) -> std::result::Result<Response<PatchResponse>, Status> {
        self.check_ready("patch")?;
        let req = request.into_inner();
        let owner = req.owner.map(OwnerRef::from);
        let id = req.id.unwrap_or_default();
        handle_rpc(
            self.api.patch(&req.kind, &id, owner.as_ref(), &req.patches).await,
            "patch",
        )?;
        Ok(Response::new(PatchResponse { ok: true }))
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> std::result::Result<Response<DeleteResponse>, Status> {
        self.check_ready("delete")?;
        let req = request.into_inner();
        handle_rpc(self.api.delete(&req.kind, &req.id).await, "delete")?;
        Ok(Response::new(DeleteResponse {}))
    }
}

/// Moves events from a subscription onto the response channel. Stops as soon
/// as the client disconnects, dropping the subscription with it.
pub(crate) async fn forward_watch(
    mut stream: WatchStream,
    tx: mpsc::Sender<std::result::Result<WatchResponse, Status>>,
) {
    let watcher_id = stream.id();
    loop {
        let item = select! {
            _ = tx.closed() => {
                debug!(watcher_id, "watch client disconnected");
                return;
            }
            item = stream.next() => item,
        };
        match item {
            Some(Ok(event)) => {
                if tx.send(Ok(event.into())).await.is_err() {
                    debug!(watcher_id, "watch client disconnected");
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(watcher_id, "watch ended: {}", e);
                let _ = tx.send(Err(e.into())).await;
                return;
            }
            None => return,
        }
    }
}

/// Centralized result mapping for all RPC operations.
fn handle_rpc<T>(
    result: Result<T>,
    rpc_name: &'static str,
) -> std::result::Result<T, Status> {
    result.map_err(|e| {
        match e.code() {
            crate::ErrorCode::Internal | crate::ErrorCode::Unavailable => {
                error!("[{}] failed: {:?}", rpc_name, e)
            }
            _ => debug!("[{}] rejected: {}", rpc_name, e),
        }
        Status::from(e)
    })
}
