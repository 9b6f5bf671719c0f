use futures::StreamExt;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::Request;
use tracing::debug;
use tracing::error;

use super::ClientConfig;
use crate::proto::controller_api_client::ControllerApiClient;
use crate::proto::CreateRequest;
use crate::proto::DeleteRequest;
use crate::proto::GetRequest;
use crate::proto::ListRequest;
use crate::proto::PatchRequest;
use crate::ChangeEvent;
use crate::Error;
use crate::EventStream;
use crate::ListQuery;
use crate::ListResponse;
use crate::OwnerRef;
use crate::PatchDocument;
use crate::Resource;
use crate::ResourceClient;
use crate::ResourceError;
use crate::Result;
use crate::WatchRequest;

/// `ControllerApi` client. Cloning is cheap; clones share the channel.
#[derive(Debug, Clone)]
pub struct ControllerClient {
    channel: Channel,
    config: ClientConfig,
}

impl ControllerClient {
    pub(crate) fn new(
        channel: Channel,
        config: ClientConfig,
    ) -> Self {
        Self { channel, config }
    }

    fn client(&self) -> ControllerApiClient<Channel> {
        let mut client = ControllerApiClient::new(self.channel.clone());
        if self.config.enable_compression {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        client
    }

    fn request<T>(
        &self,
        message: T,
    ) -> Request<T> {
        let mut request = Request::new(message);
        request.set_timeout(self.config.request_timeout);
        request
    }
}

fn status_to_error(
    rpc_name: &'static str,
    status: tonic::Status,
) -> Error {
    error!("[:ControllerClient:{}] status: {:?}", rpc_name, status);
    status.into()
}

fn missing_resource(rpc_name: &str) -> Error {
    ResourceError::InvalidArgument(format!("{rpc_name} response carried no resource")).into()
}

#[async_trait]
impl ResourceClient for ControllerClient {
    async fn list(
        &self,
        query: ListQuery,
    ) -> Result<ListResponse> {
        let request = self.request(ListRequest {
            kind: query.kind,
            id: query.id,
            owner: query.owner.map(Into::into),
        });
        let response = self
            .client()
            .list(request)
            .await
            .map_err(|s| status_to_error("list", s))?
            .into_inner();
        debug!("[:ControllerClient:list] {} resources at revision {}", response.resources.len(), response.revision);
        Ok(ListResponse {
            resources: response.resources.into_iter().map(Resource::from).collect(),
            revision: response.revision,
        })
    }

    async fn get(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Resource> {
        let request = self.request(GetRequest {
            kind: kind.to_string(),
            id: id.to_string(),
        });
        self.client()
            .get(request)
            .await
            .map_err(|s| status_to_error("get", s))?
            .into_inner()
            .resource
            .map(Resource::from)
            .ok_or_else(|| missing_resource("get"))
    }

    async fn create(
        &self,
        resource: Resource,
    ) -> Result<Resource> {
        let request = self.request(CreateRequest {
            resource: Some(resource.into()),
        });
        self.client()
            .create(request)
            .await
            .map_err(|s| status_to_error("create", s))?
            .into_inner()
            .resource
            .map(Resource::from)
            .ok_or_else(|| missing_resource("create"))
    }

    async fn patch(
        &self,
        kind: &str,
        id: &str,
        owner: Option<OwnerRef>,
        patch: PatchDocument,
    ) -> Result<()> {
        let request = self.request(PatchRequest {
            kind: kind.to_string(),
            id: Some(id.to_string()),
            owner: owner.map(Into::into),
            patches: patch.encode(),
        });
        self.client()
            .patch(request)
            .await
            .map_err(|s| status_to_error("patch", s))?;
        Ok(())
    }

    async fn delete(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<()> {
        let request = self.request(DeleteRequest {
            kind: kind.to_string(),
            id: id.to_string(),
        });
        self.client()
            .delete(request)
            .await
            .map_err(|s| status_to_error("delete", s))?;
        Ok(())
    }

    /// The stream yields decoded events and ends after the first error,
    /// which is the server's terminal status.
    async fn watch(
        &self,
        request: WatchRequest,
    ) -> Result<EventStream> {
        let proto_request: crate::proto::WatchRequest = request.into();
        let stream = self
            .client()
            .watch(Request::new(proto_request))
            .await
            .map_err(|s| status_to_error("watch", s))?
            .into_inner();

        let events = stream
            .map(|item| match item {
                Ok(response) => ChangeEvent::try_from(response),
                Err(status) => Err(Error::from(status)),
            })
            .scan(false, |done, item| {
                if *done {
                    return futures::future::ready(None);
                }
                *done = item.is_err();
                futures::future::ready(Some(item))
            });
        Ok(Box::pin(events))
    }
}
