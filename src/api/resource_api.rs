use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use autometrics::autometrics;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use super::EventStream;
use super::ListQuery;
use super::ListResponse;
use super::ResourceClient;
use crate::resource::validate_id;
use crate::resource::validate_kind;
use crate::resource::validate_owner;
use crate::Error;
use crate::OwnerRef;
use crate::PatchDocument;
use crate::Resource;
use crate::ResourceError;
use crate::ResourceStore;
use crate::Result;
use crate::WatchManager;
use crate::WatchRequest;
use crate::WatchStream;
use crate::API_SLO;
use crate::KIND_ALL;

#[derive(Debug, Clone)]
pub struct ResourceApi {
    store: Arc<ResourceStore>,
    watch: WatchManager,
    request_timeout: Duration,
}

impl ResourceApi {
    pub fn new(
        store: Arc<ResourceStore>,
        watch: WatchManager,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            watch,
            request_timeout,
        }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    pub fn watch_manager(&self) -> &WatchManager {
        &self.watch
    }

    /// Bounds one store call by the request timeout.
    pub(crate) async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("store call exceeded {:?}", self.request_timeout);
                Err(Error::DeadlineExceeded(self.request_timeout))
            }
        }
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    pub async fn list(
        &self,
        query: ListQuery,
    ) -> Result<ListResponse> {
        if query.kind != KIND_ALL {
            validate_kind(&query.kind)?;
        }
        if let Some(owner) = &query.owner {
            validate_owner(owner)?;
        }
        let (resources, revision) = self
            .bounded(self.store.list(&query.kind, query.id.as_deref(), query.owner.as_ref()))
            .await?;
        Ok(ListResponse { resources, revision })
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    pub async fn get(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Resource> {
        validate_kind(kind)?;
        validate_id(id)?;
        self.bounded(self.store.get(kind, id))
            .await?
            .map(|v| v.resource)
            .ok_or_else(|| {
                ResourceError::NotFound {
                    kind: kind.to_string(),
                    id: id.to_string(),
                }
                .into()
            })
    }

    /// Creates `resource`. A set owner must name an existing resource.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    pub async fn create(
        &self,
        resource: Resource,
    ) -> Result<Resource> {
        validate_kind(&resource.kind)?;
        if let Some(owner) = &resource.owner {
            validate_owner(owner)?;
            validate_kind(&owner.kind)?;
            let exists = self.bounded(self.store.get(&owner.kind, &owner.id)).await?.is_some();
            if !exists {
                return Err(ResourceError::InvalidArgument(format!("owner {owner} does not exist")).into());
            }
        }
        let stored = self.bounded(self.store.create(resource)).await?;
        debug!(kind = %stored.resource.kind, id = %stored.resource.id, "created");
        Ok(stored.resource)
    }

    /// Decodes and applies a patch. A supplied owner must equal the stored one.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    pub async fn patch(
        &self,
        kind: &str,
        id: &str,
        owner: Option<&OwnerRef>,
        patch: &[u8],
    ) -> Result<Resource> {
        let document = PatchDocument::decode(patch)?;
        self.patch_document(kind, id, owner, &document).await
    }

    pub async fn patch_document(
        &self,
        kind: &str,
        id: &str,
        owner: Option<&OwnerRef>,
        document: &PatchDocument,
    ) -> Result<Resource> {
        validate_kind(kind)?;
        validate_id(id)?;
        if let Some(expected) = owner {
            validate_owner(expected)?;
        }
        let stored = self.bounded(self.store.patch(kind, id, owner, document)).await?;
        Ok(stored.resource)
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    pub async fn delete(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Resource> {
        validate_kind(kind)?;
        validate_id(id)?;
        let stored = self.bounded(self.store.delete(kind, id)).await?;
        Ok(stored.resource)
    }

    /// Opens a subscription bound to the returned stream.
    ///
    /// A `start_revision` beyond the current store revision is rejected:
    /// the watcher would silently skip every change up to it.
    pub async fn watch(
        &self,
        request: WatchRequest,
    ) -> Result<WatchStream> {
        request.validate()?;
        if let Some(start) = request.start_revision {
            let current = self.store.revision();
            if start > current {
                return Err(ResourceError::InvalidArgument(format!(
                    "start_revision {start} is ahead of the current revision {current}"
                ))
                .into());
            }
        }
        self.bounded(self.watch.watch(request)).await
    }
}

#[async_trait]
impl ResourceClient for ResourceApi {
    async fn list(
        &self,
        query: ListQuery,
    ) -> Result<ListResponse> {
        ResourceApi::list(self, query).await
    }

    async fn get(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Resource> {
        ResourceApi::get(self, kind, id).await
    }

    async fn create(
        &self,
        resource: Resource,
    ) -> Result<Resource> {
        ResourceApi::create(self, resource).await
    }

    async fn patch(
        &self,
        kind: &str,
        id: &str,
        owner: Option<OwnerRef>,
        patch: PatchDocument,
    ) -> Result<()> {
        self.patch_document(kind, id, owner.as_ref(), &patch).await.map(|_| ())
    }

    async fn delete(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<()> {
        ResourceApi::delete(self, kind, id).await.map(|_| ())
    }

    async fn watch(
        &self,
        request: WatchRequest,
    ) -> Result<EventStream> {
        let stream = ResourceApi::watch(self, request).await?;
        Ok(Box::pin(stream))
    }
}
