use std::pin::Pin;

use futures::Stream;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tonic::async_trait;

use crate::ChangeEvent;
use crate::OwnerRef;
use crate::PatchDocument;
use crate::Resource;
use crate::Result;
use crate::WatchRequest;

/// Stream of watch events ending with one terminal error
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListQuery {
    pub kind: String,
    pub id: Option<String>,
    pub owner: Option<OwnerRef>,
}

impl ListQuery {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_owner(
        mut self,
        owner: OwnerRef,
    ) -> Self {
        self.owner = Some(owner);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListResponse {
    pub resources: Vec<Resource>,
    /// Store revision the listing reflects; watch from here to continue
    pub revision: u64,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync + 'static {
    async fn list(
        &self,
        query: ListQuery,
    ) -> Result<ListResponse>;

    async fn get(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Resource>;

    async fn create(
        &self,
        resource: Resource,
    ) -> Result<Resource>;

    /// `owner`, when set, must equal the stored owner.
    async fn patch(
        &self,
        kind: &str,
        id: &str,
        owner: Option<OwnerRef>,
        patch: PatchDocument,
    ) -> Result<()>;

    async fn delete(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<()>;

    async fn watch(
        &self,
        request: WatchRequest,
    ) -> Result<EventStream>;
}
