use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::KIND_ALL;
use crate::resource::validate_kind;
use crate::resource::validate_owner;
use crate::OwnerRef;
use crate::Resource;
use crate::ResourceError;
use crate::Result;

/// Mutation kind of a change, or `All` as a subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchAction {
    Create,
    Update,
    Delete,
    #[default]
    All,
}

impl WatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchAction::Create => "create",
            WatchAction::Update => "update",
            WatchAction::Delete => "delete",
            WatchAction::All => "all",
        }
    }

    /// Whether a subscription for `self` accepts an event of `action`.
    pub fn accepts(
        &self,
        action: WatchAction,
    ) -> bool {
        *self == WatchAction::All || *self == action
    }
}

impl fmt::Display for WatchAction {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchAction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(WatchAction::Create),
            "update" => Ok(WatchAction::Update),
            "delete" => Ok(WatchAction::Delete),
            "all" | "" => Ok(WatchAction::All),
            other => Err(ResourceError::InvalidArgument(format!("unknown watch action {other:?}")).into()),
        }
    }
}

/// One committed mutation, as produced by the store and delivered to
/// watchers.
///
/// `prev_resource` holds the value before an update, and the deleted value
/// for a delete (then equal to `resource`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub revision: u64,
    pub action: WatchAction,
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_resource: Option<Resource>,
}

pub type WatchEvent = ChangeEvent;

/// Subscription filter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchRequest {
    /// Required; [`KIND_ALL`] matches every kind
    pub kind: String,
    pub id: Option<String>,
    pub owner: Option<OwnerRef>,
    pub action: WatchAction,
    /// Replay retained events with a greater revision before going live
    pub start_revision: Option<u64>,
}

impl WatchRequest {
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

    pub fn with_action(
        mut self,
        action: WatchAction,
    ) -> Self {
        self.action = action;
        self
    }

    pub fn from_revision(
        mut self,
        revision: u64,
    ) -> Self {
        self.start_revision = Some(revision);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind != KIND_ALL {
            validate_kind(&self.kind)?;
        }
        if let Some(owner) = &self.owner {
            validate_owner(owner)?;
        }
        if matches!(&self.id, Some(id) if id.is_empty()) {
            return Err(ResourceError::InvalidArgument("id filter must not be empty".into()).into());
        }
        Ok(())
    }

    pub fn matches(
        &self,
        event: &ChangeEvent,
    ) -> bool {
        let resource = &event.resource;
        (self.kind == KIND_ALL || self.kind == resource.kind)
            && self.id.as_ref().map_or(true, |id| *id == resource.id)
            && self.owner.as_ref().map_or(true, |owner| resource.owner.as_ref() == Some(owner))
            && self.action.accepts(event.action)
    }
}
