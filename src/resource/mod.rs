//! Resource data model.
//!
//! A [`Resource`] is the single universal object stored and watched by the
//! control plane. Its `spec` and `status` are opaque structured documents;
//! kind-specific shape validation belongs to the collaborators that consume
//! them, not to the core.

mod patch;


use std::collections::BTreeMap;
use std::fmt;

pub use patch::*;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::GENERATED_ID_LEN;
use crate::constants::KEY_SEPARATOR;
use crate::constants::KIND_ALL;
use crate::ResourceError;
use crate::Result;

/// Structured document: tagged union of null/bool/number/string/list/map.
pub type Document = serde_json::Value;

/// An empty map document, the value of an unset spec or status.
pub fn empty_document() -> Document {
    Document::Object(serde_json::Map::new())
}

/// Well-known resource kinds. The core never interprets them.
pub mod kind {
    pub const MACHINE: &str = "machine";
    pub const STORAGE_POOL: &str = "storage_pool";
    pub const STORAGE_VOLUME: &str = "storage_volume";
    pub const NODE: &str = "node";
    pub const NETWORK: &str = "network";
    pub const CLUSTER: &str = "cluster";
}

/// Coarse lifecycle labels. Meaning is kind specific.
pub mod phase {
    pub const CREATED: &str = "created";
    pub const RUNNING: &str = "running";
    pub const CRASHED: &str = "crashed";
    pub const STOPPED: &str = "stopped";
    pub const SHUTDOWN: &str = "shutdown";
    pub const BOOTING: &str = "booting";
    pub const REBOOTING: &str = "rebooting";
    pub const FAILED: &str = "failed";
}

/// Phase assigned on create when the caller leaves it empty.
pub fn initial_phase(_kind: &str) -> &'static str {
    phase::CREATED
}

/// Flat back-reference to another resource. Never traversed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: String,
}

impl OwnerRef {
    pub fn new(
        kind: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// `(kind, id)` identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(
        kind: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Storage key: `{kind}/{id}`. Kinds never contain the separator, so
    /// the first separator splits the key even when ids contain one.
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.kind, KEY_SEPARATOR, self.id)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (kind, id) = raw.split_once(KEY_SEPARATOR)?;
        Some(Self::new(kind, id))
    }

    /// Prefix shared by every record of `kind`
    pub fn kind_prefix(kind: &str) -> String {
        format!("{}{}", kind, KEY_SEPARATOR)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: String,

    pub kind: String,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,

    /// Desired state, set by clients
    #[serde(default = "empty_document")]
    pub spec: Document,

    /// Observed state, set by reconciliation agents
    #[serde(default = "empty_document")]
    pub status: Document,

    #[serde(default)]
    pub phase: String,
}

impl Default for Resource {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: String::new(),
            annotations: BTreeMap::new(),
            owner: None,
            spec: empty_document(),
            status: empty_document(),
            phase: String::new(),
        }
    }
}

impl Resource {
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
        self.id = id.into();
        self
    }

    pub fn with_owner(
        mut self,
        owner: OwnerRef,
    ) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_spec(
        mut self,
        spec: Document,
    ) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_status(
        mut self,
        status: Document,
    ) -> Self {
        self.status = status;
        self
    }

    pub fn with_phase(
        mut self,
        phase: impl Into<String>,
    ) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn with_annotation(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind.clone(), self.id.clone())
    }

    /// Self-reference usable as another resource's owner.
    pub fn as_owner(&self) -> OwnerRef {
        OwnerRef::new(self.kind.clone(), self.id.clone())
    }

    /// Fills server-assigned fields: a generated id when absent and the
    /// kind's initial phase when unset.
    pub(crate) fn assign_defaults(&mut self) {
        if self.id.is_empty() {
            self.id = generate_id();
        }
        if self.phase.is_empty() {
            self.phase = initial_phase(&self.kind).to_string();
        }
        if self.spec.is_null() {
            self.spec = empty_document();
        }
        if self.status.is_null() {
            self.status = empty_document();
        }
    }
}

/// Collision resistant, URL safe resource id.
pub fn generate_id() -> String {
    nanoid::nanoid!(GENERATED_ID_LEN)
}

pub(crate) fn validate_kind(kind: &str) -> Result<()> {
    if kind.is_empty() {
        return Err(ResourceError::InvalidArgument("kind must not be empty".into()).into());
    }
    if kind == KIND_ALL {
        return Err(ResourceError::InvalidArgument(format!("kind {KIND_ALL:?} is reserved for filters")).into());
    }
    if kind.starts_with('_') {
        return Err(ResourceError::InvalidArgument(format!("kind {kind:?} must not start with '_'")).into());
    }
    if kind.contains(KEY_SEPARATOR) {
        return Err(ResourceError::InvalidArgument(format!(
            "kind {kind:?} must not contain {KEY_SEPARATOR:?}"
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ResourceError::InvalidArgument("id must not be empty".into()).into());
    }
    Ok(())
}

/// `spec` and `status` are maps; anything else has no wire representation.
pub(crate) fn validate_documents(resource: &Resource) -> Result<()> {
    for (name, doc) in [("spec", &resource.spec), ("status", &resource.status)] {
        if !doc.is_object() {
            return Err(ResourceError::InvalidArgument(format!("{name} must be a map, got {doc}")).into());
        }
    }
    Ok(())
}

pub(crate) fn validate_owner(owner: &OwnerRef) -> Result<()> {
    if owner.kind.is_empty() || owner.id.is_empty() {
        return Err(ResourceError::InvalidArgument(format!(
            "owner reference {owner} must name both kind and id"
        ))
        .into());
    }
    Ok(())
}
