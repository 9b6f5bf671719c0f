//! Durable resource CRUD with a global revision counter.
//!
//! Every mutation runs inside one async critical section: read the current
//! record, write the record and the new revision in a single atomic engine
//! batch, then publish the [`ChangeEvent`] on the change feed. Feed order is
//! therefore commit order, and revisions survive restarts.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::constants::KIND_ALL;
use crate::constants::META_KEY_PREFIX;
use crate::constants::META_KEY_REVISION;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::resource::validate_documents;
use crate::resource::validate_id;
use crate::resource::validate_kind;
use crate::ChangeEvent;
use crate::OwnerRef;
use crate::PatchDocument;
use crate::Resource;
use crate::ResourceError;
use crate::ResourceKey;
use crate::Result;
use crate::StorageEngine;
use crate::StorageError;
use crate::WatchAction;
use crate::WriteOp;
use crate::RESOURCE_MUTATIONS;

/// Receiving end of the change feed
pub type ChangeFeed = mpsc::UnboundedReceiver<ChangeEvent>;

/// A stored resource with the revisions that created and last modified it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub resource: Resource,
    pub create_revision: u64,
    pub mod_revision: u64,
}

pub struct ResourceStore {
    engine: Arc<dyn StorageEngine>,

    /// Serializes every mutation
    commit_lock: Mutex<()>,

    revision: AtomicU64,

    feed: mpsc::UnboundedSender<ChangeEvent>,

    running: AtomicBool,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("revision", &self.revision())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ResourceStore {
    /// Opens a store over `engine`, restoring the persisted revision.
    ///
    /// Returns the store, already serving, together with its change feed.
    pub fn open(engine: Arc<dyn StorageEngine>) -> Result<(Self, ChangeFeed)> {
        let revision = match engine.get(META_KEY_REVISION.as_bytes())? {
            Some(bytes) => safe_vk(bytes)?,
            None => 0,
        };
        info!(revision, records = engine.len(), "resource store opened");

        let (feed, feed_rx) = mpsc::unbounded_channel();
        let store = Self {
            engine,
            commit_lock: Mutex::new(()),
            revision: AtomicU64::new(revision),
            feed,
            running: AtomicBool::new(true),
        };
        Ok((store, feed_rx))
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stops serving and flushes the engine. In-flight commits finish first.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        self.running.store(false, Ordering::SeqCst);
        self.engine.flush()?;
        info!(revision = self.revision(), "resource store stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current global revision: the revision of the last committed mutation.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(StorageError::NotServing.into())
        }
    }

    pub async fn get(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Option<Versioned>> {
        self.ensure_running()?;
        self.load(&ResourceKey::new(kind, id))
    }

    /// Lists resources of `kind` ([`KIND_ALL`] for every kind), optionally
    /// narrowed to one id or one owner, with the revision the listing
    /// reflects.
    pub async fn list(
        &self,
        kind: &str,
        id: Option<&str>,
        owner: Option<&OwnerRef>,
    ) -> Result<(Vec<Resource>, u64)> {
        // Holding the commit lock pins the listing to one revision
        let _guard = self.commit_lock.lock().await;
        self.ensure_running()?;

        let owned_by = |r: &Resource| owner.map_or(true, |o| r.owner.as_ref() == Some(o));

        let resources = match id {
            Some(id) if kind != KIND_ALL => self
                .load(&ResourceKey::new(kind, id))?
                .map(|v| v.resource)
                .filter(|r| owned_by(r))
                .into_iter()
                .collect(),
            _ => {
                let prefix = if kind == KIND_ALL {
                    String::new()
                } else {
                    ResourceKey::kind_prefix(kind)
                };
                let mut resources = Vec::new();
                for (key, value) in self.engine.scan_prefix(prefix.as_bytes())? {
                    if key.starts_with(META_KEY_PREFIX.as_bytes()) {
                        continue;
                    }
                    let versioned = decode(&key, &value)?;
                    let r = versioned.resource;
                    if id.map_or(true, |id| r.id == id) && owned_by(&r) {
                        resources.push(r);
                    }
                }
                resources
            }
        };

        let revision = self.revision();
        trace!(kind, count = resources.len(), revision, "list");
        Ok((resources, revision))
    }

    /// Creates `resource`, assigning an id and initial phase when missing.
    pub async fn create(
        &self,
        mut resource: Resource,
    ) -> Result<Versioned> {
        validate_kind(&resource.kind)?;
        resource.assign_defaults();
        validate_documents(&resource)?;
        let key = resource.key();

        let _guard = self.commit_lock.lock().await;
        self.ensure_running()?;

        if self.engine.get(key.encode().as_bytes())?.is_some() {
            return Err(ResourceError::AlreadyExists {
                kind: key.kind,
                id: key.id,
            }
            .into());
        }

        let revision = self.next_revision();
        let stored = Versioned {
            resource,
            create_revision: revision,
            mod_revision: revision,
        };
        self.commit(&key, Some(&stored), revision)?;
        self.publish(revision, WatchAction::Create, stored.resource.clone(), None);
        Ok(stored)
    }

    /// Applies `patch` to the stored resource at a single new revision.
    ///
    /// With `owner` set, the stored owner must equal it. The check runs
    /// under the commit lock, against the same record the patch applies to.
    pub async fn patch(
        &self,
        kind: &str,
        id: &str,
        owner: Option<&OwnerRef>,
        patch: &PatchDocument,
    ) -> Result<Versioned> {
        let key = ResourceKey::new(kind, id);

        let _guard = self.commit_lock.lock().await;
        self.ensure_running()?;

        let current = self.load(&key)?.ok_or_else(|| not_found(&key))?;
        if let Some(expected) = owner {
            if current.resource.owner.as_ref() != Some(expected) {
                return Err(ResourceError::OwnerMismatch {
                    kind: key.kind,
                    id: key.id,
                    expected: expected.to_string(),
                    actual: current
                        .resource
                        .owner
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| "none".into()),
                }
                .into());
            }
        }
        let patched = patch.apply_to(&current.resource)?;

        let revision = self.next_revision();
        let stored = Versioned {
            resource: patched,
            create_revision: current.create_revision,
            mod_revision: revision,
        };
        self.commit(&key, Some(&stored), revision)?;
        self.publish(
            revision,
            WatchAction::Update,
            stored.resource.clone(),
            Some(current.resource),
        );
        Ok(stored)
    }

    /// Removes the resource and returns its last value.
    pub async fn delete(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Versioned> {
        let key = ResourceKey::new(kind, id);

        let _guard = self.commit_lock.lock().await;
        self.ensure_running()?;

        let current = self.load(&key)?.ok_or_else(|| not_found(&key))?;

        let revision = self.next_revision();
        self.commit(&key, None, revision)?;
        self.publish(
            revision,
            WatchAction::Delete,
            current.resource.clone(),
            Some(current.resource.clone()),
        );
        Ok(current)
    }

    fn load(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<Versioned>> {
        validate_kind(&key.kind)?;
        validate_id(&key.id)?;
        let raw = key.encode();
        match self.engine.get(raw.as_bytes())? {
            Some(value) => decode(raw.as_bytes(), &value).map(Some),
            None => Ok(None),
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision() + 1
    }

    /// Writes (or deletes) the record together with the revision. Must be
    /// called with the commit lock held.
    fn commit(
        &self,
        key: &ResourceKey,
        record: Option<&Versioned>,
        revision: u64,
    ) -> Result<()> {
        let raw = key.encode();
        let op = match record {
            Some(v) => WriteOp::put(&raw, serde_json::to_vec(v)?),
            None => WriteOp::delete(&raw),
        };
        self.engine
            .commit(vec![op, WriteOp::put(META_KEY_REVISION, safe_kv(revision))])?;
        self.revision.store(revision, Ordering::SeqCst);
        Ok(())
    }

    /// Must be called with the commit lock held.
    fn publish(
        &self,
        revision: u64,
        action: WatchAction,
        resource: Resource,
        prev_resource: Option<Resource>,
    ) {
        debug!(revision, %action, kind = %resource.kind, id = %resource.id, "committed");
        RESOURCE_MUTATIONS
            .with_label_values(&[resource.kind.as_str(), action.as_str()])
            .inc();

        let event = ChangeEvent {
            revision,
            action,
            resource,
            prev_resource,
        };
        if self.feed.send(event).is_err() {
            warn!(revision, "change feed receiver dropped; event not published");
        }
    }
}

fn not_found(key: &ResourceKey) -> crate::Error {
    ResourceError::NotFound {
        kind: key.kind.clone(),
        id: key.id.clone(),
    }
    .into()
}

fn decode(
    key: &[u8],
    value: &[u8],
) -> Result<Versioned> {
    serde_json::from_slice(value).map_err(|e| {
        warn!("undecodable record at {}: {e}", String::from_utf8_lossy(key));
        StorageError::DataCorruption {
            location: String::from_utf8_lossy(key).into_owned(),
        }
        .into()
    })
}
