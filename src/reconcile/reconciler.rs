use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::decode_spec;
use super::worker::volume_name;
use super::worker::volume_pool;
use super::worker::Worker;
use super::worker::WorkItem;
use super::DiscoveredPool;
use super::Hypervisor;
use super::ReconcileState;
use super::ReconcileStates;
use super::StorageVolumeSpec;
use crate::constants::ANNOTATION_ORIGIN;
use crate::constants::ORIGIN_SYNC;
use crate::kind;
use crate::phase;
use crate::ErrorCode;
use crate::EventStream;
use crate::ListQuery;
use crate::OwnerRef;
use crate::ReconcileConfig;
use crate::Resource;
use crate::ResourceClient;
use crate::ResourceKey;
use crate::Result;
use crate::WatchAction;
use crate::WatchRequest;
use crate::KIND_ALL;

struct WorkerHandle {
    desired: watch::Sender<WorkItem>,
    join: JoinHandle<()>,
}

/// How a watch session ended
enum SessionEnd {
    Shutdown,
    /// Reopen the watch after the last delivered revision
    Resubscribe,
    /// History no longer covers our position; list again
    Relist,
}

/// Node agent loop: converges the machines and storage volumes owned by one
/// node.
///
/// On start it lists everything it owns, hands each resource to a worker
/// and then watches from the listing's revision. Each resource has its own
/// worker task, so a slow or failing resource never delays the others.
///
/// The agent holds a single `all` watch and filters ownership locally.
/// Volume ownership is transitive (volume -> pool -> node), so no owner
/// filter selects it, and separate per-kind watches would deliver a pool's
/// creation and the first volume inside it in no particular order. One
/// stream keeps commit order and one resume revision, at the price of
/// receiving events for other nodes; `watch.watcher_buffer_size` bounds
/// how far the agent may lag before it resubscribes.
pub struct Reconciler<C, H> {
    client: Arc<C>,
    hypervisor: Arc<H>,
    config: ReconcileConfig,
    /// Ids of storage pools owned by this node
    pools: Arc<ArcSwap<BTreeSet<String>>>,
    states: ReconcileStates,
    workers: HashMap<ResourceKey, WorkerHandle>,
    /// Revision of the last event or listing applied
    revision: u64,
}

impl<C, H> Reconciler<C, H>
where
    C: ResourceClient,
    H: Hypervisor,
{
    pub fn new(
        client: Arc<C>,
        hypervisor: Arc<H>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            client,
            hypervisor,
            config,
            pools: Arc::new(ArcSwap::from_pointee(BTreeSet::new())),
            states: Arc::new(DashMap::new()),
            workers: HashMap::new(),
            revision: 0,
        }
    }

    /// Owner reference every node-scoped resource carries
    pub fn node(&self) -> OwnerRef {
        OwnerRef::new(kind::NODE, self.config.node_id.clone())
    }

    /// Live per-resource states, readable while [`Reconciler::run`] executes.
    pub fn states(&self) -> ReconcileStates {
        self.states.clone()
    }

    pub fn owned_pools(&self) -> Arc<BTreeSet<String>> {
        self.pools.load_full()
    }

    /// Runs until `shutdown` fires, then stops every worker.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!(node = %self.config.node_id, "reconciler started");
        'relist: loop {
            if let Err(e) = self.resync().await {
                warn!("listing owned resources failed: {}", e);
                if self.pause(&mut shutdown).await {
                    break 'relist;
                }
                continue 'relist;
            }

            loop {
                let stream = match self.subscribe().await {
                    Ok(stream) => stream,
                    Err(e) if e.code() == ErrorCode::Compacted => continue 'relist,
                    Err(e) => {
                        warn!("opening watch failed: {}", e);
                        if self.pause(&mut shutdown).await {
                            break 'relist;
                        }
                        continue;
                    }
                };
                match self.follow(stream, &mut shutdown).await {
                    SessionEnd::Shutdown => break 'relist,
                    SessionEnd::Resubscribe => continue,
                    SessionEnd::Relist => continue 'relist,
                }
            }
        }
        self.stop_workers().await;
        info!(node = %self.config.node_id, "reconciler stopped");
        Ok(())
    }

    /// Lists everything in one call so the owned set is taken at a single
    /// revision, then enqueues every owned resource.
    async fn resync(&mut self) -> Result<()> {
        if self.config.inventory_sync {
            if let Err(e) = self.sync_inventory().await {
                warn!(node = %self.config.node_id, "inventory sync failed: {}", e);
            }
        }
        let listing = self.client.list(ListQuery::new(KIND_ALL)).await?;
        let node = self.node();

        let pools: BTreeSet<String> = listing
            .resources
            .iter()
            .filter(|r| r.kind == kind::STORAGE_POOL && r.owner.as_ref() == Some(&node))
            .map(|r| r.id.clone())
            .collect();
        self.pools.store(Arc::new(pools));

        let mut listed = BTreeSet::new();
        for resource in listing.resources {
            if self.owns(&resource) {
                listed.insert(resource.key());
                self.enqueue(WorkItem::Apply(resource));
            }
        }

        // Anything we were tracking that vanished while we were not watching,
        // and teardowns that ran out of retries
        self.release_removed();
        let vanished: Vec<ResourceKey> = self.workers.keys().filter(|k| !listed.contains(*k)).cloned().collect();
        for key in vanished {
            let last = match self.workers.get(&key) {
                Some(handle) => handle.desired.borrow().clone(),
                None => continue,
            };
            self.enqueue(WorkItem::Remove(last.resource().clone()));
        }

        self.revision = listing.revision;
        info!(revision = self.revision, workers = self.workers.len(), "owned resources listed");
        Ok(())
    }

    /// Publishes pools and volumes present on the host but unknown to the
    /// controller. Pools are owned by the node and volumes by their pool;
    /// both carry `origin=sync`. Existing resources are left alone.
    async fn sync_inventory(&self) -> Result<()> {
        let node = self.node();
        let known_pools: BTreeSet<String> = self
            .client
            .list(ListQuery::new(kind::STORAGE_POOL))
            .await?
            .resources
            .into_iter()
            .map(|r| r.id)
            .collect();
        // Volumes are matched by (pool, name), whatever their resource id
        let known_volumes: BTreeSet<(String, String)> = self
            .client
            .list(ListQuery::new(kind::STORAGE_VOLUME))
            .await?
            .resources
            .iter()
            .map(|r| {
                let spec: StorageVolumeSpec = decode_spec(&r.spec).unwrap_or_default();
                (volume_pool(r, &spec), volume_name(r, &spec))
            })
            .collect();

        let mut published = 0usize;
        for DiscoveredPool { id, spec } in self.hypervisor.list_pools().await? {
            if !known_pools.contains(&id) {
                let pool = Resource::new(kind::STORAGE_POOL)
                    .with_id(id.clone())
                    .with_owner(node.clone())
                    .with_phase(phase::CREATED)
                    .with_annotation(ANNOTATION_ORIGIN, ORIGIN_SYNC)
                    .with_spec(serde_json::to_value(&spec)?);
                published += self.publish(pool).await?;
            }

            for mut volume in self.hypervisor.list_volumes(&id).await? {
                if known_volumes.contains(&(id.clone(), volume.name.clone())) {
                    continue;
                }
                volume.pool = id.clone();
                let resource = Resource::new(kind::STORAGE_VOLUME)
                    .with_id(synced_volume_id(&id, &volume.name))
                    .with_owner(OwnerRef::new(kind::STORAGE_POOL, id.clone()))
                    .with_phase(phase::CREATED)
                    .with_annotation(ANNOTATION_ORIGIN, ORIGIN_SYNC)
                    .with_spec(serde_json::to_value(&volume)?);
                published += self.publish(resource).await?;
            }
        }
        if published > 0 {
            info!(node = %self.config.node_id, published, "host inventory published");
        }
        Ok(())
    }

    /// Creates a discovered resource; losing a race to another writer is fine.
    async fn publish(
        &self,
        resource: Resource,
    ) -> Result<usize> {
        match self.client.create(resource).await {
            Ok(created) => {
                debug!(kind = %created.kind, id = %created.id, "discovered resource published");
                Ok(1)
            }
            Err(e) if e.code() == ErrorCode::AlreadyExists => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn subscribe(&self) -> Result<EventStream> {
        let request = WatchRequest::new(KIND_ALL)
            .with_action(WatchAction::All)
            .from_revision(self.revision);
        self.client.watch(request).await
    }

    async fn follow(
        &mut self,
        mut stream: EventStream,
        shutdown: &mut watch::Receiver<()>,
    ) -> SessionEnd {
        loop {
            let item = tokio::select! {
                _ = shutdown.changed() => return SessionEnd::Shutdown,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(event)) => {
                    self.revision = event.revision;
                    let removed = event.action == WatchAction::Delete;
                    self.track_pool(&event.resource, removed);
                    if self.owns(&event.resource) {
                        let item = if removed {
                            WorkItem::Remove(event.resource)
                        } else {
                            WorkItem::Apply(event.resource)
                        };
                        self.enqueue(item);
                    }
                }
                Some(Err(e)) => match e.code() {
                    ErrorCode::WatchOverrun => {
                        warn!(revision = self.revision, "watch overrun, resubscribing");
                        return SessionEnd::Resubscribe;
                    }
                    ErrorCode::Compacted => {
                        warn!(revision = self.revision, "watch position compacted, listing again");
                        return SessionEnd::Relist;
                    }
                    _ => {
                        warn!("watch ended: {}", e);
                        if self.pause(shutdown).await {
                            return SessionEnd::Shutdown;
                        }
                        return SessionEnd::Resubscribe;
                    }
                },
                None => {
                    debug!("watch stream closed");
                    return SessionEnd::Resubscribe;
                }
            }
        }
    }

    /// Sleeps before reconnecting. Returns true when shutdown fired first.
    async fn pause(
        &self,
        shutdown: &mut watch::Receiver<()>,
    ) -> bool {
        let delay = Duration::from_millis(self.config.resubscribe_delay_ms);
        tokio::select! {
            _ = shutdown.changed() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn track_pool(
        &self,
        resource: &Resource,
        removed: bool,
    ) {
        if resource.kind != kind::STORAGE_POOL || resource.owner.as_ref() != Some(&self.node()) {
            return;
        }
        let id = resource.id.clone();
        self.pools.rcu(|pools| {
            let mut next = BTreeSet::clone(pools);
            if removed {
                next.remove(&id);
            } else {
                next.insert(id.clone());
            }
            next
        });
    }

    /// Machines owned by the node and volumes owned by the node's pools.
    fn owns(
        &self,
        resource: &Resource,
    ) -> bool {
        let Some(owner) = &resource.owner else {
            return false;
        };
        match resource.kind.as_str() {
            kind::MACHINE => owner.kind == kind::NODE && owner.id == self.config.node_id,
            kind::STORAGE_VOLUME => owner.kind == kind::STORAGE_POOL && self.pools.load().contains(&owner.id),
            _ => false,
        }
    }

    /// Hands `item` to the resource's worker, replacing any desired state
    /// it has not started on yet.
    ///
    /// A worker stays registered through its teardown and is only released
    /// once it reports [`ReconcileState::Removed`], so a failed teardown is
    /// retried like any other failure.
    fn enqueue(
        &mut self,
        item: WorkItem,
    ) {
        self.release_removed();
        let key = item.resource().key();

        if let Some(handle) = self.workers.get(&key) {
            if !handle.join.is_finished() {
                handle.desired.send_replace(item);
                return;
            }
        }

        self.states.insert(key.clone(), ReconcileState::Observed);
        let (desired, rx) = watch::channel(item);
        let worker = Worker::new(
            key.clone(),
            self.client.clone(),
            self.hypervisor.clone(),
            self.config.backoff,
            self.states.clone(),
            rx,
        );
        let join = tokio::spawn(worker.run());
        self.workers.insert(key, WorkerHandle { desired, join });
    }

    /// Drops the senders of workers whose teardown completed, letting them
    /// exit.
    fn release_removed(&mut self) {
        let states = &self.states;
        self.workers.retain(|key, handle| {
            let removing = matches!(*handle.desired.borrow(), WorkItem::Remove(_));
            let removed = states.get(key).map(|s| *s) == Some(ReconcileState::Removed);
            !(removing && removed)
        });
    }

    async fn stop_workers(&mut self) {
        for (key, handle) in self.workers.drain() {
            drop(handle.desired);
            if let Err(e) = handle.join.await {
                error!(resource = %key, "reconcile worker panicked: {}", e);
            }
        }
    }
}

/// Resource id of a discovered volume: unique per pool
fn synced_volume_id(
    pool: &str,
    name: &str,
) -> String {
    format!("{pool}.{name}")
}
