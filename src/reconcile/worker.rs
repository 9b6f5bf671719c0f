use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::decode_spec;
use super::Hypervisor;
use super::MachineSpec;
use super::PowerState;
use super::ReconcileState;
use super::StorageVolumeSpec;
use crate::backoff_delay;
use crate::kind;
use crate::phase;
use crate::BackoffPolicy;
use crate::Error;
use crate::PatchDocument;
use crate::Resource;
use crate::ResourceClient;
use crate::ResourceKey;
use crate::Result;
use crate::RECONCILE_OUTCOMES;

/// Shared view of every worker's state, keyed by resource
pub type ReconcileStates = Arc<DashMap<ResourceKey, ReconcileState>>;

/// Desired state handed to a worker. Only the latest one is kept.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkItem {
    Apply(Resource),
    Remove(Resource),
}

impl WorkItem {
    pub(crate) fn resource(&self) -> &Resource {
        match self {
            WorkItem::Apply(r) | WorkItem::Remove(r) => r,
        }
    }
}

/// What one convergence pass amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Converged,
    /// Desired spec equals the last converged one
    Unchanged,
    Removed,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Converged => "converged",
            Outcome::Unchanged => "unchanged",
            Outcome::Removed => "removed",
        }
    }
}

enum Settled {
    Done,
    /// Retry budget exhausted; wait for a different desired state
    GaveUp,
}

/// Converges one resource. Runs until its sender is dropped.
pub(crate) struct Worker<C, H> {
    key: ResourceKey,
    client: Arc<C>,
    hypervisor: Arc<H>,
    backoff: BackoffPolicy,
    states: ReconcileStates,
    desired: watch::Receiver<WorkItem>,
    /// Spec of the last successful convergence
    converged_spec: Option<Value>,
}

impl<C, H> Worker<C, H>
where
    C: ResourceClient,
    H: Hypervisor,
{
    pub(crate) fn new(
        key: ResourceKey,
        client: Arc<C>,
        hypervisor: Arc<H>,
        backoff: BackoffPolicy,
        states: ReconcileStates,
        desired: watch::Receiver<WorkItem>,
    ) -> Self {
        Self {
            key,
            client,
            hypervisor,
            backoff,
            states,
            desired,
            converged_spec: None,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(resource = %self.key, "reconcile worker started");
        // The initial value is the first desired state
        self.desired.mark_changed();
        let mut parked: Option<WorkItem> = None;
        while self.desired.changed().await.is_ok() {
            let item = self.desired.borrow_and_update().clone();
            if let Some(failed) = &parked {
                // A repeated removal is a request to try the teardown again
                let retry_teardown = matches!(item, WorkItem::Remove(_));
                if !retry_teardown && !supersedes(failed, &item) {
                    continue;
                }
            }
            parked = match self.process(item.clone()).await {
                Settled::Done => None,
                Settled::GaveUp => Some(item),
            };
        }
        debug!(resource = %self.key, "reconcile worker stopped");
    }

    /// Retries `item` with backoff until it succeeds, the retry budget runs
    /// out, or a newer desired state supersedes it.
    async fn process(
        &mut self,
        mut item: WorkItem,
    ) -> Settled {
        self.set_state(ReconcileState::Observed);
        let mut attempts: u32 = 0;
        loop {
            self.set_state(ReconcileState::Converging);
            match self.attempt(&item).await {
                Ok(outcome) => {
                    RECONCILE_OUTCOMES
                        .with_label_values(&[&self.key.kind, outcome.as_str()])
                        .inc();
                    let state = if outcome == Outcome::Removed {
                        ReconcileState::Removed
                    } else {
                        ReconcileState::Converged
                    };
                    self.set_state(state);
                    return Settled::Done;
                }
                Err(e) => {
                    attempts += 1;
                    RECONCILE_OUTCOMES.with_label_values(&[&self.key.kind, "failed"]).inc();
                    self.set_state(ReconcileState::Failed { attempts });
                    warn!(resource = %self.key, attempts, "reconcile failed: {}", e);
                    if let WorkItem::Apply(resource) = &item {
                        self.report_failure(resource, &e).await;
                    }
                }
            }

            if self.backoff.max_retries > 0 && attempts as usize >= self.backoff.max_retries {
                warn!(resource = %self.key, attempts, "giving up until the desired state changes");
                return Settled::GaveUp;
            }

            let sleep = tokio::time::sleep(backoff_delay(&self.backoff, attempts));
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = self.desired.changed() => {
                        if changed.is_err() {
                            return Settled::Done;
                        }
                        let next = self.desired.borrow_and_update().clone();
                        if supersedes(&item, &next) {
                            self.desired.mark_changed();
                            return Settled::Done;
                        }
                        // Our own failure report echoes back with the same spec
                        item = next;
                    }
                }
            }
        }
    }

    async fn attempt(
        &mut self,
        item: &WorkItem,
    ) -> Result<Outcome> {
        let limit = Duration::from_millis(self.backoff.timeout_ms);
        let resource = item.resource();
        let fut = async {
            match (item, resource.kind.as_str()) {
                (WorkItem::Apply(r), kind::MACHINE) => self.apply_machine(r).await,
                (WorkItem::Remove(r), kind::MACHINE) => self.remove_machine(r).await,
                (WorkItem::Apply(r), kind::STORAGE_VOLUME) => self.apply_volume(r).await,
                (WorkItem::Remove(r), kind::STORAGE_VOLUME) => self.remove_volume(r).await,
                (_, other) => {
                    debug!(kind = other, "nothing to converge");
                    Ok(Outcome::Unchanged)
                }
            }
        };
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(limit)),
        }
    }

    async fn apply_machine(
        &mut self,
        resource: &Resource,
    ) -> Result<Outcome> {
        if self.converged_spec.as_ref() == Some(&resource.spec) {
            return Ok(Outcome::Unchanged);
        }
        let spec: MachineSpec = decode_spec(&resource.spec)?;
        let id = resource.id.as_str();
        let hv = &self.hypervisor;

        if !hv.domain_exists(id).await? {
            info!(machine = id, "creating domain");
            hv.create_domain(id, &spec).await?;
        }

        let actual = hv.get_domain_state(id).await?;
        match spec.power {
            PowerState::Running if !actual.is_active() => {
                info!(machine = id, %actual, "starting domain");
                hv.start_domain(id).await?;
            }
            PowerState::Stopped if actual.is_active() => {
                info!(machine = id, %actual, "shutting domain down");
                hv.shutdown_domain(id).await?;
            }
            _ => {}
        }

        let observed = hv.get_domain_state(id).await?;
        let mut status = hv.sync_status(id).await?;
        if !status.is_object() {
            status = json!({});
        }
        status["state"] = json!(observed);
        status["errors"] = Value::Null;

        let patch = PatchDocument::status_report(status, observed.as_phase())?;
        self.client
            .patch(&resource.kind, id, resource.owner.clone(), patch)
            .await?;

        self.converged_spec = Some(resource.spec.clone());
        Ok(Outcome::Converged)
    }

    async fn remove_machine(
        &mut self,
        resource: &Resource,
    ) -> Result<Outcome> {
        let id = resource.id.as_str();
        let hv = &self.hypervisor;
        if hv.domain_exists(id).await? {
            if hv.get_domain_state(id).await?.is_active() {
                info!(machine = id, "destroying domain");
                hv.destroy_domain(id).await?;
            }
            hv.undefine_domain(id).await?;
        }
        self.converged_spec = None;
        Ok(Outcome::Removed)
    }

    async fn apply_volume(
        &mut self,
        resource: &Resource,
    ) -> Result<Outcome> {
        if self.converged_spec.as_ref() == Some(&resource.spec) {
            return Ok(Outcome::Unchanged);
        }
        let spec: StorageVolumeSpec = decode_spec(&resource.spec)?;
        let pool = volume_pool(resource, &spec);
        let name = volume_name(resource, &spec);

        if !self.hypervisor.volume_exists(&pool, &name).await? {
            info!(pool = %pool, volume = %name, "creating volume");
            self.hypervisor.create_volume(&pool, &spec).await?;
        }

        let status = json!({ "pool": pool, "name": name, "errors": null });
        let patch = PatchDocument::status_report(status, phase::CREATED)?;
        self.client
            .patch(&resource.kind, &resource.id, resource.owner.clone(), patch)
            .await?;

        self.converged_spec = Some(resource.spec.clone());
        Ok(Outcome::Converged)
    }

    async fn remove_volume(
        &mut self,
        resource: &Resource,
    ) -> Result<Outcome> {
        let spec: StorageVolumeSpec = decode_spec(&resource.spec).unwrap_or_default();
        let pool = volume_pool(resource, &spec);
        let name = volume_name(resource, &spec);
        if self.hypervisor.volume_exists(&pool, &name).await? {
            info!(pool = %pool, volume = %name, "deleting volume");
            self.hypervisor.delete_volume(&pool, &name).await?;
        }
        self.converged_spec = None;
        Ok(Outcome::Removed)
    }

    /// Best effort: the resource may be gone or the controller unreachable.
    async fn report_failure(
        &self,
        resource: &Resource,
        error: &Error,
    ) {
        let report = PatchDocument::status_report(json!({ "errors": [error.to_string()] }), phase::FAILED);
        let result = match report {
            Ok(patch) => {
                self.client
                    .patch(&resource.kind, &resource.id, resource.owner.clone(), patch)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(resource = %self.key, "could not report failure: {}", e);
        }
    }

    fn set_state(
        &self,
        state: ReconcileState,
    ) {
        self.states.insert(self.key.clone(), state);
    }
}

/// Whether `next` asks for something other than `current` does.
fn supersedes(
    current: &WorkItem,
    next: &WorkItem,
) -> bool {
    match (current, next) {
        (WorkItem::Apply(a), WorkItem::Apply(b)) => a.spec != b.spec,
        (WorkItem::Remove(_), WorkItem::Remove(_)) => false,
        _ => true,
    }
}

/// Pool a volume lives in: the spec's `pool`, else the owning pool's id.
pub(super) fn volume_pool(
    resource: &Resource,
    spec: &StorageVolumeSpec,
) -> String {
    if !spec.pool.is_empty() {
        return spec.pool.clone();
    }
    resource.owner.as_ref().map(|o| o.id.clone()).unwrap_or_default()
}

pub(super) fn volume_name(
    resource: &Resource,
    spec: &StorageVolumeSpec,
) -> String {
    if spec.name.is_empty() {
        resource.id.clone()
    } else {
        spec.name.clone()
    }
}
