use std::fmt;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tonic::async_trait;

use super::MachineSpec;
use super::StoragePoolSpec;
use super::StorageVolumeSpec;
use crate::phase;
use crate::Document;
use crate::Result;

/// Run state of a domain as reported by the hypervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    Running,
    Booting,
    Rebooting,
    Stopped,
    Shutdown,
    Crashed,
}

impl DomainState {
    /// Phase reported for a machine in this state
    pub fn as_phase(&self) -> &'static str {
        match self {
            DomainState::Running => phase::RUNNING,
            DomainState::Booting => phase::BOOTING,
            DomainState::Rebooting => phase::REBOOTING,
            DomainState::Stopped => phase::STOPPED,
            DomainState::Shutdown => phase::SHUTDOWN,
            DomainState::Crashed => phase::CRASHED,
        }
    }

    /// Whether the guest is up or on its way up
    pub fn is_active(&self) -> bool {
        matches!(self, DomainState::Running | DomainState::Booting | DomainState::Rebooting)
    }
}

impl fmt::Display for DomainState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_phase())
    }
}

/// A storage pool present on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPool {
    /// Stable identifier (the pool UUID for libvirt), used as resource id
    pub id: String,
    pub spec: StoragePoolSpec,
}

/// Capability interface of the virtualization backend.
///
/// Domains are addressed by machine resource id, volumes by pool and volume
/// name. Implementations report a missing domain or pool through
/// [`crate::HypervisorError`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Hypervisor: Send + Sync + 'static {
    /// Defines the domain and boots it.
    async fn create_domain(
        &self,
        id: &str,
        spec: &MachineSpec,
    ) -> Result<()>;

    /// Hard power-off.
    async fn destroy_domain(
        &self,
        id: &str,
    ) -> Result<()>;

    async fn start_domain(
        &self,
        id: &str,
    ) -> Result<()>;

    /// Graceful guest shutdown.
    async fn shutdown_domain(
        &self,
        id: &str,
    ) -> Result<()>;

    /// Removes the domain definition. The domain must not be running.
    async fn undefine_domain(
        &self,
        id: &str,
    ) -> Result<()>;

    async fn domain_exists(
        &self,
        id: &str,
    ) -> Result<bool>;

    async fn get_domain_state(
        &self,
        id: &str,
    ) -> Result<DomainState>;

    /// Observed details (addresses, consoles) to publish as status.
    async fn sync_status(
        &self,
        id: &str,
    ) -> Result<Document>;

    async fn create_volume(
        &self,
        pool: &str,
        spec: &StorageVolumeSpec,
    ) -> Result<()>;

    async fn volume_exists(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<bool>;

    async fn delete_volume(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<()>;

    /// Every storage pool defined on the host.
    async fn list_pools(&self) -> Result<Vec<DiscoveredPool>>;

    /// Volumes inside `pool`, with `pool` set on each.
    async fn list_volumes(
        &self,
        pool: &str,
    ) -> Result<Vec<StorageVolumeSpec>>;
}
