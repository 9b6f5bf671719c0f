use std::collections::BTreeSet;
use std::collections::HashMap;

use parking_lot::Mutex;
use rockferry::DiscoveredPool;
use rockferry::Document;
use rockferry::DomainState;
use rockferry::Hypervisor;
use rockferry::HypervisorError;
use rockferry::MachineSpec;
use rockferry::Result;
use rockferry::StoragePoolSpec;
use rockferry::StorageVolumeSpec;
use serde_json::json;
use tonic::async_trait;

/// In-memory hypervisor: domains boot instantly and never crash.
#[derive(Debug, Default)]
pub struct FakeHypervisor {
    domains: Mutex<HashMap<String, (MachineSpec, DomainState)>>,
    volumes: Mutex<BTreeSet<(String, String)>>,
    creates: Mutex<usize>,
    pools: Mutex<Vec<DiscoveredPool>>,
}

impl FakeHypervisor {
    /// A pool that already exists on the host, holding `volumes`
    pub fn with_host_pool(
        self,
        id: &str,
        volumes: &[&str],
    ) -> Self {
        self.pools.lock().push(DiscoveredPool {
            id: id.to_string(),
            spec: StoragePoolSpec {
                name: id.to_string(),
                pool_type: "dir".into(),
                ..Default::default()
            },
        });
        for name in volumes {
            self.volumes.lock().insert((id.to_string(), name.to_string()));
        }
        self
    }

    pub fn domain_state(
        &self,
        id: &str,
    ) -> Option<DomainState> {
        self.domains.lock().get(id).map(|(_, state)| *state)
    }

    pub fn domain_creates(&self) -> usize {
        *self.creates.lock()
    }

    pub fn has_volume(
        &self,
        pool: &str,
        name: &str,
    ) -> bool {
        self.volumes.lock().contains(&(pool.to_string(), name.to_string()))
    }

    fn set_state(
        &self,
        id: &str,
        state: DomainState,
    ) -> Result<()> {
        let mut domains = self.domains.lock();
        let (_, current) = domains
            .get_mut(id)
            .ok_or_else(|| HypervisorError::DomainNotFound(id.to_string()))?;
        *current = state;
        Ok(())
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn create_domain(
        &self,
        id: &str,
        spec: &MachineSpec,
    ) -> Result<()> {
        *self.creates.lock() += 1;
        self.domains
            .lock()
            .insert(id.to_string(), (spec.clone(), DomainState::Running));
        Ok(())
    }

    async fn destroy_domain(
        &self,
        id: &str,
    ) -> Result<()> {
        self.set_state(id, DomainState::Shutdown)
    }

    async fn start_domain(
        &self,
        id: &str,
    ) -> Result<()> {
        self.set_state(id, DomainState::Running)
    }

    async fn shutdown_domain(
        &self,
        id: &str,
    ) -> Result<()> {
        self.set_state(id, DomainState::Shutdown)
    }

    async fn undefine_domain(
        &self,
        id: &str,
    ) -> Result<()> {
        self.domains
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| HypervisorError::DomainNotFound(id.to_string()).into())
    }

    async fn domain_exists(
        &self,
        id: &str,
    ) -> Result<bool> {
        Ok(self.domains.lock().contains_key(id))
    }

    async fn get_domain_state(
        &self,
        id: &str,
    ) -> Result<DomainState> {
        self.domain_state(id)
            .ok_or_else(|| HypervisorError::DomainNotFound(id.to_string()).into())
    }

    async fn sync_status(
        &self,
        id: &str,
    ) -> Result<Document> {
        let domains = self.domains.lock();
        let (spec, _) = domains
            .get(id)
            .ok_or_else(|| HypervisorError::DomainNotFound(id.to_string()))?;
        Ok(json!({ "vnc": format!("vnc://{}", spec.name), "interfaces": spec.interfaces.len() }))
    }

    async fn create_volume(
        &self,
        pool: &str,
        spec: &StorageVolumeSpec,
    ) -> Result<()> {
        self.volumes.lock().insert((pool.to_string(), spec.name.clone()));
        Ok(())
    }

    async fn volume_exists(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<bool> {
        Ok(self.has_volume(pool, name))
    }

    async fn delete_volume(
        &self,
        pool: &str,
        name: &str,
    ) -> Result<()> {
        self.volumes.lock().remove(&(pool.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_pools(&self) -> Result<Vec<DiscoveredPool>> {
        Ok(self.pools.lock().clone())
    }

    async fn list_volumes(
        &self,
        pool: &str,
    ) -> Result<Vec<StorageVolumeSpec>> {
        Ok(self
            .volumes
            .lock()
            .iter()
            .filter(|(p, _)| p == pool)
            .map(|(_, name)| StorageVolumeSpec {
                name: name.clone(),
                volume_type: "image".into(),
                ..Default::default()
            })
            .collect())
    }
}
