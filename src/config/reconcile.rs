use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use super::BackoffPolicy;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconcileConfig {
    /// Node resource id this agent reconciles for. Empty on the controller.
    #[serde(default)]
    pub node_id: String,

    /// gRPC endpoint of the controller, for agents running out of process
    #[serde(default = "default_controller_endpoint")]
    pub controller_endpoint: String,

    /// Retry schedule for failed convergence attempts
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Pause before reopening a watch the controller closed as unavailable
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,

    /// Publish pools and volumes found on the host that the controller does
    /// not know yet, before every full listing
    ///
    /// **Default**: true
    #[serde(default = "default_inventory_sync")]
    pub inventory_sync: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            controller_endpoint: default_controller_endpoint(),
            backoff: BackoffPolicy::default(),
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
            inventory_sync: default_inventory_sync(),
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resubscribe_delay_ms == 0 {
            return Err(config_error("reconcile.resubscribe_delay_ms must be greater than 0"));
        }
        if !self.controller_endpoint.starts_with("http://") && !self.controller_endpoint.starts_with("https://") {
            return Err(config_error(format!(
                "reconcile.controller_endpoint {:?} must be an http(s) URI",
                self.controller_endpoint
            )));
        }
        self.backoff.validate("reconcile.backoff")
    }
}

fn default_controller_endpoint() -> String {
    "http://127.0.0.1:9081".to_string()
}

fn default_resubscribe_delay_ms() -> u64 {
    1000
}

fn default_inventory_sync() -> bool {
    true
}
