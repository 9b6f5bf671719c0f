use std::time::Duration;

use tonic::transport::Endpoint;
use tracing::debug;

use super::ClientConfig;
use super::ControllerClient;
use crate::NetworkError;
use crate::Result;

pub struct ClientBuilder {
    config: ClientConfig,
    endpoint: String,
}

impl ClientBuilder {
    /// Create a new builder with default config for `endpoint`
    /// (e.g. `http://127.0.0.1:9081`)
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: ClientConfig::default(),
            endpoint: endpoint.into(),
        }
    }

    /// Set connection timeout (default: 1s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enable/disable compression (default: enabled)
    pub fn enable_compression(
        mut self,
        enable: bool,
    ) -> Self {
        self.config.enable_compression = enable;
        self
    }

    /// Completely replaces the default configuration, discarding earlier
    /// calls to the individual setters.
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Connects eagerly so a wrong endpoint fails here rather than on the
    /// first call.
    pub async fn build(self) -> Result<ControllerClient> {
        let endpoint = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| NetworkError::InvalidAddress(format!("{}: {}", self.endpoint, e)))?
            .connect_timeout(self.config.connect_timeout)
            .tcp_keepalive(Some(self.config.tcp_keepalive))
            .http2_keep_alive_interval(self.config.http2_keepalive_interval)
            .keep_alive_timeout(self.config.http2_keepalive_timeout)
            .keep_alive_while_idle(true);
        let channel = endpoint.connect().await?;
        debug!("connected to controller at {}", self.endpoint);
        Ok(ControllerClient::new(channel, self.config))
    }
}
