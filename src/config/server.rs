use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use super::validate_directory;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// gRPC `ControllerApi` listen address
    #[serde(default = "default_grpc_listen_address")]
    pub grpc_listen_address: String,

    /// HTTP front end listen address
    #[serde(default = "default_http_listen_address")]
    pub http_listen_address: String,

    #[serde(default = "default_enable_http")]
    pub enable_http: bool,

    /// Upper bound for every store call made by the API
    #[serde(default = "default_request_timeout_in_ms")]
    pub request_timeout_in_ms: u64,

    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: u32,

    #[serde(default = "default_tcp_keepalive_in_secs")]
    pub tcp_keepalive_in_secs: u64,

    /// Accept and send gzip compressed gRPC messages
    #[serde(default = "default_enable_gzip")]
    pub enable_gzip: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_listen_address: default_grpc_listen_address(),
            http_listen_address: default_http_listen_address(),
            enable_http: default_enable_http(),
            request_timeout_in_ms: default_request_timeout_in_ms(),
            max_concurrent_streams: default_max_concurrent_streams(),
            tcp_keepalive_in_secs: default_tcp_keepalive_in_secs(),
            enable_gzip: default_enable_gzip(),
            log_dir: default_log_dir(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        let grpc = self.grpc_addr()?;
        if self.enable_http {
            let http = self.http_addr()?;
            if http == grpc {
                return Err(config_error(format!(
                    "server.http_listen_address and server.grpc_listen_address must differ ({http})"
                )));
            }
        }

        if self.request_timeout_in_ms == 0 {
            return Err(config_error("server.request_timeout_in_ms must be greater than 0"));
        }

        if self.max_concurrent_streams == 0 {
            return Err(config_error("server.max_concurrent_streams must be greater than 0"));
        }

        validate_directory(&self.log_dir, "log_dir")
    }

    pub fn grpc_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.grpc_listen_address, "server.grpc_listen_address")
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.http_listen_address, "server.http_listen_address")
    }
}

fn parse_addr(
    raw: &str,
    name: &str,
) -> Result<SocketAddr> {
    raw.parse()
        .map_err(|e| config_error(format!("{name} {raw:?} is not a socket address: {e}")))
}

fn default_grpc_listen_address() -> String {
    "0.0.0.0:9081".to_string()
}
fn default_http_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_enable_http() -> bool {
    true
}
fn default_request_timeout_in_ms() -> u64 {
    3000
}
fn default_max_concurrent_streams() -> u32 {
    1024
}
fn default_tcp_keepalive_in_secs() -> u64 {
    3600
}
fn default_enable_gzip() -> bool {
    true
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
