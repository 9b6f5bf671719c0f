use std::time::Duration;

/// Client configuration parameters for connection management
///
/// # Key Configuration Areas
/// - Connection establishment (TCP handshake timeout)
/// - Request/response lifecycle control
/// - HTTP/2 keepalive
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum time to wait for establishing a TCP connection
    /// Default: 1 second
    pub connect_timeout: Duration,

    /// Maximum time to wait for a unary RPC response. Watch streams are not
    /// bounded by it.
    /// Default: 3 seconds
    pub request_timeout: Duration,

    /// TCP keepalive duration for idle connections
    /// Default: 5 minutes (300s)
    pub tcp_keepalive: Duration,

    /// Interval for HTTP/2 keepalive pings
    /// Default: 1 minute (60s)
    pub http2_keepalive_interval: Duration,

    /// Timeout for HTTP/2 keepalive pings
    /// Default: 20 seconds
    pub http2_keepalive_timeout: Duration,

    /// Enable Gzip compression for network traffic
    /// Default: true (enabled)
    pub enable_compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(3000),
            tcp_keepalive: Duration::from_secs(300),
            http2_keepalive_interval: Duration::from_secs(60),
            http2_keepalive_timeout: Duration::from_secs(20),
            enable_compression: true,
        }
    }
}
