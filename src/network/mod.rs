//! Transports over the resource API.
//!
//! [`grpc`] serves the `ControllerApi` service; [`http`] serves the
//! `/v1/resources` REST mapping with server-sent events and WebSocket
//! watches. Both are thin adapters: validation, timeouts and error
//! classification live in [`crate::ResourceApi`].
pub mod grpc;
pub mod http;

pub use grpc::ControllerService;
pub(crate) use grpc::start_rpc_server;
pub(crate) use http::start_http_server;
