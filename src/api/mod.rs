//! Transport independent resource API.
//!
//! [`ResourceApi`] validates requests synchronously and dispatches them to
//! the store and the watch engine. [`ResourceClient`] is the async surface
//! node agents program against; it is implemented in process by
//! `ResourceApi` and over gRPC by `ControllerClient`.

mod resource_api;
mod resource_client;


pub use resource_api::*;
pub use resource_client::*;
