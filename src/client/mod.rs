//! gRPC client for `ControllerApi`.
//!
//! [`ControllerClient`] implements [`crate::ResourceClient`], so a node agent
//! can run the reconciler against a remote controller exactly as it would
//! against an in-process [`crate::ResourceApi`].
//!
//! ```ignore
//! let client = ClientBuilder::new("http://controller:9081")
//!     .request_timeout(Duration::from_secs(5))
//!     .build()
//!     .await?;
//! let machines = client.list(ListQuery::new("machine")).await?;
//! ```

mod builder;
mod client_config;
mod controller_client;

#[cfg(test)]
mod controller_client_test;

pub use builder::*;
pub use client_config::*;
pub use controller_client::*;
