//! # rockferry
//!
//! Resource control plane for virtual-machine fleets.
//!
//! Clients declare desired resources (machines, storage pools and volumes,
//! network interfaces) against the [`ResourceApi`]; the [`ResourceStore`]
//! persists them under a global revision; the [`WatchManager`] streams every
//! committed change to filtered observers; node agents built on
//! [`Reconciler`] drive a [`Hypervisor`] until reality matches the declared
//! state and report back through `status`.
//!
//! ```text
//! client ─> ResourceApi ─> ResourceStore ─> change feed ─> WatchManager
//!                ^                                              │
//!                └──── status patch <── Reconciler <── watch ───┘
//! ```
//!
//! The controller binary wires these together with [`NodeBuilder`] and
//! serves them over gRPC (`controllerapi.ControllerApi`) and HTTP.

mod api;
mod client;
mod config;
mod constants;
mod errors;
mod metrics;
mod network;
mod node;
mod reconcile;
mod resource;
mod storage;
mod watch;

pub mod proto;
pub mod utils;

pub use api::*;
pub use client::*;
pub use config::*;
pub use constants::ANNOTATION_ORIGIN;
pub use constants::KIND_ALL;
pub use constants::ORIGIN_SYNC;
pub use errors::*;
pub use metrics::*;
pub use network::*;
pub use node::*;
pub use reconcile::*;
pub use resource::*;
pub use storage::*;
pub use utils::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;

//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
