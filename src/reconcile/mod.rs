//! Node agent reconciliation.
//!
//! [`Reconciler`] keeps a node's hypervisor in line with the resources the
//! node owns: machines owned by the node, and storage volumes owned by the
//! node's storage pools. It talks to the controller only through
//! [`crate::ResourceClient`] and to the virtualization backend only through
//! [`Hypervisor`], so both sides can be swapped (in-process API or gRPC;
//! libvirt or a fake).
//!
//! Per resource the worker moves through [`ReconcileState`]s. Failures are
//! reported as `status.errors` with phase `failed` and retried with
//! exponential backoff; they never stall other resources.

mod hypervisor;
mod reconciler;
mod spec;
mod state;
mod worker;


pub use hypervisor::*;
pub use reconciler::*;
pub use spec::*;
pub use state::*;
pub use worker::ReconcileStates;
