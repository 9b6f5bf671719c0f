//! Watch engine: fans committed changes out to filtered subscribers.
//!
//! ```text
//! ResourceStore commit ──> change feed (unbounded, commit order)
//!                                │
//!                      WatchDispatcher task ── history (bounded replay buffer)
//!                                │
//!            DashMap<id, Watcher> ── try_send ──> per-watcher bounded queue
//!                                                        │
//!                                                   WatchStream
//! ```
//!
//! A watcher whose queue is full is removed from the registry; its stream
//! yields what was already queued and then ends with an overrun error.
//! Registration runs on the dispatcher task, so replay from a start
//! revision and live delivery never overlap or leave a gap.

mod event;
mod manager;
mod stream;


pub use event::*;
pub use manager::*;
pub use stream::*;
