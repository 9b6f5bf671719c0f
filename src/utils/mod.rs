pub mod async_task;
pub mod convert;

pub use async_task::backoff_delay;
