mod adaptors;
mod resource_store;
mod storage_engine;


pub use adaptors::*;
pub use resource_store::*;
pub use storage_engine::*;
