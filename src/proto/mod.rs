//! Protocol Buffer definitions and generated code for the `ControllerApi`
//! gRPC service, plus conversions to the crate's types.

mod convert;


pub mod controllerapi {
    tonic::include_proto!("controllerapi");
}

pub use controllerapi::*;
pub use convert::*;
