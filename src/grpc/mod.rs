//! gRPC side of the listener
//!
//! Hosts the demo service and reflection on connections the multiplexer
//! classified as gRPC.

pub mod server;
pub mod service;

pub use server::GrpcServer;
pub use service::Greeter;

// Include generated proto code
pub mod proto {
    pub mod demo {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/demo.v1.rs"));
        }
    }
}
