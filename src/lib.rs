//! gRPC bootstrap - one listener, two servers
//!
//! A service skeleton that accepts every connection on a single TCP listener,
//! sniffs the first bytes to tell gRPC from plain HTTP/1, and hands each
//! connection to a gRPC server or a debug HTTP server. A Postgres store
//! handle, an OpenTelemetry tracer and structured logging come with it, and
//! shutdown on SIGINT, SIGTERM or caller cancellation tears everything down
//! in a fixed order.

pub mod api;
pub mod config;
pub mod error;
pub mod grpc;
pub mod lifecycle;
pub mod metrics;
pub mod mux;
pub mod runtime;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod tls;

pub use config::Config;
pub use error::{BootstrapError, BootstrapResult};
pub use lifecycle::{Closer, Coordinator, Phase};
pub use mux::{Mux, MuxListener, MuxStream};
pub use runtime::Runtime;
pub use server::{Drain, Serve};
pub use store::Store;
pub use telemetry::Tracer;
