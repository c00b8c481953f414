//! Debug HTTP API

pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

pub use routes::{DebugState, create_router};
pub use server::DebugServer;
