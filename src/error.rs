//! Error types for startup, serving and shutdown

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the bootstrap runtime
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Invalid listen address '{addr}': {reason}")]
    InvalidListenAddr { addr: String, reason: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept loop failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("TLS setup failed: {message}")]
    Tls { message: String },

    #[error("Certificate acquisition failed: {message}")]
    Acme { message: String },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Tracer error: {message}")]
    Tracer { message: String },

    #[error("{server} server failed: {message}")]
    Serve {
        server: &'static str,
        message: String,
    },

    #[error("{server} server stopped unexpectedly")]
    UnexpectedExit { server: &'static str },

    #[error("{server} server did not drain within {grace:?}")]
    DrainTimeout {
        server: &'static str,
        grace: Duration,
    },

    #[error("Task {task} panicked or was aborted: {message}")]
    Join { task: &'static str, message: String },
}

impl BootstrapError {
    pub fn serve(server: &'static str, err: impl std::fmt::Display) -> Self {
        BootstrapError::Serve {
            server,
            message: err.to_string(),
        }
    }
}

/// Result alias for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;
