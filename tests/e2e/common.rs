//! Common test fixtures for e2e tests using testcontainers

#![allow(dead_code)]

use std::borrow::Cow;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};

const POSTGRES_PORT: u16 = 5432;
const POSTGRES_PASSWORD: &str = "bootstrap";

/// Stock Postgres image with password auth
#[derive(Debug, Clone, Default)]
pub struct PostgresImage;

impl Image for PostgresImage {
    fn name(&self) -> &str {
        "postgres"
    }

    fn tag(&self) -> &str {
        "16-alpine"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        // The init server logs to stdout, the final one to stderr
        vec![
            WaitFor::message_on_stderr("database system is ready to accept connections"),
            WaitFor::message_on_stdout("database system is ready to accept connections"),
        ]
    }

    fn env_vars(
        &self,
    ) -> impl IntoIterator<Item = (impl Into<Cow<'_, str>>, impl Into<Cow<'_, str>>)> {
        vec![("POSTGRES_PASSWORD", POSTGRES_PASSWORD)]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &[ContainerPort::Tcp(POSTGRES_PORT)]
    }
}

/// A running Postgres container
///
/// The container is automatically stopped when this struct is dropped.
pub struct PostgresContainer {
    container: ContainerAsync<PostgresImage>,
    port: u16,
}

impl PostgresContainer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        println!("Starting Postgres container...");

        let container = PostgresImage.start().await?;
        let port = container.get_host_port_ipv4(POSTGRES_PORT).await?;

        println!("Postgres container ready on port {}", port);
        Ok(Self { container, port })
    }

    /// Connection URL for the default database
    pub fn url(&self) -> String {
        format!(
            "postgres://postgres:{}@127.0.0.1:{}/postgres",
            POSTGRES_PASSWORD, self.port
        )
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
