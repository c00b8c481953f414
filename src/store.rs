//! Postgres store handle

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::BootstrapResult;

/// Shared database handle, cheap to clone
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Build the pool without dialing; connections open on first use.
    ///
    /// Fails only when the settings themselves are unusable.
    pub fn connect_lazy(config: &DatabaseConfig) -> BootstrapResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_lazy(&config.url)?;

        tracing::info!(
            max_connections = config.max_connections,
            "Store handle created"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query
    pub async fn ping(&self) -> BootstrapResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Store pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_pool_does_not_dial() {
        let config = DatabaseConfig {
            url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            acquire_timeout_secs: 1,
            ..Default::default()
        };

        let store = Store::connect_lazy(&config).unwrap();
        assert_eq!(store.pool().size(), 0);
        assert!(store.ping().await.is_err());
        store.close().await;
    }

    #[tokio::test]
    async fn test_invalid_url_is_fatal() {
        let config = DatabaseConfig {
            url: "not a database url".to_string(),
            ..Default::default()
        };
        assert!(Store::connect_lazy(&config).is_err());
    }
}
