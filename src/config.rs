//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BootstrapError, BootstrapResult};

/// Port that switches the listener onto ACME-managed TLS
pub const SECURE_PORT: u16 = 443;

/// Main service configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// `host:port`, or `:port` for all interfaces
    pub listen_addr: String,

    /// Domains for certificate acquisition when listening on the secure port
    pub domains: Vec<String>,

    pub classify_timeout_ms: u64,
    pub shutdown_grace_secs: u64,
    pub max_message_size_mb: usize,

    pub acme: AcmeConfig,
    pub database: DatabaseConfig,
    pub tracing: TracingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            domains: Vec::new(),
            classify_timeout_ms: default_classify_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            max_message_size_mb: default_max_message_size_mb(),
            acme: AcmeConfig::default(),
            database: DatabaseConfig::default(),
            tracing: TracingConfig::default(),
        }
    }
}

/// ACME settings, only read when TLS is enabled
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AcmeConfig {
    pub cache_dir: PathBuf,
    /// Contact addresses, without the `mailto:` scheme
    pub contact: Vec<String>,
    /// Use the Let's Encrypt production directory instead of staging
    pub production: bool,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./acme-cache"),
            contact: Vec::new(),
            production: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost:5432/postgres".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 5,
        }
    }
}

/// Where finished spans go
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanExporter {
    /// Spans are recorded but not exported
    #[default]
    None,
    Stdout,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TracingConfig {
    pub service_name: String,
    pub exporter: SpanExporter,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "grpc_server".to_string(),
            exporter: SpanExporter::None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(addr) = std::env::var("GRPC_BOOTSTRAP_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(domains) = std::env::var("GRPC_BOOTSTRAP_DOMAINS") {
            config.domains = split_list(&domains);
        }
        if let Ok(url) = std::env::var("GRPC_BOOTSTRAP_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(timeout) = std::env::var("GRPC_BOOTSTRAP_CLASSIFY_TIMEOUT_MS") {
            config.classify_timeout_ms = timeout
                .parse()
                .context("Invalid GRPC_BOOTSTRAP_CLASSIFY_TIMEOUT_MS value")?;
        }
        if let Ok(grace) = std::env::var("GRPC_BOOTSTRAP_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace_secs = grace
                .parse()
                .context("Invalid GRPC_BOOTSTRAP_SHUTDOWN_GRACE_SECS value")?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.classify_timeout_ms == 0 {
            anyhow::bail!("classify_timeout_ms must be greater than 0");
        }
        if self.max_message_size_mb == 0 {
            anyhow::bail!("max_message_size_mb must be greater than 0");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be greater than 0");
        }
        if self.tracing.service_name.trim().is_empty() {
            anyhow::bail!("tracing.service_name cannot be empty");
        }
        for domain in &self.domains {
            if domain.is_empty() || domain.contains(char::is_whitespace) {
                anyhow::bail!("Invalid domain name: '{}'", domain);
            }
        }

        Ok(())
    }

    /// Resolve `listen_addr`, treating a bare `:port` as every interface
    pub fn socket_addr(&self) -> BootstrapResult<SocketAddr> {
        parse_listen_addr(&self.listen_addr)
    }

    /// Whether the listen address asks for the secure port
    pub fn wants_tls(&self) -> bool {
        self.socket_addr()
            .map(|addr| addr.port() == SECURE_PORT)
            .unwrap_or(false)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classify_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Parse `host:port` or `:port`
pub fn parse_listen_addr(addr: &str) -> BootstrapResult<SocketAddr> {
    let invalid = |reason: String| BootstrapError::InvalidListenAddr {
        addr: addr.to_string(),
        reason,
    };

    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|e| invalid(format!("{}", e)))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    addr.parse().map_err(|e| invalid(format!("{}", e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// Default functions
fn default_listen_addr() -> String {
    ":9090".to_string()
}
fn default_classify_timeout_ms() -> u64 {
    3000
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_max_message_size_mb() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, ":9090");
        assert_eq!(config.classify_timeout(), Duration::from_secs(3));
        assert_eq!(config.shutdown_grace_secs, 30);
        assert!(config.domains.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bare_port_listens_on_all_interfaces() {
        let addr = parse_listen_addr(":9090").unwrap();
        assert_eq!(addr, "0.0.0.0:9090".parse::<SocketAddr>().unwrap());

        let addr = parse_listen_addr("127.0.0.1:50051").unwrap();
        assert_eq!(addr.port(), 50051);
        assert!(addr.ip().is_loopback());

        assert!(parse_listen_addr("[::1]:8080").is_ok());
    }

    #[test]
    fn test_invalid_listen_addr() {
        assert!(parse_listen_addr(":http").is_err());
        assert!(parse_listen_addr("localhost").is_err());
        assert!(parse_listen_addr(":70000").is_err());

        let config = Config {
            listen_addr: "nope".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secure_port_detection() {
        let config = Config {
            listen_addr: ":443".to_string(),
            ..Default::default()
        };
        assert!(config.wants_tls());

        let config = Config {
            listen_addr: "127.0.0.1:8443".to_string(),
            ..Default::default()
        };
        assert!(!config.wants_tls());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config {
            classify_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_domain_validation() {
        let config = Config {
            domains: vec!["example.com".to_string(), "bad domain".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            listen_addr = ":443"
            domains = ["example.com", "www.example.com"]

            [tracing]
            exporter = "stdout"
            "#,
        )
        .unwrap();

        assert!(config.wants_tls());
        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.tracing.exporter, SpanExporter::Stdout);
        assert_eq!(config.tracing.service_name, "grpc_server");
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe {
            std::env::set_var("GRPC_BOOTSTRAP_LISTEN_ADDR", ":443");
            std::env::set_var("GRPC_BOOTSTRAP_DOMAINS", "a.example.com, b.example.com,");
        }

        let config = Config::load(None).unwrap();

        unsafe {
            std::env::remove_var("GRPC_BOOTSTRAP_LISTEN_ADDR");
            std::env::remove_var("GRPC_BOOTSTRAP_DOMAINS");
        }

        assert_eq!(config.listen_addr, ":443");
        assert_eq!(config.domains, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    #[serial]
    fn test_invalid_env_timeout() {
        unsafe {
            std::env::set_var("GRPC_BOOTSTRAP_CLASSIFY_TIMEOUT_MS", "soon");
        }

        let result = Config::load(None);

        unsafe {
            std::env::remove_var("GRPC_BOOTSTRAP_CLASSIFY_TIMEOUT_MS");
        }

        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen_addr = \"127.0.0.1:7000\"\nshutdown_grace_secs = 5\n")
            .unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }
}
