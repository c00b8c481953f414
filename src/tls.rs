//! ACME-managed TLS for the secure port
//!
//! Certificates are obtained with TLS-ALPN-01, so validation requests arrive
//! on the same listener as regular traffic. The multiplexer finishes those
//! handshakes and drops the connection (see [`crate::mux::ACME_TLS_ALPN`]).

use futures::StreamExt;
use rustls::ServerConfig;
use rustls_acme::AcmeConfig;
use rustls_acme::caches::DirCache;
use std::future::Future;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use crate::config::AcmeConfig as AcmeSettings;
use crate::error::{BootstrapError, BootstrapResult};
use crate::mux::ACME_TLS_ALPN;

/// ALPN protocols offered to clients, ACME validation last
pub fn alpn_protocols() -> Vec<Vec<u8>> {
    vec![b"h2".to_vec(), b"http/1.1".to_vec(), ACME_TLS_ALPN.to_vec()]
}

/// Build a TLS acceptor whose certificates come from ACME.
///
/// Returns the acceptor and the future that orders and renews certificates.
/// The future must be polled for the acceptor to ever hold a certificate; it
/// resolves with an error on the first failed acquisition.
pub fn acme_acceptor(
    domains: &[String],
    settings: &AcmeSettings,
) -> BootstrapResult<(
    TlsAcceptor,
    impl Future<Output = BootstrapResult<()>> + Send + 'static,
)> {
    if domains.is_empty() {
        return Err(BootstrapError::Tls {
            message: "at least one domain is required".to_string(),
        });
    }

    let mut state = AcmeConfig::new(domains.to_vec())
        .contact(settings.contact.iter().map(|c| format!("mailto:{}", c)))
        .cache(DirCache::new(settings.cache_dir.clone()))
        .directory_lets_encrypt(settings.production)
        .state();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut server_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| BootstrapError::Tls {
            message: e.to_string(),
        })?
        .with_no_client_auth()
        .with_cert_resolver(state.resolver());
    server_config.alpn_protocols = alpn_protocols();

    tracing::info!(
        domains = ?domains,
        cache_dir = ?settings.cache_dir,
        production = settings.production,
        "ACME certificate management configured"
    );

    let driver = async move {
        while let Some(event) = state.next().await {
            match event {
                Ok(ok) => tracing::info!(event = ?ok, "ACME event"),
                Err(err) => {
                    tracing::error!(error = ?err, "ACME certificate acquisition failed");
                    return Err(BootstrapError::Acme {
                        message: format!("{:?}", err),
                    });
                }
            }
        }
        Ok(())
    };

    Ok((TlsAcceptor::from(Arc::new(server_config)), driver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_keeps_acme_last() {
        let protocols = alpn_protocols();
        assert_eq!(protocols.first().map(Vec::as_slice), Some(&b"h2"[..]));
        assert_eq!(protocols.last().map(Vec::as_slice), Some(ACME_TLS_ALPN));
    }

    #[tokio::test]
    async fn test_empty_domains_rejected() {
        let settings = AcmeSettings::default();
        assert!(acme_acceptor(&[], &settings).is_err());
    }

    #[tokio::test]
    async fn test_acceptor_builds_without_network() {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let dir = tempfile::tempdir().unwrap();
        let settings = AcmeSettings {
            cache_dir: dir.path().to_path_buf(),
            contact: vec!["ops@example.com".to_string()],
            production: false,
        };

        // Nothing is dialed until the driver is polled
        let result = acme_acceptor(&["example.com".to_string()], &settings);
        assert!(result.is_ok());
    }
}
