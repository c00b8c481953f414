//! Connection multiplexer
//!
//! Splits one TCP listener into several [`MuxListener`]s. Each accepted
//! connection is classified on its own task: matchers run in registration
//! order against a rewindable [`Sniffer`], the first match claims the
//! connection, and the downstream server reads it from its first byte.
//! Connections nobody claims, or that stay silent past the read timeout, are
//! closed and counted.

pub mod conn;
pub mod listener;
pub mod matcher;
pub mod sniff;

pub use conn::{BoxedIo, Io, MuxConnectInfo, MuxStream};
pub use listener::MuxListener;
pub use matcher::Matcher;
pub use sniff::Sniffer;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::error::{BootstrapError, BootstrapResult};
use crate::metrics;

/// Default bound on the time a peer gets to identify its protocol
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// ALPN protocol used by TLS-ALPN-01 certificate validation
pub const ACME_TLS_ALPN: &[u8] = b"acme-tls/1";

const ACCEPT_QUEUE_DEPTH: usize = 128;

/// Why a connection was dropped instead of routed
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no protocol identified within {0:?}")]
    Timeout(Duration),

    #[error("no matcher claimed the connection after {sniffed} bytes")]
    NoMatch { sniffed: usize },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("read failed during classification: {0}")]
    Io(#[source] io::Error),

    #[error("listener for route '{0}' is closed")]
    ListenerClosed(String),
}

impl ClassifyError {
    fn record(&self, remote_addr: SocketAddr) {
        match self {
            ClassifyError::Timeout(timeout) => {
                tracing::warn!(
                    remote_addr = %remote_addr,
                    timeout_ms = timeout.as_millis() as u64,
                    "Dropping connection: classification timed out"
                );
                metrics::record_classification_timeout();
            }
            ClassifyError::NoMatch { sniffed } => {
                tracing::warn!(
                    remote_addr = %remote_addr,
                    sniffed_bytes = sniffed,
                    "Dropping connection: no matcher claimed it"
                );
                metrics::record_connection_unmatched();
            }
            ClassifyError::Handshake(_) => {
                tracing::debug!(remote_addr = %remote_addr, error = %self, "Dropping connection");
                metrics::record_classification_error("handshake");
            }
            ClassifyError::Io(_) => {
                tracing::debug!(remote_addr = %remote_addr, error = %self, "Dropping connection");
                metrics::record_classification_error("io");
            }
            ClassifyError::ListenerClosed(route) => {
                tracing::debug!(remote_addr = %remote_addr, route = %route, "Dropping connection");
                metrics::record_classification_error("listener_closed");
            }
        }
    }
}

struct Route {
    matcher: Box<dyn Matcher>,
    tx: mpsc::Sender<MuxStream>,
}

/// Demultiplexes one bound listener into per-protocol [`MuxListener`]s
pub struct Mux {
    listener: TcpListener,
    local_addr: SocketAddr,
    routes: Vec<Route>,
    read_timeout: Duration,
    tls: Option<TlsAcceptor>,
}

impl Mux {
    pub fn new(listener: TcpListener) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            routes: Vec::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            tls: None,
        })
    }

    /// Bound on TLS handshake plus classification per connection
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Terminate TLS before classifying
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Add a route; matchers are tried in the order they were registered
    pub fn register(&mut self, matcher: impl Matcher + 'static) -> MuxListener {
        let (tx, rx) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let route = matcher.name().to_string();
        self.routes.push(Route {
            matcher: Box::new(matcher),
            tx,
        });
        MuxListener::new(route, rx, self.local_addr)
    }

    /// Accept and classify connections until `shutdown` fires or accepting
    /// fails for good.
    ///
    /// On return every in-flight classification is aborted and every
    /// [`MuxListener`] sees its channel close.
    pub async fn serve(self, shutdown: CancellationToken) -> BootstrapResult<()> {
        let Mux {
            listener,
            local_addr,
            routes,
            read_timeout,
            tls,
        } = self;

        let routes: Arc<[Route]> = routes.into();
        let mut classifiers = JoinSet::new();

        tracing::info!(
            addr = %local_addr,
            routes = ?routes.iter().map(|r| r.matcher.name()).collect::<Vec<_>>(),
            tls = tls.is_some(),
            read_timeout_ms = read_timeout.as_millis() as u64,
            "Connection multiplexer started"
        );

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                Some(joined) = classifiers.join_next(), if !classifiers.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        tracing::warn!(error = %e, "Connection classifier panicked, connection dropped");
                        metrics::record_classification_error("panic");
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let info = MuxConnectInfo {
                            remote_addr,
                            local_addr,
                            tls: tls.is_some(),
                        };
                        let routes = routes.clone();
                        let tls = tls.clone();
                        classifiers.spawn(async move {
                            if let Err(e) = dispatch(stream, info, &routes, tls, read_timeout).await {
                                e.record(remote_addr);
                            }
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        break Err(BootstrapError::Accept(e));
                    }
                },
            }
        };

        classifiers.shutdown().await;
        tracing::info!(addr = %local_addr, "Connection multiplexer stopped");

        result
    }
}

/// Classify one connection and deliver it to its route
async fn dispatch(
    stream: TcpStream,
    info: MuxConnectInfo,
    routes: &[Route],
    tls: Option<TlsAcceptor>,
    read_timeout: Duration,
) -> Result<(), ClassifyError> {
    let classified = tokio::time::timeout(read_timeout, classify(stream, info, routes, tls))
        .await
        .map_err(|_| ClassifyError::Timeout(read_timeout))??;

    let Some((index, conn)) = classified else {
        tracing::debug!(remote_addr = %info.remote_addr, "Answered TLS-ALPN-01 challenge");
        return Ok(());
    };

    let route = &routes[index];
    let name = route.matcher.name();
    route
        .tx
        .send(conn)
        .await
        .map_err(|_| ClassifyError::ListenerClosed(name.to_string()))?;

    tracing::trace!(remote_addr = %info.remote_addr, route = name, "Connection routed");
    metrics::record_connection_routed(name);

    Ok(())
}

/// Returns the index of the claiming route, or `None` for an ACME challenge
/// connection that is finished once the handshake completes
async fn classify(
    stream: TcpStream,
    info: MuxConnectInfo,
    routes: &[Route],
    tls: Option<TlsAcceptor>,
) -> Result<Option<(usize, MuxStream)>, ClassifyError> {
    let io: BoxedIo = match tls {
        Some(acceptor) => {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(ClassifyError::Handshake)?;
            if tls_stream.get_ref().1.alpn_protocol() == Some(ACME_TLS_ALPN) {
                return Ok(None);
            }
            Box::new(tls_stream)
        }
        None => Box::new(stream),
    };

    let mut sniffer = Sniffer::new(io);
    for (index, route) in routes.iter().enumerate() {
        sniffer.rewind();
        match route.matcher.matches(&mut sniffer).await {
            Ok(true) => return Ok(Some((index, sniffer.into_stream(info)))),
            Ok(false) => {}
            Err(e) if is_no_match(&e) => {
                tracing::trace!(
                    remote_addr = %info.remote_addr,
                    route = route.matcher.name(),
                    error = %e,
                    "Matcher gave up"
                );
            }
            Err(e) => return Err(ClassifyError::Io(e)),
        }
    }

    Err(ClassifyError::NoMatch {
        sniffed: sniffer.buffered().len(),
    })
}

/// Matcher errors that say nothing about later routes
fn is_no_match(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
    )
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
