//! Process wiring
//!
//! Builds the collaborators once from [`Config`], binds the listener, decides
//! between plaintext and ACME-managed TLS, registers the multiplexer routes
//! and hands everything to the [`Coordinator`].

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{self, DebugServer, DebugState};
use crate::config::Config;
use crate::error::{BootstrapError, BootstrapResult};
use crate::grpc::GrpcServer;
use crate::lifecycle::Coordinator;
use crate::mux::{Mux, matcher};
use crate::shutdown::shutdown_token;
use crate::store::Store;
use crate::telemetry::Tracer;
use crate::tls;

pub struct Runtime {
    config: Config,
    store: Store,
    tracer: Arc<Tracer>,
    grpc: Arc<GrpcServer>,
    debug: Arc<DebugServer>,
}

impl Runtime {
    pub fn new(
        config: Config,
        tracer: Tracer,
        prometheus_handle: PrometheusHandle,
    ) -> BootstrapResult<Self> {
        let store = Store::connect_lazy(&config.database)?;
        let grace = config.shutdown_grace();

        let grpc = Arc::new(GrpcServer::new(config.max_message_size_mb, grace));
        let router = api::create_router(DebugState {
            store: store.clone(),
            prometheus_handle,
        });
        let debug = Arc::new(DebugServer::new(router, grace));

        Ok(Self {
            config,
            store,
            tracer: Arc::new(tracer),
            grpc,
            debug,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Bind the configured address and serve until `ctx` is cancelled, a
    /// signal arrives or a server fails
    pub async fn serve(self, ctx: CancellationToken) -> BootstrapResult<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BootstrapError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        self.serve_on(listener, ctx).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(self, listener: TcpListener, ctx: CancellationToken) -> BootstrapResult<()> {
        let Runtime {
            config,
            store,
            tracer,
            grpc,
            debug,
        } = self;

        let shutdown = shutdown_token(&ctx);

        let mut mux = Mux::new(listener)
            .map_err(|source| BootstrapError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?
            .with_read_timeout(config.classify_timeout());

        let mut acme = None;
        if config.wants_tls() {
            if config.domains.is_empty() {
                tracing::warn!(
                    addr = %mux.local_addr(),
                    "Secure port requested without domains, serving plaintext"
                );
            } else {
                let (acceptor, driver) = tls::acme_acceptor(&config.domains, &config.acme)?;
                mux = mux.with_tls(acceptor);
                acme = Some(driver);
            }
        }

        let grpc_listener = mux.register(matcher::grpc());
        let debug_listener = mux.register(matcher::http1_fast());

        let mut coordinator = Coordinator::new(grpc, debug, tracer);
        if let Some(driver) = acme {
            coordinator.supervise("acme", driver);
        }

        tracing::info!(
            addr = %mux.local_addr(),
            tls = mux.is_tls(),
            "Serving gRPC and debug HTTP"
        );

        let result = coordinator
            .run(mux, grpc_listener, debug_listener, shutdown)
            .await;

        store.close().await;

        match &result {
            Ok(()) => tracing::info!("Shutdown complete"),
            Err(e) => tracing::error!(error = %e, "Shutdown after failure"),
        }

        result
    }
}
