//! Debug HTTP server lifecycle

use async_trait::async_trait;
use axum::Router;
use std::time::Duration;

use crate::error::{BootstrapError, BootstrapResult};
use crate::mux::MuxListener;
use crate::server::{Drain, Serve};

const NAME: &str = "debug";

/// Debug router served on the multiplexer's HTTP/1 route
pub struct DebugServer {
    router: Router,
    drain: Drain,
}

impl DebugServer {
    pub fn new(router: Router, grace: Duration) -> Self {
        Self {
            router,
            drain: Drain::new(NAME, grace),
        }
    }
}

#[async_trait]
impl Serve for DebugServer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn serve(&self, listener: MuxListener) -> BootstrapResult<()> {
        let _running = self.drain.begin();

        tracing::info!(
            addr = %listener.local_addr(),
            route = listener.route(),
            "Starting debug HTTP server"
        );

        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(self.drain.signal())
            .await
            .map_err(|e| BootstrapError::serve(NAME, e))?;

        tracing::info!("Debug HTTP server stopped");
        Ok(())
    }

    async fn graceful_stop(&self) -> BootstrapResult<()> {
        self.drain.stop().await
    }
}
