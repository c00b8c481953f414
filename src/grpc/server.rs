//! gRPC server lifecycle

use async_trait::async_trait;
use std::time::Duration;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server;

use super::proto::demo::v1::demo_service_server::DemoServiceServer;
use super::service::Greeter;
use crate::error::{BootstrapError, BootstrapResult};
use crate::mux::MuxListener;
use crate::server::{Drain, Serve};

const NAME: &str = "grpc";

/// Encoded descriptor set for the reflection service
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptor");

/// Demo service plus reflection, fed by the multiplexer's gRPC route
#[derive(Debug)]
pub struct GrpcServer {
    drain: Drain,
    max_message_size: usize,
}

impl GrpcServer {
    pub fn new(max_message_size_mb: usize, grace: Duration) -> Self {
        Self {
            drain: Drain::new(NAME, grace),
            max_message_size: max_message_size_mb * 1024 * 1024,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

#[async_trait]
impl Serve for GrpcServer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn serve(&self, listener: MuxListener) -> BootstrapResult<()> {
        let _running = self.drain.begin();

        // Enable gRPC reflection
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| BootstrapError::serve(NAME, e))?;

        let demo_service = DemoServiceServer::new(Greeter::new())
            .accept_compressed(CompressionEncoding::Gzip)
            .max_decoding_message_size(self.max_message_size)
            .max_encoding_message_size(self.max_message_size);

        tracing::info!(
            addr = %listener.local_addr(),
            route = listener.route(),
            max_message_size = self.max_message_size,
            "Starting gRPC server"
        );

        Server::builder()
            .add_service(demo_service)
            .add_service(reflection_service)
            .serve_with_incoming_shutdown(listener.into_incoming(), self.drain.signal())
            .await
            .map_err(|e| BootstrapError::serve(NAME, e))?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }

    async fn graceful_stop(&self) -> BootstrapResult<()> {
        self.drain.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{Mux, matcher};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_message_size_from_megabytes() {
        let server = GrpcServer::new(16, Duration::from_secs(1));
        assert_eq!(server.max_message_size(), 16 * 1024 * 1024);
        assert_eq!(server.name(), "grpc");
    }

    #[test]
    fn test_descriptor_set_is_embedded() {
        assert!(!FILE_DESCRIPTOR_SET.is_empty());
    }

    #[tokio::test]
    async fn test_graceful_stop_ends_serve() {
        let mut mux = Mux::new(TcpListener::bind("127.0.0.1:0").await.unwrap()).unwrap();
        let listener = mux.register(matcher::grpc());
        let mux_stop = CancellationToken::new();
        let mux_task = tokio::spawn(mux.serve(mux_stop.clone()));

        let server = std::sync::Arc::new(GrpcServer::new(4, Duration::from_secs(5)));
        let serving = server.clone();
        let serve_task = tokio::spawn(async move { serving.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.graceful_stop().await.unwrap();

        assert!(serve_task.await.unwrap().is_ok());
        mux_stop.cancel();
        mux_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_serve_is_noop() {
        let server = GrpcServer::new(4, Duration::from_millis(10));
        assert!(server.graceful_stop().await.is_ok());
    }
}
