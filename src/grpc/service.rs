//! DemoService implementation

use tonic::{Request, Response, Status};
use tracing::{Span, instrument};

use super::proto::demo::v1 as demo;
use crate::mux::MuxConnectInfo;

/// Answers `SayHello` with a greeting
#[derive(Debug, Default, Clone)]
pub struct Greeter;

impl Greeter {
    pub fn new() -> Self {
        Self
    }
}

#[tonic::async_trait]
impl demo::demo_service_server::DemoService for Greeter {
    #[instrument(skip(self, request), fields(name, remote_addr))]
    async fn say_hello(
        &self,
        request: Request<demo::HelloRequest>,
    ) -> Result<Response<demo::HelloResponse>, Status> {
        if let Some(info) = request.extensions().get::<MuxConnectInfo>() {
            Span::current().record("remote_addr", tracing::field::display(info.remote_addr));
        }

        let req = request.into_inner();
        let name = req.name.trim();
        if name.is_empty() {
            return Err(Status::invalid_argument("name cannot be empty"));
        }
        Span::current().record("name", name);

        Ok(Response::new(demo::HelloResponse {
            message: format!("Hello, {}!", name),
        }))
    }
}
