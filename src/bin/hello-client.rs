use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tonic::codec::CompressionEncoding;
use tonic::transport::{Channel, ClientTlsConfig};

use grpc_bootstrap::grpc::proto::demo::v1::{HelloRequest, demo_service_client::DemoServiceClient};

#[derive(Parser, Debug)]
#[clap(name = "hello-client", about = "Call DemoService.SayHello on a running server")]
struct Args {
    /// gRPC endpoint (e.g., http://host:port or https://host)
    #[clap(short, long, default_value = "http://127.0.0.1:9090")]
    endpoint: String,

    /// Name to greet
    #[clap(short, long, default_value = "world")]
    name: String,

    /// Gzip-compress the request
    #[clap(long)]
    gzip: bool,

    /// Request timeout in seconds
    #[clap(long, default_value = "5")]
    timeout_secs: u64,
}

async fn build_channel(args: &Args) -> Result<Channel> {
    let mut channel_builder = Channel::from_shared(args.endpoint.clone())
        .context("Invalid endpoint")?
        .timeout(Duration::from_secs(args.timeout_secs));

    if args.endpoint.starts_with("https://") {
        channel_builder = channel_builder
            .tls_config(ClientTlsConfig::new().with_webpki_roots())
            .context("Failed to configure TLS")?;
    }

    channel_builder
        .connect()
        .await
        .context("Failed to connect to endpoint")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let channel = build_channel(&args).await?;
    let mut client = DemoServiceClient::new(channel);
    if args.gzip {
        client = client.send_compressed(CompressionEncoding::Gzip);
    }

    let response = client
        .say_hello(HelloRequest {
            name: args.name.clone(),
        })
        .await
        .context("SayHello failed")?;

    println!("{}", response.into_inner().message);

    Ok(())
}
