//! Virtual listeners fed by the multiplexer

use futures::Stream;
use std::io;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::conn::MuxStream;

/// Listener-shaped view over the connections one matcher claimed
#[derive(Debug)]
pub struct MuxListener {
    route: String,
    rx: mpsc::Receiver<MuxStream>,
    local_addr: SocketAddr,
}

impl MuxListener {
    pub(crate) fn new(route: String, rx: mpsc::Receiver<MuxStream>, local_addr: SocketAddr) -> Self {
        Self {
            route,
            rx,
            local_addr,
        }
    }

    /// Route label of the matcher feeding this listener
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Address of the underlying root listener
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next routed connection, `None` once the multiplexer has stopped
    pub async fn recv(&mut self) -> Option<MuxStream> {
        self.rx.recv().await
    }

    /// Connection stream for `tonic`'s `serve_with_incoming*`
    pub fn into_incoming(self) -> impl Stream<Item = io::Result<MuxStream>> + Send + 'static {
        ReceiverStream::new(self.rx).map(Ok)
    }
}

impl axum::serve::Listener for MuxListener {
    type Io = MuxStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(conn) => {
                let addr = conn.remote_addr();
                (conn, addr)
            }
            // axum has no way to end its accept loop; graceful shutdown does
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}
