//! TCP transport.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::{ConnectFuture, Transport};

/// Connects to a daemon listening on a TCP address.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: SocketAddr,
    nodelay: bool,
}

impl TcpTransport {
    /// Create a transport for the given address. `TCP_NODELAY` is on by default.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, nodelay: true }
    }

    /// Enable or disable `TCP_NODELAY` on connected streams.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Get the daemon address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn connect(&self) -> ConnectFuture<TcpStream> {
        let addr = self.addr;
        let nodelay = self.nodelay;
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(nodelay)?;
            Ok(stream)
        })
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
