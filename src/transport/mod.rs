//! Byte-stream transports to the SOME/IP daemon.
//!
//! A [`Transport`] knows how to open one bidirectional stream. The reactor
//! owns the stream once connected; disconnecting drops it.
//!
//! - [`UnixTransport`]: Unix domain socket, the usual daemon IPC channel
//! - [`TcpTransport`]: TCP, for daemons reachable over the network
//! - [`MemoryTransport`]: in-process pipe paired with a [`MemoryListener`]

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

mod memory;
mod tcp;
#[cfg(unix)]
mod unix;

pub use memory::{MemoryListener, MemoryTransport, memory_transport};
pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::UnixTransport;

/// Future resolving to a connected stream.
pub type ConnectFuture<S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send + 'static>>;

/// Opens streams to the daemon.
pub trait Transport: Send + Sync + 'static {
    /// The connected stream type.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Start connecting. The returned future owns everything it needs.
    fn connect(&self) -> ConnectFuture<Self::Stream>;

    /// Human-readable endpoint, used in logs.
    fn endpoint(&self) -> String;
}
