//! In-process transport backed by `tokio::io::duplex`.
//!
//! A connect completes only once the paired [`MemoryListener`] accepts it, so
//! the binding stays `Connecting` until the in-process daemon is ready.

use std::io;

use tokio::io::{DuplexStream, duplex};
use tokio::sync::{mpsc, oneshot};

use super::{ConnectFuture, Transport};

struct PendingConnect {
    stream: DuplexStream,
    accepted: oneshot::Sender<()>,
}

/// Create a connected transport / listener pair.
///
/// `buffer` is the capacity in bytes of each direction of every stream.
pub fn memory_transport(buffer: usize) -> (MemoryTransport, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryTransport { tx, buffer }, MemoryListener { rx })
}

/// Client side of an in-process daemon channel.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<PendingConnect>,
    buffer: usize,
}

impl Transport for MemoryTransport {
    type Stream = DuplexStream;

    fn connect(&self) -> ConnectFuture<DuplexStream> {
        let tx = self.tx.clone();
        let buffer = self.buffer;
        Box::pin(async move {
            let (client, server) = duplex(buffer);
            let (accepted, on_accept) = oneshot::channel();
            tx.send(PendingConnect {
                stream: server,
                accepted,
            })
            .map_err(|_| refused())?;
            on_accept.await.map_err(|_| refused())?;
            Ok(client)
        })
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

fn refused() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionRefused, "memory listener closed")
}

/// Daemon side of an in-process channel.
///
/// Dropping the listener refuses every queued and future connect.
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<PendingConnect>,
}

impl MemoryListener {
    /// Accept the next connection. Returns `None` once every transport is gone.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        loop {
            let pending = self.rx.recv().await?;
            // The connecting side may have given up already.
            if pending.accepted.send(()).is_ok() {
                return Some(pending.stream);
            }
        }
    }
}

impl std::fmt::Debug for MemoryListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryListener").finish_non_exhaustive()
    }
}
