//! Unix domain socket transport.

use std::path::{Path, PathBuf};

use tokio::net::UnixStream;

use super::{ConnectFuture, Transport};

/// Connects to a daemon listening on a Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    path: PathBuf,
}

impl UnixTransport {
    /// Create a transport for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for UnixTransport {
    type Stream = UnixStream;

    fn connect(&self) -> ConnectFuture<UnixStream> {
        let path = self.path.clone();
        Box::pin(async move { UnixStream::connect(path).await })
    }

    fn endpoint(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec_async::{read_envelope_async, write_envelope_async};
    use crate::header::{ClientId, EventId, EventKey, InstanceId, ServiceId};
    use crate::message::{DEFAULT_MAX_PAYLOAD_SIZE, Envelope};
    use crate::types::MessageType;
    use tokio::net::UnixListener;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("someip-binding-{}-{name}.sock", std::process::id()))
    }

    #[tokio::test]
    async fn test_unix_transport_exchange() {
        let path = socket_path("exchange");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let transport = UnixTransport::new(&path);

        let daemon = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let subscribe = read_envelope_async(&mut stream, DEFAULT_MAX_PAYLOAD_SIZE)
                .await
                .unwrap();
            assert_eq!(subscribe.message_type(), MessageType::Subscribe);
            let ack = Envelope::subscribe_ack(subscribe.event_key(), subscribe.header.client_id);
            write_envelope_async(&mut stream, &ack).await.unwrap();
        });

        let event = EventKey::new(ServiceId(1), InstanceId(1), EventId(0x8001));
        let mut stream = transport.connect().await.unwrap();
        write_envelope_async(&mut stream, &Envelope::subscribe(event, ClientId(3)))
            .await
            .unwrap();
        let ack = read_envelope_async(&mut stream, DEFAULT_MAX_PAYLOAD_SIZE)
            .await
            .unwrap();
        assert_eq!(ack.message_type(), MessageType::SubscribeAck);
        assert_eq!(ack.event_key(), event);

        daemon.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_unix_transport_missing_socket() {
        let transport = UnixTransport::new(socket_path("missing"));
        assert!(transport.connect().await.is_err());
        assert!(transport.endpoint().starts_with("unix://"));
    }
}
