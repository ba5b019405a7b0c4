//! SOME/IP binding core: the client side of the application-to-daemon channel.
//!
//! This crate multiplexes method calls, fire-and-forget calls and event
//! subscriptions between a local application and a SOME/IP daemon over a
//! byte-stream IPC transport. All protocol state lives on a single tokio
//! reactor task; application code talks to it through a cloneable
//! [`BindingHandle`].
//!
//! # Features
//!
//! - Connection state machine (`Disconnected` / `Connecting` / `Connected`)
//! - Request correlation by client and session ID, with per-call timeouts
//! - Event subscriptions with state tracking and deferred subscribe
//! - Unix domain socket, TCP and in-memory transports
//! - Service proxies and an instance registry
//!
//! # Example
//!
//! ```no_run
//! use someip_binding::{BindingConfig, BindingHandle, ClientId, ConnectionState};
//! use someip_binding::{EventId, EventKey, InstanceId, MethodCall, MethodId, ServiceId};
//! use someip_binding::transport::UnixTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BindingConfig::for_client(ClientId(0x0100));
//!     let (binding, _reactor) =
//!         BindingHandle::spawn(UnixTransport::new("/run/someipd.sock"), config);
//!
//!     binding.connect()?;
//!     binding.wait_for_state(ConnectionState::Connected).await?;
//!
//!     let event = EventKey::new(ServiceId(0x1234), InstanceId(1), EventId(0x8001));
//!     binding
//!         .subscribe(event, |sample| println!("sample: {sample:?}"), |_| {})
//!         .await?;
//!
//!     let call = MethodCall::new(ServiceId(0x1234), InstanceId(1), MethodId(0x0001))
//!         .payload(b"hello".as_slice());
//!     let response = binding.call(call).await?;
//!     println!("Response: {response:?}");
//!
//!     binding.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Wire Format
//!
//! Every envelope is a 15-byte header in network byte order followed by an
//! opaque payload:
//!
//! ```text
//! +---------+---------+----------+--------+--------+---------+---------+
//! | MsgType | Service | Instance | Member | Client | Session | Length  |
//! | 1 byte  | 2 bytes | 2 bytes  | 2 bytes| 2 bytes| 2 bytes | 4 bytes |
//! +---------+---------+----------+--------+--------+---------+---------+
//! |           Payload ... (Length bytes)                               |
//! +--------------------------------------------------------------------+
//! ```

pub mod binding;
pub mod codec;
pub mod codec_async;
pub mod connection;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod header;
pub mod lifecycle;
pub mod message;
pub mod proxy;
pub mod reactor;
pub mod registry;
pub mod response;
pub mod subscription;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root
pub use binding::BindingHandle;
pub use connection::{BindingConfig, ConnectionState, ConnectionStats};
pub use dispatch::MethodCall;
pub use error::{
    CallError, ConnectionError, CorrelationError, LifecycleError, Result, SubscriptionError,
    WireError,
};
pub use header::{
    ClientId, CorrelationKey, EnvelopeHeader, EventId, EventKey, HEADER_SIZE, InstanceId,
    MemberId, MethodId, ServiceId, SessionId,
};
pub use lifecycle::BindingContext;
pub use message::{Envelope, EnvelopeBuilder};
pub use proxy::{ProxyBackend, ServiceProxy};
pub use reactor::BindingSnapshot;
pub use registry::ServiceRegistry;
pub use response::{CallResult, ResponseFuture};
pub use types::{MessageType, SubscriptionState};
