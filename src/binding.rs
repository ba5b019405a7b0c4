//! Application-side handle to a running binding.
//!
//! Every method enqueues a command for the reactor and returns without
//! waiting on the daemon. Commands from one handle are applied in the order
//! they were issued.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::{BindingConfig, ConnectionState};
use crate::dispatch::MethodCall;
use crate::error::{CallError, ConnectionError, SubscriptionError};
use crate::header::EventKey;
use crate::reactor::{BindingSnapshot, Command, Reactor};
use crate::response::{Continuation, ResponseFuture};
use crate::subscription::{SampleHandler, StateHandler};
use crate::transport::Transport;
use crate::types::SubscriptionState;

/// Cloneable handle to the reactor task.
///
/// The reactor shuts down once every handle is dropped or
/// [`shutdown`](Self::shutdown) is called.
///
/// # Example
///
/// ```no_run
/// use someip_binding::{BindingConfig, BindingHandle, MethodCall};
/// use someip_binding::{ConnectionState, InstanceId, MethodId, ServiceId};
/// use someip_binding::transport::UnixTransport;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = UnixTransport::new("/run/someipd.sock");
///     let (binding, _reactor) = BindingHandle::spawn(transport, BindingConfig::default());
///
///     binding.connect()?;
///     binding.wait_for_state(ConnectionState::Connected).await?;
///
///     let call = MethodCall::new(ServiceId(0x1234), InstanceId(1), MethodId(0x0001))
///         .payload(b"ping".as_slice());
///     let reply = binding.call(call).await?;
///     println!("reply: {reply:?}");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BindingHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    max_payload_size: usize,
}

impl BindingHandle {
    /// Spawn a reactor for `transport` on the current tokio runtime.
    ///
    /// The binding starts `Disconnected`; call [`connect`](Self::connect).
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<T: Transport>(transport: T, config: BindingConfig) -> (Self, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let max_payload_size = config.payload_limit();
        let reactor = Reactor::new(transport, config, commands_rx, state_tx);
        let task = tokio::spawn(reactor.run());
        (
            Self {
                commands,
                state,
                max_payload_size,
            },
            task,
        )
    }

    fn submit(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Start connecting. No-op while connecting or connected.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        if self.submit(Command::Connect) {
            Ok(())
        } else {
            Err(ConnectionError::ReactorStopped)
        }
    }

    /// Tear the connection down.
    ///
    /// Pending calls fail with [`CallError::ConnectionLost`] and every
    /// subscription becomes `NotSubscribed` before any later command from
    /// this handle is applied.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        if self.submit(Command::Disconnect) {
            Ok(())
        } else {
            Err(ConnectionError::ReactorStopped)
        }
    }

    /// Last connection state published by the reactor.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ConnectionError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ConnectionError::ReactorStopped)
    }

    /// Call a method. The returned future resolves with the response payload.
    ///
    /// Fails immediately with [`CallError::NotConnected`] unless connected.
    pub fn call(&self, call: MethodCall) -> ResponseFuture {
        if !self.state().is_connected() {
            return ResponseFuture::failed(CallError::NotConnected);
        }
        let (continuation, response) = Continuation::channel();
        if !self.submit(Command::Call { call, continuation }) {
            return ResponseFuture::failed(CallError::ReactorStopped);
        }
        response
    }

    /// Send a fire-and-forget call. No response is expected.
    pub fn call_fire_and_forget(&self, call: MethodCall) -> Result<(), CallError> {
        if !self.state().is_connected() {
            return Err(CallError::NotConnected);
        }
        if call.payload.len() > self.max_payload_size {
            return Err(CallError::PayloadTooLarge {
                size: call.payload.len(),
                max: self.max_payload_size,
            });
        }
        if !self.submit(Command::FireAndForget { call }) {
            return Err(CallError::ReactorStopped);
        }
        Ok(())
    }

    /// Subscribe to an event.
    ///
    /// `on_sample` receives every notification while subscribed; `on_state`
    /// receives every subscription state change. Both run on the reactor.
    pub fn subscribe<F, G>(
        &self,
        event: EventKey,
        on_sample: F,
        on_state: G,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send + use<F, G>
    where
        F: FnMut(Bytes) + Send + 'static,
        G: FnMut(SubscriptionState) + Send + 'static,
    {
        self.subscribe_boxed(event, Box::new(on_sample), Box::new(on_state))
    }

    pub(crate) fn subscribe_boxed(
        &self,
        event: EventKey,
        on_sample: SampleHandler,
        on_state: StateHandler,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send + use<> {
        let (reply, done) = oneshot::channel();
        let submitted = self.submit(Command::Subscribe {
            event,
            on_sample,
            on_state,
            reply,
        });
        settle(submitted, done)
    }

    /// Unsubscribe from an event. Its state becomes `NotSubscribed` at once.
    pub fn unsubscribe(
        &self,
        event: EventKey,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send + use<> {
        let (reply, done) = oneshot::channel();
        let submitted = self.submit(Command::Unsubscribe { event, reply });
        settle(submitted, done)
    }

    /// Take a snapshot of the reactor state.
    pub async fn snapshot(&self) -> Result<BindingSnapshot, ConnectionError> {
        let (reply, snapshot) = oneshot::channel();
        if !self.submit(Command::Snapshot(reply)) {
            return Err(ConnectionError::ReactorStopped);
        }
        snapshot.await.map_err(|_| ConnectionError::ReactorStopped)
    }

    /// Stop the reactor and wait until it has cancelled all pending work.
    ///
    /// Returns immediately if the reactor is already stopped.
    pub async fn shutdown(&self) {
        let (done, stopped) = oneshot::channel();
        if self.submit(Command::Shutdown(done)) {
            let _ = stopped.await;
        }
    }

    /// Check if the reactor is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

async fn settle(
    submitted: bool,
    done: oneshot::Receiver<Result<(), SubscriptionError>>,
) -> Result<(), SubscriptionError> {
    if !submitted {
        return Err(SubscriptionError::ReactorStopped);
    }
    done.await.unwrap_or(Err(SubscriptionError::ReactorStopped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{EventId, InstanceId, MethodId, ServiceId};
    use crate::transport::memory_transport;

    fn method() -> MethodCall {
        MethodCall::new(ServiceId(0x1234), InstanceId(1), MethodId(1))
    }

    #[tokio::test]
    async fn test_calls_fail_fast_when_disconnected() {
        let (transport, _listener) = memory_transport(1024);
        let (binding, _task) = BindingHandle::spawn(transport, BindingConfig::default());

        assert_eq!(binding.state(), ConnectionState::Disconnected);
        let mut response = binding.call(method());
        assert_eq!(response.try_result(), Some(Err(CallError::NotConnected)));
        assert_eq!(
            binding.call_fire_and_forget(method()),
            Err(CallError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_reactor() {
        let (transport, _listener) = memory_transport(1024);
        let (binding, task) = BindingHandle::spawn(transport, BindingConfig::default());

        binding.shutdown().await;
        task.await.unwrap();

        assert!(!binding.is_running());
        assert_eq!(binding.connect(), Err(ConnectionError::ReactorStopped));
        assert!(binding.snapshot().await.is_err());
        let event = EventKey::new(ServiceId(1), InstanceId(1), EventId(1));
        assert_eq!(
            binding.unsubscribe(event).await,
            Err(SubscriptionError::ReactorStopped)
        );
        // Idempotent.
        binding.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_reactor() {
        let (transport, _listener) = memory_transport(1024);
        let (binding, task) = BindingHandle::spawn(transport, BindingConfig::default());
        let clone = binding.clone();
        drop(binding);
        drop(clone);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let (transport, mut listener) = memory_transport(1024);
        let (binding, _task) = BindingHandle::spawn(transport, BindingConfig::default());

        binding.connect().unwrap();
        let _daemon = listener.accept().await.unwrap();
        binding
            .wait_for_state(ConnectionState::Connected)
            .await
            .unwrap();

        let snapshot = binding.snapshot().await.unwrap();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.stats.connect_count, 1);
    }
}
