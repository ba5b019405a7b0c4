//! Service proxies.
//!
//! A [`ServiceProxy`] is bound to one service instance and forwards to a
//! [`ProxyBackend`]. [`BindingHandle`] is the production backend; tests can
//! inject their own.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::binding::BindingHandle;
use crate::dispatch::MethodCall;
use crate::error::{CallError, SubscriptionError};
use crate::header::{EventId, EventKey, InstanceId, MethodId, ServiceId};
use crate::response::ResponseFuture;
use crate::subscription::{SampleHandler, StateHandler};
use crate::types::SubscriptionState;

/// What a proxy needs from the binding underneath it.
pub trait ProxyBackend: Send + Sync {
    /// Start a method call.
    fn call(&self, call: MethodCall) -> ResponseFuture;

    /// Send a fire-and-forget call.
    fn call_fire_and_forget(&self, call: MethodCall) -> Result<(), CallError>;

    /// Subscribe to an event.
    fn subscribe(
        &self,
        event: EventKey,
        on_sample: SampleHandler,
        on_state: StateHandler,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send;

    /// Unsubscribe from an event.
    fn unsubscribe(
        &self,
        event: EventKey,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send;
}

impl ProxyBackend for BindingHandle {
    fn call(&self, call: MethodCall) -> ResponseFuture {
        BindingHandle::call(self, call)
    }

    fn call_fire_and_forget(&self, call: MethodCall) -> Result<(), CallError> {
        BindingHandle::call_fire_and_forget(self, call)
    }

    fn subscribe(
        &self,
        event: EventKey,
        on_sample: SampleHandler,
        on_state: StateHandler,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send {
        self.subscribe_boxed(event, on_sample, on_state)
    }

    fn unsubscribe(
        &self,
        event: EventKey,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send {
        BindingHandle::unsubscribe(self, event)
    }
}

/// Client-side proxy for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceProxy<B> {
    backend: B,
    service_id: ServiceId,
    instance_id: InstanceId,
}

impl<B: ProxyBackend> ServiceProxy<B> {
    /// Bind a proxy to a service instance.
    pub fn new(backend: B, service_id: ServiceId, instance_id: InstanceId) -> Self {
        Self {
            backend,
            service_id,
            instance_id,
        }
    }

    /// Get the service ID.
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Get the instance ID.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Get the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Full key of one of this instance's events.
    pub fn event_key(&self, event_id: EventId) -> EventKey {
        EventKey::new(self.service_id, self.instance_id, event_id)
    }

    fn method(&self, method_id: MethodId, payload: Bytes) -> MethodCall {
        MethodCall::new(self.service_id, self.instance_id, method_id).payload(payload)
    }

    /// Call a method with the default timeout.
    pub fn call(&self, method_id: MethodId, payload: impl Into<Bytes>) -> ResponseFuture {
        self.backend.call(self.method(method_id, payload.into()))
    }

    /// Call a method with an explicit timeout.
    pub fn call_with_timeout(
        &self,
        method_id: MethodId,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> ResponseFuture {
        self.backend
            .call(self.method(method_id, payload.into()).timeout(timeout))
    }

    /// Send a fire-and-forget call.
    pub fn fire_and_forget(
        &self,
        method_id: MethodId,
        payload: impl Into<Bytes>,
    ) -> Result<(), CallError> {
        self.backend
            .call_fire_and_forget(self.method(method_id, payload.into()))
    }

    /// Subscribe to one of this instance's events.
    pub fn subscribe<F, G>(
        &self,
        event_id: EventId,
        on_sample: F,
        on_state: G,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send
    where
        F: FnMut(Bytes) + Send + 'static,
        G: FnMut(SubscriptionState) + Send + 'static,
    {
        self.backend.subscribe(
            self.event_key(event_id),
            Box::new(on_sample),
            Box::new(on_state),
        )
    }

    /// Unsubscribe from one of this instance's events.
    pub fn unsubscribe(
        &self,
        event_id: EventId,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send {
        self.backend.unsubscribe(self.event_key(event_id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records everything a proxy asks of its backend.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingBackend {
        pub(crate) calls: Arc<Mutex<Vec<MethodCall>>>,
        pub(crate) events: Arc<Mutex<Vec<(EventKey, bool)>>>,
    }

    impl ProxyBackend for RecordingBackend {
        fn call(&self, call: MethodCall) -> ResponseFuture {
            let payload = call.payload.clone();
            self.calls.lock().unwrap().push(call);
            ResponseFuture::ready(Ok(payload))
        }

        fn call_fire_and_forget(&self, call: MethodCall) -> Result<(), CallError> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn subscribe(
            &self,
            event: EventKey,
            _on_sample: SampleHandler,
            mut on_state: StateHandler,
        ) -> impl Future<Output = Result<(), SubscriptionError>> + Send {
            self.events.lock().unwrap().push((event, true));
            on_state(SubscriptionState::SubscriptionPending);
            async { Ok(()) }
        }

        fn unsubscribe(
            &self,
            event: EventKey,
        ) -> impl Future<Output = Result<(), SubscriptionError>> + Send {
            self.events.lock().unwrap().push((event, false));
            async { Ok(()) }
        }
    }

    #[tokio::test]
    async fn test_proxy_fills_in_instance() {
        let backend = RecordingBackend::default();
        let proxy = ServiceProxy::new(backend.clone(), ServiceId(0x1234), InstanceId(2));

        let echoed = proxy.call(MethodId(7), b"ping".as_slice()).await.unwrap();
        assert_eq!(echoed.as_ref(), b"ping");
        proxy
            .call_with_timeout(MethodId(8), Bytes::new(), Duration::from_millis(5))
            .await
            .unwrap();
        proxy.fire_and_forget(MethodId(9), vec![1u8]).unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|call| call.service_id == ServiceId(0x1234)
            && call.instance_id == InstanceId(2)));
        assert_eq!(calls[0].method_id, MethodId(7));
        assert_eq!(calls[1].timeout, Some(Duration::from_millis(5)));
        assert_eq!(calls[2].payload.as_ref(), &[1u8]);
    }

    #[tokio::test]
    async fn test_proxy_subscriptions() {
        let backend = RecordingBackend::default();
        let proxy = ServiceProxy::new(backend.clone(), ServiceId(0x1234), InstanceId(2));
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();

        proxy
            .subscribe(EventId(0x8001), |_| {}, move |state| {
                sink.lock().unwrap().push(state)
            })
            .await
            .unwrap();
        proxy.unsubscribe(EventId(0x8001)).await.unwrap();

        let key = proxy.event_key(EventId(0x8001));
        assert_eq!(*backend.events.lock().unwrap(), vec![(key, true), (key, false)]);
        assert_eq!(
            *states.lock().unwrap(),
            vec![SubscriptionState::SubscriptionPending]
        );
    }
}
