//! Method call results: the reactor-side continuation and the
//! application-side future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::CallError;

/// Result of a method call: the response payload or the reason it failed.
pub type CallResult = std::result::Result<Bytes, CallError>;

/// Completes exactly one [`ResponseFuture`].
///
/// Consumed on completion, so a pending request can be resolved at most once.
#[derive(Debug)]
pub struct Continuation {
    tx: oneshot::Sender<CallResult>,
}

impl Continuation {
    /// Create a linked continuation / future pair.
    pub fn channel() -> (Continuation, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        (
            Continuation { tx },
            ResponseFuture {
                inner: Inner::Waiting(rx),
            },
        )
    }

    /// Deliver the result. Returns `false` if the caller dropped the future.
    pub fn complete(self, result: CallResult) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Check if the caller dropped the future.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
enum Inner {
    Ready(Option<CallResult>),
    Waiting(oneshot::Receiver<CallResult>),
}

/// Future returned by a method call.
///
/// Await it from async code, poll it with [`try_result`](Self::try_result),
/// or block on it from a plain thread with [`blocking_wait`](Self::blocking_wait).
#[derive(Debug)]
pub struct ResponseFuture {
    inner: Inner,
}

impl ResponseFuture {
    /// A future that is already resolved.
    pub fn ready(result: CallResult) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    /// A future that already failed.
    pub fn failed(error: CallError) -> Self {
        Self::ready(Err(error))
    }

    /// Take the result if it has arrived, without blocking.
    pub fn try_result(&mut self) -> Option<CallResult> {
        let result = match &mut self.inner {
            Inner::Ready(result) => return result.take(),
            Inner::Waiting(rx) => match rx.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => Err(CallError::ReactorStopped),
            },
        };
        self.inner = Inner::Ready(None);
        Some(result)
    }

    /// Block the current thread until the result arrives.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn blocking_wait(self) -> CallResult {
        match self.inner {
            Inner::Ready(result) => result.unwrap_or(Err(CallError::ReactorStopped)),
            Inner::Waiting(rx) => rx.blocking_recv().unwrap_or(Err(CallError::ReactorStopped)),
        }
    }
}

impl Future for ResponseFuture {
    type Output = CallResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CallError::ReactorStopped)))
            }
            Inner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(CallError::ReactorStopped))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_then_await() {
        let (continuation, future) = Continuation::channel();
        assert!(continuation.complete(Ok(Bytes::from_static(&[0xAA]))));
        assert_eq!(future.await, Ok(Bytes::from_static(&[0xAA])));
    }

    #[tokio::test]
    async fn test_dropped_continuation_reports_stopped() {
        let (continuation, future) = Continuation::channel();
        drop(continuation);
        assert_eq!(future.await, Err(CallError::ReactorStopped));
    }

    #[test]
    fn test_try_result() {
        let (continuation, mut future) = Continuation::channel();
        assert!(future.try_result().is_none());

        continuation.complete(Err(CallError::ConnectionLost));
        assert_eq!(future.try_result(), Some(Err(CallError::ConnectionLost)));
        assert_eq!(future.try_result(), None);
    }

    #[test]
    fn test_abandoned() {
        let (continuation, future) = Continuation::channel();
        drop(future);
        assert!(continuation.is_abandoned());
        assert!(!continuation.complete(Ok(Bytes::new())));
    }

    #[test]
    fn test_blocking_wait_on_ready() {
        let future = ResponseFuture::failed(CallError::NotConnected);
        assert_eq!(future.blocking_wait(), Err(CallError::NotConnected));
    }
}
