//! Request correlation table.
//!
//! Maps each in-flight request's [`CorrelationKey`] to the continuation that
//! completes the caller's future, and tracks one deadline per request. The
//! table is owned by the reactor, so register, resolve, cancel and expiry
//! never interleave.
//!
//! Session ids are handed out per client in increasing order over
//! `1..=0xFFFF`, wrapping and skipping ids that are still pending. When every
//! id of a client is in flight, allocation fails instead of waiting.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{CallError, CorrelationError};
use crate::header::{ClientId, CorrelationKey, SessionId};
use crate::response::{CallResult, Continuation};

/// Number of usable session ids per client (0 is reserved).
const SESSION_SPACE: usize = u16::MAX as usize;

/// An in-flight request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    key: CorrelationKey,
    continuation: Continuation,
    created_at: Instant,
    deadline: Option<Instant>,
}

impl PendingRequest {
    /// Create a pending request starting at `created_at`. A timeout too large
    /// to represent as an instant leaves the request without a deadline.
    pub fn new(
        key: CorrelationKey,
        continuation: Continuation,
        created_at: Instant,
        timeout: Duration,
    ) -> Self {
        Self {
            key,
            continuation,
            created_at,
            deadline: created_at.checked_add(timeout),
        }
    }

    /// Correlation key of the request.
    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    /// Time the request was registered.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time after which the request times out, if it has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn complete(self, result: CallResult) {
        if !self.continuation.complete(result) {
            debug!(
                client = %self.key.client_id,
                session = %self.key.session_id,
                "caller dropped response future"
            );
        }
    }
}

/// A registration refused by the table. The continuation is handed back so
/// the caller can fail it.
#[derive(Debug)]
pub struct Rejected {
    /// Why the registration was refused.
    pub error: CorrelationError,
    /// The continuation that was not stored.
    pub continuation: Continuation,
}

#[derive(Debug)]
struct ClientSessions {
    next: SessionId,
    pending: usize,
}

impl Default for ClientSessions {
    fn default() -> Self {
        Self {
            next: SessionId::FIRST,
            pending: 0,
        }
    }
}

/// Table of pending requests keyed by correlation key.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<CorrelationKey, PendingRequest>,
    deadlines: BTreeSet<(Instant, CorrelationKey)>,
    clients: HashMap<ClientId, ClientSessions>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next unused session id for a client.
    pub fn allocate_session(&mut self, client_id: ClientId) -> Result<SessionId, CorrelationError> {
        let sessions = self.clients.entry(client_id).or_default();
        if sessions.pending >= SESSION_SPACE {
            return Err(CorrelationError::SessionIdsExhausted(client_id));
        }

        let mut candidate = sessions.next;
        while self
            .pending
            .contains_key(&CorrelationKey::new(client_id, candidate))
        {
            candidate = candidate.next();
        }
        sessions.next = candidate.next();
        Ok(candidate)
    }

    /// Register a pending request and start its timeout.
    pub fn register(&mut self, request: PendingRequest) -> Result<(), Rejected> {
        let key = request.key;
        if self.pending.contains_key(&key) {
            return Err(Rejected {
                error: CorrelationError::AlreadyPending(key),
                continuation: request.continuation,
            });
        }

        if let Some(deadline) = request.deadline {
            self.deadlines.insert((deadline, key));
        }
        self.clients.entry(key.client_id).or_default().pending += 1;
        self.pending.insert(key, request);
        debug!(
            client = %key.client_id,
            session = %key.session_id,
            pending = self.pending.len(),
            "registered pending request"
        );
        Ok(())
    }

    /// Complete the request matching `key` with `result`.
    pub fn resolve(&mut self, key: CorrelationKey, result: CallResult) -> Result<(), CorrelationError> {
        let request = self.remove(key).ok_or(CorrelationError::Unmatched(key))?;
        debug!(
            client = %key.client_id,
            session = %key.session_id,
            ok = result.is_ok(),
            "resolved pending request"
        );
        request.complete(result);
        Ok(())
    }

    /// Fail the request matching `key` with `error`.
    pub fn cancel(&mut self, key: CorrelationKey, error: CallError) -> Result<(), CorrelationError> {
        let request = self.remove(key).ok_or(CorrelationError::Unmatched(key))?;
        debug!(
            client = %key.client_id,
            session = %key.session_id,
            %error,
            "cancelled pending request"
        );
        request.complete(Err(error));
        Ok(())
    }

    /// Fail every pending request with `error`. Returns how many were failed.
    pub fn cancel_all(&mut self, error: CallError) -> usize {
        let drained: Vec<PendingRequest> =
            self.pending.drain().map(|(_, request)| request).collect();
        self.deadlines.clear();
        for sessions in self.clients.values_mut() {
            sessions.pending = 0;
        }

        let count = drained.len();
        if count > 0 {
            debug!(count, %error, "cancelled all pending requests");
        }
        for request in drained {
            request.complete(Err(error.clone()));
        }
        count
    }

    /// Fail every request whose deadline is at or before `now` with a timeout.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while let Some(&(deadline, key)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            let timeout = CallError::Timeout {
                client_id: key.client_id,
                session_id: key.session_id,
            };
            if self.cancel(key, timeout).is_ok() {
                expired += 1;
            }
        }
        expired
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|&(deadline, _)| deadline)
    }

    /// Check if a request with this key is pending.
    pub fn contains(&self, key: CorrelationKey) -> bool {
        self.pending.contains_key(&key)
    }

    /// Number of requests pending for one client.
    pub fn pending_for(&self, client_id: ClientId) -> usize {
        self.clients.get(&client_id).map_or(0, |sessions| sessions.pending)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no request is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn remove(&mut self, key: CorrelationKey) -> Option<PendingRequest> {
        let request = self.pending.remove(&key)?;
        if let Some(deadline) = request.deadline {
            self.deadlines.remove(&(deadline, key));
        }
        if let Some(sessions) = self.clients.get_mut(&key.client_id) {
            sessions.pending = sessions.pending.saturating_sub(1);
        }
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseFuture;
    use bytes::Bytes;
    use proptest::prelude::*;

    const CLIENT: ClientId = ClientId(7);

    fn register(
        table: &mut CorrelationTable,
        client_id: ClientId,
        now: Instant,
        timeout: Duration,
    ) -> (CorrelationKey, ResponseFuture) {
        let session_id = table.allocate_session(client_id).unwrap();
        let key = CorrelationKey::new(client_id, session_id);
        let (continuation, future) = Continuation::channel();
        table
            .register(PendingRequest::new(key, continuation, now, timeout))
            .unwrap();
        (key, future)
    }

    #[test]
    fn test_sessions_increase_and_skip_zero() {
        let mut table = CorrelationTable::new();
        assert_eq!(table.allocate_session(CLIENT).unwrap(), SessionId(1));
        assert_eq!(table.allocate_session(CLIENT).unwrap(), SessionId(2));
        // Clients are independent.
        assert_eq!(table.allocate_session(ClientId(8)).unwrap(), SessionId(1));
    }

    #[test]
    fn test_resolve_completes_future() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let (key, mut future) = register(&mut table, CLIENT, now, Duration::from_millis(100));

        table.resolve(key, Ok(Bytes::from_static(&[0xAA]))).unwrap();
        assert_eq!(future.try_result(), Some(Ok(Bytes::from_static(&[0xAA]))));
        assert!(table.is_empty());
        assert_eq!(table.next_deadline(), None);
        assert_eq!(table.pending_for(CLIENT), 0);
    }

    #[test]
    fn test_unmatched_resolve_is_harmless() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let (key, mut future) = register(&mut table, CLIENT, now, Duration::from_millis(100));

        let stray = CorrelationKey::new(CLIENT, SessionId(99));
        assert_eq!(
            table.resolve(stray, Ok(Bytes::new())),
            Err(CorrelationError::Unmatched(stray))
        );
        assert!(table.contains(key));
        assert!(future.try_result().is_none());
    }

    #[test]
    fn test_duplicate_register_is_rejected() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let (key, _future) = register(&mut table, CLIENT, now, Duration::from_secs(1));

        let (continuation, mut second) = Continuation::channel();
        let rejected = table
            .register(PendingRequest::new(key, continuation, now, Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(rejected.error, CorrelationError::AlreadyPending(key));

        rejected
            .continuation
            .complete(Err(CallError::DuplicateRequest(key)));
        assert_eq!(second.try_result(), Some(Err(CallError::DuplicateRequest(key))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_expire_only_elapsed() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let (short, mut short_future) = register(&mut table, CLIENT, now, Duration::from_millis(100));
        let (long, mut long_future) = register(&mut table, CLIENT, now, Duration::from_secs(10));

        assert_eq!(table.next_deadline(), Some(now + Duration::from_millis(100)));
        assert_eq!(table.expire(now + Duration::from_millis(100)), 1);

        assert_eq!(
            short_future.try_result(),
            Some(Err(CallError::Timeout {
                client_id: short.client_id,
                session_id: short.session_id,
            }))
        );
        assert!(!table.contains(short));
        assert!(table.contains(long));
        assert!(long_future.try_result().is_none());

        // A late response for the expired request is unmatched.
        assert!(table.resolve(short, Ok(Bytes::new())).is_err());
    }

    #[test]
    fn test_unbounded_timeout_never_expires() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let (forever, mut forever_future) = register(&mut table, CLIENT, now, Duration::MAX);
        let (short, _short_future) = register(&mut table, CLIENT, now, Duration::from_millis(10));

        assert_eq!(table.next_deadline(), Some(now + Duration::from_millis(10)));
        assert_eq!(table.expire(now + Duration::from_secs(3600)), 1);
        assert!(!table.contains(short));
        assert!(table.contains(forever));
        assert_eq!(table.next_deadline(), None);
        assert!(forever_future.try_result().is_none());

        table.resolve(forever, Ok(Bytes::from_static(b"late"))).unwrap();
        assert_eq!(forever_future.try_result(), Some(Ok(Bytes::from_static(b"late"))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let mut futures: Vec<_> = (0..3)
            .map(|_| register(&mut table, CLIENT, now, Duration::from_secs(1)).1)
            .collect();
        futures.push(register(&mut table, ClientId(8), now, Duration::from_secs(1)).1);

        assert_eq!(table.cancel_all(CallError::ConnectionLost), 4);
        assert!(table.is_empty());
        assert_eq!(table.next_deadline(), None);
        for future in &mut futures {
            assert_eq!(future.try_result(), Some(Err(CallError::ConnectionLost)));
        }
        assert_eq!(table.cancel_all(CallError::ConnectionLost), 0);
    }

    #[test]
    fn test_session_ids_skip_pending_and_exhaust() {
        let mut table = CorrelationTable::new();
        let now = Instant::now();
        let timeout = Duration::from_secs(60);

        let mut keys = Vec::with_capacity(SESSION_SPACE);
        let mut futures = Vec::with_capacity(SESSION_SPACE);
        for _ in 0..SESSION_SPACE {
            let (key, future) = register(&mut table, CLIENT, now, timeout);
            keys.push(key);
            futures.push(future);
        }
        assert_eq!(keys.last().unwrap().session_id, SessionId(0xFFFF));
        assert_eq!(
            table.allocate_session(CLIENT),
            Err(CorrelationError::SessionIdsExhausted(CLIENT))
        );

        // Free one id in the middle; the wrapped cursor skips every pending id.
        let freed = CorrelationKey::new(CLIENT, SessionId(5));
        table.resolve(freed, Ok(Bytes::new())).unwrap();
        assert_eq!(table.allocate_session(CLIENT).unwrap(), SessionId(5));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Call(u16),
        Respond(usize),
        Expire,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u16..4).prop_map(Op::Call),
            any::<usize>().prop_map(Op::Respond),
            Just(Op::Expire),
        ]
    }

    proptest! {
        #[test]
        fn prop_pending_sessions_are_unique(ops in prop::collection::vec(op(), 1..200)) {
            let mut table = CorrelationTable::new();
            let start = Instant::now();
            let mut now = start;
            let mut live: Vec<(CorrelationKey, ResponseFuture)> = Vec::new();

            for op in ops {
                match op {
                    Op::Call(client) => {
                        let client_id = ClientId(client);
                        let session_id = table.allocate_session(client_id).unwrap();
                        let key = CorrelationKey::new(client_id, session_id);
                        prop_assert!(!table.contains(key));
                        let (continuation, future) = Continuation::channel();
                        prop_assert!(table
                            .register(PendingRequest::new(key, continuation, now, Duration::from_millis(10)))
                            .is_ok());
                        live.push((key, future));
                    }
                    Op::Respond(index) if !live.is_empty() => {
                        let (key, _) = &live[index % live.len()];
                        let _ = table.resolve(*key, Ok(Bytes::new()));
                    }
                    Op::Respond(_) => {}
                    Op::Expire => {
                        now += Duration::from_millis(5);
                        table.expire(now);
                    }
                }

                // Each future resolves at most once and only once its entry is gone.
                live.retain_mut(|(key, future)| match future.try_result() {
                    Some(_) => {
                        assert!(!table.contains(*key));
                        false
                    }
                    None => {
                        assert!(table.contains(*key));
                        true
                    }
                });
                prop_assert_eq!(live.len(), table.len());
            }
        }
    }
}
