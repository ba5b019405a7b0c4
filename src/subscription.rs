//! Event subscription manager.
//!
//! Each subscribed event has one entry cycling through
//! `NotSubscribed -> SubscriptionPending -> Subscribed -> NotSubscribed`.
//! Subscribing while the connection is down creates the entry in
//! `SubscriptionPending` and defers the subscribe message until the
//! connection comes up. A connection loss drops every entry to
//! `NotSubscribed`; the application has to subscribe again.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::connection::ConnectionState;
use crate::error::SubscriptionError;
use crate::header::{ClientId, EventKey};
use crate::message::Envelope;
use crate::types::SubscriptionState;

/// Receives event samples.
pub type SampleHandler = Box<dyn FnMut(Bytes) + Send>;

/// Receives subscription state changes.
pub type StateHandler = Box<dyn FnMut(SubscriptionState) + Send>;

struct SubscriptionEntry {
    state: SubscriptionState,
    on_sample: SampleHandler,
    on_state: StateHandler,
    /// Subscribe still has to be sent once connected.
    resend_pending: bool,
}

impl SubscriptionEntry {
    fn set_state(&mut self, key: EventKey, next: SubscriptionState) {
        debug!(event = %key, from = ?self.state, to = ?next, "subscription state change");
        self.state = next;
        (self.on_state)(next);
    }
}

/// Tracks subscriptions for every event on one connection.
pub struct SubscriptionManager {
    entries: HashMap<EventKey, SubscriptionEntry>,
    client_id: ClientId,
}

impl SubscriptionManager {
    /// Create an empty manager sending control messages as `client_id`.
    pub fn new(client_id: ClientId) -> Self {
        Self {
            entries: HashMap::new(),
            client_id,
        }
    }

    /// Subscribe to an event.
    ///
    /// Returns the subscribe message to send now, or `None` when it is
    /// deferred until the connection is up.
    pub fn subscribe(
        &mut self,
        key: EventKey,
        on_sample: SampleHandler,
        on_state: StateHandler,
        connection: ConnectionState,
    ) -> Result<Option<Envelope>, SubscriptionError> {
        if let Some(entry) = self.entries.get(&key) {
            if entry.state != SubscriptionState::NotSubscribed {
                return Err(SubscriptionError::AlreadySubscribed(key));
            }
        }

        let connected = connection.is_connected();
        let entry = self.entries.entry(key).insert_entry(SubscriptionEntry {
            state: SubscriptionState::NotSubscribed,
            on_sample,
            on_state,
            resend_pending: !connected,
        });
        entry.into_mut().set_state(key, SubscriptionState::SubscriptionPending);

        if connected {
            Ok(Some(Envelope::subscribe(key, self.client_id)))
        } else {
            debug!(event = %key, "subscribe deferred until connected");
            Ok(None)
        }
    }

    /// Unsubscribe from an event and drop its entry.
    ///
    /// The entry is `NotSubscribed` immediately. Returns the unsubscribe
    /// message to send, if the daemon knows about the subscription.
    pub fn unsubscribe(
        &mut self,
        key: EventKey,
        connection: ConnectionState,
    ) -> Result<Option<Envelope>, SubscriptionError> {
        let mut entry = self
            .entries
            .remove(&key)
            .ok_or(SubscriptionError::UnknownEvent(key))?;

        let was_active = entry.state != SubscriptionState::NotSubscribed;
        let daemon_knows = was_active && !entry.resend_pending;
        if was_active {
            entry.set_state(key, SubscriptionState::NotSubscribed);
        }

        if daemon_knows && connection.is_connected() {
            Ok(Some(Envelope::unsubscribe(key, self.client_id)))
        } else {
            Ok(None)
        }
    }

    /// The connection came up: collect the deferred subscribe messages.
    pub fn on_connected(&mut self) -> Vec<Envelope> {
        let client_id = self.client_id;
        let resend: Vec<Envelope> = self
            .entries
            .iter_mut()
            .filter(|(_, entry)| {
                entry.resend_pending && entry.state == SubscriptionState::SubscriptionPending
            })
            .map(|(key, entry)| {
                entry.resend_pending = false;
                Envelope::subscribe(*key, client_id)
            })
            .collect();
        if !resend.is_empty() {
            debug!(count = resend.len(), "sending deferred subscriptions");
        }
        resend
    }

    /// The connection went away: every entry becomes `NotSubscribed`.
    ///
    /// Each affected state handler is invoked exactly once. Returns how many
    /// entries changed state.
    pub fn on_connection_lost(&mut self) -> usize {
        let mut changed = 0;
        for (key, entry) in &mut self.entries {
            entry.resend_pending = false;
            if entry.state != SubscriptionState::NotSubscribed {
                entry.set_state(*key, SubscriptionState::NotSubscribed);
                changed += 1;
            }
        }
        changed
    }

    /// Deliver a notification. Returns `true` if a handler received it.
    pub fn on_notification(&mut self, envelope: Envelope) -> bool {
        let key = envelope.event_key();
        match self.entries.get_mut(&key) {
            Some(entry) if entry.state == SubscriptionState::Subscribed => {
                (entry.on_sample)(envelope.payload);
                true
            }
            Some(entry) => {
                trace!(event = %key, state = ?entry.state, "dropping notification");
                false
            }
            None => {
                trace!(event = %key, "dropping notification for unknown event");
                false
            }
        }
    }

    /// The daemon acknowledged a subscription.
    pub fn on_subscribe_ack(&mut self, key: EventKey) -> bool {
        self.apply(key, SubscriptionState::Subscribed)
    }

    /// The daemon reported a new state for a subscription.
    pub fn on_state_update(&mut self, key: EventKey, state: SubscriptionState) -> bool {
        self.apply(key, state)
    }

    fn apply(&mut self, key: EventKey, next: SubscriptionState) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            warn!(event = %key, to = ?next, "state change for unknown event");
            return false;
        };
        if !entry.state.can_transition_to(next) {
            warn!(event = %key, from = ?entry.state, to = ?next, "ignoring out-of-order subscription state");
            return false;
        }
        entry.set_state(key, next);
        true
    }

    /// Current state of one subscription.
    pub fn state(&self, key: EventKey) -> Option<SubscriptionState> {
        self.entries.get(&key).map(|entry| entry.state)
    }

    /// Current state of every subscription.
    pub fn states(&self) -> Vec<(EventKey, SubscriptionState)> {
        self.entries
            .iter()
            .map(|(key, entry)| (*key, entry.state))
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("client_id", &self.client_id)
            .field("entries", &self.states())
            .finish()
    }
}
