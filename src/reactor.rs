//! The reactor task.
//!
//! One tokio task owns the transport, the connection state machine, the
//! correlation table and the subscription manager. Application threads talk
//! to it only through [`Command`]s, so every mutation happens on this task in
//! submission order and a timeout can never race the response for the same
//! request.
//!
//! Outgoing frames are queued on the connection and written a chunk at a time
//! from the same `select!` as reads, timers and commands. A daemon that stops
//! reading therefore delays only the queued frames.

use std::collections::VecDeque;
use std::future::pending;
use std::io;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf, split};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace, warn};

use crate::codec::{EnvelopeReader, EnvelopeWriter};
use crate::connection::{BindingConfig, ConnectionState, ConnectionStateMachine, ConnectionStats};
use crate::dispatch::{MethodCall, MethodDispatcher};
use crate::error::{SubscriptionError, WireError};
use crate::header::{CorrelationKey, EventKey};
use crate::message::Envelope;
use crate::response::Continuation;
use crate::subscription::{SampleHandler, StateHandler, SubscriptionManager};
use crate::transport::{ConnectFuture, Transport};
use crate::types::{MessageType, SubscriptionState};

/// Work submitted to the reactor.
pub(crate) enum Command {
    Connect,
    Disconnect,
    Call {
        call: MethodCall,
        continuation: Continuation,
    },
    FireAndForget {
        call: MethodCall,
    },
    Subscribe {
        event: EventKey,
        on_sample: SampleHandler,
        on_state: StateHandler,
        reply: oneshot::Sender<Result<(), SubscriptionError>>,
    },
    Unsubscribe {
        event: EventKey,
        reply: oneshot::Sender<Result<(), SubscriptionError>>,
    },
    Snapshot(oneshot::Sender<BindingSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Point-in-time view of the reactor state.
#[derive(Debug, Clone)]
pub struct BindingSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Calls awaiting a response.
    pub pending_requests: usize,
    /// Every subscription entry and its state.
    pub subscriptions: Vec<(EventKey, SubscriptionState)>,
    /// Connection statistics.
    pub stats: ConnectionStats,
}

impl BindingSnapshot {
    /// State of one subscription, if it has an entry.
    pub fn subscription(&self, event: EventKey) -> Option<SubscriptionState> {
        self.subscriptions
            .iter()
            .find(|(key, _)| *key == event)
            .map(|(_, state)| *state)
    }
}

/// One encoded frame (or batch of frames) waiting to be written.
#[derive(Debug)]
struct Outgoing {
    data: Bytes,
    written: usize,
    envelopes: usize,
    /// Call to fail with `SendFailed` if this frame cannot be written.
    call: Option<CorrelationKey>,
}

/// Write queue of one connection, in submission order.
#[derive(Debug, Default)]
struct Outbox {
    frames: VecDeque<Outgoing>,
    unflushed: bool,
}

impl Outbox {
    fn push(&mut self, data: Bytes, envelopes: usize, call: Option<CorrelationKey>) {
        self.frames.push_back(Outgoing {
            data,
            written: 0,
            envelopes,
            call,
        });
    }

    /// Bytes of the front frame not yet written.
    fn remaining(&self) -> Option<&[u8]> {
        self.frames
            .front()
            .map(|frame| &frame.data[frame.written..])
    }

    /// Account for `n` bytes written from the front frame. Returns the frame
    /// once it is fully written.
    fn advance(&mut self, n: usize) -> Option<Outgoing> {
        let frame = self.frames.front_mut()?;
        frame.written = (frame.written + n).min(frame.data.len());
        if frame.written < frame.data.len() {
            return None;
        }
        self.unflushed = true;
        self.frames.pop_front()
    }

    fn front_call(&self) -> Option<CorrelationKey> {
        self.frames.front().and_then(|frame| frame.call)
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

struct Connection<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    envelopes: EnvelopeReader,
    outbox: Outbox,
}

/// Progress made on a connection by [`connection_io`].
enum Io {
    Read(io::Result<usize>),
    Written(io::Result<usize>),
    Flushed(io::Result<()>),
}

pub(crate) struct Reactor<T: Transport> {
    transport: T,
    config: BindingConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    machine: ConnectionStateMachine,
    dispatcher: MethodDispatcher,
    subscriptions: SubscriptionManager,
    connecting: Option<ConnectFuture<T::Stream>>,
    connection: Option<Connection<T::Stream>>,
    read_buf: Vec<u8>,
}

impl<T: Transport> Reactor<T> {
    pub(crate) fn new(
        transport: T,
        config: BindingConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let mut machine = ConnectionStateMachine::new();
        machine.add_observer(Box::new(move |state| {
            state_tx.send_replace(state);
        }));

        Self {
            dispatcher: MethodDispatcher::new(&config),
            subscriptions: SubscriptionManager::new(config.client_id),
            read_buf: vec![0; config.read_buffer_size.max(1)],
            transport,
            config,
            commands,
            machine,
            connecting: None,
            connection: None,
        }
    }

    /// Run until shut down or every handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!(endpoint = %self.transport.endpoint(), client = %self.config.client_id, "reactor started");
        loop {
            let deadline = self.dispatcher.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.stop();
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.stop();
                        return;
                    }
                },
                result = connect_result(&mut self.connecting), if self.connecting.is_some() => {
                    self.on_connect_result(result);
                }
                progress = connection_io(&mut self.connection, &mut self.read_buf), if self.connection.is_some() => match progress {
                    Io::Read(read) => self.on_read(read),
                    Io::Written(written) => self.on_written(written),
                    Io::Flushed(flushed) => self.on_flushed(flushed),
                },
                () = sleep_until(deadline), if deadline.is_some() => {
                    let expired = self.dispatcher.expire(now());
                    self.machine.stats_mut().record_timeouts(expired);
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.machine.connect() {
                    self.start_connect();
                }
            }
            Command::Disconnect => match self.machine.disconnect() {
                Ok(()) => self.teardown(),
                Err(err) => debug!(%err, "disconnect ignored"),
            },
            Command::Call { call, continuation } => {
                let state = self.machine.state();
                let Ok(request) = self.dispatcher.begin_call(call, continuation, state, now())
                else {
                    return;
                };
                let key = request.correlation_key();
                if let Err(err) = self.send(&request, Some(key)) {
                    self.dispatcher.send_failed(key, err.io_kind());
                    self.transport_lost(&err);
                }
            }
            Command::FireAndForget { call } => {
                match self.dispatcher.fire_and_forget(call, self.machine.state()) {
                    Ok(envelope) => {
                        if let Err(err) = self.send(&envelope, None) {
                            self.transport_lost(&err);
                        }
                    }
                    Err(err) => debug!(%err, "fire-and-forget dropped"),
                }
            }
            Command::Subscribe {
                event,
                on_sample,
                on_state,
                reply,
            } => {
                let state = self.machine.state();
                let result = self
                    .subscriptions
                    .subscribe(event, on_sample, on_state, state);
                let outgoing = match result {
                    Ok(outgoing) => {
                        let _ = reply.send(Ok(()));
                        outgoing
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        None
                    }
                };
                self.send_control(outgoing);
            }
            Command::Unsubscribe { event, reply } => {
                let state = self.machine.state();
                let outgoing = match self.subscriptions.unsubscribe(event, state) {
                    Ok(outgoing) => {
                        let _ = reply.send(Ok(()));
                        outgoing
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        None
                    }
                };
                self.send_control(outgoing);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop.
            Command::Shutdown(done) => {
                let _ = done.send(());
            }
        }
    }

    fn start_connect(&mut self) {
        let connect = self.transport.connect();
        let limit = self.config.connect_timeout;
        debug!(endpoint = %self.transport.endpoint(), "connecting");
        let bounded: ConnectFuture<T::Stream> = Box::pin(async move {
            tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
        });
        self.connecting = Some(bounded);
    }

    fn on_connect_result(&mut self, result: io::Result<T::Stream>) {
        self.connecting = None;
        let stream = match result {
            Ok(stream) => stream,
            Err(err) => {
                warn!(endpoint = %self.transport.endpoint(), %err, "connect failed");
                self.transport_lost(&WireError::Io(err));
                return;
            }
        };

        if let Err(err) = self.machine.on_transport_connected() {
            warn!(%err, "dropping unexpected connection");
            return;
        }

        let (reader, writer) = split(stream);
        self.connection = Some(Connection {
            reader,
            writer,
            envelopes: EnvelopeReader::with_capacity(self.config.read_buffer_size)
                .with_max_payload_size(self.config.payload_limit()),
            outbox: Outbox::default(),
        });
        debug!(endpoint = %self.transport.endpoint(), "connected");

        let resend = self.subscriptions.on_connected();
        if resend.is_empty() {
            return;
        }
        let mut frames = EnvelopeWriter::new();
        for envelope in &resend {
            frames.encode(envelope);
        }
        if let Err(err) = self.send_frames(&mut frames) {
            self.transport_lost(&err);
        }
    }

    fn on_written(&mut self, written: io::Result<usize>) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let written = match written {
            Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero)),
            other => other,
        };
        match written {
            Ok(n) => {
                if let Some(frame) = connection.outbox.advance(n) {
                    trace!(envelopes = frame.envelopes, len = frame.data.len(), "frame written");
                    self.machine
                        .stats_mut()
                        .record_send(frame.envelopes, frame.data.len());
                }
            }
            Err(err) => {
                warn!(%err, queued = connection.outbox.len(), "write to daemon failed");
                if let Some(key) = connection.outbox.front_call() {
                    self.dispatcher.send_failed(key, err.kind());
                }
                self.transport_lost(&WireError::Io(err));
            }
        }
    }

    fn on_flushed(&mut self, flushed: io::Result<()>) {
        match flushed {
            Ok(()) => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.outbox.unflushed = false;
                }
            }
            Err(err) => self.transport_lost(&WireError::Io(err)),
        }
    }

    fn on_read(&mut self, read: io::Result<usize>) {
        let n = match read {
            Ok(0) => {
                debug!("daemon closed the connection");
                self.transport_lost(&WireError::Io(io::ErrorKind::UnexpectedEof.into()));
                return;
            }
            Ok(n) => n,
            Err(err) => {
                self.transport_lost(&WireError::Io(err));
                return;
            }
        };

        if let Some(connection) = self.connection.as_mut() {
            connection.envelopes.feed(&self.read_buf[..n]);
        }

        loop {
            let parsed = match self.connection.as_mut() {
                Some(connection) => connection.envelopes.try_parse(),
                None => return,
            };
            match parsed {
                Ok(Some(envelope)) => self.route(envelope),
                Ok(None) => return,
                Err(err) => {
                    error!(%err, "protocol error from daemon");
                    self.machine.stats_mut().record_protocol_error();
                    self.transport_lost(&err);
                    return;
                }
            }
        }
    }

    fn route(&mut self, envelope: Envelope) {
        let header = &envelope.header;
        trace!(
            message_type = ?header.message_type,
            service = %header.service_id,
            instance = %header.instance_id,
            member = %header.member_id,
            client = %header.client_id,
            session = %header.session_id,
            len = envelope.payload.len(),
            "received envelope"
        );
        self.machine
            .stats_mut()
            .record_receive(envelope.total_size());

        match envelope.message_type() {
            MessageType::Response | MessageType::ErrorResponse => {
                if !self.dispatcher.on_response(envelope) {
                    self.machine.stats_mut().record_unmatched();
                }
            }
            MessageType::Notification => {
                self.subscriptions.on_notification(envelope);
            }
            MessageType::SubscribeAck => {
                self.subscriptions.on_subscribe_ack(envelope.event_key());
            }
            MessageType::SubscriptionStateUpdate => {
                let event = envelope.event_key();
                match decode_state_update(&envelope) {
                    Some(state) => {
                        self.subscriptions.on_state_update(event, state);
                    }
                    None => {
                        warn!(%event, payload = ?envelope.payload, "malformed subscription state update");
                    }
                }
            }
            other @ (MessageType::Request
            | MessageType::FireAndForget
            | MessageType::Subscribe
            | MessageType::Unsubscribe) => {
                warn!(message_type = ?other, "dropping client-direction message from daemon");
            }
        }
    }

    /// Queue one envelope for writing. `call` names the request it carries.
    fn send(&mut self, envelope: &Envelope, call: Option<CorrelationKey>) -> Result<(), WireError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        trace!(
            message_type = ?envelope.header.message_type,
            service = %envelope.header.service_id,
            member = %envelope.header.member_id,
            session = %envelope.header.session_id,
            queued = connection.outbox.len(),
            "sending envelope"
        );
        connection
            .outbox
            .push(Bytes::from(envelope.to_bytes()), 1, call);
        Ok(())
    }

    fn send_frames(&mut self, frames: &mut EnvelopeWriter) -> Result<(), WireError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        let count = frames.count();
        connection.outbox.push(Bytes::from(frames.take()), count, None);
        Ok(())
    }

    fn send_control(&mut self, outgoing: Option<Envelope>) {
        if let Some(envelope) = outgoing {
            if let Err(err) = self.send(&envelope, None) {
                self.transport_lost(&err);
            }
        }
    }

    /// Drop the transport and fail everything that depended on it.
    fn transport_lost(&mut self, cause: &WireError) {
        let previous = self.machine.on_transport_lost();
        debug!(?previous, %cause, "transport lost");
        self.teardown();
    }

    fn teardown(&mut self) {
        self.connecting = None;
        self.connection = None;
        let failed = self.dispatcher.on_connection_lost();
        let dropped = self.subscriptions.on_connection_lost();
        if failed > 0 || dropped > 0 {
            debug!(failed, dropped, "cancelled pending work");
        }
    }

    fn stop(&mut self) {
        if self.machine.disconnect().is_err() {
            trace!("already disconnected");
        }
        self.teardown();
        debug!("reactor stopped");
    }

    fn snapshot(&self) -> BindingSnapshot {
        BindingSnapshot {
            state: self.machine.state(),
            pending_requests: self.dispatcher.pending(),
            subscriptions: self.subscriptions.states(),
            stats: self.machine.stats().clone(),
        }
    }
}

fn decode_state_update(envelope: &Envelope) -> Option<SubscriptionState> {
    match envelope.payload.as_ref() {
        [state] => SubscriptionState::from_u8(*state),
        _ => None,
    }
}

/// Current time on the tokio clock, so paused test time drives timeouts.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn connect_result<S>(connecting: &mut Option<ConnectFuture<S>>) -> io::Result<S> {
    match connecting {
        Some(connect) => connect.await,
        None => pending().await,
    }
}

/// Read from the connection while draining its outbox. Both operations are
/// cancel safe, so losing the outer `select!` loses no data.
async fn connection_io<S: AsyncRead + AsyncWrite>(
    connection: &mut Option<Connection<S>>,
    buf: &mut [u8],
) -> Io {
    let Some(Connection {
        reader,
        writer,
        outbox,
        ..
    }) = connection
    else {
        return pending().await;
    };
    tokio::select! {
        read = reader.read(buf) => Io::Read(read),
        progress = drain_outbox(writer, outbox) => progress,
    }
}

async fn drain_outbox<W: AsyncWrite + Unpin>(writer: &mut W, outbox: &Outbox) -> Io {
    match outbox.remaining() {
        Some(chunk) => Io::Written(writer.write(chunk).await),
        None if outbox.unflushed => Io::Flushed(writer.flush().await),
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => pending().await,
    }
}
