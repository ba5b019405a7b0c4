//! Daemon roundtrip example.
//!
//! Runs an in-process daemon and a binding against it: one method call, one
//! event subscription with a few samples, then a daemon crash.
//!
//! Run with: RUST_LOG=someip_binding=debug cargo run --example daemon_roundtrip

use std::time::Duration;

use someip_binding::codec_async::{read_envelope_async, write_envelope_async};
use someip_binding::message::DEFAULT_MAX_PAYLOAD_SIZE;
use someip_binding::transport::{MemoryListener, memory_transport};
use someip_binding::{
    BindingConfig, BindingContext, ClientId, ConnectionState, Envelope, EventId, InstanceId,
    MessageType, MethodId, ServiceId, ServiceProxy,
};
use tracing_subscriber::EnvFilter;

const SERVICE: ServiceId = ServiceId(0x1234);
const INSTANCE: InstanceId = InstanceId(1);
const ECHO: MethodId = MethodId(0x0001);
const TICK: EventId = EventId(0x8001);

/// Answers requests by echoing the payload and pushes three ticks after a
/// subscription is acknowledged. Closes the connection after the last tick.
async fn run_daemon(mut listener: MemoryListener) {
    let Some(mut stream) = listener.accept().await else {
        return;
    };

    loop {
        let envelope = match read_envelope_async(&mut stream, DEFAULT_MAX_PAYLOAD_SIZE).await {
            Ok(envelope) => envelope,
            Err(err) => {
                println!("[daemon] connection closed: {err}");
                return;
            }
        };

        match envelope.message_type() {
            MessageType::Request => {
                let response = envelope.create_response().payload(envelope.payload.clone()).build();
                if write_envelope_async(&mut stream, &response).await.is_err() {
                    return;
                }
            }
            MessageType::Subscribe => {
                let event = envelope.event_key();
                let ack = Envelope::subscribe_ack(event, envelope.header.client_id);
                if write_envelope_async(&mut stream, &ack).await.is_err() {
                    return;
                }
                for tick in 1u8..=3 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let sample = Envelope::notification(event).payload(vec![tick]).build();
                    if write_envelope_async(&mut stream, &sample).await.is_err() {
                        return;
                    }
                }
                println!("[daemon] simulating a crash");
                return;
            }
            other => println!("[daemon] ignoring {other:?}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== SOME/IP Binding Roundtrip ===\n");

    let (transport, listener) = memory_transport(64 * 1024);
    let daemon = tokio::spawn(run_daemon(listener));

    let mut context = BindingContext::new();
    let binding = context.initialize(transport, BindingConfig::for_client(ClientId(0x0100)))?;
    binding.connect()?;
    binding.wait_for_state(ConnectionState::Connected).await?;
    println!("Connected");

    let proxy = ServiceProxy::new(binding.clone(), SERVICE, INSTANCE);

    println!("\n--- Method call ---");
    let reply = proxy.call(ECHO, b"hello daemon".as_slice()).await?;
    println!("Echo reply: {:?}", String::from_utf8_lossy(&reply));

    println!("\n--- Event subscription ---");
    proxy
        .subscribe(
            TICK,
            |sample| println!("Tick sample: {sample:02X?}"),
            |state| println!("Subscription state: {state:?}"),
        )
        .await?;

    binding
        .wait_for_state(ConnectionState::Disconnected)
        .await?;
    println!("\nDaemon went away; calls now fail fast:");
    match proxy.call(ECHO, b"anyone?".as_slice()).await {
        Ok(reply) => println!("Unexpected reply: {reply:?}"),
        Err(err) => println!("Call failed: {err}"),
    }

    let snapshot = binding.snapshot().await?;
    println!("\nFinal snapshot:");
    println!("  State: {:?}", snapshot.state);
    println!("  Pending requests: {}", snapshot.pending_requests);
    println!("  Subscriptions: {:?}", snapshot.subscriptions);
    println!(
        "  Sent {} envelopes, received {}",
        snapshot.stats.messages_sent, snapshot.stats.messages_received
    );

    context.deinitialize().await?;
    daemon.await?;
    Ok(())
}
