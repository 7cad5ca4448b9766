//! Sensor telemetry example using the in-memory provider.
//!
//! Registers a provider, binds a publisher to it, publishes a few readings
//! and simulates broker confirmations, all in a single process.
//!
//! Run with: RUST_LOG=debug cargo run --example sensor_memory

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn
)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cloud_publisher::{
    // ---
    decode_wire,
    ConnectionListener,
    DeliveryListener,
    MemoryProvider,
    MessageId,
    Payload,
    ProviderBase,
    ProviderRegistry,
    PublisherBuilder,
    RegistrationPayload,
    Result,
    TelemetryMessage,
};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

struct PrintDelivery;

#[async_trait::async_trait]
impl DeliveryListener for PrintDelivery {
    async fn on_message_confirmed(&self, message_id: MessageId) {
        println!("confirmed: {message_id}");
    }
}

struct PrintConnection;

#[async_trait::async_trait]
impl ConnectionListener for PrintConnection {
    async fn on_connection_established(&self) {
        println!("connection established");
    }

    async fn on_connection_lost(&self) {
        println!("connection lost");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let registry = Arc::new(ProviderRegistry::new());
    let provider = MemoryProvider::with_base(
        ProviderBase::new("cloud-service", "rpi-gateway-01", "W1/telemetry").with_display_name("greenhouse-east"),
    );
    registry.register_provider(provider.clone());

    let publisher = PublisherBuilder::new(registry).app_id("W1").priority(5).build()?;
    publisher.register_delivery_listener(Arc::new(PrintDelivery));
    publisher.register_connection_listener(Arc::new(PrintConnection));
    publisher.start()?;

    if !publisher.wait_for_binding(Duration::from_secs(1)).await {
        println!("no provider bound");
        return Ok(());
    }
    provider.fire_connection_established();

    let registration = RegistrationPayload::builder()
        .with_device_token("greenhouse-east")
        .with_area_token("greenhouses")
        .with_customer_token("acme-farms")
        .with_device_type_token("raspberry-pi")
        .with_metadata("firmware", "2.4.1")
        .build();
    let id = publisher.publish_payload(registration.into()).await?;
    println!("registration sent as {id}");

    for round in 0..3 {
        let reading = TelemetryMessage::new()
            .with_timestamp(SystemTime::now())
            .with_metric("temperature", 21.0 + f64::from(round) * 0.4)
            .with_metric("humidity", format!("{}", 55 + round))
            .with_metric("door", "open");

        let receipt = publisher.publish(Some(reading)).await?;
        println!("round {round}: {receipt:?}");
    }

    for sent in provider.sent() {
        let env = decode_wire(sent.message.payload.clone())?;
        match Payload::try_from(&env)? {
            Payload::Measurement(mx) => println!(
                "{} -> {} = {:?} (compressed: {})",
                sent.message.routing.app_topic,
                mx.measurement_id().unwrap_or("?"),
                mx.value(),
                sent.message.compressed
            ),
            Payload::Registration(reg) => {
                println!("registration for {:?}", reg.device_token())
            }
        }
        provider.fire_message_confirmed(&sent.message_id, &sent.message.routing.app_topic);
    }

    provider.fire_connection_lost();
    publisher.stop().await;
    Ok(())
}
