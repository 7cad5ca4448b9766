// tests/publisher_flow.rs

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::time::{timeout, Duration};

use cloud_publisher::{
    // ---
    decode_wire,
    Command,
    ConnectionListener,
    DeliveryListener,
    DeliveryListenerPtr,
    DeviceMeasurement,
    MemoryProvider,
    MessageId,
    ProviderRegistry,
    PublishReceipt,
    Publisher,
    PublisherBuilder,
    PublisherOptions,
    QoS,
    TelemetryMessage,
};

#[derive(Default)]
struct RecordingDelivery {
    confirmed: Mutex<Vec<MessageId>>,
}

#[async_trait::async_trait]
impl DeliveryListener for RecordingDelivery {
    async fn on_message_confirmed(&self, message_id: MessageId) {
        self.confirmed.lock().unwrap().push(message_id);
    }
}

#[derive(Default)]
struct RecordingConnection {
    events: Mutex<Vec<&'static str>>,
}

#[async_trait::async_trait]
impl ConnectionListener for RecordingConnection {
    async fn on_disconnected(&self) {
        self.events.lock().unwrap().push("disconnected");
    }

    async fn on_connection_lost(&self) {
        self.events.lock().unwrap().push("lost");
    }

    async fn on_connection_established(&self) {
        self.events.lock().unwrap().push("established");
    }
}

async fn app1_publisher() -> (Publisher, Arc<MemoryProvider>) {
    // ---
    let properties = json!({
        "qos": 0,
        "retain": false,
        "priority": 1,
        "appId": "app1",
        "cloudServicePid": "cloud-app1"
    });
    let options = PublisherOptions::from_properties(properties.as_object().unwrap())
        .expect("options rejected");

    let registry = Arc::new(ProviderRegistry::new());
    let provider = MemoryProvider::new("cloud-app1");
    registry.register_provider(provider.clone());

    let publisher = PublisherBuilder::new(registry)
        .options(options)
        .build()
        .expect("build failed");
    publisher.start().expect("start failed");
    assert!(publisher.wait_for_binding(Duration::from_secs(1)).await);

    (publisher, provider)
}

#[tokio::test]
async fn measurement_event_end_to_end() {
    // ---
    // Arrange
    // ---
    let (publisher, provider) = app1_publisher().await;
    let delivery = Arc::new(RecordingDelivery::default());
    assert!(publisher.register_delivery_listener(delivery.clone()));

    let event = TelemetryMessage::new()
        .with_metric("temp", 21.3)
        .with_metric("hum", "55");

    // ---
    // Act
    // ---
    let receipt = publisher.publish(Some(event)).await.expect("publish failed");

    // ---
    // Assert
    // ---
    assert_eq!(receipt, PublishReceipt { sent: 2, skipped: 0, failed: 0 });

    let sent = provider.sent();
    assert_eq!(sent.len(), 2);

    let mut values = Vec::new();
    for s in &sent {
        let routing = &s.message.routing;
        assert_eq!(routing.app_id, "app1");
        assert_eq!(routing.qos, QoS::AtMostOnce);
        assert!(!routing.retain);
        assert_eq!(routing.priority, 1);

        let env = decode_wire(s.message.payload.clone()).expect("undecodable payload");
        assert_eq!(env.command, Command::SendMeasurement);
        let body: DeviceMeasurement = env.decode_body().expect("bad body");
        values.push((body.measurement_id.unwrap(), body.measurement_value.unwrap()));
    }
    values.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        values,
        vec![("hum".to_string(), 55.0), ("temp".to_string(), 21.3)]
    );

    // Confirmations: only topics containing the app id reach listeners.
    provider.fire_message_confirmed(&sent[0].message_id, "app1/data");
    provider.fire_message_confirmed(&sent[1].message_id, "other/data");
    publisher.stop().await;

    let confirmed = delivery.confirmed.lock().unwrap();
    assert_eq!(confirmed.as_slice(), &[sent[0].message_id.clone()]);
}

#[tokio::test]
async fn every_connection_listener_sees_each_event_once() {
    // ---
    // Arrange
    // ---
    let (publisher, provider) = app1_publisher().await;
    let listeners: Vec<Arc<RecordingConnection>> =
        (0..4).map(|_| Arc::new(RecordingConnection::default())).collect();
    for l in &listeners {
        assert!(publisher.register_connection_listener(l.clone()));
        assert!(!publisher.register_connection_listener(l.clone()));
    }

    // ---
    // Act
    // ---
    provider.fire_connection_lost();
    provider.fire_connection_established();
    publisher.stop().await;

    // ---
    // Assert
    // ---
    for l in &listeners {
        let mut events = l.events.lock().unwrap().clone();
        events.sort_unstable();
        assert_eq!(events, vec!["established", "lost"]);
    }
}

#[tokio::test]
async fn unregistered_delivery_listener_gets_nothing() {
    // ---
    let (publisher, provider) = app1_publisher().await;
    let kept = Arc::new(RecordingDelivery::default());
    let dropped = Arc::new(RecordingDelivery::default());
    let dropped_ptr: DeliveryListenerPtr = dropped.clone();

    publisher.register_delivery_listener(kept.clone());
    publisher.register_delivery_listener(dropped_ptr.clone());
    assert!(publisher.unregister_delivery_listener(&dropped_ptr));
    assert!(!publisher.unregister_delivery_listener(&dropped_ptr));

    provider.fire_message_confirmed(&MessageId::from("m-7"), "app1/data");
    publisher.stop().await;

    assert_eq!(kept.confirmed.lock().unwrap().len(), 1);
    assert!(dropped.confirmed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn compressed_payload_is_never_larger() {
    // ---
    let (publisher, provider) = app1_publisher().await;

    let mut event = TelemetryMessage::new();
    for i in 0..3 {
        event.add_metric(format!("sensor.{i}.temperature.reading.celsius"), f64::from(i));
    }
    publisher.publish(Some(event)).await.unwrap();

    for s in provider.sent() {
        let raw = decode_wire(s.message.payload.clone()).unwrap().to_bytes().unwrap();
        assert!(s.message.payload.len() <= raw.len());
        assert_eq!(s.message.compressed, cloud_publisher::is_gzip(&s.message.payload));
    }
}

#[tokio::test]
async fn stop_drains_queued_listener_jobs() {
    // ---
    let (publisher, provider) = app1_publisher().await;
    let delivery = Arc::new(RecordingDelivery::default());
    publisher.register_delivery_listener(delivery.clone());

    for i in 0..50 {
        provider.fire_message_confirmed(&MessageId::from(format!("m-{i}")), "app1/data");
    }
    timeout(Duration::from_secs(5), publisher.stop())
        .await
        .expect("stop did not finish");

    assert_eq!(delivery.confirmed.lock().unwrap().len(), 50);
}
