//! Telemetry publisher.
//!
//! The single entry point that turns agent telemetry into provider sends and
//! the single point from which listener dispatch is driven.
//!
//! ```text
//!  TelemetryMessage ──▶ coerce ──▶ MeasurementPayload ──▶ encoder chain ──▶ Provider::send
//!                                                                               │
//!  Delivery/Connection listeners ◀── DispatchPool ◀── FanOut ◀── observer ◀─────┘
//! ```
//!
//! ## Lifecycle
//!
//! `Created ──start()──▶ Running ──stop()──▶ Stopped`
//!
//! `stop()` closes the provider watch, then refuses new publishes, then
//! drains queued listener jobs. A stopped publisher cannot be restarted.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::binder::ProviderBinder;
use crate::config::{CoercionPolicy, PublisherOptions};
use crate::dispatch::FanOut;
use crate::encode::{encoder_chain, is_gzip, PayloadEncoder};
use crate::registry::ProviderRegistry;
use crate::{
    // ---
    ConnectionListenerPtr,
    DeliveryListenerPtr,
    MeasurementPayload,
    MessageId,
    ObserverPtr,
    OutboundMessage,
    Payload,
    ProviderPtr,
    PublishError,
    Result,
    TelemetryMessage,
};

/// Outcome counts of one [`Publisher::publish`] call.
///
/// A metric counted as `sent` was accepted by the provider, which is not the
/// same as delivered; delivery is reported later through
/// [`DeliveryListener`](crate::DeliveryListener)s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PublishReceipt {
    /// Number of metrics the call looked at.
    pub fn total(&self) -> usize {
        self.sent + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Publishes telemetry through whichever provider is currently bound.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ProviderRegistry>,
    options: RwLock<Arc<PublisherOptions>>,
    encoder: RwLock<Arc<dyn PayloadEncoder>>,
    binder: Arc<ProviderBinder>,
    fan_out: Arc<FanOut>,
    lifecycle: Mutex<Lifecycle>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_ignore_poison<T: Clone>(lock: &RwLock<T>) -> T {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_ignore_poison<T>(lock: &RwLock<T>, value: T) {
    match lock.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

impl Publisher {
    /// Create a publisher over `registry` (internal use by
    /// [`PublisherBuilder`](crate::PublisherBuilder)).
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(registry: Arc<ProviderRegistry>, options: PublisherOptions) -> Result<Self> {
        // ---
        options.validate()?;

        let fan_out = FanOut::new(options.app_id.clone(), options.dispatch_workers);
        let observer: ObserverPtr = fan_out.clone();
        let binder = ProviderBinder::new(observer);
        let encoder: Arc<dyn PayloadEncoder> = Arc::from(encoder_chain(options.compression));

        crate::log_debug!(
            "publisher: created (appId={}, selector={}, compression={})",
            options.app_id,
            options.cloud_service_pid,
            options.compression
        );

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                options: RwLock::new(Arc::new(options)),
                encoder: RwLock::new(encoder),
                binder,
                fan_out,
                lifecycle: Mutex::new(Lifecycle::Created),
            }),
        })
    }

    /// Begin watching for the configured provider.
    ///
    /// A selector that does not form a valid filter is logged and leaves the
    /// publisher running but unbound, so every publish fails with
    /// [`PublishError::Unavailable`]. Calling `start` twice is a no-op.
    pub fn start(&self) -> Result<()> {
        // ---
        let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);
        match *lifecycle {
            Lifecycle::Stopped => return Err(PublishError::Stopped),
            Lifecycle::Running => return Ok(()),
            Lifecycle::Created => {}
        }

        self.open_watch();
        *lifecycle = Lifecycle::Running;
        crate::log_info!("publisher: started");
        Ok(())
    }

    /// Apply new options.
    ///
    /// While running, the provider watch is torn down and rebuilt; during the
    /// gap the publisher is unbound and publishes fail fast. The dispatch
    /// worker count is fixed at creation and is not changed by an update.
    pub fn update(&self, options: PublisherOptions) -> Result<()> {
        // ---
        options.validate()?;

        let lifecycle = lock_ignore_poison(&self.inner.lifecycle);
        if *lifecycle == Lifecycle::Stopped {
            return Err(PublishError::Stopped);
        }

        let previous = read_ignore_poison(&self.inner.options);
        if previous.dispatch_workers != options.dispatch_workers {
            crate::log_warn!(
                "publisher: dispatchWorkers change ({} -> {}) takes effect on the next publisher",
                previous.dispatch_workers,
                options.dispatch_workers
            );
        }

        let encoder: Arc<dyn PayloadEncoder> = Arc::from(encoder_chain(options.compression));
        write_ignore_poison(&self.inner.encoder, encoder);
        self.inner.fan_out.set_app_id(options.app_id.clone());
        write_ignore_poison(&self.inner.options, Arc::new(options));
        crate::log_info!("publisher: options updated");

        if *lifecycle == Lifecycle::Running {
            self.open_watch();
        }
        Ok(())
    }

    /// Shut down: close the provider watch, refuse new publishes, then drain
    /// queued listener jobs. Idempotent.
    pub async fn stop(&self) {
        // ---
        {
            let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            self.inner.binder.close();
            *lifecycle = Lifecycle::Stopped;
        }

        self.inner.fan_out.shutdown().await;
        crate::log_info!("publisher: stopped");
    }

    /// Publish every metric of `message` as its own measurement.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Stopped`] after [`stop`](Self::stop).
    /// - [`PublishError::Unavailable`] when no provider is bound.
    /// - [`PublishError::InvalidArgument`] when `message` is `None`.
    /// - [`PublishError::Coercion`] for a non-numeric metric under
    ///   [`CoercionPolicy::Reject`].
    /// - [`PublishError::Encode`] / [`PublishError::Io`] when the encoder
    ///   chain fails.
    ///
    /// All of these are raised before the first send. A provider failure on
    /// one metric is logged and counted in [`PublishReceipt::failed`]; the
    /// remaining metrics are still sent.
    pub async fn publish(&self, message: Option<TelemetryMessage>) -> Result<PublishReceipt> {
        // ---
        let provider = self.bound_provider()?;
        let message =
            message.ok_or_else(|| PublishError::InvalidArgument("telemetry message is absent".into()))?;

        let options = read_ignore_poison(&self.inner.options);
        let encoder = read_ignore_poison(&self.inner.encoder);

        let device_token = provider.device_name();
        let routing = options.routing(provider.app_topic());
        let event_date = message.timestamp_millis().unwrap_or_else(now_millis);

        let mut receipt = PublishReceipt::default();
        let mut outbound = Vec::with_capacity(message.len());

        for (name, value) in message.metrics() {
            let number = match value.coerce() {
                Some(number) => number,
                None => match options.coercion_policy {
                    CoercionPolicy::ZeroFill => {
                        crate::log_warn!("publisher: metric `{name}` value `{value}` is not numeric, sending 0.0");
                        0.0
                    }
                    CoercionPolicy::Skip => {
                        crate::log_warn!("publisher: metric `{name}` value `{value}` is not numeric, skipped");
                        receipt.skipped += 1;
                        continue;
                    }
                    CoercionPolicy::Reject => {
                        return Err(PublishError::Coercion {
                            metric: name.to_string(),
                            value: value.to_string(),
                        });
                    }
                },
            };

            let payload: Payload = MeasurementPayload::builder()
                .with_device_token(device_token)
                .with_measurement_id(name)
                .with_measurement_value(number)
                .with_event_date(event_date)
                .with_update_state(true)
                .with_originator(options.originator.as_str())
                .build()
                .into();

            let bytes = encoder.encode(&payload)?;
            outbound.push((
                name,
                OutboundMessage {
                    compressed: is_gzip(&bytes),
                    payload: bytes,
                    routing: routing.clone(),
                },
            ));
        }

        for (name, message) in outbound {
            match provider.send(message).await {
                Ok(message_id) => {
                    crate::log_debug!("publisher: `{name}` accepted as {message_id}");
                    receipt.sent += 1;
                }
                Err(e) => {
                    crate::log_warn!("publisher: send of `{name}` failed: {e}");
                    receipt.failed += 1;
                }
            }
        }

        Ok(receipt)
    }

    /// Encode and send a single prepared payload, such as a device
    /// registration.
    ///
    /// Unlike [`publish`](Self::publish), a provider failure is returned to
    /// the caller.
    pub async fn publish_payload(&self, payload: Payload) -> Result<MessageId> {
        // ---
        let provider = self.bound_provider()?;
        let options = read_ignore_poison(&self.inner.options);
        let encoder = read_ignore_poison(&self.inner.encoder);

        let bytes = encoder.encode(&payload)?;
        let message = OutboundMessage {
            compressed: is_gzip(&bytes),
            payload: bytes,
            routing: options.routing(provider.app_topic()),
        };

        let message_id = provider.send(message).await?;
        crate::log_debug!("publisher: {} payload accepted as {message_id}", payload.kind());
        Ok(message_id)
    }

    pub fn register_connection_listener(&self, listener: ConnectionListenerPtr) -> bool {
        self.inner.fan_out.connection_listeners().insert(listener)
    }

    pub fn unregister_connection_listener(&self, listener: &ConnectionListenerPtr) -> bool {
        self.inner.fan_out.connection_listeners().remove(listener)
    }

    pub fn register_delivery_listener(&self, listener: DeliveryListenerPtr) -> bool {
        self.inner.fan_out.delivery_listeners().insert(listener)
    }

    pub fn unregister_delivery_listener(&self, listener: &DeliveryListenerPtr) -> bool {
        self.inner.fan_out.delivery_listeners().remove(listener)
    }

    /// True while a provider is bound.
    pub fn is_bound(&self) -> bool {
        self.inner.binder.current().is_some()
    }

    /// Wait until a provider is bound, or `timeout` elapses.
    pub async fn wait_for_binding(&self, timeout: Duration) -> bool {
        self.inner.binder.wait_bound(timeout).await
    }

    pub fn is_running(&self) -> bool {
        *lock_ignore_poison(&self.inner.lifecycle) == Lifecycle::Running
    }

    /// Snapshot of the current options.
    pub fn options(&self) -> PublisherOptions {
        read_ignore_poison(&self.inner.options).as_ref().clone()
    }

    fn bound_provider(&self) -> Result<ProviderPtr> {
        // ---
        if *lock_ignore_poison(&self.inner.lifecycle) == Lifecycle::Stopped {
            return Err(PublishError::Stopped);
        }
        self.inner.binder.current().ok_or(PublishError::Unavailable)
    }

    fn open_watch(&self) {
        // ---
        let pid = read_ignore_poison(&self.inner.options).cloud_service_pid.clone();
        if let Err(e) = self.inner.binder.open(&self.inner.registry, &pid) {
            crate::log_warn!("publisher: no provider watch for `{pid}`: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::encode::decode_wire;
    use crate::provider::MemoryProvider;
    use crate::{DeviceMeasurement, MetricValue, PublisherBuilder};

    async fn running(options: PublisherOptions) -> (Publisher, Arc<MemoryProvider>) {
        // ---
        let registry = Arc::new(ProviderRegistry::new());
        let provider = MemoryProvider::new(options.cloud_service_pid.clone());
        registry.register_provider(provider.clone());

        let publisher = PublisherBuilder::new(registry)
            .options(options)
            .build()
            .unwrap();
        publisher.start().unwrap();
        assert!(publisher.wait_for_binding(Duration::from_secs(1)).await);
        (publisher, provider)
    }

    fn value_of(message: &OutboundMessage) -> f64 {
        let env = decode_wire(message.payload.clone()).unwrap();
        let body: DeviceMeasurement = env.decode_body().unwrap();
        body.measurement_value.unwrap()
    }

    #[tokio::test]
    async fn publish_before_binding_is_unavailable() {
        // ---
        let publisher = PublisherBuilder::new(Arc::new(ProviderRegistry::new()))
            .build()
            .unwrap();
        publisher.start().unwrap();

        let err = publisher
            .publish(Some(TelemetryMessage::new().with_metric("t", 1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Unavailable));
    }

    #[tokio::test]
    async fn absent_message_is_invalid_argument() {
        // ---
        let (publisher, provider) = running(PublisherOptions::default()).await;

        let err = publisher.publish(None).await.unwrap_err();

        assert!(matches!(err, PublishError::InvalidArgument(_)));
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn zero_fill_sends_unparseable_metric_as_zero() {
        // ---
        let (publisher, provider) = running(PublisherOptions::default()).await;
        let message = TelemetryMessage::new()
            .with_metric("answer", 42)
            .with_metric("ratio", "3.5")
            .with_metric("label", "abc");

        let receipt = publisher.publish(Some(message)).await.unwrap();

        assert_eq!(receipt, PublishReceipt { sent: 3, skipped: 0, failed: 0 });
        let values: Vec<f64> = provider.sent().iter().map(|s| value_of(&s.message)).collect();
        // Metrics iterate in name order: answer, label, ratio.
        assert_eq!(values, vec![42.0, 0.0, 3.5]);
    }

    #[tokio::test]
    async fn skip_policy_leaves_out_unparseable_metric() {
        // ---
        let options = PublisherOptions {
            coercion_policy: CoercionPolicy::Skip,
            ..PublisherOptions::default()
        };
        let (publisher, provider) = running(options).await;
        let message = TelemetryMessage::new()
            .with_metric("ok", 1.5)
            .with_metric("flag", MetricValue::Boolean(true));

        let receipt = publisher.publish(Some(message)).await.unwrap();

        assert_eq!(receipt, PublishReceipt { sent: 1, skipped: 1, failed: 0 });
        assert_eq!(provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn reject_policy_fails_before_any_send() {
        // ---
        let options = PublisherOptions {
            coercion_policy: CoercionPolicy::Reject,
            ..PublisherOptions::default()
        };
        let (publisher, provider) = running(options).await;
        let message = TelemetryMessage::new()
            .with_metric("a", 1.0)
            .with_metric("b", "nope");

        let err = publisher.publish(Some(message)).await.unwrap_err();

        assert!(matches!(err, PublishError::Coercion { ref metric, .. } if metric == "b"));
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_counted_not_returned() {
        // ---
        let (publisher, provider) = running(PublisherOptions::default()).await;
        provider.fail_sends(true);

        let receipt = publisher
            .publish(Some(TelemetryMessage::new().with_metric("a", 1).with_metric("b", 2)))
            .await
            .unwrap();

        assert_eq!(receipt, PublishReceipt { sent: 0, skipped: 0, failed: 2 });
        assert_eq!(receipt.total(), 2);
    }

    #[tokio::test]
    async fn measurement_carries_device_originator_and_timestamp() {
        // ---
        let (publisher, provider) = running(PublisherOptions::default()).await;
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);

        publisher
            .publish(Some(TelemetryMessage::new().with_timestamp(at).with_metric("t", 20.5)))
            .await
            .unwrap();

        let sent = provider.sent();
        let env = decode_wire(sent[0].message.payload.clone()).unwrap();
        let payload = Payload::try_from(&env).unwrap();
        let Payload::Measurement(mx) = payload else {
            panic!("expected a measurement");
        };
        assert_eq!(mx.device_token(), Some("memory-device"));
        assert_eq!(mx.originator(), Some("agent"));
        assert_eq!(mx.event_date(), Some(1_700_000_000_123));
        assert!(mx.update_state());
        assert_eq!(sent[0].message.routing.app_topic, "telemetry/data");
    }

    #[tokio::test]
    async fn stopped_publisher_refuses_work() {
        // ---
        let (publisher, provider) = running(PublisherOptions::default()).await;

        publisher.stop().await;
        publisher.stop().await;

        let err = publisher
            .publish(Some(TelemetryMessage::new().with_metric("t", 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Stopped));
        assert!(matches!(publisher.start(), Err(PublishError::Stopped)));
        assert!(matches!(
            publisher.update(PublisherOptions::default()),
            Err(PublishError::Stopped)
        ));
        assert_eq!(provider.observer_count(), 0);
    }

    #[tokio::test]
    async fn update_rebinds_to_new_selector() {
        // ---
        let (publisher, first) = running(PublisherOptions::default()).await;
        let second = MemoryProvider::new("cloud-b");
        publisher.inner.registry.register_provider(second.clone());

        let options = PublisherOptions {
            cloud_service_pid: "cloud-b".into(),
            compression: false,
            ..PublisherOptions::default()
        };
        publisher.update(options).unwrap();
        assert!(publisher.wait_for_binding(Duration::from_secs(1)).await);

        publisher
            .publish(Some(TelemetryMessage::new().with_metric("t", 1)))
            .await
            .unwrap();

        assert!(first.sent().is_empty());
        assert_eq!(first.observer_count(), 0);
        assert_eq!(second.sent().len(), 1);
        assert!(!second.sent()[0].message.compressed);
        assert_eq!(publisher.options().cloud_service_pid, "cloud-b");
    }

    #[tokio::test]
    async fn registration_payload_goes_through_the_same_chain() {
        // ---
        let (publisher, provider) = running(PublisherOptions::default()).await;
        let payload = crate::RegistrationPayload::builder()
            .with_device_token("dev-1")
            .with_area_token("area")
            .with_customer_token("acme")
            .with_device_type_token("rpi")
            .build();

        let id = publisher.publish_payload(payload.clone().into()).await.unwrap();

        let sent = provider.sent();
        assert_eq!(sent[0].message_id, id);
        let env = decode_wire(sent[0].message.payload.clone()).unwrap();
        assert_eq!(Payload::try_from(&env).unwrap(), Payload::Registration(payload));
    }
}
