// src/domain/provider.rs

//! Transport provider abstractions.
//!
//! A provider is the external component that actually moves bytes to the
//! ingestion endpoint (an MQTT client, a test double, ...). The publisher
//! treats it as opaque: it hands over an [`OutboundMessage`] and receives a
//! [`MessageId`] back, and it observes connection and delivery events through
//! a [`ProviderObserver`] attached while the provider is bound.
//!
//! Concrete implementations live under `src/provider/`.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{MessageId, PublishError, Result};

/// MQTT-style delivery guarantee requested for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Assured single delivery.
    ExactlyOnce,
}

impl TryFrom<i64> for QoS {
    type Error = PublishError;

    fn try_from(value: i64) -> Result<Self> {
        // ---
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(PublishError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<QoS> for i64 {
    fn from(value: QoS) -> Self {
        match value {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Routing metadata attached to every outbound message.
///
/// All fields come from publisher configuration (or, for the topic, from the
/// bound provider), never from the event being published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingMetadata {
    /// Destination topic on the ingestion endpoint.
    pub app_topic: String,
    /// Application identifier used to scope delivery confirmations.
    pub app_id: String,
    pub qos: QoS,
    pub retain: bool,
    pub priority: i32,
}

/// Encoded bytes plus routing metadata, as handed to a provider.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Wire bytes produced by the encoder chain.
    pub payload: Bytes,

    /// Where and how the provider should deliver the payload.
    pub routing: RoutingMetadata,

    /// True when the payload is the gzip form rather than the raw envelope.
    ///
    /// Informational only; nothing is added to the wire to mark it.
    pub compressed: bool,
}

/// Identity and reporting fields shared by every provider implementation.
///
/// Concrete providers embed this as a field named `base` and return it from
/// [`Provider::base`], which lets the trait supply the accessors.
#[derive(Debug, Clone)]
pub struct ProviderBase {
    /// Persistent identity the publisher selects on (`service.pid`).
    pub pid: String,

    /// Display name configured for the device, if any.
    pub device_display_name: Option<String>,

    /// Device name reported by the host system.
    pub system_device_name: String,

    /// Topic the provider publishes application data to.
    pub app_topic: String,
}

impl ProviderBase {
    pub fn new(
        pid: impl Into<String>,
        system_device_name: impl Into<String>,
        app_topic: impl Into<String>,
    ) -> Self {
        // ---
        Self {
            pid: pid.into(),
            device_display_name: None,
            system_device_name: system_device_name.into(),
            app_topic: app_topic.into(),
        }
    }

    /// Set the configured display name, which takes precedence over the
    /// system device name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.device_display_name = Some(name.into());
        self
    }
}

/// Callbacks a provider raises towards whoever is bound to it.
///
/// Providers call these from their own threads or tasks. Implementations must
/// return quickly; the publisher's implementation only enqueues work.
pub trait ProviderObserver: Send + Sync {
    fn on_disconnected(&self);

    fn on_connection_lost(&self);

    fn on_connection_established(&self);

    /// A previously sent message was confirmed by the remote endpoint.
    fn on_message_confirmed(&self, message_id: &MessageId, topic: &str);
}

/// Shared observer pointer.
pub type ObserverPtr = Arc<dyn ProviderObserver>;

/// Transport provider abstraction.
///
/// Implementations must ensure that:
/// - `send()` hands the message to the underlying transport and returns
///   without waiting for remote acknowledgement; acknowledgement, if any,
///   arrives later through [`ProviderObserver::on_message_confirmed`].
/// - observers attached with `attach_observer()` receive every subsequent
///   lifecycle and confirmation event until detached.
/// - retry and reconnect policy is the provider's own business.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    // ---
    /// Returns a reference to the shared identity fields.
    fn base(&self) -> &ProviderBase;

    /// Persistent identity used by registry filters.
    fn pid(&self) -> &str {
        &self.base().pid
    }

    /// Device name to report measurements under: the configured display
    /// name when present, otherwise the system device name.
    fn device_name(&self) -> &str {
        let base = self.base();
        base.device_display_name
            .as_deref()
            .unwrap_or(&base.system_device_name)
    }

    /// Topic application data is published to.
    fn app_topic(&self) -> &str {
        &self.base().app_topic
    }

    /// Hand one message to the transport.
    async fn send(&self, message: OutboundMessage) -> Result<MessageId>;

    /// Open the connection to the remote endpoint.
    async fn connect(&self) -> Result<()>;

    /// Close the connection to the remote endpoint.
    async fn disconnect(&self) -> Result<()>;

    /// Start delivering lifecycle and confirmation events to `observer`.
    fn attach_observer(&self, observer: ObserverPtr);

    /// Stop delivering events to `observer`. Unknown observers are ignored.
    fn detach_observer(&self, observer: &ObserverPtr);
}

/// Shared provider pointer.
pub type ProviderPtr = Arc<dyn Provider>;

/// Pointer identity of a trait object, ignoring its vtable.
pub(crate) fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
