//! Domain layer public interface.
//!
//! This module defines the abstractions that are independent of any concrete
//! provider, registry or wire format: event payloads, telemetry messages,
//! the provider boundary and the listener traits.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod listener;
mod payload;
mod provider;
mod telemetry;

// --- Payload re-exports ---

pub use payload::{
    //
    MeasurementBuilder,
    MeasurementPayload,
    Payload,
    RegistrationBuilder,
    RegistrationPayload,
};

// --- Telemetry re-exports ---

pub use telemetry::{
    //
    MetricValue,
    TelemetryMessage,
};

// --- Provider re-exports ---

pub(crate) use provider::same_object;
pub use provider::{
    //
    ObserverPtr,
    OutboundMessage,
    Provider,
    ProviderBase,
    ProviderObserver,
    ProviderPtr,
    QoS,
    RoutingMetadata,
};

// --- Listener re-exports ---

pub use listener::{
    //
    ConnectionListener,
    ConnectionListenerPtr,
    DeliveryListener,
    DeliveryListenerPtr,
};
