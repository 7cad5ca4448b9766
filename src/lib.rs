//! Telemetry publishing over a dynamically bound cloud transport.
//!
//! This library turns loosely typed agent telemetry into compact binary
//! envelopes and hands them to whichever transport provider currently
//! matches the configured selector. It handles provider discovery and
//! rebinding, metric coercion, protobuf/gzip encoding, and asynchronous
//! fan-out of connection and delivery events to registered listeners.
//!

// Import all sub modules once...
mod macros;

mod binder;
mod dispatch;
mod domain;
mod encode;
mod provider;
mod registry;

mod config;
mod publisher;
mod publisher_builder;

mod correlation;
mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use publisher::{PublishReceipt, Publisher};
pub use publisher_builder::PublisherBuilder;

pub use config::{CoercionPolicy, PublisherOptions};

pub use correlation::MessageId;
pub use error::{PublishError, Result};

pub use binder::ProviderBinder;
pub use dispatch::{DispatchPool, FanOut, ListenerSet};
pub use provider::{MemoryProvider, SentMessage};

pub use registry::{
    //
    Filter,
    Properties,
    ProviderRegistry,
    Registration,
    RegistryEvent,
    ServiceId,
    Watch,
    OBJECT_CLASS,
    PROVIDER_INTERFACE,
    SERVICE_ID,
    SERVICE_PID,
};

pub use encode::{
    //
    compress,
    decode_wire,
    encoder_chain,
    encoder_for,
    is_gzip,
    Command,
    DeviceMeasurement,
    DeviceRegistrationRequest,
    Envelope,
    GzipEncoder,
    Header,
    MeasurementEncoder,
    PayloadEncoder,
    ProtoBufEncoder,
    ProtocolEncoder,
    RegistrationEncoder,
};

// --- public re-exports
pub use domain::{
    //
    ConnectionListener,
    ConnectionListenerPtr,
    DeliveryListener,
    DeliveryListenerPtr,
    MeasurementBuilder,
    MeasurementPayload,
    MetricValue,
    ObserverPtr,
    OutboundMessage,
    Payload,
    Provider,
    ProviderBase,
    ProviderObserver,
    ProviderPtr,
    QoS,
    RegistrationBuilder,
    RegistrationPayload,
    RoutingMetadata,
    TelemetryMessage,
};
