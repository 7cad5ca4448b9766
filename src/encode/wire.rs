// src/encode/wire.rs

//! Protobuf schema of the device event envelope.
//!
//! Messages are declared with prost derives rather than generated from a
//! `.proto` file. Every field is optional or named so that older decoders
//! skip fields they do not know.

use std::collections::HashMap;

/// Command identifier carried in every envelope header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Command {
    /// Never written; decoders see it only for headers without a command.
    Unspecified = 0,
    SendRegistration = 1,
    SendAcknowledgement = 2,
    SendMeasurement = 3,
    SendLocation = 4,
    SendAlert = 5,
}

/// Envelope header, written length-delimited ahead of the body.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(enumeration = "Command", tag = "1")]
    pub command: i32,

    #[prost(string, optional, tag = "2")]
    pub device_token: Option<String>,

    #[prost(string, optional, tag = "3")]
    pub originator: Option<String>,
}

/// Body of a [`Command::SendRegistration`] envelope.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceRegistrationRequest {
    #[prost(string, optional, tag = "1")]
    pub area_token: Option<String>,

    #[prost(string, optional, tag = "2")]
    pub customer_token: Option<String>,

    #[prost(string, optional, tag = "3")]
    pub device_type_token: Option<String>,

    #[prost(map = "string, string", tag = "4")]
    pub metadata: HashMap<String, String>,
}

/// Body of a [`Command::SendMeasurement`] envelope.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceMeasurement {
    #[prost(string, optional, tag = "1")]
    pub measurement_id: Option<String>,

    #[prost(double, optional, tag = "2")]
    pub measurement_value: Option<f64>,

    /// Milliseconds since the Unix epoch.
    #[prost(fixed64, optional, tag = "3")]
    pub event_date: Option<u64>,

    #[prost(bool, optional, tag = "4")]
    pub update_state: Option<bool>,

    #[prost(map = "string, string", tag = "5")]
    pub metadata: HashMap<String, String>,
}
