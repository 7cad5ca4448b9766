//! Encoder chain.
//!
//! Turns a typed [`Payload`] into wire bytes in two stages:
//!
//! 1. [`ProtoBufEncoder`] selects the [`ProtocolEncoder`] for the payload's
//!    variant and writes the framed envelope.
//! 2. Optionally, [`GzipEncoder`] wraps any encoder and swaps in the gzip
//!    form when that is strictly shorter.
//!
//! Both stages implement [`PayloadEncoder`], so they compose freely.

mod gzip;
mod protocol;
mod wire;

use bytes::Bytes;

use crate::{Payload, Result};

pub use gzip::{compress, decode_wire, is_gzip, GzipEncoder};
pub use protocol::{
    //
    encoder_for,
    Envelope,
    MeasurementEncoder,
    ProtocolEncoder,
    RegistrationEncoder,
};
pub use wire::{
    //
    Command,
    DeviceMeasurement,
    DeviceRegistrationRequest,
    Header,
};

/// A stage of the encoder chain.
pub trait PayloadEncoder: Send + Sync {
    /// Produce wire bytes for `payload`.
    ///
    /// # Errors
    ///
    /// [`PublishError::Encode`](crate::PublishError::Encode) for payloads the
    /// protocol encoders reject, [`PublishError::Io`](crate::PublishError::Io)
    /// for byte-level failures.
    fn encode(&self, payload: &Payload) -> Result<Bytes>;
}

impl<E: PayloadEncoder + ?Sized> PayloadEncoder for Box<E> {
    fn encode(&self, payload: &Payload) -> Result<Bytes> {
        (**self).encode(payload)
    }
}

/// Base encoder: canonical framed protobuf envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoBufEncoder;

impl PayloadEncoder for ProtoBufEncoder {
    fn encode(&self, payload: &Payload) -> Result<Bytes> {
        encoder_for(payload).build_envelope(payload)?.to_bytes()
    }
}

/// Build the encoder chain for the given compression setting.
pub fn encoder_chain(compression: bool) -> Box<dyn PayloadEncoder> {
    if compression {
        Box::new(GzipEncoder::new(ProtoBufEncoder))
    } else {
        Box::new(ProtoBufEncoder)
    }
}
