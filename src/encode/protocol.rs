// src/encode/protocol.rs

//! Protocol encoders: domain payload → binary envelope.
//!
//! Each payload variant has one [`ProtocolEncoder`]. The encoder supplies the
//! variant's fixed [`Command`] and a `build_body` step; the provided
//! [`ProtocolEncoder::build_envelope`] fixes the outer framing, so adding an
//! event type means implementing those two methods and nothing else.
//!
//! ## Framing
//!
//! ```text
//! varint(len(header)) | Header | varint(len(body)) | body
//! ```
//!
//! Both parts are protobuf messages written length-delimited, one after the
//! other.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use super::wire::{Command, DeviceMeasurement, DeviceRegistrationRequest, Header};
use crate::{
    // ---
    MeasurementPayload,
    Payload,
    PublishError,
    RegistrationPayload,
    Result,
};

/// The wire unit produced once per payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub command: Command,
    pub device_token: Option<String>,
    pub originator: Option<String>,

    /// Serialized body message, without its length prefix.
    pub body: Bytes,
}

impl Envelope {
    /// Write the envelope in its framed binary form.
    pub fn to_bytes(&self) -> Result<Bytes> {
        // ---
        let header = Header {
            command: self.command as i32,
            device_token: self.device_token.clone(),
            originator: self.originator.clone(),
        };

        let header_len = header.encoded_len();
        let mut buf = BytesMut::with_capacity(header_len + self.body.len() + 20);

        header
            .encode_length_delimited(&mut buf)
            .map_err(|e| PublishError::Encode(format!("envelope header: {e}")))?;
        prost::encoding::encode_varint(self.body.len() as u64, &mut buf);
        buf.put_slice(&self.body);

        Ok(buf.freeze())
    }

    /// Parse a framed envelope.
    ///
    /// # Errors
    ///
    /// [`PublishError::Decode`] for malformed protobuf and
    /// [`PublishError::InvalidEnvelope`] for a truncated body, trailing bytes
    /// or an unknown command.
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        // ---
        let header = Header::decode_length_delimited(&mut bytes)?;
        let body_len = prost::encoding::decode_varint(&mut bytes)?;
        let body_len = usize::try_from(body_len)
            .map_err(|_| PublishError::InvalidEnvelope("body length overflow".into()))?;

        if bytes.remaining() < body_len {
            return Err(PublishError::InvalidEnvelope(format!(
                "body truncated: expected {body_len} bytes, found {}",
                bytes.remaining()
            )));
        }
        let body = bytes.split_to(body_len);
        if bytes.has_remaining() {
            return Err(PublishError::InvalidEnvelope(format!(
                "{} trailing bytes after body",
                bytes.remaining()
            )));
        }

        let command = match Command::try_from(header.command) {
            Ok(Command::Unspecified) | Err(_) => {
                return Err(PublishError::InvalidEnvelope(format!(
                    "unknown command {}",
                    header.command
                )))
            }
            Ok(command) => command,
        };

        Ok(Self {
            command,
            device_token: header.device_token,
            originator: header.originator,
            body,
        })
    }

    /// Decode the body as the protobuf message `M`.
    pub fn decode_body<M: Message + Default>(&self) -> Result<M> {
        Ok(M::decode(self.body.clone())?)
    }
}

impl TryFrom<&Envelope> for Payload {
    type Error = PublishError;

    /// Re-derive the domain payload an envelope was built from.
    fn try_from(env: &Envelope) -> Result<Self> {
        // ---
        match env.command {
            Command::SendRegistration => {
                let body: DeviceRegistrationRequest = env.decode_body()?;
                Ok(Payload::Registration(RegistrationPayload {
                    device_token: env.device_token.clone(),
                    area_token: body.area_token,
                    customer_token: body.customer_token,
                    device_type_token: body.device_type_token,
                    metadata: body.metadata,
                }))
            }
            Command::SendMeasurement => {
                let body: DeviceMeasurement = env.decode_body()?;
                Ok(Payload::Measurement(MeasurementPayload {
                    device_token: env.device_token.clone(),
                    measurement_id: body.measurement_id,
                    value: body.measurement_value,
                    event_date: body.event_date,
                    update_state: body.update_state.unwrap_or(false),
                    originator: env.originator.clone(),
                    metadata: body.metadata,
                }))
            }
            other => Err(PublishError::InvalidEnvelope(format!(
                "no payload mapping for {other:?}"
            ))),
        }
    }
}

/// Strategy turning one payload variant into an [`Envelope`].
pub trait ProtocolEncoder: Send + Sync {
    /// Fixed command identifier of the handled variant.
    fn command(&self) -> Command;

    /// Map the payload's fields into the serialized body message.
    ///
    /// Implementations must fail with [`PublishError::Encode`] when handed a
    /// payload of another variant.
    fn build_body(&self, payload: &Payload) -> Result<Bytes>;

    /// Resolve the command, build the body and wrap both into an envelope.
    fn build_envelope(&self, payload: &Payload) -> Result<Envelope> {
        // ---
        let command = self.command();
        let body = self.build_body(payload)?;

        let (device_token, originator) = match payload {
            Payload::Registration(reg) => (reg.device_token.clone(), None),
            Payload::Measurement(mx) => (mx.device_token.clone(), mx.originator.clone()),
        };

        Ok(Envelope {
            command,
            device_token,
            originator,
            body,
        })
    }
}

/// Encodes [`Payload::Registration`] as [`Command::SendRegistration`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistrationEncoder;

impl ProtocolEncoder for RegistrationEncoder {
    fn command(&self) -> Command {
        Command::SendRegistration
    }

    fn build_body(&self, payload: &Payload) -> Result<Bytes> {
        // ---
        let Payload::Registration(reg) = payload else {
            return Err(variant_mismatch("registration", payload));
        };

        let body = DeviceRegistrationRequest {
            area_token: Some(required(&reg.area_token, "area token")?),
            customer_token: Some(required(&reg.customer_token, "customer token")?),
            device_type_token: Some(required(&reg.device_type_token, "device type token")?),
            metadata: reg.metadata.clone(),
        };

        Ok(Bytes::from(body.encode_to_vec()))
    }
}

/// Encodes [`Payload::Measurement`] as [`Command::SendMeasurement`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MeasurementEncoder;

impl ProtocolEncoder for MeasurementEncoder {
    fn command(&self) -> Command {
        Command::SendMeasurement
    }

    fn build_body(&self, payload: &Payload) -> Result<Bytes> {
        // ---
        let Payload::Measurement(mx) = payload else {
            return Err(variant_mismatch("measurement", payload));
        };

        required(&mx.device_token, "device token")?;
        let value = mx
            .value
            .ok_or_else(|| PublishError::Encode("measurement value is required".into()))?;

        let body = DeviceMeasurement {
            measurement_id: Some(required(&mx.measurement_id, "measurement id")?),
            measurement_value: Some(value),
            event_date: mx.event_date,
            update_state: Some(mx.update_state),
            metadata: mx.metadata.clone(),
        };

        Ok(Bytes::from(body.encode_to_vec()))
    }
}

static REGISTRATION_ENCODER: RegistrationEncoder = RegistrationEncoder;
static MEASUREMENT_ENCODER: MeasurementEncoder = MeasurementEncoder;

/// Select the protocol encoder for a payload's runtime variant.
pub fn encoder_for(payload: &Payload) -> &'static dyn ProtocolEncoder {
    match payload {
        Payload::Registration(_) => &REGISTRATION_ENCODER,
        Payload::Measurement(_) => &MEASUREMENT_ENCODER,
    }
}

fn required(field: &Option<String>, name: &str) -> Result<String> {
    field
        .clone()
        .ok_or_else(|| PublishError::Encode(format!("{name} is required")))
}

fn variant_mismatch(expected: &str, got: &Payload) -> PublishError {
    PublishError::Encode(format!(
        "expected a {expected} payload, got a {} payload",
        got.kind()
    ))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn registration() -> Payload {
        RegistrationPayload::builder()
            .with_device_token("dev-1")
            .with_area_token("area-7")
            .with_customer_token("acme")
            .with_device_type_token("rpi")
            .with_metadata("fw", "1.2.0")
            .with_metadata("site", "north")
            .build()
            .into()
    }

    fn measurement() -> Payload {
        MeasurementPayload::builder()
            .with_device_token("dev-1")
            .with_measurement_id("temp")
            .with_measurement_value(21.3)
            .with_event_date(1_700_000_000_000)
            .with_update_state(true)
            .with_originator("agent")
            .build()
            .into()
    }

    #[test]
    fn registration_round_trips_through_envelope() {
        // ---
        let payload = registration();
        let env = encoder_for(&payload).build_envelope(&payload).unwrap();
        assert_eq!(env.command, Command::SendRegistration);

        let decoded = Envelope::decode(env.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(Payload::try_from(&decoded).unwrap(), payload);
    }

    #[test]
    fn measurement_round_trips_through_envelope() {
        // ---
        let payload = measurement();
        let env = encoder_for(&payload).build_envelope(&payload).unwrap();
        assert_eq!(env.command, Command::SendMeasurement);
        assert_eq!(env.device_token.as_deref(), Some("dev-1"));
        assert_eq!(env.originator.as_deref(), Some("agent"));

        let decoded = Envelope::decode(env.to_bytes().unwrap()).unwrap();
        let body: DeviceMeasurement = decoded.decode_body().unwrap();
        assert_eq!(body.measurement_id.as_deref(), Some("temp"));
        assert_eq!(body.measurement_value, Some(21.3));
        assert_eq!(Payload::try_from(&decoded).unwrap(), payload);
    }

    #[test]
    fn encoder_rejects_other_variant() {
        // ---
        let err = MeasurementEncoder.build_body(&registration()).unwrap_err();
        assert!(matches!(err, PublishError::Encode(_)), "got {err:?}");

        let err = RegistrationEncoder.build_body(&measurement()).unwrap_err();
        assert!(matches!(err, PublishError::Encode(_)), "got {err:?}");
    }

    #[test]
    fn missing_required_fields_fail_at_encode_time() {
        // ---
        let no_value: Payload = MeasurementPayload::builder()
            .with_device_token("dev-1")
            .with_measurement_id("temp")
            .build()
            .into();
        assert!(matches!(
            encoder_for(&no_value).build_envelope(&no_value),
            Err(PublishError::Encode(_))
        ));

        let no_area: Payload = RegistrationPayload::builder()
            .with_customer_token("acme")
            .with_device_type_token("rpi")
            .build()
            .into();
        assert!(matches!(
            encoder_for(&no_area).build_envelope(&no_area),
            Err(PublishError::Encode(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_and_trailing_bytes() {
        // ---
        let payload = measurement();
        let bytes = encoder_for(&payload)
            .build_envelope(&payload)
            .unwrap()
            .to_bytes()
            .unwrap();

        let truncated = bytes.slice(..bytes.len() - 1);
        assert!(Envelope::decode(truncated).is_err());

        let mut padded = BytesMut::from(&bytes[..]);
        padded.put_u8(0);
        assert!(matches!(
            Envelope::decode(padded.freeze()),
            Err(PublishError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn framed_envelope_never_starts_with_gzip_magic() {
        // ---
        let payload = measurement();
        let bytes = encoder_for(&payload)
            .build_envelope(&payload)
            .unwrap()
            .to_bytes()
            .unwrap();

        assert!(!(bytes[0] == 0x1f && bytes[1] == 0x8b));
    }
}
