// src/encode/gzip.rs

//! Size-reducing decorator over any [`PayloadEncoder`].
//!
//! The decorator gzips whatever the inner encoder produced and keeps the
//! compressed form only when it is strictly shorter, so it never makes a
//! payload larger. Small measurements usually go out raw; large registration
//! metadata usually goes out compressed.
//!
//! Nothing is added to the wire to say which form was chosen. Consumers tell
//! the two apart by gzip's own magic bytes, which a framed envelope can never
//! start with (see [`decode_wire`]).

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{Envelope, PayloadEncoder};
use crate::{Payload, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Gzip decorator around an inner encoder.
#[derive(Debug, Clone)]
pub struct GzipEncoder<E> {
    inner: E,
    level: Compression,
}

impl<E: PayloadEncoder> GzipEncoder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            level: Compression::default(),
        }
    }

    pub fn with_level(inner: E, level: Compression) -> Self {
        Self { inner, level }
    }
}

impl<E: PayloadEncoder> PayloadEncoder for GzipEncoder<E> {
    fn encode(&self, payload: &Payload) -> Result<Bytes> {
        // ---
        let source = self.inner.encode(payload)?;
        let compressed = compress(&source, self.level)?;

        if compressed.len() < source.len() {
            crate::log_debug!(
                "gzip {} payload: {} -> {} bytes",
                payload.kind(),
                source.len(),
                compressed.len()
            );
            Ok(Bytes::from(compressed))
        } else {
            Ok(source)
        }
    }
}

/// Gzip `data` at the given level.
pub fn compress(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), level);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// True when `bytes` starts with the gzip magic number.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Decode bytes produced by either the plain or the gzip encoder chain.
pub fn decode_wire(bytes: Bytes) -> Result<Envelope> {
    // ---
    if !is_gzip(&bytes) {
        return Envelope::decode(bytes);
    }

    let mut raw = Vec::with_capacity(bytes.len() * 2);
    GzDecoder::new(&bytes[..]).read_to_end(&mut raw)?;
    Envelope::decode(Bytes::from(raw))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::encode::ProtoBufEncoder;
    use crate::{MeasurementPayload, PublishError, RegistrationPayload};

    /// Emits a fixed byte string regardless of the payload.
    struct Fixed(Bytes);

    impl PayloadEncoder for Fixed {
        fn encode(&self, _payload: &Payload) -> Result<Bytes> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl PayloadEncoder for Failing {
        fn encode(&self, _payload: &Payload) -> Result<Bytes> {
            Err(PublishError::Encode("boom".into()))
        }
    }

    fn any_payload() -> Payload {
        MeasurementPayload::builder().build().into()
    }

    #[test]
    fn incompressible_input_is_returned_unchanged() {
        // ---
        let raw = Bytes::from_static(b"\x12\x07abcdefg");
        let out = GzipEncoder::new(Fixed(raw.clone()))
            .encode(&any_payload())
            .unwrap();

        assert_eq!(out, raw);
        assert!(!is_gzip(&out));
    }

    #[test]
    fn repetitive_input_is_compressed() {
        // ---
        let raw = Bytes::from(vec![b'a'; 4096]);
        let out = GzipEncoder::new(Fixed(raw.clone()))
            .encode(&any_payload())
            .unwrap();

        assert!(out.len() < raw.len());
        assert!(is_gzip(&out));
    }

    #[test]
    fn output_never_exceeds_inner_length() {
        // ---
        for len in [0_usize, 1, 7, 20, 64, 300, 2048] {
            let raw: Vec<u8> = (0..len).map(|i| (i * 131 % 251) as u8).collect();
            let raw = Bytes::from(raw);
            let out = GzipEncoder::new(Fixed(raw.clone()))
                .encode(&any_payload())
                .unwrap();
            assert!(out.len() <= raw.len(), "len {len} grew to {}", out.len());
        }
    }

    #[test]
    fn inner_failure_propagates() {
        // ---
        let err = GzipEncoder::new(Failing).encode(&any_payload()).unwrap_err();
        assert!(matches!(err, PublishError::Encode(_)));
    }

    #[test]
    fn decode_wire_accepts_both_forms() {
        // ---
        let payload: Payload = RegistrationPayload::builder()
            .with_area_token("area")
            .with_customer_token("customer")
            .with_device_type_token("type")
            .with_all_metadata((0..64).map(|i| (format!("key-{i}"), "repeated value".to_string())))
            .build()
            .into();

        let raw = ProtoBufEncoder.encode(&payload).unwrap();
        let zipped = GzipEncoder::new(ProtoBufEncoder).encode(&payload).unwrap();
        assert!(is_gzip(&zipped));

        let from_raw = decode_wire(raw).unwrap();
        let from_zipped = decode_wire(zipped).unwrap();
        assert_eq!(from_raw, from_zipped);
        assert_eq!(Payload::try_from(&from_zipped).unwrap(), payload);
    }

    #[test]
    fn level_none_still_never_grows_output() {
        // ---
        let raw = Bytes::from(vec![b'a'; 4096]);

        let stored = GzipEncoder::with_level(Fixed(raw.clone()), Compression::none())
            .encode(&any_payload())
            .unwrap();
        let best = GzipEncoder::with_level(Fixed(raw.clone()), Compression::best())
            .encode(&any_payload())
            .unwrap();

        // Stored blocks add framing, so the raw bytes win.
        assert_eq!(stored, raw);
        assert!(is_gzip(&best));
        assert!(best.len() < raw.len());
    }
}
