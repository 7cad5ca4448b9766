// src/domain/payload.rs

//! Domain event payloads.
//!
//! A [`Payload`] is one device event destined for the ingestion endpoint.
//! Payloads are immutable once built. Builders accept any combination of
//! fields; required fields are checked only when a protocol encoder turns the
//! payload into an envelope, so a half-filled payload fails at encode time
//! rather than at construction.

use std::collections::HashMap;

/// One domain event.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Device registration request.
    Registration(RegistrationPayload),

    /// A single named measurement.
    Measurement(MeasurementPayload),
}

impl Payload {
    /// Short human-readable name of the variant, used in log and error text.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Registration(_) => "registration",
            Payload::Measurement(_) => "measurement",
        }
    }
}

impl From<RegistrationPayload> for Payload {
    fn from(value: RegistrationPayload) -> Self {
        Payload::Registration(value)
    }
}

impl From<MeasurementPayload> for Payload {
    fn from(value: MeasurementPayload) -> Self {
        Payload::Measurement(value)
    }
}

/// Registration of a device against an area, customer and device type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationPayload {
    pub(crate) device_token: Option<String>,
    pub(crate) area_token: Option<String>,
    pub(crate) customer_token: Option<String>,
    pub(crate) device_type_token: Option<String>,
    pub(crate) metadata: HashMap<String, String>,
}

impl RegistrationPayload {
    /// Start building a registration payload.
    pub fn builder() -> RegistrationBuilder {
        RegistrationBuilder::default()
    }

    pub fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref()
    }

    pub fn area_token(&self) -> Option<&str> {
        self.area_token.as_deref()
    }

    pub fn customer_token(&self) -> Option<&str> {
        self.customer_token.as_deref()
    }

    pub fn device_type_token(&self) -> Option<&str> {
        self.device_type_token.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

/// Fluent builder for [`RegistrationPayload`].
#[derive(Debug, Default)]
pub struct RegistrationBuilder {
    inner: RegistrationPayload,
}

impl RegistrationBuilder {
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.inner.device_token = Some(token.into());
        self
    }

    pub fn with_area_token(mut self, token: impl Into<String>) -> Self {
        self.inner.area_token = Some(token.into());
        self
    }

    pub fn with_customer_token(mut self, token: impl Into<String>) -> Self {
        self.inner.customer_token = Some(token.into());
        self
    }

    pub fn with_device_type_token(mut self, token: impl Into<String>) -> Self {
        self.inner.device_type_token = Some(token.into());
        self
    }

    /// Add one metadata entry. Later entries with the same key win.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.metadata.insert(key.into(), value.into());
        self
    }

    /// Add every entry of `entries` to the metadata map.
    pub fn with_all_metadata<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.inner
            .metadata
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> RegistrationPayload {
        self.inner
    }
}

/// A single measurement reported by a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementPayload {
    pub(crate) device_token: Option<String>,
    pub(crate) measurement_id: Option<String>,
    pub(crate) value: Option<f64>,
    pub(crate) event_date: Option<u64>,
    pub(crate) update_state: bool,
    pub(crate) originator: Option<String>,
    pub(crate) metadata: HashMap<String, String>,
}

impl MeasurementPayload {
    /// Start building a measurement payload.
    pub fn builder() -> MeasurementBuilder {
        MeasurementBuilder::default()
    }

    pub fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref()
    }

    pub fn measurement_id(&self) -> Option<&str> {
        self.measurement_id.as_deref()
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Event date in milliseconds since the Unix epoch.
    pub fn event_date(&self) -> Option<u64> {
        self.event_date
    }

    pub fn update_state(&self) -> bool {
        self.update_state
    }

    pub fn originator(&self) -> Option<&str> {
        self.originator.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

/// Fluent builder for [`MeasurementPayload`].
#[derive(Debug, Default)]
pub struct MeasurementBuilder {
    inner: MeasurementPayload,
}

impl MeasurementBuilder {
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.inner.device_token = Some(token.into());
        self
    }

    pub fn with_measurement_id(mut self, id: impl Into<String>) -> Self {
        self.inner.measurement_id = Some(id.into());
        self
    }

    pub fn with_measurement_value(mut self, value: f64) -> Self {
        self.inner.value = Some(value);
        self
    }

    /// Event date in milliseconds since the Unix epoch.
    pub fn with_event_date(mut self, millis: u64) -> Self {
        self.inner.event_date = Some(millis);
        self
    }

    pub fn with_update_state(mut self, update_state: bool) -> Self {
        self.inner.update_state = update_state;
        self
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.inner.originator = Some(originator.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> MeasurementPayload {
        self.inner
    }
}
