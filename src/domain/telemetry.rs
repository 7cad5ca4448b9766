// src/domain/telemetry.rs

//! Telemetry messages as produced by local agent applications.
//!
//! A [`TelemetryMessage`] batches several named metrics that share one
//! timestamp. The publisher turns each metric into its own measurement
//! payload, so a message with three metrics yields three outbound messages.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single metric value, as loosely typed as agent applications send it.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl MetricValue {
    /// Interpret the value as a number.
    ///
    /// Numeric variants convert directly. Every other variant goes through
    /// its textual form and a float parse, so `"3.5"` yields `3.5` while
    /// `"abc"`, booleans and raw bytes yield `None`. A single trailing type
    /// suffix is accepted (`"1.5d"`, `"2F"`); hexadecimal floats such as
    /// `"0x1p3"` are not.
    pub fn coerce(&self) -> Option<f64> {
        // ---
        match self {
            MetricValue::Int(v) => Some(f64::from(*v)),
            // i64 → f64 loses precision above 2^53, same as any float widening.
            MetricValue::Long(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(f64::from(*v)),
            MetricValue::Double(v) => Some(*v),
            MetricValue::String(s) => parse_number(s),
            other => parse_number(&other.to_string()),
        }
    }
}

fn parse_number(text: &str) -> Option<f64> {
    // ---
    let text = text.trim();
    if let Ok(v) = text.parse::<f64>() {
        return Some(v);
    }
    text.strip_suffix(['d', 'D', 'f', 'F'])?.parse::<f64>().ok()
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Long(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Double(v) => write!(f, "{v}"),
            MetricValue::Boolean(v) => write!(f, "{v}"),
            MetricValue::String(v) => f.write_str(v),
            MetricValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

macro_rules! metric_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for MetricValue {
                fn from(value: $ty) -> Self {
                    MetricValue::$variant(value.into())
                }
            }
        )*
    };
}

metric_from! {
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    bool => Boolean,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
}

/// A batch of named metrics sharing one timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryMessage {
    timestamp: Option<SystemTime>,
    metrics: BTreeMap<String, MetricValue>,
}

impl TelemetryMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Add or replace one metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.metrics.insert(name.into(), value.into());
    }

    /// Timestamp in milliseconds since the Unix epoch; `None` when unset or
    /// before the epoch.
    pub fn timestamp_millis(&self) -> Option<u64> {
        let since_epoch = self.timestamp?.duration_since(UNIX_EPOCH).ok()?;
        u64::try_from(since_epoch.as_millis()).ok()
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
