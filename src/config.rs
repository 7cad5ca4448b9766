//! Publisher configuration.
//!
//! Options arrive as a flat property set (the keys a management agent hands
//! to the component on activation or update) and are deserialized with
//! `serde` into [`PublisherOptions`]. Missing keys take their defaults and
//! unknown keys are ignored.
//!
//! | key               | type   | default           |
//! |-------------------|--------|-------------------|
//! | `qos`             | 0..=2  | 0                 |
//! | `retain`          | bool   | false             |
//! | `priority`        | int    | 7                 |
//! | `appId`           | string | `"W1"`            |
//! | `cloudServicePid` | string | `"cloud-service"` |
//! | `appTopic`        | string | provider's topic  |
//! | `originator`      | string | `"agent"`         |
//! | `compression`     | bool   | true              |
//! | `coercionPolicy`  | string | `"zeroFill"`      |
//! | `dispatchWorkers` | int    | 4                 |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{PublishError, QoS, Result, RoutingMetadata};

/// What `publish` does with a metric that cannot be read as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoercionPolicy {
    /// Send the measurement with value `0.0`.
    #[default]
    ZeroFill,
    /// Leave the metric out and count it as skipped.
    Skip,
    /// Fail the whole publish before anything is sent.
    Reject,
}

/// Runtime options of a [`Publisher`](crate::Publisher).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublisherOptions {
    // ---
    pub qos: QoS,
    pub retain: bool,
    pub priority: i32,

    /// Application identifier. Also scopes delivery confirmations: only
    /// topics containing it are forwarded.
    pub app_id: String,

    /// Persistent id of the transport provider to bind.
    pub cloud_service_pid: String,

    /// Destination topic. `None` uses the bound provider's topic.
    pub app_topic: Option<String>,

    /// Originator tag stamped on every measurement.
    pub originator: String,

    /// Wrap the protobuf encoder with gzip.
    pub compression: bool,

    pub coercion_policy: CoercionPolicy,

    /// Worker tasks running listener callbacks.
    pub dispatch_workers: usize,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            retain: false,
            priority: 7,
            app_id: "W1".into(),
            cloud_service_pid: "cloud-service".into(),
            app_topic: None,
            originator: "agent".into(),
            compression: true,
            coercion_policy: CoercionPolicy::ZeroFill,
            dispatch_workers: 4,
        }
    }
}

impl PublisherOptions {
    /// Read options from a property set.
    ///
    /// # Errors
    ///
    /// [`PublishError::InvalidConfig`] for a wrong-typed or out-of-range
    /// value, [`PublishError::MissingConfig`] for an empty provider selector.
    pub fn from_properties(properties: &Map<String, Value>) -> Result<Self> {
        // ---
        let options: Self = serde_json::from_value(Value::Object(properties.clone()))
            .map_err(|e| PublishError::InvalidConfig(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Read options from a JSON object document.
    pub fn from_json(document: &str) -> Result<Self> {
        // ---
        let value: Value = serde_json::from_str(document)?;
        match value {
            Value::Object(map) => Self::from_properties(&map),
            other => Err(PublishError::InvalidConfig(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.cloud_service_pid.trim().is_empty() {
            return Err(PublishError::MissingConfig("cloudServicePid".into()));
        }
        if self.dispatch_workers == 0 {
            return Err(PublishError::InvalidConfig(
                "dispatchWorkers must be at least 1".into(),
            ));
        }
        if matches!(&self.app_topic, Some(topic) if topic.is_empty()) {
            return Err(PublishError::InvalidConfig("appTopic must not be empty".into()));
        }
        Ok(())
    }

    /// Routing metadata for a send through a provider whose own topic is
    /// `provider_topic`.
    pub fn routing(&self, provider_topic: &str) -> RoutingMetadata {
        RoutingMetadata {
            app_topic: self
                .app_topic
                .clone()
                .unwrap_or_else(|| provider_topic.to_string()),
            app_id: self.app_id.clone(),
            qos: self.qos,
            retain: self.retain,
            priority: self.priority,
        }
    }
}
