//! Publisher builder.
//!
//! Provides a fluent builder API for configuring [`Publisher`] instances
//! over a provider registry.

use std::sync::Arc;

use crate::config::{CoercionPolicy, PublisherOptions};
use crate::registry::ProviderRegistry;
use crate::{Publisher, QoS, Result};

/// Builder for creating publisher instances.
///
/// Starts from [`PublisherOptions::default`]; each setter overrides one
/// option. [`build`](Self::build) validates the result.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use cloud_publisher::{MemoryProvider, ProviderRegistry, PublisherBuilder, QoS};
///
/// # async fn example() -> cloud_publisher::Result<()> {
/// let registry = Arc::new(ProviderRegistry::new());
/// registry.register_provider(MemoryProvider::new("cloud-service"));
///
/// let publisher = PublisherBuilder::new(registry)
///     .app_id("app1")
///     .qos(QoS::AtLeastOnce)
///     .priority(1)
///     .build()?;
/// publisher.start()?;
/// # Ok(())
/// # }
/// ```
pub struct PublisherBuilder {
    // ---
    registry: Arc<ProviderRegistry>,
    options: PublisherOptions,
}

impl PublisherBuilder {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            options: PublisherOptions::default(),
        }
    }

    /// Replace all options at once, e.g. with ones read by
    /// [`PublisherOptions::from_properties`].
    pub fn options(mut self, options: PublisherOptions) -> Self {
        self.options = options;
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.options.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.options.retain = retain;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }

    /// Set the application id.
    ///
    /// Default: `"W1"`.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.options.app_id = app_id.into();
        self
    }

    /// Set the persistent id of the provider to bind.
    ///
    /// Default: `"cloud-service"`.
    pub fn cloud_service_pid(mut self, pid: impl Into<String>) -> Self {
        self.options.cloud_service_pid = pid.into();
        self
    }

    /// Override the provider's destination topic.
    pub fn app_topic(mut self, topic: impl Into<String>) -> Self {
        self.options.app_topic = Some(topic.into());
        self
    }

    pub fn originator(mut self, originator: impl Into<String>) -> Self {
        self.options.originator = originator.into();
        self
    }

    /// Enable or disable gzip compression.
    ///
    /// Default: enabled.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.options.compression = enabled;
        self
    }

    pub fn coercion_policy(mut self, policy: CoercionPolicy) -> Self {
        self.options.coercion_policy = policy;
        self
    }

    /// Set the number of listener dispatch workers.
    ///
    /// Default: 4.
    pub fn dispatch_workers(mut self, workers: usize) -> Self {
        self.options.dispatch_workers = workers;
        self
    }

    /// Build the publisher (consumes self).
    ///
    /// Must be called from within a tokio runtime. The publisher is created
    /// stopped; call [`Publisher::start`] to begin watching for a provider.
    pub fn build(self) -> Result<Publisher> {
        Publisher::new(self.registry, self.options)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::PublishError;

    #[tokio::test]
    async fn setters_override_defaults() {
        // ---
        let publisher = PublisherBuilder::new(Arc::new(ProviderRegistry::new()))
            .app_id("app1")
            .qos(QoS::ExactlyOnce)
            .retain(true)
            .priority(1)
            .app_topic("custom/topic")
            .originator("sensor-agent")
            .compression(false)
            .coercion_policy(CoercionPolicy::Reject)
            .dispatch_workers(2)
            .build()
            .unwrap();

        let options = publisher.options();
        assert_eq!(options.app_id, "app1");
        assert_eq!(options.qos, QoS::ExactlyOnce);
        assert!(options.retain);
        assert_eq!(options.priority, 1);
        assert_eq!(options.app_topic.as_deref(), Some("custom/topic"));
        assert_eq!(options.originator, "sensor-agent");
        assert!(!options.compression);
        assert_eq!(options.coercion_policy, CoercionPolicy::Reject);
        assert_eq!(options.dispatch_workers, 2);
        assert!(!publisher.is_running());
    }

    #[tokio::test]
    async fn build_validates_options() {
        // ---
        let result = PublisherBuilder::new(Arc::new(ProviderRegistry::new()))
            .cloud_service_pid("")
            .build();
        assert!(matches!(result, Err(PublishError::MissingConfig(_))));

        let result = PublisherBuilder::new(Arc::new(ProviderRegistry::new()))
            .dispatch_workers(0)
            .build();
        assert!(matches!(result, Err(PublishError::InvalidConfig(_))));
    }
}
