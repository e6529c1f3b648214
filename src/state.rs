// Shared state behind the trigger endpoint. `Clicker` owns the single-flight
// lock; everything a trigger needs from the outside world (configuration and
// the broker) is reached through trait objects so the handlers can be tested
// without a real broker or a mutated process environment.
use prometheus::{IntCounter, Registry};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{self, ConfigError, ConfigSource, CredentialPolicy};
use crate::mqtt::{PublishJob, Publisher, SessionError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerOptions {
    pub credential_policy: CredentialPolicy,
    /// Report failures to the HTTP caller instead of always answering `Opened`.
    pub strict_responses: bool,
}

#[derive(Clone)]
pub struct ClickerMetrics {
    pub triggers: IntCounter,
    pub publishes: IntCounter,
    pub config_missing: IntCounter,
    pub connection_failures: IntCounter,
}

impl ClickerMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = ClickerMetrics {
            triggers: IntCounter::new("clicker_triggers_total", "Trigger requests accepted")?,
            publishes: IntCounter::new("clicker_publishes_total", "Click commands published")?,
            config_missing: IntCounter::new(
                "clicker_config_missing_total",
                "Triggers aborted because configuration was missing or invalid",
            )?,
            connection_failures: IntCounter::new(
                "clicker_connection_failures_total",
                "Triggers whose broker session failed",
            )?,
        };
        registry.register(Box::new(metrics.triggers.clone()))?;
        registry.register(Box::new(metrics.publishes.clone()))?;
        registry.register(Box::new(metrics.config_missing.clone()))?;
        registry.register(Box::new(metrics.connection_failures.clone()))?;
        Ok(metrics)
    }
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Published(PublishJob),
    ConfigMissing(ConfigError),
    ConnectionFailure(SessionError),
}

pub struct Clicker {
    lock: Mutex<()>,
    source: Arc<dyn ConfigSource>,
    publisher: Arc<dyn Publisher>,
    options: TriggerOptions,
    metrics: ClickerMetrics,
}

impl Clicker {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        publisher: Arc<dyn Publisher>,
        options: TriggerOptions,
        metrics: ClickerMetrics,
    ) -> Self {
        Clicker {
            lock: Mutex::new(()),
            source,
            publisher,
            options,
            metrics,
        }
    }

    pub fn options(&self) -> TriggerOptions {
        self.options
    }

    /// Run one trigger under the lock: load configuration, then one
    /// publisher session. The guard is released on every return path.
    pub async fn trigger(&self) -> TriggerOutcome {
        let _guard = self.lock.lock().await;
        self.metrics.triggers.inc();

        let (broker, device) = match config::load(self.source.as_ref(), self.options.credential_policy) {
            Ok(targets) => targets,
            Err(e) => {
                self.metrics.config_missing.inc();
                error!(error = %e, "Cannot load broker configuration, aborting");
                return TriggerOutcome::ConfigMissing(e);
            }
        };

        match self.publisher.publish(&broker, &device).await {
            Ok(job) => {
                self.metrics.publishes.inc();
                info!(topic = %job.topic, "Click published");
                TriggerOutcome::Published(job)
            }
            Err(e) => {
                self.metrics.connection_failures.inc();
                warn!(error = %e, device_id = %device.device_id, "Click not published");
                TriggerOutcome::ConnectionFailure(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerTarget, DeviceTarget};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPublisher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn publish(
            &self,
            _broker: &BrokerTarget,
            device: &DeviceTarget,
        ) -> Result<PublishJob, SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PublishJob::for_device(device))
        }
    }

    struct RefusingPublisher;

    #[async_trait]
    impl Publisher for RefusingPublisher {
        async fn publish(
            &self,
            _broker: &BrokerTarget,
            _device: &DeviceTarget,
        ) -> Result<PublishJob, SessionError> {
            Err(SessionError::ConnectionFailure("broker refused connection: NotAuthorized".into()))
        }
    }

    fn clicker(source: HashMap<String, String>) -> (Clicker, Arc<CountingPublisher>, ClickerMetrics) {
        let registry = Registry::new();
        let metrics = ClickerMetrics::register(&registry).unwrap();
        let publisher = Arc::new(CountingPublisher {
            calls: AtomicUsize::new(0),
        });
        let c = Clicker::new(
            Arc::new(source),
            publisher.clone(),
            TriggerOptions::default(),
            metrics.clone(),
        );
        (c, publisher, metrics)
    }

    #[tokio::test]
    async fn test_missing_config_never_reaches_publisher() {
        let (c, publisher, metrics) = clicker(HashMap::new());
        let outcome = c.trigger().await;
        assert!(matches!(outcome, TriggerOutcome::ConfigMissing(ConfigError::Missing(_))));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.config_missing.get(), 1);
        // lock must have been released
        assert!(c.lock.try_lock().is_ok());
    }

    fn valid_source() -> HashMap<String, String> {
        [
            ("BROKER_HOST", "127.0.0.1"),
            ("BROKER_PORT", "1883"),
            ("BROKER_USERNAME", "u"),
            ("BROKER_PASSWORD", "p"),
            ("DEVICE_ID", "front-door"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[tokio::test]
    async fn test_connection_failure_is_counted_once() {
        let registry = Registry::new();
        let metrics = ClickerMetrics::register(&registry).unwrap();
        let c = Clicker::new(
            Arc::new(valid_source()),
            Arc::new(RefusingPublisher),
            TriggerOptions::default(),
            metrics.clone(),
        );
        let outcome = c.trigger().await;
        assert!(matches!(outcome, TriggerOutcome::ConnectionFailure(SessionError::ConnectionFailure(_))));
        assert_eq!(metrics.connection_failures.get(), 1);
        assert_eq!(metrics.publishes.get(), 0);
        assert!(c.lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_valid_config_publishes_once() {
        let (c, publisher, metrics) = clicker(valid_source());
        match c.trigger().await {
            TriggerOutcome::Published(job) => {
                assert_eq!(job.topic, "homie/front-door/garage_door_clicker/open/set")
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.triggers.get(), 1);
        assert_eq!(metrics.publishes.get(), 1);
    }
}
