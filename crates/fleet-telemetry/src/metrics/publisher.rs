// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::delivery::{DeliveryResult, MetricsDelivery};
use crate::dimensions::DimensionResolver;
use crate::metrics::batcher::{partition, validate_all};
use crate::metrics::{MetricDatum, MetricObservation};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one [`MetricsPublisher::publish`] call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishSummary {
    pub published: usize,
    pub rejected: usize,
    pub batches_sent: usize,
    pub batches_dropped: usize,
    /// Observations from batches that could not be delivered.
    pub failed: Vec<MetricObservation>,
}

impl PublishSummary {
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.failed.len()
    }
}

pub struct MetricsPublisher {
    client: Arc<dyn MetricsDelivery>,
    resolver: DimensionResolver,
    retry_policy: RetryPolicy,
    namespace: String,
    role: Option<String>,
    environment: Option<String>,
}

pub struct MetricsPublisherConfig {
    pub client: Arc<dyn MetricsDelivery>,
    pub resolver: DimensionResolver,
    pub retry_policy: RetryPolicy,
    pub namespace: String,
    pub role: Option<String>,
    pub environment: Option<String>,
}

impl MetricsPublisher {
    #[must_use]
    pub fn new(config: MetricsPublisherConfig) -> Self {
        Self {
            client: config.client,
            resolver: config.resolver,
            retry_policy: config.retry_policy,
            namespace: config.namespace,
            role: config.role,
            environment: config.environment,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &DimensionResolver {
        &self.resolver
    }

    /// Resolve, validate, partition and deliver `data`.
    ///
    /// A failed batch is recorded in the summary and the remaining batches
    /// are still attempted.
    pub async fn publish(&self, data: Vec<MetricDatum>) -> PublishSummary {
        let resolved: Vec<MetricDatum> = data
            .into_iter()
            .map(|mut datum| {
                datum.dimensions = self.resolver.resolve(
                    self.role.as_deref(),
                    self.environment.as_deref(),
                    None,
                    Some(&datum.dimensions),
                );
                datum
            })
            .collect();

        let (observations, rejected) = validate_all(resolved);
        let mut summary = PublishSummary {
            rejected: rejected.len(),
            ..PublishSummary::default()
        };
        if observations.is_empty() {
            return summary;
        }

        let batches = partition(observations);
        debug!(
            "METRICS | Publishing {} batches to namespace {}",
            batches.len(),
            self.namespace
        );

        for batch in batches {
            let client = &*self.client;
            let namespace = self.namespace.as_str();
            let batch_ref = &batch;
            let result = self
                .retry_policy
                .execute(|| client.publish(namespace, batch_ref))
                .await;

            match result {
                DeliveryResult::Success(_) => {
                    summary.published += batch.len();
                    summary.batches_sent += 1;
                }
                failure => {
                    if let Some(err) = failure.error() {
                        warn!(
                            "METRICS | Failed to publish batch of {} metrics: {}",
                            batch.len(),
                            err
                        );
                    }
                    summary.batches_dropped += 1;
                    summary.failed.extend(batch.into_observations());
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::FatalKind;
    use crate::errors::RemoteError;
    use crate::metadata::{ProcessMetadata, StaticMetadataProvider};
    use crate::metrics::batcher::MetricBatch;
    use crate::retry::ErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingClient {
        batches: Mutex<Vec<(String, MetricBatch)>>,
        failures: Mutex<Vec<DeliveryResult>>,
    }

    #[async_trait]
    impl MetricsDelivery for RecordingClient {
        async fn publish(&self, namespace: &str, batch: &MetricBatch) -> DeliveryResult {
            self.batches
                .lock()
                .expect("lock poisoned")
                .push((namespace.to_string(), batch.clone()));
            self.failures
                .lock()
                .expect("lock poisoned")
                .pop()
                .unwrap_or(DeliveryResult::Success(None))
        }
    }

    fn publisher(client: Arc<RecordingClient>) -> MetricsPublisher {
        MetricsPublisher::new(MetricsPublisherConfig {
            client,
            resolver: DimensionResolver::new(
                "hyperion-fleet",
                Arc::new(StaticMetadataProvider(ProcessMetadata {
                    hostname: Some("web-01".to_string()),
                    instance_id: None,
                })),
            ),
            retry_policy: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            namespace: "Hyperion/FleetManager".to_string(),
            role: Some("web".to_string()),
            environment: Some("prod".to_string()),
        })
    }

    #[tokio::test]
    async fn test_publish_resolves_dimensions_and_batches() {
        let client = Arc::new(RecordingClient::default());
        let publisher = publisher(client.clone());

        let data = (1..=25)
            .map(|i| MetricDatum::new(&format!("CPU-{i}"), f64::from(i)).with_dimension("Role", "db"))
            .collect();
        let summary = publisher.publish(data).await;

        assert_eq!(summary.published, 25);
        assert_eq!(summary.batches_sent, 2);
        assert_eq!(summary.dropped(), 0);

        let batches = client.batches.lock().expect("lock poisoned");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, "Hyperion/FleetManager");
        let dims = &batches[0].1.observations()[0].dimensions;
        assert_eq!(dims.get("Role").map(String::as_str), Some("db"));
        assert_eq!(dims.get("Environment").map(String::as_str), Some("prod"));
        assert_eq!(dims.get("Hostname").map(String::as_str), Some("web-01"));
        assert_eq!(dims.get("Project").map(String::as_str), Some("hyperion-fleet"));
    }

    #[tokio::test]
    async fn test_publish_counts_rejections() {
        let client = Arc::new(RecordingClient::default());
        let publisher = publisher(client.clone());

        let summary = publisher
            .publish(vec![
                MetricDatum::new("RequestCount", 1.0),
                MetricDatum::new("Broken", f64::NAN),
            ])
            .await;

        assert_eq!(summary.published, 1);
        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        let client = Arc::new(RecordingClient::default());
        // Failures are popped from the back: first call is rejected.
        client.failures.lock().expect("lock poisoned").push(
            DeliveryResult::FatalFailure(
                FatalKind::Rejected,
                RemoteError::Service {
                    status: 400,
                    code: "InvalidParameterValue".to_string(),
                    message: "bad".to_string(),
                    expected_sequence_token: None,
                },
            ),
        );
        let publisher = publisher(client.clone());

        let data = (0..30).map(|i| MetricDatum::new(&format!("M{i}"), 1.0)).collect();
        let summary = publisher.publish(data).await;

        assert_eq!(summary.batches_dropped, 1);
        assert_eq!(summary.dropped(), 20);
        assert_eq!(summary.batches_sent, 1);
        assert_eq!(summary.published, 10);
    }

    #[tokio::test]
    async fn test_throttled_batch_is_retried() {
        let client = Arc::new(RecordingClient::default());
        client.failures.lock().expect("lock poisoned").push(
            DeliveryResult::RetryableFailure(
                ErrorKind::Throttled,
                RemoteError::Service {
                    status: 400,
                    code: "Throttling".to_string(),
                    message: "Rate exceeded".to_string(),
                    expected_sequence_token: None,
                },
            ),
        );
        let publisher = publisher(client.clone());

        let summary = publisher.publish(vec![MetricDatum::new("RequestCount", 1.0)]).await;

        assert_eq!(summary.published, 1);
        assert_eq!(client.batches.lock().expect("lock poisoned").len(), 2);
    }
}
