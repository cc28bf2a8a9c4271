// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The telemetry pipeline: one owned instance per process or test.
//!
//! Producers call [`TelemetryPipeline::publish`] and
//! [`TelemetryPipeline::enqueue`], which only buffer. A single flush path
//! drains both buffers and delivers them, either on demand through
//! [`TelemetryPipeline::flush`] or on an interval through
//! [`TelemetryPipeline::run`].

use crate::config::{FailurePolicy, TelemetryConfig};
use crate::constants::{MAX_LOG_BATCH_ENTRIES, MAX_METRICS_PER_BATCH};
use crate::delivery::http::{LogsApi, MetricsApi};
use crate::delivery::{LogsDelivery, MetricsDelivery};
use crate::dimensions::DimensionResolver;
use crate::errors::TelemetryError;
use crate::logs::buffer::{BufferHandle, BufferService};
use crate::logs::entry::{JsonLogSerializer, LogEntry, LogSerializer};
use crate::logs::shipper::{LogShipper, LogShipperConfig};
use crate::metadata::{get_hostname, EnvMetadataProvider, MetadataProvider};
use crate::metrics::publisher::{MetricsPublisher, MetricsPublisherConfig, PublishSummary};
use crate::metrics::MetricDatum;
use crate::retry::RetryPolicy;
use crate::session::SessionFactory;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Counts from one flush, metrics and logs combined.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub batches_sent: usize,
    pub entries_sent: usize,
    pub batches_dropped: usize,
    pub entries_dropped: usize,
    pub entries_requeued: usize,
    /// Metrics that failed validation and were never sent.
    pub metrics_rejected: usize,
}

impl FlushReport {
    pub fn merge(&mut self, other: FlushReport) {
        self.batches_sent += other.batches_sent;
        self.entries_sent += other.entries_sent;
        self.batches_dropped += other.batches_dropped;
        self.entries_dropped += other.entries_dropped;
        self.entries_requeued += other.entries_requeued;
        self.metrics_rejected += other.metrics_rejected;
    }

    #[must_use]
    pub fn has_drops(&self) -> bool {
        self.batches_dropped > 0 || self.entries_dropped > 0
    }
}

/// Collaborators the pipeline delivers through.
pub struct PipelineParts {
    pub metrics: Arc<dyn MetricsDelivery>,
    pub logs: Arc<dyn LogsDelivery>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub serializer: Arc<dyn LogSerializer>,
}

impl PipelineParts {
    /// HTTP clients for the configured endpoints, environment metadata and
    /// JSON log rendering.
    #[must_use]
    pub fn http(config: &TelemetryConfig, session_factory: Arc<SessionFactory>) -> Self {
        Self {
            metrics: Arc::new(MetricsApi::from_config(config, Arc::clone(&session_factory))),
            logs: Arc::new(LogsApi::from_config(config, session_factory)),
            metadata: Arc::new(EnvMetadataProvider),
            serializer: Arc::new(JsonLogSerializer),
        }
    }
}

pub struct TelemetryPipeline {
    config: TelemetryConfig,
    metric_buffer: Arc<Mutex<Vec<MetricDatum>>>,
    publisher: MetricsPublisher,
    shipper: LogShipper,
    buffer: BufferHandle,
    /// Held for the whole flush, so only one flush runs at a time.
    last_flush: tokio::sync::Mutex<Instant>,
}

impl TelemetryPipeline {
    /// Build a pipeline delivering over HTTP.
    ///
    /// Must be called from within a Tokio runtime; the log buffer service is
    /// spawned onto it.
    pub fn new(
        config: TelemetryConfig,
        session_factory: Arc<SessionFactory>,
    ) -> Result<Self, TelemetryError> {
        let parts = PipelineParts::http(&config, session_factory);
        Self::with_parts(config, parts)
    }

    pub fn with_parts(
        config: TelemetryConfig,
        parts: PipelineParts,
    ) -> Result<Self, TelemetryError> {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TelemetryError::NoRuntime)?;

        let (service, buffer) = BufferService::new(config.max_queue_entries);
        runtime.spawn(service.run());

        let retry_policy = RetryPolicy::from(&config);
        let hostname = get_hostname(parts.metadata.as_ref());
        let resolver = DimensionResolver::new(&config.project_name, parts.metadata);

        let publisher = MetricsPublisher::new(MetricsPublisherConfig {
            client: parts.metrics,
            resolver,
            retry_policy,
            namespace: config.metric_namespace.clone(),
            role: config.role.clone(),
            environment: config.environment.clone(),
        });

        let shipper = LogShipper::new(LogShipperConfig {
            buffer: buffer.clone(),
            client: parts.logs,
            serializer: parts.serializer,
            retry_policy,
            failure_policy: config.failure_policy,
            log_group: config.log_group.clone(),
            log_stream: config.log_stream.clone(),
            hostname,
        });

        debug!(
            "Telemetry pipeline ready: namespace={} log_group={} enabled={}",
            config.metric_namespace, config.log_group, config.enabled
        );

        Ok(Self {
            config,
            metric_buffer: Arc::new(Mutex::new(Vec::new())),
            publisher,
            shipper,
            buffer,
            last_flush: tokio::sync::Mutex::new(Instant::now()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    #[must_use]
    pub fn dimension_resolver(&self) -> &DimensionResolver {
        self.publisher.resolver()
    }

    /// Buffer metrics for the next flush. Never blocks on the network.
    pub fn publish(&self, data: Vec<MetricDatum>) {
        if !self.config.enabled || data.is_empty() {
            return;
        }
        let mut buffer = self
            .metric_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffer.extend(data);

        let overflow = buffer.len().saturating_sub(self.config.max_queue_entries);
        if overflow > 0 {
            buffer.drain(..overflow);
            warn!(
                "METRICS | Buffer full ({} metrics), evicted {} oldest metrics",
                self.config.max_queue_entries, overflow
            );
        }
    }

    /// Buffer a log entry for the next flush. Never blocks on the network.
    pub fn enqueue(&self, entry: LogEntry) {
        if !self.config.enabled {
            return;
        }
        self.shipper.enqueue(entry);
    }

    #[must_use]
    pub fn buffered_metrics(&self) -> usize {
        self.metric_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn buffered_logs(&self) -> usize {
        self.shipper.buffered().await
    }

    /// Deliver everything buffered.
    ///
    /// Unless `force` is set, the flush is skipped while the flush interval
    /// has not elapsed and neither buffer holds a full batch. Delivery
    /// failures are logged; in strict mode they also produce
    /// [`TelemetryError::Delivery`].
    pub async fn flush(&self, force: bool) -> Result<FlushReport, TelemetryError> {
        if !self.config.enabled {
            return Ok(FlushReport::default());
        }

        let mut last_flush = self.last_flush.lock().await;
        if !force
            && last_flush.elapsed() < self.config.flush_interval
            && self.buffered_metrics() < MAX_METRICS_PER_BATCH
            && self.buffered_logs().await < MAX_LOG_BATCH_ENTRIES
        {
            debug!("Skipping flush: interval not elapsed and no full batch buffered");
            return Ok(FlushReport::default());
        }
        *last_flush = Instant::now();

        let mut report = self.flush_metrics().await;
        report.merge(self.shipper.flush(force).await);
        drop(last_flush);

        if report.has_drops() {
            warn!(
                "Telemetry flush dropped {} batches ({} items)",
                report.batches_dropped, report.entries_dropped
            );
            if self.config.strict {
                return Err(TelemetryError::Delivery {
                    dropped_batches: report.batches_dropped,
                    dropped_entries: report.entries_dropped,
                });
            }
        }

        Ok(report)
    }

    async fn flush_metrics(&self) -> FlushReport {
        let data = std::mem::take(
            &mut *self
                .metric_buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if data.is_empty() {
            return FlushReport::default();
        }

        let summary = self.publisher.publish(data).await;
        let mut report = FlushReport {
            batches_sent: summary.batches_sent,
            entries_sent: summary.published,
            metrics_rejected: summary.rejected,
            ..FlushReport::default()
        };
        self.settle_failed_metrics(summary, &mut report);
        report
    }

    fn settle_failed_metrics(&self, summary: PublishSummary, report: &mut FlushReport) {
        if summary.failed.is_empty() {
            return;
        }

        match self.config.failure_policy {
            FailurePolicy::Drop => {
                warn!(
                    "METRICS | Dropped {} metrics from {} failed batches",
                    summary.dropped(),
                    summary.batches_dropped
                );
                report.batches_dropped += summary.batches_dropped;
                report.entries_dropped += summary.dropped();
            }
            FailurePolicy::Requeue { max_entries } => {
                let total = summary.failed.len();
                let kept = total.min(max_entries);
                let mut buffer = self
                    .metric_buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let newer = std::mem::take(&mut *buffer);
                buffer.extend(
                    summary
                        .failed
                        .into_iter()
                        .take(kept)
                        .map(MetricDatum::from),
                );
                buffer.extend(newer);
                report.entries_requeued += kept;

                if kept < total {
                    warn!(
                        "METRICS | Requeue cap of {} reached, dropped {} metrics",
                        max_entries,
                        total - kept
                    );
                    report.batches_dropped += 1;
                    report.entries_dropped += total - kept;
                }
            }
        }
    }

    /// Flush on every interval until `cancel` fires, then flush one final time.
    pub async fn run(&self, cancel: CancellationToken) -> Result<FlushReport, TelemetryError> {
        if !self.config.enabled {
            cancel.cancelled().await;
            return Ok(FlushReport::default());
        }

        loop {
            let deadline = *self.last_flush.lock().await + self.config.flush_interval;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => {
                    if let Err(e) = self.flush(false).await {
                        error!("Periodic flush failed: {}", e);
                    }
                }
            }
        }

        debug!("Cancellation received, running final flush");
        self.flush(true).await
    }

    /// Final forced flush, then stop the log buffer service.
    pub async fn shutdown(&self) -> Result<FlushReport, TelemetryError> {
        let result = self.flush(true).await;
        if self.buffer.shutdown().is_err() {
            debug!("Log buffer service already stopped");
        }
        result
    }
}
