// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::FailurePolicy;
use crate::delivery::{DeliveryResult, LogsDelivery};
use crate::logs::batcher::{partition, LogBatch};
use crate::logs::buffer::BufferHandle;
use crate::logs::entry::{LogEntry, LogEvent, LogSerializer};
use crate::logs::stream::{StreamKey, StreamRegistry};
use crate::pipeline::FlushReport;
use crate::retry::RetryPolicy;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct LogShipperConfig {
    pub buffer: BufferHandle,
    pub client: Arc<dyn LogsDelivery>,
    pub serializer: Arc<dyn LogSerializer>,
    pub retry_policy: RetryPolicy,
    pub failure_policy: FailurePolicy,
    pub log_group: String,
    /// Fixed stream name; `{hostname}/{YYYY-MM-DD}` when `None`.
    pub log_stream: Option<String>,
    pub hostname: String,
}

/// Drains the log buffer and publishes it, one stream lock per flush.
pub struct LogShipper {
    buffer: BufferHandle,
    client: Arc<dyn LogsDelivery>,
    serializer: Arc<dyn LogSerializer>,
    registry: StreamRegistry,
    retry_policy: RetryPolicy,
    failure_policy: FailurePolicy,
    log_group: String,
    log_stream: Option<String>,
    hostname: String,
}

impl LogShipper {
    #[must_use]
    pub fn new(config: LogShipperConfig) -> Self {
        Self {
            buffer: config.buffer,
            client: config.client,
            serializer: config.serializer,
            registry: StreamRegistry::default(),
            retry_policy: config.retry_policy,
            failure_policy: config.failure_policy,
            log_group: config.log_group,
            log_stream: config.log_stream,
            hostname: config.hostname,
        }
    }

    /// Queue one entry without waiting.
    pub fn enqueue(&self, entry: LogEntry) {
        if self.buffer.insert_batch(vec![entry]).is_err() {
            error!("LOGS | Buffer service is not running, dropping log entry");
        }
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.len().await.unwrap_or_default()
    }

    /// Stream the next flush publishes to.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        let stream = match &self.log_stream {
            Some(stream) => stream.clone(),
            None => format!("{}/{}", self.hostname, Utc::now().format("%Y-%m-%d")),
        };
        StreamKey::new(&self.log_group, &stream)
    }

    /// Drain, serialize, partition and publish everything buffered.
    ///
    /// A non-forced flush with nothing buffered returns without touching the
    /// store. Batches are published in timestamp order; a failed batch is
    /// handled by the failure policy and the rest are still attempted.
    pub async fn flush(&self, force: bool) -> FlushReport {
        let mut report = FlushReport::default();

        if !force && self.buffered().await == 0 {
            return report;
        }

        let entries = match self.buffer.drain().await {
            Ok(entries) => entries,
            Err(e) => {
                error!("LOGS | Failed to drain buffer: {}", e);
                return report;
            }
        };
        if entries.is_empty() {
            return report;
        }

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            match LogEvent::render(entry, self.serializer.as_ref()) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("LOGS | Dropping entry: {}", e);
                    report.entries_dropped += 1;
                }
            }
        }

        let batches = partition(events);
        if batches.is_empty() {
            return report;
        }

        let key = self.stream_key();
        self.registry.prune(&key);
        debug!("LOGS | Flushing {} batches to {}", batches.len(), key);

        let mut requeue = Vec::new();
        let mut state = self.registry.lock(&key).await;
        for batch in batches {
            let result = state
                .publish(self.client.as_ref(), &self.retry_policy, &key, &batch)
                .await;
            match result {
                DeliveryResult::Success(_) => {
                    report.batches_sent += 1;
                    report.entries_sent += batch.len();
                }
                failure => self.handle_failure(&key, &failure, batch, &mut report, &mut requeue),
            }
        }
        drop(state);

        if !requeue.is_empty() {
            let count = requeue.len();
            if self.buffer.requeue(requeue).is_ok() {
                report.entries_requeued += count;
            } else {
                error!("LOGS | Buffer service is not running, dropping {} entries", count);
                report.entries_dropped += count;
            }
        }

        report
    }

    fn handle_failure(
        &self,
        key: &StreamKey,
        failure: &DeliveryResult,
        batch: LogBatch,
        report: &mut FlushReport,
        requeue: &mut Vec<LogEntry>,
    ) {
        let reason = failure
            .error()
            .map(ToString::to_string)
            .unwrap_or_default();

        match self.failure_policy {
            FailurePolicy::Drop => {
                warn!(
                    "LOGS | Dropped batch of {} entries for {}: {}",
                    batch.len(),
                    key,
                    reason
                );
                report.batches_dropped += 1;
                report.entries_dropped += batch.len();
            }
            FailurePolicy::Requeue { max_entries } => {
                let size = batch.len();
                let room = max_entries.saturating_sub(requeue.len());
                let entries = batch.into_entries();
                let kept = entries.len().min(room);
                let dropped = size - kept;
                requeue.extend(entries.into_iter().take(kept));

                if dropped > 0 {
                    warn!(
                        "LOGS | Requeue cap of {} reached, dropped {} entries for {}: {}",
                        max_entries, dropped, key, reason
                    );
                    report.batches_dropped += 1;
                    report.entries_dropped += dropped;
                } else {
                    debug!("LOGS | Requeued {} entries for {}: {}", kept, key, reason);
                }
            }
        }
    }
}
