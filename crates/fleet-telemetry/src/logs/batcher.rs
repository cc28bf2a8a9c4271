// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Partitioning of log events under the store's count and byte limits.
//!
//! Events are stable-sorted by timestamp, then packed greedily: a new batch
//! is opened whenever the next event would push the open one past
//! [`MAX_LOG_BATCH_ENTRIES`] events or [`MAX_LOG_BATCH_BYTES`] bytes. An event
//! that alone exceeds the byte limit is never split; it travels in a batch of
//! its own.

use crate::constants::{MAX_LOG_BATCH_BYTES, MAX_LOG_BATCH_ENTRIES};
use crate::logs::entry::{LogEntry, LogEvent};
use tracing::warn;

/// Timestamp-ordered events that fit in one publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    events: Vec<LogEvent>,
    bytes: usize,
}

impl LogBatch {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            bytes: 0,
        }
    }

    fn push(&mut self, event: LogEvent) {
        self.bytes += event.byte_cost();
        self.events.push(event);
    }

    fn fits(&self, event: &LogEvent) -> bool {
        self.events.len() < MAX_LOG_BATCH_ENTRIES
            && self.bytes + event.byte_cost() <= MAX_LOG_BATCH_BYTES
    }

    #[must_use]
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sum of the byte cost of every event.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    /// Entries the batch was rendered from, for requeueing.
    #[must_use]
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.events
            .into_iter()
            .filter_map(LogEvent::into_entry)
            .collect()
    }
}

#[must_use]
pub fn partition(mut events: Vec<LogEvent>) -> Vec<LogBatch> {
    // `sort_by_key` is stable, so equal timestamps keep enqueue order.
    events.sort_by_key(LogEvent::timestamp_ms);

    let mut batches = Vec::new();
    let mut current = LogBatch::new();

    for event in events {
        if event.byte_cost() > MAX_LOG_BATCH_BYTES {
            warn!(
                "LOGS | Event of {} bytes exceeds the {} byte batch limit, sending it alone",
                event.byte_cost(),
                MAX_LOG_BATCH_BYTES
            );
            if !current.is_empty() {
                batches.push(std::mem::replace(&mut current, LogBatch::new()));
            }
            let mut oversized = LogBatch::new();
            oversized.push(event);
            batches.push(oversized);
            continue;
        }

        if !current.fits(&event) {
            batches.push(std::mem::replace(&mut current, LogBatch::new()));
        }
        current.push(event);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
