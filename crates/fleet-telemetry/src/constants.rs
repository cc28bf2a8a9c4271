// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits imposed by the remote metrics and logs APIs.
//!
//! Batches that exceed any of these are rejected by the store as a whole, so
//! the batchers partition against them before anything goes on the wire.

/// Maximum number of data points accepted by a single `PutMetricData` call.
pub const MAX_METRICS_PER_BATCH: usize = 20;

/// Maximum number of dimensions the store accepts on one data point.
pub const MAX_DIMENSIONS_PER_METRIC: usize = 30;

/// Maximum number of events in one `PutLogEvents` call.
pub const MAX_LOG_BATCH_ENTRIES: usize = 10_000;

/// Maximum aggregate size of one `PutLogEvents` call, in bytes.
///
/// Counted as the UTF-8 length of every message plus
/// [`LOG_EVENT_OVERHEAD_BYTES`] per event.
pub const MAX_LOG_BATCH_BYTES: usize = 1_048_576;

/// Fixed per-event overhead the store adds to each message when sizing a batch.
pub const LOG_EVENT_OVERHEAD_BYTES: usize = 26;

/// Default cap on buffered log entries before the oldest are evicted.
///
/// Assuming ~1KB per entry this bounds the buffer around 100MB.
pub const DEFAULT_MAX_QUEUE_ENTRIES: usize = 100_000;

/// Default cap on entries put back into the buffer after a failed delivery.
pub const DEFAULT_REQUEUE_CAP: usize = 10_000;
