// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Fleet Telemetry
//!
//! Publishes metric observations and structured log entries produced by fleet
//! operations (health checks, compliance scans, patch runs) to a rate-limited,
//! size-constrained remote metrics and logs store.
//!
//! ## Overview
//!
//! - [`metrics`]: validation, unit inference, 20-per-call batching and publishing
//! - [`logs`]: buffered log shipping with per-stream sequence tokens
//! - [`delivery`]: the transport seam and its HTTP implementation
//! - [`retry`]: error classification and bounded exponential backoff
//! - [`dimensions`]: dimension merging over cached process metadata
//! - [`pipeline`]: the owned instance producers talk to
//!
//! Producers never block on the network: [`TelemetryPipeline::publish`] and
//! [`TelemetryPipeline::enqueue`] only buffer. Delivery failures are logged and
//! never propagate into the operation that produced the telemetry, unless
//! strict mode is enabled.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

pub mod config;
pub mod constants;
pub mod delivery;
pub mod dimensions;
pub mod errors;
pub mod logger;
pub mod logs;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod session;
pub mod util;

pub use config::{FailurePolicy, TelemetryConfig};
pub use errors::{RemoteError, TelemetryError, ValidationError};
pub use logs::entry::{LogEntry, LogLevel, SourceContext};
pub use metrics::{MetricDatum, Resolution, Unit};
pub use pipeline::{FlushReport, PipelineParts, TelemetryPipeline};
pub use session::{Session, SessionFactory};
