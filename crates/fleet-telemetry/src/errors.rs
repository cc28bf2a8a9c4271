// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the telemetry pipeline.

/// Reasons a single metric datum is rejected before partitioning.
///
/// A validation error only ever affects the one datum it names; the rest of
/// the call keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("metric name is empty")]
    EmptyName,

    #[error("metric '{name}' has unrecognized unit '{unit}'")]
    UnrecognizedUnit { name: String, unit: String },

    #[error("metric '{name}' has a non-finite value")]
    NonFiniteValue { name: String },

    #[error("metric '{name}' has {count} dimensions, the limit is {limit}")]
    TooManyDimensions {
        name: String,
        count: usize,
        limit: usize,
    },
}

/// Raw failure of a single call against the remote store.
///
/// This carries no retry decision; [`crate::retry::RetryPolicy::classify`]
/// turns it into an [`crate::retry::ErrorKind`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("{status} {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
        expected_sequence_token: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("failed to prepare payload: {0}")]
    Payload(String),

    #[error("no session available: {0}")]
    Session(String),
}

impl RemoteError {
    /// The service error code, with any `namespace#` prefix stripped.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code.rsplit('#').next().unwrap_or(code.as_str())),
            _ => None,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn expected_sequence_token(&self) -> Option<&str> {
        match self {
            Self::Service {
                expected_sequence_token,
                ..
            } => expected_sequence_token.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// A log entry could not be rendered to its wire form.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to serialize log entry: {0}")]
pub struct SerializeError(pub String);

/// Errors surfaced to callers of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Telemetry delivery failed: {dropped_batches} batches ({dropped_entries} items) dropped")]
    Delivery {
        dropped_batches: usize,
        dropped_entries: usize,
    },

    #[error("Log buffer service is not running")]
    BufferClosed,

    #[error("No Tokio runtime available to run the log buffer service")]
    NoRuntime,
}
