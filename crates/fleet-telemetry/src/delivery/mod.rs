// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transport seam between the batchers and the remote store.
//!
//! The pipeline only talks to [`MetricsDelivery`] and [`LogsDelivery`]; the
//! HTTP implementations live in [`http`] and tests substitute in-memory ones.

use crate::errors::RemoteError;
use crate::logs::batcher::LogBatch;
use crate::logs::stream::StreamKey;
use crate::metrics::batcher::MetricBatch;
use crate::retry::{ErrorKind, RetryPolicy};
use async_trait::async_trait;

pub mod http;

/// Opaque append-order token for a log stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct SequenceToken(String);

impl SequenceToken {
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self(token.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Why a delivery will not be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The store refused the request outright.
    Rejected,
    /// Throttled or transient failures outlasted the retry budget.
    ExhaustedRetries,
    /// The token was still stale after the single refresh.
    StaleToken,
}

/// Outcome of one remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    /// Carries the stream's next sequence token, when the call yields one.
    Success(Option<SequenceToken>),
    RetryableFailure(ErrorKind, RemoteError),
    FatalFailure(FatalKind, RemoteError),
}

impl DeliveryResult {
    /// Wrap a raw remote failure, classifying it for the retry policy.
    #[must_use]
    pub fn from_error(error: RemoteError) -> Self {
        match RetryPolicy::classify(&error) {
            ErrorKind::Fatal => Self::FatalFailure(FatalKind::Rejected, error),
            kind => Self::RetryableFailure(kind, error),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            Self::Success(_) => None,
            Self::RetryableFailure(_, err) | Self::FatalFailure(_, err) => Some(err),
        }
    }

    /// True when the failure says the target group or stream does not exist.
    #[must_use]
    pub fn is_resource_not_found(&self) -> bool {
        self.error()
            .and_then(RemoteError::code)
            .is_some_and(|code| code == "ResourceNotFoundException")
    }
}

#[async_trait]
pub trait MetricsDelivery: Send + Sync {
    async fn publish(&self, namespace: &str, batch: &MetricBatch) -> DeliveryResult;
}

#[async_trait]
pub trait LogsDelivery: Send + Sync {
    /// Append `batch` to the stream. `token` is the stream's current sequence token.
    async fn publish(
        &self,
        key: &StreamKey,
        batch: &LogBatch,
        token: Option<&SequenceToken>,
    ) -> DeliveryResult;

    /// Create the log group. An existing group counts as success.
    async fn create_group(&self, group: &str) -> DeliveryResult;

    /// Create the log stream. An existing stream counts as success.
    async fn create_stream(&self, key: &StreamKey) -> DeliveryResult;

    /// Look up the stream's current sequence token.
    async fn current_token(&self, key: &StreamKey) -> DeliveryResult;
}
