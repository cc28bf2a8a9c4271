// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-stream provisioning and sequence token state.
//!
//! ```text
//! Uninitialized -> ensure group -> ensure stream -> Ready(token)
//! Ready(token) -> publish -> Ready(next token)
//!                         -> stale token -> refresh -> one retry -> Ready(next) | failed
//!                         -> resource not found -> Uninitialized
//! ```
//!
//! Each stream's state sits behind its own async mutex in a
//! [`StreamRegistry`], so at most one publish per stream is in flight and the
//! token read before an attempt is the one the previous publish returned.

use crate::delivery::{DeliveryResult, FatalKind, LogsDelivery, SequenceToken};
use crate::logs::batcher::LogBatch;
use crate::retry::{ErrorKind, RetryPolicy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// A (log group, log stream) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{group}:{stream}")]
pub struct StreamKey {
    pub group: String,
    pub stream: String,
}

impl StreamKey {
    #[must_use]
    pub fn new(group: &str, stream: &str) -> Self {
        Self {
            group: group.to_string(),
            stream: stream.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    /// Group and stream have not been confirmed to exist.
    #[default]
    Uninitialized,
    /// Stream exists; `None` means it has never been written to.
    Ready(Option<SequenceToken>),
}

impl StreamState {
    #[must_use]
    pub fn token(&self) -> Option<&SequenceToken> {
        match self {
            StreamState::Ready(token) => token.as_ref(),
            StreamState::Uninitialized => None,
        }
    }

    /// Create the group and stream if needed and load the current token.
    ///
    /// Leaves the state untouched on failure and returns the failing result.
    pub async fn ensure_ready(
        &mut self,
        client: &dyn LogsDelivery,
        policy: &RetryPolicy,
        key: &StreamKey,
    ) -> Result<(), DeliveryResult> {
        if matches!(self, StreamState::Ready(_)) {
            return Ok(());
        }

        debug!("LOGS | Provisioning stream {}", key);
        let group = key.group.as_str();
        let result = policy.execute(|| client.create_group(group)).await;
        if !result.is_success() {
            return Err(result);
        }

        let result = policy.execute(|| client.create_stream(key)).await;
        if !result.is_success() {
            return Err(result);
        }

        match policy.execute(|| client.current_token(key)).await {
            DeliveryResult::Success(token) => {
                *self = StreamState::Ready(token);
                Ok(())
            }
            failure => Err(failure),
        }
    }

    /// Publish one batch, refreshing a stale token at most once.
    ///
    /// The token is only rewritten by a successful publish or by the refresh
    /// step. A missing group or stream resets the state so the next call
    /// provisions it again.
    ///
    /// The publish after a refresh gets a fresh retry budget, so one batch
    /// makes at most `2 * (max_retries + 1)` publish calls.
    pub async fn publish(
        &mut self,
        client: &dyn LogsDelivery,
        policy: &RetryPolicy,
        key: &StreamKey,
        batch: &LogBatch,
    ) -> DeliveryResult {
        if let Err(failure) = self.ensure_ready(client, policy, key).await {
            return self.settle(failure);
        }

        let err = match self.attempt(client, policy, key, batch).await {
            DeliveryResult::RetryableFailure(ErrorKind::StaleToken, err) => err,
            other => return self.settle(other),
        };

        debug!("LOGS | Sequence token for {} is stale, refreshing", key);
        let refreshed = match err.expected_sequence_token() {
            Some(expected) => Some(SequenceToken::new(expected)),
            None => match policy.execute(|| client.current_token(key)).await {
                DeliveryResult::Success(token) => token,
                failure => return self.settle(failure),
            },
        };
        *self = StreamState::Ready(refreshed);

        match self.attempt(client, policy, key, batch).await {
            DeliveryResult::RetryableFailure(ErrorKind::StaleToken, err) => {
                warn!("LOGS | Sequence token for {} still stale after refresh", key);
                if let Some(expected) = err.expected_sequence_token() {
                    *self = StreamState::Ready(Some(SequenceToken::new(expected)));
                }
                DeliveryResult::FatalFailure(FatalKind::StaleToken, err)
            }
            other => self.settle(other),
        }
    }

    async fn attempt(
        &self,
        client: &dyn LogsDelivery,
        policy: &RetryPolicy,
        key: &StreamKey,
        batch: &LogBatch,
    ) -> DeliveryResult {
        let token = self.token().cloned();
        let token_ref = token.as_ref();
        policy
            .execute(|| client.publish(key, batch, token_ref))
            .await
    }

    fn settle(&mut self, result: DeliveryResult) -> DeliveryResult {
        match &result {
            DeliveryResult::Success(next) => {
                *self = StreamState::Ready(next.clone());
            }
            failure if failure.is_resource_not_found() => {
                *self = StreamState::Uninitialized;
            }
            _ => {}
        }
        result
    }
}

/// One async mutex per stream key.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<StreamKey, Arc<tokio::sync::Mutex<StreamState>>>>,
}

impl StreamRegistry {
    /// Lock the state of `key`, creating it on first use.
    pub async fn lock(&self, key: &StreamKey) -> OwnedMutexGuard<StreamState> {
        let slot = {
            let mut streams = match self.streams.lock() {
                Ok(streams) => streams,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(streams.entry(key.clone()).or_default())
        };
        slot.lock_owned().await
    }

    /// Forget every stream except `current` that nobody holds, such as the
    /// previous day's default stream.
    pub fn prune(&self, current: &StreamKey) {
        let mut streams = match self.streams.lock() {
            Ok(streams) => streams,
            Err(poisoned) => poisoned.into_inner(),
        };
        streams.retain(|key, slot| key == current || Arc::strong_count(slot) > 1);
    }
}
