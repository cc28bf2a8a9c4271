// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classified, bounded retry with exponential backoff.

use crate::config::TelemetryConfig;
use crate::delivery::{DeliveryResult, FatalKind};
use crate::errors::RemoteError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry-relevant category of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The sequence token used was not the one the stream expected.
    StaleToken,
    Throttled,
    Transient,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl From<&TelemetryConfig> for RetryPolicy {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn classify(error: &RemoteError) -> ErrorKind {
        match error {
            RemoteError::Transport(_) | RemoteError::Timeout => ErrorKind::Transient,
            RemoteError::Payload(_) | RemoteError::Session(_) => ErrorKind::Fatal,
            RemoteError::Service { status, .. } => {
                let code = error.code().unwrap_or_default();
                if code == "InvalidSequenceTokenException" {
                    ErrorKind::StaleToken
                } else if code.starts_with("Throttling")
                    || code == "RequestLimitExceeded"
                    || code.starts_with("TooManyRequests")
                    || *status == 429
                {
                    ErrorKind::Throttled
                } else if code.starts_with("ServiceUnavailable")
                    || code == "InternalFailure"
                    || *status >= 500
                {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            }
        }
    }

    /// Backoff before retry number `attempt` (zero-based): `base * 2^attempt`, capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, reports a stale token or
    /// runs out of retries.
    ///
    /// Stale-token results are handed back untouched and never consume the
    /// retry budget; refreshing the token is the caller's job.
    pub async fn execute<F, Fut>(&self, mut op: F) -> DeliveryResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeliveryResult>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                DeliveryResult::RetryableFailure(kind @ (ErrorKind::Throttled | ErrorKind::Transient), err) => {
                    if attempt >= self.max_retries {
                        debug!(
                            "RETRY | Giving up after {} attempts: {}",
                            attempt + 1,
                            err
                        );
                        return DeliveryResult::FatalFailure(FatalKind::ExhaustedRetries, err);
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        "RETRY | {:?} failure on attempt {}, retrying in {}ms: {}",
                        kind,
                        attempt + 1,
                        delay.as_millis(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                DeliveryResult::RetryableFailure(ErrorKind::Fatal, err) => {
                    return DeliveryResult::FatalFailure(FatalKind::Rejected, err);
                }
                other => return other,
            }
        }
    }
}
