// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process metadata detection.
//!
//! Supplies the `Hostname` and `InstanceId` dimensions and the default log
//! stream prefix.

use std::env;
use tracing::warn;

/// Metadata describing the host the process runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessMetadata {
    pub hostname: Option<String>,
    pub instance_id: Option<String>,
}

impl ProcessMetadata {
    /// True when nothing could be detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.instance_id.is_none()
    }
}

/// Source of process metadata, swapped out in tests.
pub trait MetadataProvider: Send + Sync {
    fn metadata(&self) -> ProcessMetadata;
}

/// Reads metadata from the environment and the operating system.
///
/// Hostname lookup order:
/// 1. `FLEET_HOSTNAME`
/// 2. `HOSTNAME`
/// 3. The system hostname via `nix::unistd::gethostname()`
///
/// The instance id comes from `FLEET_INSTANCE_ID`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvMetadataProvider;

impl MetadataProvider for EnvMetadataProvider {
    fn metadata(&self) -> ProcessMetadata {
        ProcessMetadata {
            hostname: detect_hostname(),
            instance_id: non_empty_var("FLEET_INSTANCE_ID"),
        }
    }
}

/// Provider returning fixed values.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataProvider(pub ProcessMetadata);

impl MetadataProvider for StaticMetadataProvider {
    fn metadata(&self) -> ProcessMetadata {
        self.0.clone()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.is_empty())
}

fn detect_hostname() -> Option<String> {
    if let Some(hostname) = non_empty_var("FLEET_HOSTNAME") {
        return Some(hostname);
    }

    if let Some(hostname) = non_empty_var("HOSTNAME") {
        return Some(hostname);
    }

    match nix::unistd::gethostname() {
        Ok(hostname_osstr) => {
            if let Some(hostname_str) = hostname_osstr.to_str() {
                if !hostname_str.is_empty() {
                    return Some(hostname_str.to_string());
                }
            }
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }

    None
}

/// Hostname used to name the default log stream.
#[must_use]
pub fn get_hostname(provider: &dyn MetadataProvider) -> String {
    provider.metadata().hostname.unwrap_or_else(|| {
        warn!("Could not determine hostname, using 'unknown'");
        "unknown".to_string()
    })
}
