// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dimension resolution for metric observations.
//!
//! Merges four sources into one dimension set, highest precedence first:
//! caller-supplied additional dimensions, explicit named dimensions
//! (`Role`, `Environment`, `InstanceId`), cached process metadata
//! (`Hostname`, `InstanceId`) and static defaults (`Project`).

use crate::metadata::{MetadataProvider, ProcessMetadata};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Ordered dimension set. Keys are unique by construction.
pub type Dimensions = BTreeMap<String, String>;

pub const PROJECT: &str = "Project";
pub const HOSTNAME: &str = "Hostname";
pub const INSTANCE_ID: &str = "InstanceId";
pub const ROLE: &str = "Role";
pub const ENVIRONMENT: &str = "Environment";

/// Resolves dimensions, caching process metadata after the first successful lookup.
#[derive(Clone)]
pub struct DimensionResolver {
    defaults: Dimensions,
    provider: Arc<dyn MetadataProvider>,
    cached: Arc<Mutex<Option<ProcessMetadata>>>,
}

impl std::fmt::Debug for DimensionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DimensionResolver")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl DimensionResolver {
    #[must_use]
    pub fn new(project_name: &str, provider: Arc<dyn MetadataProvider>) -> Self {
        let mut defaults = Dimensions::new();
        defaults.insert(PROJECT.to_string(), project_name.to_string());
        Self {
            defaults,
            provider,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolve dimensions using cached metadata.
    #[must_use]
    pub fn resolve(
        &self,
        role: Option<&str>,
        environment: Option<&str>,
        instance_id: Option<&str>,
        additional: Option<&Dimensions>,
    ) -> Dimensions {
        let metadata = self.cached_metadata();
        self.merge(&metadata, role, environment, instance_id, additional)
    }

    /// Resolve dimensions with a fresh metadata lookup, leaving the cache untouched.
    #[must_use]
    pub fn resolve_uncached(
        &self,
        role: Option<&str>,
        environment: Option<&str>,
        instance_id: Option<&str>,
        additional: Option<&Dimensions>,
    ) -> Dimensions {
        let metadata = self.provider.metadata();
        self.merge(&metadata, role, environment, instance_id, additional)
    }

    /// Forget cached metadata; the next `resolve` queries the provider again.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn cached_metadata(&self) -> ProcessMetadata {
        let Ok(mut cached) = self.cached.lock() else {
            return self.provider.metadata();
        };

        if let Some(metadata) = cached.as_ref() {
            return metadata.clone();
        }

        let metadata = self.provider.metadata();
        // An empty lookup is not cached so a later call can pick up metadata
        // that becomes available.
        if metadata.is_empty() {
            debug!("DIMENSIONS | No process metadata detected");
        } else {
            *cached = Some(metadata.clone());
        }
        metadata
    }

    fn merge(
        &self,
        metadata: &ProcessMetadata,
        role: Option<&str>,
        environment: Option<&str>,
        instance_id: Option<&str>,
        additional: Option<&Dimensions>,
    ) -> Dimensions {
        let mut dimensions = self.defaults.clone();

        if let Some(hostname) = &metadata.hostname {
            dimensions.insert(HOSTNAME.to_string(), hostname.clone());
        }
        if let Some(id) = &metadata.instance_id {
            dimensions.insert(INSTANCE_ID.to_string(), id.clone());
        }

        for (key, value) in [
            (ROLE, role),
            (ENVIRONMENT, environment),
            (INSTANCE_ID, instance_id),
        ] {
            if let Some(value) = value {
                dimensions.insert(key.to_string(), value.to_string());
            }
        }

        if let Some(additional) = additional {
            for (key, value) in additional {
                dimensions.insert(key.clone(), value.clone());
            }
        }

        dimensions.retain(|_, value| !value.trim().is_empty());
        dimensions
    }
}
