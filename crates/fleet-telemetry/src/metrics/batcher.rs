// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validation and partitioning of metric data into store-sized batches.

use crate::constants::{MAX_DIMENSIONS_PER_METRIC, MAX_METRICS_PER_BATCH};
use crate::errors::ValidationError;
use crate::metrics::{MetricDatum, MetricObservation, Unit};
use chrono::Utc;
use tracing::warn;

/// Ordered group of at most [`MAX_METRICS_PER_BATCH`] observations.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBatch {
    observations: Vec<MetricObservation>,
}

impl MetricBatch {
    #[must_use]
    pub fn observations(&self) -> &[MetricObservation] {
        &self.observations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    #[must_use]
    pub fn into_observations(self) -> Vec<MetricObservation> {
        self.observations
    }
}

/// Infer a unit from well-known substrings of the metric name.
#[must_use]
pub fn infer_unit(name: &str) -> Unit {
    if name.contains("Utilization") {
        Unit::Percent
    } else if name.contains("Count") {
        Unit::Count
    } else if name.contains("Latency") {
        Unit::Milliseconds
    } else if name.contains("Bytes") {
        Unit::Bytes
    } else {
        Unit::None
    }
}

pub fn validate(datum: MetricDatum) -> Result<MetricObservation, ValidationError> {
    let name = datum.name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if !datum.value.is_finite() {
        return Err(ValidationError::NonFiniteValue {
            name: name.to_string(),
        });
    }

    let unit = match datum.unit.as_deref() {
        Some(unit) => unit
            .trim()
            .parse::<Unit>()
            .map_err(|()| ValidationError::UnrecognizedUnit {
                name: name.to_string(),
                unit: unit.to_string(),
            })?,
        None => infer_unit(name),
    };

    if datum.dimensions.len() > MAX_DIMENSIONS_PER_METRIC {
        return Err(ValidationError::TooManyDimensions {
            name: name.to_string(),
            count: datum.dimensions.len(),
            limit: MAX_DIMENSIONS_PER_METRIC,
        });
    }

    Ok(MetricObservation {
        name: name.to_string(),
        value: datum.value,
        unit,
        timestamp: datum.timestamp.unwrap_or_else(Utc::now),
        dimensions: datum.dimensions,
        resolution: datum.resolution,
    })
}

/// Validate every datum, keeping the valid ones in input order.
pub fn validate_all(
    data: Vec<MetricDatum>,
) -> (Vec<MetricObservation>, Vec<ValidationError>) {
    let mut valid = Vec::with_capacity(data.len());
    let mut rejected = Vec::new();
    for datum in data {
        match validate(datum) {
            Ok(observation) => valid.push(observation),
            Err(err) => {
                warn!("METRICS | Rejected metric: {}", err);
                rejected.push(err);
            }
        }
    }
    (valid, rejected)
}

/// Split observations into consecutive batches of at most [`MAX_METRICS_PER_BATCH`].
#[must_use]
pub fn partition(observations: Vec<MetricObservation>) -> Vec<MetricBatch> {
    if observations.is_empty() {
        warn!("METRICS | No metrics to partition");
        return Vec::new();
    }

    let mut batches = Vec::with_capacity(observations.len().div_ceil(MAX_METRICS_PER_BATCH));
    let mut iter = observations.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(MetricBatch {
            observations: iter.by_ref().take(MAX_METRICS_PER_BATCH).collect(),
        });
    }
    batches
}
