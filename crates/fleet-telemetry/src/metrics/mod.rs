// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric data model, batching and publishing.

use crate::dimensions::Dimensions;
use chrono::{DateTime, Utc};
use std::str::FromStr;

pub mod batcher;
pub mod publisher;

macro_rules! units {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// Unit of a metric value, spelled on the wire the way the store expects.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Unit {
            $($variant),+
        }

        impl Unit {
            pub const ALL: &'static [Unit] = &[$(Unit::$variant),+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Unit::$variant => $wire),+
                }
            }
        }
    };
}

units! {
    Seconds => "Seconds",
    Microseconds => "Microseconds",
    Milliseconds => "Milliseconds",
    Bytes => "Bytes",
    Kilobytes => "Kilobytes",
    Megabytes => "Megabytes",
    Gigabytes => "Gigabytes",
    Terabytes => "Terabytes",
    Bits => "Bits",
    Kilobits => "Kilobits",
    Megabits => "Megabits",
    Gigabits => "Gigabits",
    Terabits => "Terabits",
    Percent => "Percent",
    Count => "Count",
    BytesPerSecond => "Bytes/Second",
    KilobytesPerSecond => "Kilobytes/Second",
    MegabytesPerSecond => "Megabytes/Second",
    GigabytesPerSecond => "Gigabytes/Second",
    TerabytesPerSecond => "Terabytes/Second",
    BitsPerSecond => "Bits/Second",
    KilobitsPerSecond => "Kilobits/Second",
    MegabitsPerSecond => "Megabits/Second",
    GigabitsPerSecond => "Gigabits/Second",
    TerabitsPerSecond => "Terabits/Second",
    CountPerSecond => "Count/Second",
    None => "None",
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::ALL
            .iter()
            .copied()
            .find(|unit| unit.as_str() == s)
            .ok_or(())
    }
}

/// Storage resolution of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// 60 second granularity
    #[default]
    Standard,
    /// 1 second granularity
    High,
}

impl Resolution {
    #[must_use]
    pub fn seconds(self) -> u32 {
        match self {
            Resolution::Standard => 60,
            Resolution::High => 1,
        }
    }
}

/// A metric as handed in by a producer, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDatum {
    pub name: String,
    pub value: f64,
    /// Free-text unit name; inferred from `name` when absent.
    pub unit: Option<String>,
    /// Defaults to the validation time when absent.
    pub timestamp: Option<DateTime<Utc>>,
    /// Datum-specific dimensions, merged over the resolved defaults.
    pub dimensions: Dimensions,
    pub resolution: Resolution,
}

impl MetricDatum {
    #[must_use]
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit: None,
            timestamp: None,
            dimensions: Dimensions::new(),
            resolution: Resolution::Standard,
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, key: &str, value: &str) -> Self {
        self.dimensions.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn high_resolution(mut self) -> Self {
        self.resolution = Resolution::High;
        self
    }
}

/// A validated metric, ready for partitioning.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricObservation {
    pub name: String,
    pub value: f64,
    pub unit: Unit,
    pub timestamp: DateTime<Utc>,
    pub dimensions: Dimensions,
    pub resolution: Resolution,
}

impl From<MetricObservation> for MetricDatum {
    fn from(observation: MetricObservation) -> Self {
        Self {
            name: observation.name,
            value: observation.value,
            unit: Some(observation.unit.as_str().to_string()),
            timestamp: Some(observation.timestamp),
            dimensions: observation.dimensions,
            resolution: observation.resolution,
        }
    }
}
