// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured log entries and their wire rendering.

use crate::constants::LOG_EVENT_OVERHEAD_BYTES;
use crate::errors::SerializeError;
use crate::metadata::{get_hostname, EnvMetadataProvider};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Where an entry was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    pub host: String,
    pub pid: u32,
    pub correlation_id: Option<String>,
}

impl SourceContext {
    #[must_use]
    pub fn new(host: &str, pid: u32) -> Self {
        Self {
            host: host.to_string(),
            pid,
            correlation_id: None,
        }
    }

    /// Context of the current process, with the hostname detected once.
    #[must_use]
    pub fn local() -> Self {
        static LOCAL_HOST: OnceLock<String> = OnceLock::new();
        let host = LOCAL_HOST.get_or_init(|| get_hostname(&EnvMetadataProvider));
        Self::new(host, std::process::id())
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }
}

/// An immutable structured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    message: String,
    source: SourceContext,
}

impl LogEntry {
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: &str,
        source: SourceContext,
    ) -> Self {
        Self {
            timestamp,
            level,
            message: message.to_string(),
            source,
        }
    }

    /// Entry stamped with the current time and local source context.
    #[must_use]
    pub fn now(level: LogLevel, message: &str) -> Self {
        Self::new(Utc::now(), level, message, SourceContext::local())
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn source(&self) -> &SourceContext {
        &self.source
    }
}

/// Renders a [`LogEntry`] to the message text sent to the store.
pub trait LogSerializer: Send + Sync {
    fn serialize(&self, entry: &LogEntry) -> Result<String, SerializeError>;
}

/// Renders entries as one JSON object per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLogSerializer;

#[derive(Serialize)]
struct JsonLogLine<'a> {
    timestamp: String,
    level: LogLevel,
    message: &'a str,
    host: &'a str,
    pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
}

impl LogSerializer for JsonLogSerializer {
    fn serialize(&self, entry: &LogEntry) -> Result<String, SerializeError> {
        let line = JsonLogLine {
            timestamp: entry
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            level: entry.level,
            message: &entry.message,
            host: &entry.source.host,
            pid: entry.source.pid,
            correlation_id: entry.source.correlation_id.as_deref(),
        };
        serde_json::to_string(&line).map_err(|e| SerializeError(e.to_string()))
    }
}

/// A log entry in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    timestamp_ms: i64,
    message: String,
    entry: Option<LogEntry>,
}

impl LogEvent {
    #[must_use]
    pub fn new(timestamp_ms: i64, message: &str) -> Self {
        Self {
            timestamp_ms,
            message: message.to_string(),
            entry: None,
        }
    }

    /// Render `entry`, keeping it attached so a failed batch can be requeued.
    pub fn render(
        entry: LogEntry,
        serializer: &dyn LogSerializer,
    ) -> Result<Self, SerializeError> {
        let message = serializer.serialize(&entry)?;
        Ok(Self {
            timestamp_ms: entry.timestamp.timestamp_millis(),
            message,
            entry: Some(entry),
        })
    }

    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Size this event counts for against the batch byte limit.
    #[must_use]
    pub fn byte_cost(&self) -> usize {
        self.message.len() + LOG_EVENT_OVERHEAD_BYTES
    }

    #[must_use]
    pub fn into_entry(self) -> Option<LogEntry> {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LogEntry {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_000_000).expect("valid timestamp");
        LogEntry::new(
            ts,
            LogLevel::Warning,
            "disk usage at 91%",
            SourceContext::new("web-01", 4242).with_correlation_id("run-7"),
        )
    }

    #[test]
    fn test_json_serializer() {
        let rendered = JsonLogSerializer.serialize(&entry()).expect("serializes");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("valid json");
        assert_eq!(value["timestamp"], "2023-11-14T22:13:20.123Z");
        assert_eq!(value["level"], "WARNING");
        assert_eq!(value["message"], "disk usage at 91%");
        assert_eq!(value["host"], "web-01");
        assert_eq!(value["pid"], 4242);
        assert_eq!(value["correlation_id"], "run-7");
    }

    #[test]
    fn test_json_serializer_omits_missing_correlation_id() {
        let entry = LogEntry::new(
            Utc::now(),
            LogLevel::Info,
            "ok",
            SourceContext::new("web-01", 1),
        );
        let rendered = JsonLogSerializer.serialize(&entry).expect("serializes");
        assert!(!rendered.contains("correlation_id"));
    }

    #[test]
    fn test_render_event() {
        let event = LogEvent::render(entry(), &JsonLogSerializer).expect("renders");
        assert_eq!(event.timestamp_ms(), 1_700_000_000_123);
        assert_eq!(event.byte_cost(), event.message().len() + 26);
        assert_eq!(event.into_entry(), Some(entry()));
    }

    #[test]
    fn test_byte_cost_counts_utf8_bytes() {
        let event = LogEvent::new(0, "héllo");
        assert_eq!(event.byte_cost(), 6 + 26);
    }
}
