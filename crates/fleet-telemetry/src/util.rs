// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for telemetry configuration.

/// Parses and validates a metric namespace string against the store's naming rules.
///
/// A valid namespace must:
/// - Start with an ASCII letter
/// - Contain only ASCII alphanumerics or one of `. - _ / # :`
/// - Not be empty, contain only whitespace, or exceed 255 characters
/// - Not start with the reserved `AWS/` prefix
///
/// Whitespace is automatically trimmed from the input.
///
/// # Examples
///
/// ```
/// use fleet_telemetry::util::parse_metric_namespace;
///
/// assert_eq!(parse_metric_namespace("Hyperion/FleetManager"), Some("Hyperion/FleetManager".to_string()));
/// assert_eq!(parse_metric_namespace("1invalid"), None);
/// assert_eq!(parse_metric_namespace("AWS/EC2"), None);
/// ```
pub fn parse_metric_namespace(namespace: &str) -> Option<String> {
    let trimmed = namespace.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.len() > 255 {
        tracing::error!(
            "METRIC_NAMESPACE is longer than 255 characters: '{}'. Ignoring namespace.",
            trimmed
        );
        return None;
    }

    if trimmed.starts_with("AWS/") {
        tracing::error!(
            "METRIC_NAMESPACE uses the reserved 'AWS/' prefix: '{}'. Ignoring namespace.",
            trimmed
        );
        return None;
    }

    let mut chars = trimmed.chars();

    if let Some(first_char) = chars.next() {
        if !first_char.is_ascii_alphabetic() {
            tracing::error!(
                "METRIC_NAMESPACE must start with a letter, got: '{}'. Ignoring namespace.",
                trimmed
            );
            return None;
        }
    } else {
        return None;
    }

    if let Some(invalid_char) = chars.find(|&ch| {
        !ch.is_ascii_alphanumeric() && !matches!(ch, '.' | '-' | '_' | '/' | '#' | ':')
    }) {
        tracing::error!(
            "METRIC_NAMESPACE contains invalid character '{}' in '{}'. Ignoring namespace.",
            invalid_char,
            trimmed
        );
        return None;
    }

    Some(trimmed.to_string())
}
