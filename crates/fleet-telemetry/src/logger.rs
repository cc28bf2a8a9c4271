// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing formatter for the pipeline's own diagnostics.
//!
//! ```text
//! FLEET_TELEMETRY | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::fmt::Subscriber::builder()
//!     .event_format(fleet_telemetry::logger::Formatter::default())
//!     .with_max_level(tracing::Level::INFO)
//!     .finish();
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

const DEFAULT_PREFIX: &str = "FLEET_TELEMETRY";

/// Prefixes every line with a fixed tag, `FLEET_TELEMETRY` by default, so
/// pipeline diagnostics can be told apart from the host application's output.
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    prefix: &'static str,
}

impl Default for Formatter {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX,
        }
    }
}

impl Formatter {
    #[must_use]
    pub fn with_prefix(prefix: &'static str) -> Self {
        Self { prefix }
    }

    /// Writes `name{fields}: ` for each span the event sits in, outermost first.
    fn write_spans<S, N>(
        ctx: &FmtContext<'_, S, N>,
        writer: &mut format::Writer<'_>,
    ) -> fmt::Result
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        N: for<'a> FormatFields<'a> + 'static,
    {
        let Some(scope) = ctx.event_scope() else {
            return Ok(());
        };
        for span in scope.from_root() {
            let ext = span.extensions();
            match ext.get::<FormattedFields<N>>().filter(|f| !f.is_empty()) {
                Some(fields) => write!(writer, "{}{{{}}}: ", span.name(), fields)?,
                None => write!(writer, "{}: ", span.name())?,
            }
        }
        Ok(())
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{} | {} | ", self.prefix, event.metadata().level())?;
        Self::write_spans(ctx, &mut writer)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
