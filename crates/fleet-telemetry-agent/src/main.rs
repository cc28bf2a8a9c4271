// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use fleet_telemetry::{
    logger::Formatter,
    session::{HeaderValue, Session, SessionFactory},
    LogEntry, LogLevel, MetricDatum, TelemetryConfig, TelemetryPipeline,
};
use tokio_util::sync::CancellationToken;

const FORWARDED_LINES_METRIC: &str = "ForwardedLineCount";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("FLEET_TELEMETRY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(Formatter::default())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let config = match TelemetryConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on fleet telemetry agent startup: {e}");
            return;
        }
    };
    let flush_interval = config.flush_interval;

    let session_factory = match build_session(&config.region) {
        Ok(factory) => Arc::new(factory),
        Err(e) => {
            error!("Error creating session: {e}");
            return;
        }
    };

    let pipeline = match TelemetryPipeline::new(config, session_factory) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Error creating telemetry pipeline: {e}");
            return;
        }
    };

    let cancel = CancellationToken::new();
    let runner = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };

    info!("Forwarding stdin to the telemetry pipeline");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = interval(flush_interval);
    tick.tick().await; // discard first tick, which is instantaneous
    let mut forwarded: u32 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    pipeline.enqueue(LogEntry::now(level_for(&line), &line));
                    forwarded += 1;
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = tick.tick() => {
                pipeline.publish(vec![MetricDatum::new(FORWARDED_LINES_METRIC, f64::from(forwarded))]);
                forwarded = 0;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if forwarded > 0 {
        pipeline.publish(vec![MetricDatum::new(
            FORWARDED_LINES_METRIC,
            f64::from(forwarded),
        )]);
    }

    cancel.cancel();
    match runner.await {
        Ok(Ok(report)) => info!(
            "Final flush sent {} items in {} batches, dropped {}",
            report.entries_sent, report.batches_sent, report.entries_dropped
        ),
        Ok(Err(e)) => error!("Final flush failed: {e}"),
        Err(e) => error!("Flush task failed: {e}"),
    }

    if let Err(e) = pipeline.shutdown().await {
        error!("Error shutting down telemetry pipeline: {e}");
    }
}

/// Session for `region`, with a bearer token from `FLEET_TELEMETRY_TOKEN` when set.
fn build_session(region: &str) -> Result<SessionFactory, String> {
    let mut session = Session::new(region);
    if let Ok(token) = env::var("FLEET_TELEMETRY_TOKEN") {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| format!("invalid FLEET_TELEMETRY_TOKEN: {e}"))?;
        session.headers.insert("authorization", value);
    }
    Ok(SessionFactory::new_from_static(session))
}

fn level_for(line: &str) -> LogLevel {
    let upper = line.to_uppercase();
    if upper.contains("CRITICAL") || upper.contains("FATAL") {
        LogLevel::Critical
    } else if upper.contains("ERROR") {
        LogLevel::Error
    } else if upper.contains("WARN") {
        LogLevel::Warning
    } else if upper.contains("DEBUG") {
        LogLevel::Debug
    } else if upper.contains("TRACE") {
        LogLevel::Trace
    } else {
        LogLevel::Info
    }
}
