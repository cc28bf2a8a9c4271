// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use fleet_telemetry::metadata::{ProcessMetadata, StaticMetadataProvider};
use fleet_telemetry::{
    LogEntry, LogLevel, MetricDatum, PipelineParts, Session, SessionFactory, TelemetryConfig,
    TelemetryError, TelemetryPipeline,
};
use mockito::{Matcher, Server};
use std::sync::Arc;
use std::time::Duration;

const PUT_METRIC_DATA: &str = "GraniteServiceVersion20100801.PutMetricData";

fn config_for(server: &Server) -> TelemetryConfig {
    TelemetryConfig {
        metrics_endpoint: Some(server.url()),
        logs_endpoint: Some(server.url()),
        log_group: "/hyperion/fleet".to_string(),
        log_stream: Some("node-7/2024-05-01".to_string()),
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        ..TelemetryConfig::default()
    }
}

fn pipeline_for(config: TelemetryConfig) -> TelemetryPipeline {
    let session = Arc::new(SessionFactory::new_from_static(Session::new(&config.region)));
    let mut parts = PipelineParts::http(&config, session);
    parts.metadata = Arc::new(StaticMetadataProvider(ProcessMetadata {
        hostname: Some("node-7".to_string()),
        instance_id: Some("i-0abc".to_string()),
    }));
    TelemetryPipeline::with_parts(config, parts).expect("failed to build pipeline")
}

#[tokio::test]
async fn test_metrics_are_published_in_batches_of_twenty() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", PUT_METRIC_DATA)
        .match_header("content-type", "application/x-amz-json-1.0")
        .match_body(Matcher::PartialJsonString(
            r#"{"Namespace":"Hyperion/FleetManager"}"#.to_string(),
        ))
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let pipeline = pipeline_for(config_for(&server));
    pipeline.publish(
        (0..25)
            .map(|i| MetricDatum::new("HealthCheckLatency", f64::from(i)))
            .collect(),
    );

    let report = pipeline.flush(true).await.expect("flush failed");

    mock.assert_async().await;
    assert_eq!(report.batches_sent, 2);
    assert_eq!(report.entries_sent, 25);
    assert_eq!(pipeline.buffered_metrics(), 0);
}

#[tokio::test]
async fn test_logs_provision_stream_and_recover_stale_token() {
    let mut server = Server::new_async().await;
    let group = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", "Logs_20140328.CreateLogGroup")
        .with_status(400)
        .with_body(r#"{"__type":"ResourceAlreadyExistsException","message":"exists"}"#)
        .expect(1)
        .create_async()
        .await;
    let stream = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", "Logs_20140328.CreateLogStream")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let describe = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", "Logs_20140328.DescribeLogStreams")
        .with_status(200)
        .with_body(
            r#"{"logStreams":[{"logStreamName":"node-7/2024-05-01","uploadSequenceToken":"t1"}]}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let stale = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", "Logs_20140328.PutLogEvents")
        .match_body(Matcher::PartialJsonString(
            r#"{"sequenceToken":"t1"}"#.to_string(),
        ))
        .with_status(400)
        .with_body(
            r#"{"__type":"InvalidSequenceTokenException","message":"bad token","expectedSequenceToken":"t2"}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", "Logs_20140328.PutLogEvents")
        .match_body(Matcher::PartialJsonString(
            r#"{"sequenceToken":"t2","logStreamName":"node-7/2024-05-01"}"#.to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"nextSequenceToken":"t3"}"#)
        .expect(1)
        .create_async()
        .await;
    let next = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", "Logs_20140328.PutLogEvents")
        .match_body(Matcher::PartialJsonString(
            r#"{"sequenceToken":"t3"}"#.to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"nextSequenceToken":"t4"}"#)
        .expect(1)
        .create_async()
        .await;

    let pipeline = pipeline_for(config_for(&server));
    for msg in ["scan started", "scan finished", "3 findings"] {
        pipeline.enqueue(LogEntry::now(LogLevel::Info, msg));
    }

    let report = pipeline.flush(true).await.expect("first flush failed");
    assert_eq!(report.batches_sent, 1);
    assert_eq!(report.entries_sent, 3);
    assert!(!report.has_drops());

    pipeline.enqueue(LogEntry::now(LogLevel::Warning, "disk at 91%"));
    let report = pipeline.flush(true).await.expect("second flush failed");
    assert_eq!(report.entries_sent, 1);

    group.assert_async().await;
    stream.assert_async().await;
    describe.assert_async().await;
    stale.assert_async().await;
    accepted.assert_async().await;
    next.assert_async().await;
    assert_eq!(pipeline.buffered_logs().await, 0);
}

#[tokio::test]
async fn test_throttled_batch_is_dropped_after_retries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", PUT_METRIC_DATA)
        .with_status(400)
        .with_body(r#"{"__type":"Throttling","message":"Rate exceeded"}"#)
        .expect(4)
        .create_async()
        .await;

    let pipeline = pipeline_for(config_for(&server));
    pipeline.publish(
        (0..5)
            .map(|i| MetricDatum::new("PatchDurationSeconds", f64::from(i)))
            .collect(),
    );

    let report = pipeline.flush(true).await.expect("non-strict flush must not fail");

    mock.assert_async().await;
    assert_eq!(report.batches_sent, 0);
    assert_eq!(report.batches_dropped, 1);
    assert_eq!(report.entries_dropped, 5);
    assert_eq!(pipeline.buffered_metrics(), 0);
}

#[tokio::test]
async fn test_strict_mode_surfaces_dropped_batches() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", PUT_METRIC_DATA)
        .with_status(400)
        .with_body(r#"{"__type":"InvalidParameterValue","message":"bad value"}"#)
        .expect(1)
        .create_async()
        .await;

    let pipeline = pipeline_for(TelemetryConfig {
        strict: true,
        ..config_for(&server)
    });
    pipeline.publish(vec![MetricDatum::new("ComplianceScore", 97.5)]);

    let result = pipeline.flush(true).await;

    mock.assert_async().await;
    assert!(matches!(
        result,
        Err(TelemetryError::Delivery {
            dropped_batches: 1,
            dropped_entries: 1
        })
    ));
}

#[tokio::test]
async fn test_disabled_pipeline_sends_nothing() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let pipeline = pipeline_for(TelemetryConfig {
        enabled: false,
        ..config_for(&server)
    });
    pipeline.publish(vec![MetricDatum::new("HealthCheckLatency", 1.0)]);
    pipeline.enqueue(LogEntry::now(LogLevel::Info, "ignored"));

    let report = pipeline.shutdown().await.expect("shutdown failed");

    mock.assert_async().await;
    assert_eq!(report, Default::default());
}
