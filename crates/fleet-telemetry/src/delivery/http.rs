// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery clients speaking the store's JSON protocol.
//!
//! Every call is a `POST /` whose operation is named by the `X-Amz-Target`
//! header. Failures come back as a JSON body with a `__type` code, a message
//! and, for sequence token errors, the token the stream expected.

use crate::config::TelemetryConfig;
use crate::delivery::{DeliveryResult, LogsDelivery, MetricsDelivery, SequenceToken};
use crate::errors::RemoteError;
use crate::logs::batcher::LogBatch;
use crate::logs::stream::StreamKey;
use crate::metrics::batcher::MetricBatch;
use crate::session::SessionFactory;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const TARGET_HEADER: &str = "X-Amz-Target";
const PUT_METRIC_DATA: &str = "GraniteServiceVersion20100801.PutMetricData";
const CREATE_LOG_GROUP: &str = "Logs_20140328.CreateLogGroup";
const CREATE_LOG_STREAM: &str = "Logs_20140328.CreateLogStream";
const DESCRIBE_LOG_STREAMS: &str = "Logs_20140328.DescribeLogStreams";
const PUT_LOG_EVENTS: &str = "Logs_20140328.PutLogEvents";
const METRICS_CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const LOGS_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Builds the shared reqwest client, falling back to a direct connection when
/// the proxy setting cannot be parsed.
#[must_use]
pub fn get_client(config: &TelemetryConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    config: &TelemetryConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
    }

    Ok(builder.build()?)
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
    #[serde(rename = "expectedSequenceToken")]
    expected_sequence_token: Option<String>,
}

/// One JSON-protocol endpoint plus the session used to authenticate against it.
#[derive(Clone)]
struct JsonEndpoint {
    client: reqwest::Client,
    endpoint: String,
    content_type: &'static str,
    session_factory: Arc<SessionFactory>,
}

impl JsonEndpoint {
    async fn call<T: Serialize + Sync>(
        &self,
        target: &str,
        body: &T,
    ) -> Result<String, RemoteError> {
        let Some(session) = self.session_factory.get_session().await else {
            return Err(RemoteError::Session(
                "session resolver returned no session".to_string(),
            ));
        };

        let payload =
            serde_json::to_vec(body).map_err(|e| RemoteError::Payload(e.to_string()))?;

        let url = format!("{}/", self.endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .headers(session.headers.clone())
            .header(TARGET_HEADER, target)
            .header(CONTENT_TYPE, self.content_type)
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        let header_code = resp
            .headers()
            .get("x-amzn-ErrorType")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let text = resp.text().await?;

        if status.is_success() {
            return Ok(text);
        }

        let parsed: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let code = parsed
            .error_type
            .or(header_code)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
        Err(RemoteError::Service {
            status: status.as_u16(),
            code,
            message: parsed.message.unwrap_or(text),
            expected_sequence_token: parsed.expected_sequence_token,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutMetricDataRequest<'a> {
    namespace: &'a str,
    metric_data: Vec<MetricDatumBody<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetricDatumBody<'a> {
    metric_name: &'a str,
    dimensions: Vec<DimensionBody<'a>>,
    /// Seconds since the epoch
    timestamp: f64,
    value: f64,
    unit: &'static str,
    storage_resolution: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DimensionBody<'a> {
    name: &'a str,
    value: &'a str,
}

fn metric_request<'a>(namespace: &'a str, batch: &'a MetricBatch) -> PutMetricDataRequest<'a> {
    PutMetricDataRequest {
        namespace,
        metric_data: batch
            .observations()
            .iter()
            .map(|obs| MetricDatumBody {
                metric_name: &obs.name,
                dimensions: obs
                    .dimensions
                    .iter()
                    .map(|(name, value)| DimensionBody {
                        name: name.as_str(),
                        value: value.as_str(),
                    })
                    .collect(),
                timestamp: obs.timestamp.timestamp_millis() as f64 / 1000.0,
                value: obs.value,
                unit: obs.unit.as_str(),
                storage_resolution: obs.resolution.seconds(),
            })
            .collect(),
    }
}

/// Metrics delivery over HTTP.
#[derive(Clone)]
pub struct MetricsApi {
    api: JsonEndpoint,
}

impl MetricsApi {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        endpoint: String,
        session_factory: Arc<SessionFactory>,
    ) -> Self {
        Self {
            api: JsonEndpoint {
                client,
                endpoint,
                content_type: METRICS_CONTENT_TYPE,
                session_factory,
            },
        }
    }

    #[must_use]
    pub fn from_config(config: &TelemetryConfig, session_factory: Arc<SessionFactory>) -> Self {
        Self::new(get_client(config), config.metrics_endpoint(), session_factory)
    }
}

#[async_trait]
impl MetricsDelivery for MetricsApi {
    async fn publish(&self, namespace: &str, batch: &MetricBatch) -> DeliveryResult {
        let request = metric_request(namespace, batch);
        match self.api.call(PUT_METRIC_DATA, &request).await {
            Ok(_) => {
                debug!("METRICS | Published {} metrics", batch.len());
                DeliveryResult::Success(None)
            }
            Err(err) => DeliveryResult::from_error(err),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStreamDescription>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStreamDescription {
    log_stream_name: String,
    upload_sequence_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: Vec<InputLogEvent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Serialize)]
struct InputLogEvent<'a> {
    timestamp: i64,
    message: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<serde_json::Value>,
}

/// Logs delivery over HTTP.
#[derive(Clone)]
pub struct LogsApi {
    api: JsonEndpoint,
}

impl LogsApi {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        endpoint: String,
        session_factory: Arc<SessionFactory>,
    ) -> Self {
        Self {
            api: JsonEndpoint {
                client,
                endpoint,
                content_type: LOGS_CONTENT_TYPE,
                session_factory,
            },
        }
    }

    #[must_use]
    pub fn from_config(config: &TelemetryConfig, session_factory: Arc<SessionFactory>) -> Self {
        Self::new(get_client(config), config.logs_endpoint(), session_factory)
    }

    async fn create<T: Serialize + Sync>(&self, target: &str, body: &T) -> DeliveryResult {
        match self.api.call(target, body).await {
            Ok(_) => DeliveryResult::Success(None),
            Err(err) if err.code() == Some("ResourceAlreadyExistsException") => {
                DeliveryResult::Success(None)
            }
            Err(err) => DeliveryResult::from_error(err),
        }
    }
}

#[async_trait]
impl LogsDelivery for LogsApi {
    async fn publish(
        &self,
        key: &StreamKey,
        batch: &LogBatch,
        token: Option<&SequenceToken>,
    ) -> DeliveryResult {
        let request = PutLogEventsRequest {
            log_group_name: &key.group,
            log_stream_name: &key.stream,
            log_events: batch
                .events()
                .iter()
                .map(|event| InputLogEvent {
                    timestamp: event.timestamp_ms(),
                    message: event.message(),
                })
                .collect(),
            sequence_token: token.map(SequenceToken::as_str),
        };

        match self.api.call(PUT_LOG_EVENTS, &request).await {
            Ok(body) => {
                let response: PutLogEventsResponse = match serde_json::from_str(&body) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("LOGS | Unexpected PutLogEvents response for {}: {}", key, e);
                        return DeliveryResult::Success(None);
                    }
                };
                if let Some(rejected) = response.rejected_log_events_info {
                    warn!("LOGS | Store rejected some events for {}: {}", key, rejected);
                }
                DeliveryResult::Success(
                    response
                        .next_sequence_token
                        .as_deref()
                        .map(SequenceToken::new),
                )
            }
            Err(err) if err.code() == Some("DataAlreadyAcceptedException") => {
                debug!("LOGS | Batch for {} was already accepted", key);
                DeliveryResult::Success(err.expected_sequence_token().map(SequenceToken::new))
            }
            Err(err) => DeliveryResult::from_error(err),
        }
    }

    async fn create_group(&self, group: &str) -> DeliveryResult {
        self.create(
            CREATE_LOG_GROUP,
            &LogGroupRequest {
                log_group_name: group,
            },
        )
        .await
    }

    async fn create_stream(&self, key: &StreamKey) -> DeliveryResult {
        self.create(
            CREATE_LOG_STREAM,
            &LogStreamRequest {
                log_group_name: &key.group,
                log_stream_name: &key.stream,
            },
        )
        .await
    }

    async fn current_token(&self, key: &StreamKey) -> DeliveryResult {
        let request = DescribeLogStreamsRequest {
            log_group_name: &key.group,
            log_stream_name_prefix: &key.stream,
        };
        let body = match self.api.call(DESCRIBE_LOG_STREAMS, &request).await {
            Ok(body) => body,
            Err(err) => return DeliveryResult::from_error(err),
        };

        let response: DescribeLogStreamsResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(e) => return DeliveryResult::from_error(RemoteError::Payload(e.to_string())),
        };

        match response
            .log_streams
            .into_iter()
            .find(|s| s.log_stream_name == key.stream)
        {
            Some(stream) => DeliveryResult::Success(
                stream.upload_sequence_token.as_deref().map(SequenceToken::new),
            ),
            None => DeliveryResult::from_error(RemoteError::Service {
                status: 400,
                code: "ResourceNotFoundException".to_string(),
                message: format!("log stream {key} does not exist"),
                expected_sequence_token: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::FatalKind;
    use crate::logs::batcher::partition;
    use crate::logs::entry::LogEvent;
    use crate::metrics::batcher::{partition as partition_metrics, validate};
    use crate::metrics::MetricDatum;
    use crate::retry::ErrorKind;
    use crate::session::Session;
    use mockito::Matcher;
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

    fn session_factory() -> Arc<SessionFactory> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer test-token"));
        Arc::new(SessionFactory::new_from_static(
            Session::new("us-east-1").with_headers(headers),
        ))
    }

    fn logs_api(url: String) -> LogsApi {
        LogsApi::new(reqwest::Client::new(), url, session_factory())
    }

    fn metric_batch() -> MetricBatch {
        let ts = chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let observation = validate(
            MetricDatum::new("RequestCount", 3.0)
                .with_timestamp(ts)
                .with_dimension("Role", "web"),
        )
        .expect("valid datum");
        partition_metrics(vec![observation]).remove(0)
    }

    fn log_batch() -> LogBatch {
        partition(vec![LogEvent::new(1_700_000_000_000, "hello")]).remove(0)
    }

    #[tokio::test]
    async fn test_put_metric_data_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", PUT_METRIC_DATA)
            .match_header("content-type", METRICS_CONTENT_TYPE)
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::PartialJsonString(
                r#"{"Namespace":"Hyperion/FleetManager","MetricData":[{"MetricName":"RequestCount","Dimensions":[{"Name":"Role","Value":"web"}],"Timestamp":1700000000.0,"Value":3.0,"Unit":"Count","StorageResolution":60}]}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let api = MetricsApi::new(reqwest::Client::new(), server.url(), session_factory());
        let result = api.publish("Hyperion/FleetManager", &metric_batch()).await;

        assert_eq!(result, DeliveryResult::Success(None));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metrics_throttling_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"__type":"Throttling","message":"Rate exceeded"}"#)
            .create_async()
            .await;

        let api = MetricsApi::new(reqwest::Client::new(), server.url(), session_factory());
        let result = api.publish("Hyperion/FleetManager", &metric_batch()).await;

        assert!(matches!(
            result,
            DeliveryResult::RetryableFailure(ErrorKind::Throttled, _)
        ));
    }

    #[tokio::test]
    async fn test_put_log_events_returns_next_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", PUT_LOG_EVENTS)
            .match_header("content-type", LOGS_CONTENT_TYPE)
            .match_body(Matcher::PartialJsonString(
                r#"{"logGroupName":"/hyperion/fleet","logStreamName":"web-01/2024-05-01","sequenceToken":"t1","logEvents":[{"timestamp":1700000000000,"message":"hello"}]}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"nextSequenceToken":"t2"}"#)
            .expect(1)
            .create_async()
            .await;

        let key = StreamKey::new("/hyperion/fleet", "web-01/2024-05-01");
        let result = logs_api(server.url())
            .publish(&key, &log_batch(), Some(&SequenceToken::new("t1")))
            .await;

        assert_eq!(result, DeliveryResult::Success(Some(SequenceToken::new("t2"))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_sequence_token_carries_expected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(
                r#"{"__type":"com.amazonaws.logs#InvalidSequenceTokenException","message":"bad token","expectedSequenceToken":"t9"}"#,
            )
            .create_async()
            .await;

        let key = StreamKey::new("g", "s");
        let result = logs_api(server.url()).publish(&key, &log_batch(), None).await;

        match result {
            DeliveryResult::RetryableFailure(ErrorKind::StaleToken, err) => {
                assert_eq!(err.expected_sequence_token(), Some("t9"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_data_already_accepted_is_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(
                r#"{"__type":"DataAlreadyAcceptedException","message":"dup","expectedSequenceToken":"t5"}"#,
            )
            .create_async()
            .await;

        let key = StreamKey::new("g", "s");
        let result = logs_api(server.url()).publish(&key, &log_batch(), None).await;

        assert_eq!(result, DeliveryResult::Success(Some(SequenceToken::new("t5"))));
    }

    #[tokio::test]
    async fn test_create_tolerates_existing_resources() {
        let mut server = mockito::Server::new_async().await;
        let group = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", CREATE_LOG_GROUP)
            .match_body(Matcher::PartialJsonString(
                r#"{"logGroupName":"/hyperion/fleet"}"#.to_string(),
            ))
            .with_status(400)
            .with_body(r#"{"__type":"ResourceAlreadyExistsException","message":"exists"}"#)
            .expect(1)
            .create_async()
            .await;
        let stream = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", CREATE_LOG_STREAM)
            .with_status(200)
            .with_body("")
            .expect(1)
            .create_async()
            .await;

        let api = logs_api(server.url());
        let key = StreamKey::new("/hyperion/fleet", "web-01/2024-05-01");
        assert!(api.create_group(&key.group).await.is_success());
        assert!(api.create_stream(&key).await.is_success());
        group.assert_async().await;
        stream.assert_async().await;
    }

    #[tokio::test]
    async fn test_current_token_matches_exact_stream() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", DESCRIBE_LOG_STREAMS)
            .with_status(200)
            .with_body(
                r#"{"logStreams":[{"logStreamName":"web-01/2024-05-01-old","uploadSequenceToken":"wrong"},{"logStreamName":"web-01/2024-05-01","uploadSequenceToken":"right"}]}"#,
            )
            .create_async()
            .await;

        let api = logs_api(server.url());
        let key = StreamKey::new("g", "web-01/2024-05-01");
        assert_eq!(
            api.current_token(&key).await,
            DeliveryResult::Success(Some(SequenceToken::new("right")))
        );

        let missing = StreamKey::new("g", "web-02");
        assert!(api.current_token(&missing).await.is_resource_not_found());
    }

    #[tokio::test]
    async fn test_access_denied_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(403)
            .with_body(r#"{"__type":"AccessDeniedException","Message":"nope"}"#)
            .create_async()
            .await;

        let key = StreamKey::new("g", "s");
        let result = logs_api(server.url()).publish(&key, &log_batch(), None).await;

        match result {
            DeliveryResult::FatalFailure(FatalKind::Rejected, err) => {
                assert_eq!(err.status(), Some(403));
                assert_eq!(err.code(), Some("AccessDeniedException"));
                assert_eq!(err.to_string(), "403 AccessDeniedException: nope");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_session_is_fatal() {
        let factory = Arc::new(SessionFactory::new_from_resolver(Arc::new(|| {
            Box::pin(async { None })
        })));
        let api = LogsApi::new(reqwest::Client::new(), "http://127.0.0.1:1".to_string(), factory);

        let result = api.create_group("g").await;
        assert!(matches!(
            result,
            DeliveryResult::FatalFailure(FatalKind::Rejected, RemoteError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let key = StreamKey::new("g", "s");
        let result = logs_api(server.url()).publish(&key, &log_batch(), None).await;

        match result {
            DeliveryResult::RetryableFailure(ErrorKind::Transient, err) => {
                assert_eq!(err.code(), Some("Service Unavailable"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_get_client_with_bad_proxy_falls_back() {
        let config = TelemetryConfig {
            https_proxy: Some("::not a url::".to_string()),
            ..TelemetryConfig::default()
        };
        let _client = get_client(&config);
    }
}
