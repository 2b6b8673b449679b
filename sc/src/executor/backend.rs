//! HTTP executor for the host's backend query endpoint
//!
//! Queries are posted to `/api/ds/query`, where the host forwards them to the
//! JDBC backend of the configured data source instance.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::QueryExecutor;
use crate::config::BackendConfig;
use crate::error::QueryError;
use crate::types::{DataFrame, Field, QueryRequest, QueryResponse, TimeRange};

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 500;

/// Upper bound for a single backoff delay
const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay before retry number `attempt` (1-based), doubling up to the cap
fn backoff_ms(attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    INITIAL_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Client for the host's data source query API
pub struct BackendClient {
    base_url: String,
    datasource_uid: String,
    api_key: String,
    http: Client,
    max_retries: u32,
}

impl BackendClient {
    /// Create a new client from configuration
    ///
    /// Reads the API token from the environment variable named in config.
    pub fn from_config(config: &BackendConfig) -> Result<Self, QueryError> {
        debug!(?config, "from_config: called");
        let api_key = config
            .get_api_key()
            .map_err(|e| QueryError::Config(e.to_string()))?;

        if config.datasource_uid.trim().is_empty() {
            return Err(QueryError::Config("backend.datasource-uid must be set".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(QueryError::Network)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            datasource_uid: config.datasource_uid.clone(),
            api_key,
            http,
            max_retries: config.max_retries,
        })
    }

    /// Build the request body for the query endpoint
    fn build_request_body(&self, request: &QueryRequest) -> serde_json::Value {
        debug!(request_id = %request.request_id, targets = request.targets.len(), "build_request_body: called");
        let range = request.range.unwrap_or_default();

        let queries = request
            .targets
            .iter()
            .map(|target| {
                serde_json::json!({
                    "refId": target.ref_id,
                    "datasource": { "uid": self.datasource_uid },
                    "rawSql": target.raw_sql.clone().unwrap_or_default(),
                    "format": target.format,
                })
            })
            .collect::<Vec<_>>();

        serde_json::json!({
            "from": range_bound(&range, true),
            "to": range_bound(&range, false),
            "queries": queries,
        })
    }

    /// Convert the endpoint's response into frames, in request target order
    fn parse_response(&self, request: &QueryRequest, api_response: ApiResponse) -> QueryResponse {
        debug!(results = api_response.results.len(), "parse_response: called");
        let mut results = api_response.results;
        let mut data = Vec::new();
        let mut errors = Vec::new();

        let mut ref_ids: Vec<String> = request.targets.iter().map(|t| t.ref_id.clone()).collect();
        let mut extra: Vec<String> = results.keys().filter(|k| !ref_ids.contains(k)).cloned().collect();
        extra.sort();
        ref_ids.extend(extra);

        for ref_id in ref_ids {
            let Some(result) = results.remove(&ref_id) else {
                debug!(%ref_id, "parse_response: no result for target");
                continue;
            };

            if let Some(error) = result.error {
                debug!(%ref_id, %error, "parse_response: target error");
                errors.push(format!("{}: {}", ref_id, error));
            }

            for frame in result.frames {
                data.push(frame.into_data_frame(&ref_id));
            }
        }

        QueryResponse {
            data,
            error: if errors.is_empty() { None } else { Some(errors.join("; ")) },
        }
    }
}

/// Epoch milliseconds of one end of the range, as the host expects
fn range_bound(range: &TimeRange, from: bool) -> String {
    let bound = if from { range.from } else { range.to };
    bound.timestamp_millis().to_string()
}

#[async_trait]
impl QueryExecutor for BackendClient {
    async fn execute(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
        debug!(request_id = %request.request_id, app = ?request.app, "execute: called");
        let url = format!("{}/api/ds/query", self.base_url);
        let body = self.build_request_body(&request);

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(attempt);
                warn!(attempt, backoff_ms = backoff, "execute: retrying after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let response = match self
                .http
                .post(url.clone())
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "execute: network error");
                    last_error = Some(QueryError::Network(e));
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                let err = QueryError::Api { status, message: text };

                if err.is_retryable() && attempt < self.max_retries {
                    debug!(attempt, status = ?err.status(), "execute: retryable error");
                    last_error = Some(err);
                    continue;
                }

                debug!(attempt, status = ?err.status(), "execute: API error");
                return Err(err);
            }

            debug!("execute: success");
            let text = response.text().await?;
            let api_response: ApiResponse = serde_json::from_str(&text)?;
            return Ok(self.parse_response(&request, api_response));
        }

        Err(last_error.unwrap_or_else(|| QueryError::InvalidResponse("Max retries exceeded".to_string())))
    }
}

// Query endpoint response types

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    results: HashMap<String, ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    frames: Vec<ApiFrame>,
}

#[derive(Debug, Deserialize)]
struct ApiFrame {
    #[serde(default)]
    schema: ApiSchema,
    #[serde(default)]
    data: ApiData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSchema {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ref_id: Option<String>,
    #[serde(default)]
    fields: Vec<ApiField>,
}

#[derive(Debug, Deserialize)]
struct ApiField {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiData {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl ApiFrame {
    fn into_data_frame(self, ref_id: &str) -> DataFrame {
        let mut values = self.data.values.into_iter();
        let fields = self
            .schema
            .fields
            .into_iter()
            .map(|f| Field::new(f.name, values.next().unwrap_or_default()))
            .collect();

        DataFrame {
            ref_id: Some(self.schema.ref_id.unwrap_or_else(|| ref_id.to_string())),
            name: self.schema.name,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlQuery;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn client() -> BackendClient {
        BackendClient {
            base_url: "http://localhost:3000".to_string(),
            datasource_uid: "jdbc".to_string(),
            api_key: "test-key".to_string(),
            http: Client::new(),
            max_retries: 0,
        }
    }

    #[test]
    fn test_build_request_body() {
        let range = TimeRange {
            from: Utc.timestamp_millis_opt(1_000).unwrap(),
            to: Utc.timestamp_millis_opt(2_000).unwrap(),
        };
        let request = QueryRequest::new(vec![SqlQuery::new("A", "SELECT ts AS time, v FROM m")]).with_range(range);

        let body = client().build_request_body(&request);

        assert_eq!(body["from"], "1000");
        assert_eq!(body["to"], "2000");
        assert_eq!(body["queries"][0]["refId"], "A");
        assert_eq!(body["queries"][0]["datasource"]["uid"], "jdbc");
        assert_eq!(body["queries"][0]["rawSql"], "SELECT ts AS time, v FROM m");
        assert_eq!(body["queries"][0]["format"], 0);
    }

    #[test]
    fn test_parse_response_frames_in_target_order() {
        let request = QueryRequest::new(vec![SqlQuery::new("B", "SELECT 2"), SqlQuery::new("A", "SELECT 1")]);
        let api_response: ApiResponse = serde_json::from_value(json!({
            "results": {
                "A": {
                    "frames": [{
                        "schema": { "name": "one", "fields": [{ "name": "x", "type": "number" }] },
                        "data": { "values": [[1]] }
                    }]
                },
                "B": {
                    "frames": [{
                        "schema": {
                            "refId": "B",
                            "fields": [{ "name": "id" }, { "name": "host" }]
                        },
                        "data": { "values": [[1, 2], ["a", "b"]] }
                    }]
                }
            }
        }))
        .unwrap();

        let response = client().parse_response(&request, api_response);

        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].ref_id.as_deref(), Some("B"));
        assert_eq!(response.data[0].fields[1].name, "host");
        assert_eq!(response.data[0].fields[1].values, vec![json!("a"), json!("b")]);
        assert_eq!(response.data[1].ref_id.as_deref(), Some("A"));
        assert_eq!(response.data[1].name.as_deref(), Some("one"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_parse_response_collects_errors() {
        let request = QueryRequest::new(vec![SqlQuery::new("A", "SELEC 1")]);
        let api_response: ApiResponse = serde_json::from_value(json!({
            "results": { "A": { "error": "syntax error", "status": 400 } }
        }))
        .unwrap();

        let response = client().parse_response(&request, api_response);

        assert!(response.data.is_empty());
        assert_eq!(response.error.as_deref(), Some("A: syntax error"));
    }

    #[test]
    fn test_from_config_requires_uid() {
        unsafe {
            std::env::set_var("SQLCONNECT_BACKEND_TEST_KEY", "token");
        }
        let config = BackendConfig {
            api_key_env: "SQLCONNECT_BACKEND_TEST_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(BackendClient::from_config(&config), Err(QueryError::Config(_))));

        let config = BackendConfig {
            datasource_uid: "jdbc".to_string(),
            base_url: "http://dash:3000/".to_string(),
            ..config
        };
        let client = BackendClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://dash:3000");
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(1), 500);
        assert_eq!(backoff_ms(2), 1_000);
        assert_eq!(backoff_ms(3), 2_000);
        assert_eq!(backoff_ms(40), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(u32::MAX), MAX_BACKOFF_MS);
    }

    /// Serve one canned HTTP response per connection, counting requests
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);

                let reply = format!(
                    "HTTP/1.1 {} Status\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        (format!("http://{}", addr), hits)
    }

    /// Read headers and body so the client sees its request fully consumed
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn client_for(base_url: String, max_retries: u32) -> BackendClient {
        BackendClient {
            base_url,
            max_retries,
            http: Client::builder().no_proxy().build().unwrap(),
            ..client()
        }
    }

    const FRAME_BODY: &str =
        r#"{"results":{"A":{"frames":[{"schema":{"fields":[{"name":"v"}]},"data":{"values":[[7]]}}]}}}"#;

    #[tokio::test]
    async fn test_execute_retries_transient_status() {
        let (url, hits) = serve(vec![(503, "busy"), (200, FRAME_BODY)]).await;
        let client = client_for(url, 1);

        let response = client
            .execute(QueryRequest::new(vec![SqlQuery::new("A", "SELECT v FROM m")]))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].fields[0].values, vec![json!(7)]);
    }

    #[tokio::test]
    async fn test_execute_retries_any_server_error() {
        let (url, hits) = serve(vec![(505, "unsupported"), (200, FRAME_BODY)]).await;
        let client = client_for(url, 1);

        let response = client
            .execute(QueryRequest::new(vec![SqlQuery::new("A", "SELECT v FROM m")]))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(response.data[0].fields[0].name, "v");
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_max_retries() {
        let (url, hits) = serve(vec![(503, "busy"), (501, "still busy"), (200, FRAME_BODY)]).await;
        let client = client_for(url, 1);

        let err = client
            .execute(QueryRequest::new(vec![SqlQuery::new("A", "SELECT v FROM m")]))
            .await
            .unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(err.status(), Some(501));
    }

    #[tokio::test]
    async fn test_execute_client_error_is_not_retried() {
        let (url, hits) = serve(vec![(400, "syntax error"), (200, FRAME_BODY)]).await;
        let client = client_for(url, 3);

        let err = client
            .execute(QueryRequest::new(vec![SqlQuery::new("A", "SELEC v")]))
            .await
            .unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(err, QueryError::Api { status: 400, ref message } if message == "syntax error"));
    }
}
