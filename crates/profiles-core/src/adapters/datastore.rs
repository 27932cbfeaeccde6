//! Datastore clients: the public open-data SQL endpoint and an offline
//! stand-in that runs the same statements against the warehouse.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use profiles_warehouse::{QueryGuardrails, Warehouse, WarehouseError};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::data_source::{DatastoreClient, SourceError};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::retry::RetryPolicy;
use crate::throttling::RequestThrottle;

pub const DEFAULT_DATASTORE_ENDPOINT: &str =
    "https://data.wprdc.org/api/3/action/datastore_search_sql";

#[derive(Debug, Deserialize)]
struct DatastoreEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<DatastoreResult>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DatastoreResult {
    #[serde(default)]
    records: Vec<Map<String, Value>>,
}

/// `datastore_search_sql` client with throttling and retries.
pub struct CkanDatastoreClient {
    endpoint: String,
    http: Arc<dyn HttpClient>,
    throttle: RequestThrottle,
    retry: RetryPolicy,
    timeout_ms: u64,
    auth: HttpAuth,
}

impl CkanDatastoreClient {
    pub fn new(endpoint: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
            throttle: RequestThrottle::per_window(Duration::from_secs(1), 10),
            retry: RetryPolicy::default(),
            timeout_ms: 30_000,
            auth: HttpAuth::None,
        }
    }

    pub fn with_throttle(mut self, throttle: RequestThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    async fn post(&self, sql: &str) -> Result<Vec<Map<String, Value>>, SourceError> {
        let mut attempt = 0;
        loop {
            self.throttle.acquire().await;
            let request = HttpRequest::post_json(&self.endpoint, &json!({ "sql": sql }))
                .with_header("cache-control", "no-cache")
                .with_auth(&self.auth)
                .with_timeout_ms(self.timeout_ms);

            let failure = match self.http.execute(request).await {
                Ok(response) if response.is_success() => return parse_envelope(&response.body),
                Ok(response) if self.retry.should_retry_status(response.status) => {
                    SourceError::unavailable(format!(
                        "datastore returned status {}",
                        response.status
                    ))
                }
                Ok(response) => {
                    return Err(match parse_envelope(&response.body) {
                        Err(error) => error,
                        Ok(_) => SourceError::invalid_request(format!(
                            "datastore returned status {}",
                            response.status
                        )),
                    });
                }
                Err(error) if error.is_timeout() => SourceError::timeout(format!(
                    "datastore did not answer within {}ms",
                    self.timeout_ms
                )),
                Err(error) if error.retryable() => {
                    SourceError::unavailable(format!("datastore transport error: {error}"))
                }
                Err(error) => {
                    return Err(SourceError::internal(format!(
                        "datastore transport error: {error}"
                    )))
                }
            };

            let Some(delay) = self.retry.delay_before_retry(attempt) else {
                return Err(failure);
            };
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying datastore query"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl DatastoreClient for CkanDatastoreClient {
    fn run_sql<'a>(
        &'a self,
        sql: String,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Map<String, Value>>, SourceError>> + Send + 'a>>
    {
        Box::pin(async move { self.post(&sql).await })
    }
}

fn parse_envelope(body: &str) -> Result<Vec<Map<String, Value>>, SourceError> {
    let envelope: DatastoreEnvelope = serde_json::from_str(body)
        .map_err(|error| SourceError::internal(format!("malformed datastore response: {error}")))?;
    if !envelope.success {
        let detail = envelope
            .error
            .map(|error| error.to_string())
            .unwrap_or_else(|| String::from("no detail"));
        return Err(SourceError::invalid_request(format!(
            "datastore rejected the query: {detail}"
        )));
    }
    Ok(envelope.result.map(|result| result.records).unwrap_or_default())
}

/// Runs datastore SQL against locally loaded resource tables.
#[derive(Clone)]
pub struct WarehouseDatastore {
    warehouse: Warehouse,
    guardrails: QueryGuardrails,
}

impl WarehouseDatastore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self {
            warehouse,
            guardrails: QueryGuardrails::default(),
        }
    }

    pub fn with_guardrails(mut self, guardrails: QueryGuardrails) -> Self {
        self.guardrails = guardrails;
        self
    }
}

impl DatastoreClient for WarehouseDatastore {
    fn run_sql<'a>(
        &'a self,
        sql: String,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Map<String, Value>>, SourceError>> + Send + 'a>>
    {
        Box::pin(async move {
            let warehouse = self.warehouse.clone();
            let guardrails = self.guardrails;
            let result = tokio::task::spawn_blocking(move || {
                warehouse.execute_query(&sql, guardrails, false)
            })
            .await
            .map_err(|error| SourceError::internal(format!("datastore task failed: {error}")))?;

            match result {
                Ok(result) => Ok(result.records()),
                Err(WarehouseError::QueryTimeout { timeout_ms }) => Err(SourceError::timeout(
                    format!("local datastore query exceeded {timeout_ms}ms"),
                )),
                Err(WarehouseError::QueryRejected(reason)) => {
                    Err(SourceError::invalid_request(reason))
                }
                Err(error) => Err(SourceError::unavailable(format!(
                    "local datastore query failed: {error}"
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpError, HttpResponse};

    struct ScriptedHttpClient {
        responses: Mutex<Vec<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttpClient {
        fn new(mut responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for ScriptedHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self
                .responses
                .lock()
                .expect("response script should not be poisoned")
                .pop()
                .unwrap_or_else(|| Err(HttpError::non_retryable("script exhausted")));
            Box::pin(async move { response })
        }
    }

    fn client(http: Arc<ScriptedHttpClient>) -> CkanDatastoreClient {
        CkanDatastoreClient::new(DEFAULT_DATASTORE_ENDPOINT, http)
            .with_retry(RetryPolicy::fixed(Duration::from_millis(1), 2))
    }

    #[tokio::test]
    async fn posts_sql_and_reads_records() {
        let http = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::new(
            200,
            r#"{"success": true, "result": {"records": [{"geog": "Bloomfield", "value": 3.0}]}}"#,
        ))]));
        let records = client(http.clone())
            .run_sql(String::from("SELECT 1"))
            .await
            .expect("records");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["geog"], "Bloomfield");
        let requests = http.recorded_requests();
        assert_eq!(requests[0].url, DEFAULT_DATASTORE_ENDPOINT);
        assert_eq!(requests[0].body.as_deref(), Some(r#"{"sql":"SELECT 1"}"#));
        assert_eq!(
            requests[0].headers.get("cache-control").map(String::as_str),
            Some("no-cache")
        );
    }

    #[tokio::test]
    async fn transient_statuses_are_retried() {
        let http = Arc::new(ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(503, "busy")),
            Ok(HttpResponse::new(200, r#"{"success": true, "result": {"records": []}}"#)),
        ]));
        let records = client(http.clone())
            .run_sql(String::from("SELECT 1"))
            .await
            .expect("second attempt succeeds");

        assert!(records.is_empty());
        assert_eq!(http.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn rejected_queries_are_not_retried() {
        let http = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::new(
            409,
            r#"{"success": false, "error": {"message": "column does not exist"}}"#,
        ))]));
        let error = client(http.clone())
            .run_sql(String::from("SELECT nope"))
            .await
            .expect_err("rejected");

        assert_eq!(error.kind(), SourceErrorKind::InvalidRequest);
        assert!(error.message().contains("column does not exist"));
        assert_eq!(http.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn timeouts_surface_after_retries_run_out() {
        let http = Arc::new(ScriptedHttpClient::new(vec![
            Err(HttpError::timed_out("slow")),
            Err(HttpError::timed_out("slow")),
            Err(HttpError::timed_out("slow")),
        ]));
        let error = client(http.clone())
            .run_sql(String::from("SELECT 1"))
            .await
            .expect_err("timeout");

        assert_eq!(error.kind(), SourceErrorKind::Timeout);
        assert_eq!(http.recorded_requests().len(), 3);
    }

    #[tokio::test]
    async fn warehouse_datastore_runs_select_statements() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(profiles_warehouse::WarehouseConfig::in_dir(temp.path()))
            .expect("warehouse open");
        let datastore = WarehouseDatastore::new(warehouse);

        let records = datastore
            .run_sql(String::from("SELECT 'Bloomfield' AS geog, 4.0::float8 AS value"))
            .await
            .expect("records");
        assert_eq!(records[0]["geog"], "Bloomfield");

        let error = datastore
            .run_sql(String::from("DROP TABLE geographies"))
            .await
            .expect_err("writes are rejected");
        assert_eq!(error.kind(), SourceErrorKind::InvalidRequest);
    }
}
