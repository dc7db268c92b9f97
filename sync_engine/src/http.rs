//! HTTP client for the scenario, calculation and mixer endpoints.

use crate::error::{SyncError, SyncResult};
use crate::services::{ComputeService, JobService, ScenarioStore, TerminationTransport};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use shared::{CatalogEntry, ComputeResult, Configuration, ErrorBody, ItemId, JobId, JobStarted, JobStatus};
use std::sync::Arc;
use std::time::Duration;

/// Largest payload the blocking fallback beacon will carry.
pub const SMALL_PAYLOAD_LIMIT: usize = 64 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint paths relative to the server base URL.
///
/// The scenario and calculation routes are the ones the server publishes.
/// The server has mixer views but routes none of them, so the three `mixer_*`
/// defaults are assumed paths; point them at the real ones with
/// [`HttpBackend::with_routes`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRoutes {
    pub scenarios: String,
    pub reset_all: String,
    pub calculate: String,
    pub mixer_start: String,
    pub mixer_progress: String,
    pub mixer_cancel: String,
}

impl Default for HttpRoutes {
    fn default() -> Self {
        Self {
            scenarios: "/api/scenarios/".to_string(),
            reset_all: "/api/scenarios/reset-all/".to_string(),
            calculate: "/api/calculate/".to_string(),
            mixer_start: "/api/mixer/start/".to_string(),
            mixer_progress: "/api/mixer/progress/".to_string(),
            mixer_cancel: "/api/mixer/cancel/".to_string(),
        }
    }
}

impl HttpRoutes {
    fn item(&self, item_id: &str) -> String {
        format!("{}{}/", self.scenarios, item_id)
    }

    fn item_reset(&self, item_id: &str) -> String {
        format!("{}{}/reset/", self.scenarios, item_id)
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    routes: HttpRoutes,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> SyncResult<Self> {
        Self::with_routes(base_url, HttpRoutes::default())
    }

    pub fn with_routes(base_url: &str, routes: HttpRoutes) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            routes,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Default termination cascade for this server: an async beacon on the
    /// current runtime, then a blocking one-shot for small payloads.
    pub fn termination_transports(&self) -> Vec<Arc<dyn TerminationTransport>> {
        let item_url = self.url(&self.routes.scenarios);
        vec![
            Arc::new(HttpBeacon::new(self.client.clone(), item_url.clone())),
            Arc::new(SmallPayloadBeacon::new(item_url)),
        ]
    }

    async fn job_status(&self, job_id: &str) -> SyncResult<JobStatus> {
        let response = self
            .client
            .get(self.url(&self.routes.mixer_progress))
            .query(&[("operation_id", job_id)])
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

#[async_trait]
impl ScenarioStore for HttpBackend {
    async fn fetch_catalog(&self) -> SyncResult<Vec<CatalogEntry>> {
        let response = self
            .client
            .get(self.url(&self.routes.scenarios))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn fetch_item(&self, item_id: &str) -> SyncResult<Configuration> {
        let response = self
            .client
            .get(self.url(&self.routes.item(item_id)))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn save_item(&self, item_id: &str, config: &Configuration) -> SyncResult<()> {
        let response = self
            .client
            .put(self.url(&self.routes.item(item_id)))
            .json(config)
            .send()
            .await
            .map_err(transport_error)?;
        let _: Value = read_json(response).await?;
        Ok(())
    }

    async fn reset_item(&self, item_id: &str) -> SyncResult<Configuration> {
        let response = self
            .client
            .post(self.url(&self.routes.item_reset(item_id)))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn reset_all(&self) -> SyncResult<()> {
        let response = self
            .client
            .post(self.url(&self.routes.reset_all))
            .send()
            .await
            .map_err(transport_error)?;
        let _: Value = read_json(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ComputeService for HttpBackend {
    async fn compute(&self, config: &Configuration) -> SyncResult<ComputeResult> {
        let response = self
            .client
            .post(self.url(&self.routes.calculate))
            .json(config)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

#[async_trait]
impl JobService for HttpBackend {
    async fn start_job(&self, params: &Value) -> SyncResult<JobId> {
        let response = self
            .client
            .post(self.url(&self.routes.mixer_start))
            .json(params)
            .send()
            .await
            .map_err(transport_error)?;
        let started: JobStarted = read_json(response).await?;
        Ok(started.operation_id)
    }

    async fn poll_job(&self, job_id: &str) -> SyncResult<JobStatus> {
        self.job_status(job_id).await
    }

    async fn fetch_result(&self, job_id: &str) -> SyncResult<Value> {
        // Results travel inside the progress document
        let status = self.job_status(job_id).await?;
        Ok(json!({
            "result": status.result,
            "mask": status.mask,
        }))
    }

    async fn cancel_job(&self, job_id: &str) -> SyncResult<()> {
        let response = self
            .client
            .post(self.url(&self.routes.mixer_cancel))
            .json(&JobStarted {
                operation_id: job_id.to_string(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        let _: Value = read_json(response).await?;
        Ok(())
    }
}

/// Fire-and-forget PUT spawned on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct HttpBeacon {
    client: reqwest::Client,
    scenarios_url: String,
}

impl HttpBeacon {
    pub fn new(client: reqwest::Client, scenarios_url: String) -> Self {
        Self { client, scenarios_url }
    }
}

impl TerminationTransport for HttpBeacon {
    fn name(&self) -> &str {
        "http_beacon"
    }

    fn offer(&self, item_id: &ItemId, payload: &str) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let request = self
            .client
            .put(format!("{}{}/", self.scenarios_url, item_id))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string());
        let item_id = item_id.clone();
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) => log::debug!("BEACON: Final save of {} answered {}", item_id, response.status()),
                Err(error) => log::warn!("BEACON: Final save of {} failed: {}", item_id, error),
            }
        });
        true
    }
}

/// One-shot blocking PUT on a detached thread, for payloads up to
/// [`SMALL_PAYLOAD_LIMIT`].
#[derive(Debug, Clone)]
pub struct SmallPayloadBeacon {
    scenarios_url: String,
}

impl SmallPayloadBeacon {
    pub fn new(scenarios_url: String) -> Self {
        Self { scenarios_url }
    }
}

impl TerminationTransport for SmallPayloadBeacon {
    fn name(&self) -> &str {
        "small_payload_beacon"
    }

    fn offer(&self, item_id: &ItemId, payload: &str) -> bool {
        if payload.len() > SMALL_PAYLOAD_LIMIT {
            log::debug!("BEACON: Payload of {} bytes is over the small payload limit", payload.len());
            return false;
        }
        let url = format!("{}{}/", self.scenarios_url, item_id);
        let payload = payload.to_string();
        let spawned = std::thread::Builder::new()
            .name("small-payload-beacon".to_string())
            .spawn(move || {
                let sent = reqwest::blocking::Client::new()
                    .put(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(payload)
                    .send();
                if let Err(error) = sent {
                    log::warn!("BEACON: Blocking final save to {} failed: {}", url, error);
                }
            });
        spawned.is_ok()
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> SyncResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Serialization(e.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}

fn error_from_body(status: StatusCode, body: &str) -> SyncError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|body| body.error)
        .unwrap_or_else(|_| body.trim().to_string());
    SyncError::Network(format!("{}: {}", status, message))
}

fn transport_error(error: reqwest::Error) -> SyncError {
    SyncError::Network(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_message_is_used() {
        let error = error_from_body(StatusCode::NOT_FOUND, r#"{"error": "Scenario not found"}"#);
        assert_eq!(error, SyncError::Network("404 Not Found: Scenario not found".into()));
    }

    #[test]
    fn test_plain_error_body_is_kept() {
        let error = error_from_body(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(error, SyncError::Network("502 Bad Gateway: upstream down".into()));
    }

    #[test]
    fn test_routes_and_base_url() {
        let backend = HttpBackend::new("http://localhost:8000/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(
            backend.url(&backend.routes.item("5g")),
            "http://localhost:8000/api/scenarios/5g/"
        );
        assert_eq!(
            backend.url(&backend.routes.item_reset("5g")),
            "http://localhost:8000/api/scenarios/5g/reset/"
        );
        assert_eq!(backend.termination_transports().len(), 2);
    }

    #[test]
    fn test_small_payload_beacon_rejects_large_payloads() {
        let beacon = SmallPayloadBeacon::new("http://127.0.0.1:9/api/scenarios/".into());
        let payload = "x".repeat(SMALL_PAYLOAD_LIMIT + 1);
        assert!(!beacon.offer(&"5g".to_string(), &payload));
    }

    #[test]
    fn test_async_beacon_needs_a_runtime() {
        let beacon = HttpBeacon::new(reqwest::Client::new(), "http://127.0.0.1:9/api/scenarios/".into());
        assert!(!beacon.offer(&"5g".to_string(), "{}"));
    }
}
