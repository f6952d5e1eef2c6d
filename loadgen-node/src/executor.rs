use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::simulation::{HttpMethod, SimulationConfig};

/// Result of one dispatched request.
///
/// Ephemeral: consumed immediately by the metrics aggregator and the hub,
/// never retained individually beyond the bounded sample window.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub completed_at: DateTime<Utc>,
    pub latency: Duration,
    pub success: bool,
    /// HTTP status code, absent on transport errors
    pub status: Option<u16>,
    /// Error description for failed outcomes
    pub error: Option<String>,
    pub response_bytes: u64,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Options => Method::OPTIONS,
        }
    }
}

/// Issues individual HTTP requests against the run's target.
///
/// One executor per run; the underlying client pools connections across all
/// requests of that run. `execute` never returns an error: transport
/// failures, timeouts, and non-2xx statuses all become failed outcomes so
/// the tick loop is never unwound by a single request.
pub struct RequestExecutor {
    client: Client,
    url: Url,
    method: Method,
    body: Option<String>,
    headers: HeaderMap,
}

impl RequestExecutor {
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;

        let url = Url::parse(&config.target_url).map_err(|e| {
            EngineError::Config(format!("invalid target URL '{}': {}", config.target_url, e))
        })?;

        let mut headers = HeaderMap::new();
        if let Some(extra) = &config.headers {
            for (name, value) in extra {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => {
                        warn!(header = %name, "Ignoring invalid request header");
                    }
                }
            }
        }

        let body = config
            .body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(Self {
            client,
            url,
            method: config.method.into(),
            body,
            headers,
        })
    }

    /// Send one request and report its outcome.
    pub async fn execute(&self) -> RequestOutcome {
        let started = Instant::now();

        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                // Drain the body so latency covers the full response and the
                // connection can be reused.
                match response.bytes().await {
                    Ok(body) => {
                        let success = status.is_success();
                        if !success {
                            debug!(status = status.as_u16(), "Request returned error status");
                        }
                        RequestOutcome {
                            completed_at: Utc::now(),
                            latency: started.elapsed(),
                            success,
                            status: Some(status.as_u16()),
                            error: if success {
                                None
                            } else {
                                Some(format!("HTTP status {}", status.as_u16()))
                            },
                            response_bytes: body.len() as u64,
                        }
                    }
                    Err(e) => RequestOutcome {
                        completed_at: Utc::now(),
                        latency: started.elapsed(),
                        success: false,
                        status: Some(status.as_u16()),
                        error: Some(format!("failed to read response body: {e}")),
                        response_bytes: 0,
                    },
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                };
                RequestOutcome {
                    completed_at: Utc::now(),
                    latency: started.elapsed(),
                    success: false,
                    status: None,
                    error: Some(error),
                    response_bytes: 0,
                }
            }
        }
    }
}
