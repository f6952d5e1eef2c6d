use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::rate::ScaleMode;

/// HTTP method for dispatched requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

/// Immutable configuration of one load simulation.
///
/// Validated once at start; a run never mutates its configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Target endpoint, absolute http(s) URL
    pub target_url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Optional JSON request body
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Optional extra request headers
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    /// Target RPS at the start of the ramp
    pub min_rps: f64,
    /// Target RPS at the end of the ramp
    pub max_rps: f64,
    /// Total run duration in seconds
    pub duration_seconds: u64,
    #[serde(default)]
    pub scale_mode: ScaleMode,
    /// Upper bound on in-flight requests
    pub concurrent_users: u32,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl SimulationConfig {
    /// Validate the configuration, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.target_url).map_err(|e| {
            EngineError::Config(format!("invalid target URL '{}': {}", self.target_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EngineError::Config(format!(
                "unsupported URL scheme '{}', expected http or https",
                url.scheme()
            )));
        }

        if !self.min_rps.is_finite() || self.min_rps < 0.0 {
            return Err(EngineError::Config(format!(
                "min_rps must be >= 0, got {}",
                self.min_rps
            )));
        }
        if !self.max_rps.is_finite() || self.max_rps < self.min_rps {
            return Err(EngineError::Config(format!(
                "max_rps must be >= min_rps ({} < {})",
                self.max_rps, self.min_rps
            )));
        }
        if self.duration_seconds == 0 {
            return Err(EngineError::Config(
                "duration_seconds must be greater than 0".to_string(),
            ));
        }
        if self.concurrent_users == 0 {
            return Err(EngineError::Config(
                "concurrent_users must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(EngineError::Config(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Lifecycle state of a simulation run.
///
/// `Created -> Starting -> Running -> {Completed | Failed | Cancelled}`.
/// Terminal states are final; a run never re-enters `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Created,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SimulationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimulationStatus::Completed | SimulationStatus::Failed | SimulationStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SimulationStatus) -> bool {
        use SimulationStatus::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Created, Failed)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Created => "created",
            SimulationStatus::Starting => "starting",
            SimulationStatus::Running => "running",
            SimulationStatus::Completed => "completed",
            SimulationStatus::Failed => "failed",
            SimulationStatus::Cancelled => "cancelled",
        }
    }
}

/// Read-only snapshot of one run, safe to hand out at any time including
/// after termination.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationRun {
    pub id: Uuid,
    pub config: SimulationConfig,
    pub status: SimulationStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Dispatches dropped because the worker pool was saturated. Skips were
    /// never sent, so they are excluded from `total_requests` by definition.
    pub skipped_dispatches: u64,
}
