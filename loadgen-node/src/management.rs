use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::WebSocketUpgrade,
        Path, Query, Request, State,
    },
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::ManagementApiConfig;
use crate::error::EngineError;
use crate::generator::SimulationManager;
use crate::hub::{serve_observer, HubHandle};
use crate::report::{
    compare_services, PerformanceComparison, PerformanceReport, ServicePerformance,
};
use crate::simulation::{SimulationConfig, SimulationRun};
use crate::stats::{ErrorRatePoint, ThroughputPoint};

/// Default number of time-series points returned when no limit is given.
const DEFAULT_TIME_SERIES_LIMIT: usize = 300;

/// Management API state
#[derive(Clone)]
pub struct ApiState {
    /// Configuration
    pub config: ManagementApiConfig,
    /// Simulation registry
    pub manager: Arc<SimulationManager>,
    /// Broadcast hub handle for WebSocket observers
    pub hub: HubHandle,
    /// Outbound buffer size per observer
    pub observer_buffer: usize,
}

/// API error carrying an HTTP status and message
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(id: Uuid) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("unknown simulation {id}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match err {
            EngineError::Config(_) => StatusCode::BAD_REQUEST,
            EngineError::Lifecycle(_) => StatusCode::CONFLICT,
            EngineError::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// Start response
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub success: bool,
    pub simulation_id: Uuid,
}

/// Stop response
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

/// Time-series query parameters
#[derive(Debug, Deserialize)]
pub struct TimeSeriesQuery {
    pub limit: Option<usize>,
}

/// Time-series response
#[derive(Debug, Serialize)]
pub struct TimeSeriesResponse {
    pub simulation_id: Uuid,
    pub throughput: Vec<ThroughputPoint>,
    pub error_rates: Vec<ErrorRatePoint>,
}

/// Report request payload
#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub run_ids: Vec<Uuid>,
}

/// Authentication middleware; a no-op unless a bearer token is configured
async fn auth_middleware(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.auth_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => {
            warn!("Invalid management API token provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or invalid Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Start a new simulation
#[instrument(skip(state, config))]
async fn start_simulation(
    State(state): State<ApiState>,
    Json(config): Json<SimulationConfig>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let simulation_id = state.manager.start(config)?;
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            success: true,
            simulation_id,
        }),
    ))
}

/// Stop a running simulation
#[instrument(skip(state))]
async fn stop_simulation(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StopResponse>, ApiError> {
    if state.manager.get(id).is_none() {
        return Err(ApiError::not_found(id));
    }
    state.manager.stop(id).await?;
    Ok(Json(StopResponse {
        success: true,
        message: format!("cancellation requested for simulation {id}"),
    }))
}

/// List all known simulations
async fn list_simulations(State(state): State<ApiState>) -> Json<Vec<SimulationRun>> {
    Json(state.manager.list().await)
}

/// Snapshot of one simulation, valid at any time including after termination
async fn get_simulation(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationRun>, ApiError> {
    match state.manager.snapshot(id).await {
        Some(run) => Ok(Json(run)),
        None => Err(ApiError::not_found(id)),
    }
}

/// Throughput and error-rate series for one simulation
async fn get_time_series(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(query): Query<TimeSeriesQuery>,
) -> Result<Json<TimeSeriesResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TIME_SERIES_LIMIT);
    match state.manager.time_series(id, limit) {
        Some((throughput, error_rates)) => Ok(Json(TimeSeriesResponse {
            simulation_id: id,
            throughput,
            error_rates,
        })),
        None => Err(ApiError::not_found(id)),
    }
}

/// Compare externally benchmarked services
async fn compare(
    Json(services): Json<Vec<ServicePerformance>>,
) -> Result<Json<PerformanceComparison>, ApiError> {
    let comparison = compare_services(&services)?;
    Ok(Json(comparison))
}

/// Aggregate report over a set of runs; unknown ids are skipped
async fn reports(
    State(state): State<ApiState>,
    Json(request): Json<ReportRequest>,
) -> Json<PerformanceReport> {
    Json(state.manager.generate_report(&request.run_ids).await)
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "loadgen-node",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Upgrade to a hub observer WebSocket session
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let hub = state.hub.clone();
    let buffer = state.observer_buffer;
    ws.on_upgrade(move |socket| serve_observer(socket, hub, buffer))
}

/// Create the management API router
fn create_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/simulations", post(start_simulation).get(list_simulations))
        .route(
            "/simulations/:id",
            get(get_simulation).delete(stop_simulation),
        )
        .route("/simulations/:id/timeseries", get(get_time_series))
        .route("/compare", post(compare))
        .route("/reports", post(reports))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let mut router = Router::new()
        .merge(protected)
        // Liveness and the observer socket stay reachable without a token.
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());

    router = router.layer(TraceLayer::new_for_http());
    if state.config.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

/// Start the management API server
#[instrument(skip(config, manager, hub))]
pub async fn start_management_api(
    config: ManagementApiConfig,
    manager: Arc<SimulationManager>,
    hub: HubHandle,
    observer_buffer: usize,
) -> Result<()> {
    if !config.enabled {
        info!("Management API is disabled");
        return Ok(());
    }

    info!(
        listen_addr = %config.listen_addr,
        "Starting management API server"
    );

    let state = ApiState {
        config: config.clone(),
        manager,
        hub,
        observer_buffer,
    };

    let app = create_router(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!(
        addr = %config.listen_addr,
        "Management API server listening"
    );

    axum::serve(listener, app)
        .await
        .context("Management API server failed")?;

    Ok(())
}
