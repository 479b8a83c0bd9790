//! Axum-based HTTP server for the gateway.

use axum::{
    extract::{Json, MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use code_runner_controller::ExecutionPipeline;
use code_runner_core::{
    config::ServerConfig,
    types::{
        cents_to_dollars, ExecutionLog, ExecutionRequest, Function, FunctionId, Language,
    },
    Error, Result,
};
use code_runner_governance::track_request;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Enable CORS.
    pub enable_cors: bool,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            ..Default::default()
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub pipeline: Arc<ExecutionPipeline>,
}

use metrics_exporter_prometheus::PrometheusHandle;

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig, pipeline: Arc<ExecutionPipeline>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { pipeline }),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/execute/:language", post(execute_handler))
            .route("/execute/functions/:username", get(list_functions_handler))
            .route("/execute/function/:id/user/:username", get(function_detail_handler))
            .route("/execute/usage/:username", get(usage_handler))
            .route_layer(middleware::from_fn(metrics_middleware))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Code submission.
#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    /// Source code to run.
    pub code: String,
    /// Function name; defaults to "Unnamed Function".
    pub name: Option<String>,
    /// Submitting user.
    pub username: String,
}

/// Result of a submission. Amounts are in dollars.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    pub cost: f64,
    pub total_cost: f64,
    pub run_count: u64,
}

/// Function as listed for its owner.
#[derive(Debug, Serialize)]
pub struct FunctionSummary {
    pub id: FunctionId,
    pub name: String,
    pub language: Language,
    pub run_count: u64,
    pub code: String,
    pub dependencies: Vec<String>,
}

impl TryFrom<Function> for FunctionSummary {
    type Error = Error;

    fn try_from(function: Function) -> Result<Self> {
        let dependencies = function.dependency_set()?.into_iter().collect();
        Ok(Self {
            id: function.id,
            name: function.name,
            language: function.language,
            run_count: function.run_count,
            code: function.code,
            dependencies,
        })
    }
}

/// One execution log entry.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl From<ExecutionLog> for LogEntry {
    fn from(log: ExecutionLog) -> Self {
        Self {
            id: log.id,
            timestamp: log.timestamp,
            output: log.output,
            error: log.error,
        }
    }
}

/// Function with its most recent logs.
#[derive(Debug, Serialize)]
pub struct FunctionDetailResponse {
    #[serde(flatten)]
    pub function: FunctionSummary,
    pub logs: Vec<LogEntry>,
}

/// Usage counters for a user. `cost` is in dollars.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub python_functions: u64,
    pub javascript_functions: u64,
    pub total_functions: u64,
    pub cost: f64,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status.
    pub status: String,
    /// Version.
    pub version: String,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Trace ID.
    pub trace_id: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP status for a pipeline error.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::UserNotFound(_) | Error::FunctionNotFound(_) => StatusCode::NOT_FOUND,
        Error::Unverified(_) => StatusCode::FORBIDDEN,
        Error::InvalidRequest(_) | Error::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
        Error::Sandbox(_) => StatusCode::BAD_GATEWAY,
        Error::BuildFailed(_)
        | Error::Workspace(_)
        | Error::Storage(_)
        | Error::Serialization(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A pipeline error tagged with the request's trace ID.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub trace_id: String,
}

impl ApiError {
    fn new(error: Error, trace_id: &str) -> Self {
        Self {
            error,
            trace_id: trace_id.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        if status.is_server_error() {
            tracing::error!(trace_id = %self.trace_id, code = self.error.code(), error = %self.error, "Request failed");
        } else {
            tracing::debug!(trace_id = %self.trace_id, code = self.error.code(), error = %self.error, "Request rejected");
        }
        (
            status,
            Json(ErrorResponse {
                code: self.error.code().to_string(),
                message: self.error.to_string(),
                trace_id: Some(self.trace_id),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// =============================================================================
// Middleware
// =============================================================================

/// Record request count and latency per matched route.
async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    track_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Code submission handler for `/execute/{python,javascript}`.
async fn execute_handler(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult<ExecuteResponse> {
    let trace_id = Uuid::new_v4().to_string();
    let language: Language = language
        .parse()
        .map_err(|e| ApiError::new(e, &trace_id))?;

    tracing::info!(
        trace_id = %trace_id,
        username = %body.username,
        language = %language,
        code_len = body.code.len(),
        "Processing execution request"
    );

    let request = ExecutionRequest::new(body.username, body.name, language, body.code);
    let outcome = state
        .pipeline
        .execute(request)
        .await
        .map_err(|e| ApiError::new(e, &trace_id))?;

    Ok(Json(ExecuteResponse {
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        cost: cents_to_dollars(outcome.cost_cents),
        total_cost: cents_to_dollars(outcome.total_cost_cents),
        run_count: outcome.run_count,
    }))
}

async fn list_functions_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> ApiResult<Vec<FunctionSummary>> {
    let trace_id = Uuid::new_v4().to_string();
    let functions = state
        .pipeline
        .list_functions(&username)
        .await
        .and_then(|functions| functions.into_iter().map(FunctionSummary::try_from).collect())
        .map_err(|e| ApiError::new(e, &trace_id))?;
    Ok(Json(functions))
}

async fn function_detail_handler(
    State(state): State<Arc<AppState>>,
    Path((id, username)): Path<(u64, String)>,
) -> ApiResult<FunctionDetailResponse> {
    let trace_id = Uuid::new_v4().to_string();
    let detail = state
        .pipeline
        .function_detail(&username, FunctionId(id))
        .await
        .map_err(|e| ApiError::new(e, &trace_id))?;

    let function = FunctionSummary::try_from(detail.function).map_err(|e| ApiError::new(e, &trace_id))?;
    Ok(Json(FunctionDetailResponse {
        function,
        logs: detail.logs.into_iter().map(LogEntry::from).collect(),
    }))
}

async fn usage_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> ApiResult<UsageResponse> {
    let trace_id = Uuid::new_v4().to_string();
    let account = state
        .pipeline
        .usage(&username)
        .await
        .map_err(|e| ApiError::new(e, &trace_id))?;

    Ok(Json(UsageResponse {
        python_functions: account.python_runs,
        javascript_functions: account.javascript_runs,
        total_functions: account.total_runs(),
        cost: cents_to_dollars(account.cost_cents),
    }))
}
