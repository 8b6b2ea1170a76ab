/// HTTP surface for the batch query and the live buffer
use crate::live_tail::{LiveHandle, LiveSlice};
use crate::model::QueryFilter;
use crate::query::{QueryOrchestrator, QueryOutcome, QueryResult, ViewGate};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Arc<QueryOrchestrator>,
    pub gate: ViewGate,
    pub live: Option<LiveHandle>,
}

impl AppState {
    pub fn new(orchestrator: Arc<QueryOrchestrator>, live: Option<LiveHandle>) -> Self {
        Self {
            orchestrator,
            gate: ViewGate::new(),
            live,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(flatten)]
    pub filter: QueryFilter,
    /// Logical view; a newer request for the same view supersedes older ones
    #[serde(default)]
    pub view: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Completed(QueryResult),
    Cancelled { cancelled: bool },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct LiveParams {
    #[serde(default)]
    pub since: u64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Middleware to log incoming requests
async fn log_request_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    info!("📥 {} {}", method, uri);
    let response = next.run(req).await;
    info!("📤 {} {} -> {}", method, uri, response.status());

    response
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/query", post(query_handler))
        .route("/live", get(live_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(log_request_middleware))
}

async fn health() -> &'static str {
    "ok"
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|err| {
        error!("Failed to parse query request: {}", err);
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid JSON request body: {}", err),
        )
    })?;

    let ticket = request.view.as_deref().map(|view| state.gate.begin(view));
    let token = ticket
        .as_ref()
        .map(|ticket| ticket.token().clone())
        .unwrap_or_else(CancellationToken::new);
    // Cancel the background classification if the client goes away
    let _abandon = token.clone().drop_guard();

    let outcome = state.orchestrator.query(&request.filter, &token).await;
    let current = ticket
        .as_ref()
        .map(|ticket| state.gate.finish(ticket))
        .unwrap_or(true);

    match outcome {
        Ok(QueryOutcome::Completed(result)) if current => Ok(Json(QueryResponse::Completed(result))),
        Ok(_) => Ok(Json(QueryResponse::Cancelled { cancelled: true })),
        Err(err) if current => {
            error!("Query failed: {}", err);
            Err(api_error(StatusCode::BAD_GATEWAY, err.to_string()))
        }
        Err(_) => Ok(Json(QueryResponse::Cancelled { cancelled: true })),
    }
}

async fn live_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LiveParams>,
) -> Result<Json<LiveSlice>, ApiError> {
    match state.live {
        Some(ref live) => Ok(Json(live.read_since(params.since))),
        None => Err(api_error(StatusCode::NOT_FOUND, "live tail is not configured")),
    }
}
