//! REST endpoints for future viewings.

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::viewings::{FutureViewingInput, Pagination, ViewingService};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: ViewingService,
}

/// Raw paging query. Values that are missing or not integers fall back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    #[serde(rename = "pageSize")]
    page_size: Option<String>,
}

impl PageQuery {
    fn pagination(&self) -> Pagination {
        let parse = |v: &Option<String>| {
            v.as_deref()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(0)
        };
        Pagination::new(parse(&self.page), parse(&self.page_size))
    }
}

/// Build the router: viewing API, health, static files, CORS and request tracing.
pub fn viewing_routes(service: ViewingService, static_dir: &str, cors_origins: &[String]) -> Router {
    let state = AppState { service };
    let static_dir = static_dir.trim_matches('/');

    Router::new()
        .route("/health", get(health))
        .route("/api/viewings", get(list_viewings).post(create_viewing))
        .route("/api/viewings/recent", get(list_recent))
        .route("/api/viewings/{id}", get(get_viewing))
        .nest_service(&format!("/{static_dir}"), ServeDir::new(static_dir))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn service_error(e: Error) -> Response {
    match e {
        Error::Validation(v) => error_response(StatusCode::BAD_REQUEST, v.to_string()),
        other => {
            error!(error = %other, "Request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.service.queue();
    Json(serde_json::json!({
        "status": "ok",
        "queued": queue.pending(),
        "capacity": queue.capacity(),
    }))
}

async fn create_viewing(
    State(state): State<AppState>,
    payload: Result<Json<FutureViewingInput>, JsonRejection>,
) -> Response {
    let input = match payload {
        Ok(Json(input)) => input,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match state.service.submit(input).await {
        Ok(viewing) => (StatusCode::CREATED, Json(viewing)).into_response(),
        Err(e) => service_error(e),
    }
}

async fn list_viewings(State(state): State<AppState>, Query(q): Query<PageQuery>) -> Response {
    match state.service.list_all(q.pagination()).await {
        Ok(viewings) => Json(viewings).into_response(),
        Err(e) => service_error(e),
    }
}

async fn list_recent(State(state): State<AppState>, Query(q): Query<PageQuery>) -> Response {
    match state.service.list_recent_unseen(q.pagination()).await {
        Ok(viewings) => Json(viewings).into_response(),
        Err(e) => service_error(e),
    }
}

async fn get_viewing(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid viewing ID");
    };
    match state.service.get(id).await {
        Ok(Some(viewing)) => Json(viewing).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Viewing not found"),
        Err(e) => service_error(e),
    }
}
