//! HTTP server.
//!
//! Exposes the load and search operations as a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/load` | Load a directory: `{ "directory": "...", "force_reload": false }` |
//! | `POST` | `/search` | Field search: `{ "author": "...", "year": 2015, "page": 1, "per_page": 20 }` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "at least one search field is required" } }
//! ```
//!
//! Error codes: `bad_request` (400) for anything the caller can fix (empty or
//! unknown filters, bad pagination, missing directory, malformed JSON) and
//! `internal` (500) for store failures.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::load::{load_directory, LoadError, LoadRequest};
use crate::migrate;
use crate::models::{LoadSummary, ResultPage};
use crate::progress::NoProgress;
use crate::search::{self, SearchError, SearchRequest};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

impl AppState {
    /// Opens the read pool and makes sure the schema exists.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self {
            config: Arc::new(config.clone()),
            pool,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/load", post(handle_load))
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::new(config).await?;
    let app = build_router(state);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        if err.is_client_error() {
            bad_request(err.to_string())
        } else {
            tracing::error!(error = %err, "search failed");
            internal(err.to_string())
        }
    }
}

impl From<LoadError> for AppError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotADirectory(_) | LoadError::NoInputFiles { .. } => {
                bad_request(err.to_string())
            }
            other => {
                tracing::error!(error = %other, "load failed");
                internal(other.to_string())
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /load ============

async fn handle_load(
    State(state): State<AppState>,
    payload: Result<Json<LoadRequest>, JsonRejection>,
) -> Result<Json<LoadSummary>, AppError> {
    let Json(request) = payload?;
    tracing::info!(
        directory = %request.directory.display(),
        force_reload = request.force_reload,
        "load requested"
    );
    let summary = load_directory(
        &state.config,
        &request.directory,
        request.force_reload,
        Arc::new(NoProgress),
    )
    .await?;
    Ok(Json(summary))
}

// ============ POST /search ============

async fn handle_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<ResultPage>, AppError> {
    let Json(request) = payload?;
    let page = search::execute(&state.pool, &state.config.search, &request).await?;
    Ok(Json(page))
}
