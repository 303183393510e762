// Loan Reconciliation - Read API
// Serves archived runs from the SQLite archive plus the report directory

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use loan_reconciliation::sink::sqlite::{
    latest_run_id, list_runs, load_concentration, load_kpis, load_loan_details, load_summary, open_archive,
};
use loan_reconciliation::{Dimension, ReconError};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

#[derive(Parser, Debug)]
#[command(name = "recon-server")]
#[command(about = "Read API over the reconciliation run archive")]
struct Args {
    /// SQLite archive written by `loan-recon run --archive-db`
    #[arg(long, env = "RECON_ARCHIVE_DB", default_value = "recon.db")]
    db: PathBuf,

    /// Report directory served under /reports
    #[arg(long, env = "RECON_OUTPUT_DIR", default_value = "reports")]
    reports_dir: PathBuf,

    #[arg(long, env = "RECON_ADDR", default_value = "0.0.0.0:3000")]
    addr: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        let body = Self {
            success: true,
            data: Some(data),
            error: None,
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

fn failure(status: StatusCode, message: String) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: Some(message),
    };
    (status, Json(body)).into_response()
}

/// `?run_id=` selects a run; default is the latest one
#[derive(Debug, Deserialize)]
struct RunQuery {
    run_id: Option<String>,
}

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<ReconError> for ApiError {
    fn from(e: ReconError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => failure(StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => failure(StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                log::error!("request failed: {}", msg);
                failure(StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        }
    }
}

fn with_conn<T>(state: &AppState, f: impl FnOnce(&Connection) -> Result<T, ApiError>) -> Result<T, ApiError> {
    let conn = state
        .db
        .lock()
        .map_err(|_| ApiError::Internal("archive connection poisoned".to_string()))?;
    f(&conn)
}

fn resolve_run(conn: &Connection, query: &RunQuery) -> Result<String, ApiError> {
    match &query.run_id {
        Some(run_id) => Ok(run_id.clone()),
        None => latest_run_id(conn)?.ok_or_else(|| ApiError::NotFound("archive has no runs yet".to_string())),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/runs - All archived runs, newest first
async fn get_runs(State(state): State<AppState>) -> Result<Response, ApiError> {
    let runs = with_conn(&state, |conn| Ok(list_runs(conn)?))?;
    Ok(ApiResponse::ok(runs))
}

/// GET /api/kpis - KPIs of a run
async fn get_kpis(State(state): State<AppState>, Query(query): Query<RunQuery>) -> Result<Response, ApiError> {
    let kpis = with_conn(&state, |conn| {
        let run_id = resolve_run(conn, &query)?;
        Ok(load_kpis(conn, &run_id)?)
    })?;
    Ok(ApiResponse::ok(kpis))
}

/// GET /api/summary - Summary metrics (cost center x mismatch) of a run
async fn get_summary(State(state): State<AppState>, Query(query): Query<RunQuery>) -> Result<Response, ApiError> {
    let rows = with_conn(&state, |conn| {
        let run_id = resolve_run(conn, &query)?;
        Ok(load_summary(conn, &run_id)?)
    })?;
    Ok(ApiResponse::ok(rows))
}

/// GET /api/concentration/:dimension - cost_center | risk_segment | pd_bucket
async fn get_concentration(
    State(state): State<AppState>,
    Path(dimension): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<Response, ApiError> {
    let dimension = Dimension::parse(&dimension)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown dimension '{}'", dimension)))?;

    let rows = with_conn(&state, |conn| {
        let run_id = resolve_run(conn, &query)?;
        Ok(load_concentration(conn, &run_id, dimension)?)
    })?;
    Ok(ApiResponse::ok(rows))
}

/// GET /api/loans/:loan_id - Detail rows for one loan
async fn get_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<Response, ApiError> {
    // Decode URL-encoded loan id
    let loan_id = urlencoding::decode(&loan_id)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| loan_id.clone());

    let rows = with_conn(&state, |conn| {
        let run_id = resolve_run(conn, &query)?;
        Ok(load_loan_details(conn, &run_id, &loan_id)?)
    })?;

    if rows.is_empty() {
        return Err(ApiError::NotFound(format!("loan {} not in run", loan_id)));
    }
    Ok(ApiResponse::ok(rows))
}

// ============================================================================
// Main Server
// ============================================================================

fn build_app(state: AppState, reports_dir: PathBuf) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/runs", get(get_runs))
        .route("/kpis", get(get_kpis))
        .route("/summary", get(get_summary))
        .route("/concentration/:dimension", get(get_concentration))
        .route("/loans/:loan_id", get(get_loan))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .nest_service("/reports", ServeDir::new(reports_dir))
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("🌐 Loan Reconciliation - Read API");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_archive(&args.db)
        .with_context(|| format!("Failed to open archive {}", args.db.display()))?;
    println!("✓ Archive opened: {}", args.db.display());

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };
    let app = build_app(state, args.reports_dir.clone());

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;

    println!("\n🚀 Server running on http://{}", args.addr);
    println!("   API:     /api/kpis, /api/summary, /api/concentration/:dimension, /api/loans/:loan_id");
    println!("   Reports: /reports (from {})", args.reports_dir.display());
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
