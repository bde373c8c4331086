//! Catalog HTTP server.
//!
//! Serves the public search API and the token-guarded admin API that the
//! operator tools (`seed`, `monitor`, `backfill-ean`) drive.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/search?q=&limit=` | Trigram product search |
//! | `GET`  | `/products/{id}` | Product with images and synonyms |
//! | `GET`  | `/admin/count` | Brand, family, and product counts |
//! | `GET`  | `/admin/ingest_stats` | Ingest cursors per strategy |
//! | `GET`  | `/admin/recent?limit=` | Latest products |
//! | `POST` | `/admin/seed_basic?queries=` | Ingest search terms from the provider |
//! | `GET`  | `/admin/count_missing_ean` | Products without an EAN |
//! | `POST` | `/admin/backfill_ean_loop` | Bounded EAN backfill |
//! | `GET`  | `/admin/ingest_log?limit=` | Ingest audit rows |
//! | `GET`  | `/admin/progress` | Counts plus the latest audit row |
//! | `GET`  | `/admin/tables` | Table names |
//! | `POST` | `/admin/migrate` | Re-apply the schema |
//! | `GET`  | `/admin/debug_token_status` | Whether an admin token is configured |
//!
//! Every `/admin` route except `debug_token_status` requires
//! `?token=<admin.token>`. A server started without a token rejects all of
//! them.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "invalid admin token" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `provider_unavailable` (502), `internal` (500).

use axum::{
    extract::{rejection::QueryRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::backfill::run_backfill_loop;
use crate::config::Config;
use crate::db;
use crate::get::get_product;
use crate::ingest::seed_queries;
use crate::migrate::apply_schema;
use crate::models::{BackfillParams, BackfillReply, ProductDetail, SearchHit, SeedReply};
use crate::provider::{CatalogProvider, DateriumProvider};
use crate::search::search_products;
use crate::stats;
use crate::terms::split_batch;

const RECENT_DEFAULT: i64 = 20;
const RECENT_MAX: i64 = 200;
const LOG_DEFAULT: i64 = 50;
const LOG_MAX: i64 = 500;
const BACKFILL_MAX_BATCH: u32 = 1000;
const BACKFILL_MAX_LOOPS: u32 = 50;
const BACKFILL_MAX_PAUSE_MS: u64 = 60_000;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    /// `None` when no provider credentials are configured; ingestion routes
    /// then answer `provider_unavailable`.
    provider: Option<Arc<dyn CatalogProvider>>,
}

/// Starts the catalog server with the Daterium provider from `[provider]`.
///
/// Missing provider credentials are not fatal: search and the read-only
/// admin routes still work.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider: Option<Arc<dyn CatalogProvider>> = match DateriumProvider::new(&config.provider) {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            warn!(error = %e, "provider disabled");
            None
        }
    };
    serve(config, provider).await
}

/// Starts the catalog server with a caller-supplied provider.
pub async fn run_server_with_provider(
    config: &Config,
    provider: Arc<dyn CatalogProvider>,
) -> anyhow::Result<()> {
    serve(config, Some(provider)).await
}

async fn serve(config: &Config, provider: Option<Arc<dyn CatalogProvider>>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;

    if config.admin.token.is_empty() {
        warn!("admin.token is empty; admin endpoints will reject every request");
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        provider,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/count", get(handle_count))
        .route("/ingest_stats", get(handle_ingest_stats))
        .route("/recent", get(handle_recent))
        .route("/seed_basic", post(handle_seed_basic))
        .route("/count_missing_ean", get(handle_count_missing_ean))
        .route("/backfill_ean_loop", post(handle_backfill))
        .route("/ingest_log", get(handle_ingest_log))
        .route("/progress", get(handle_progress))
        .route("/tables", get(handle_tables))
        .route("/migrate", post(handle_migrate))
        .route("/debug_token_status", get(handle_token_status));

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/search", get(handle_search))
        .route("/products/{id}", get(handle_product))
        .nest("/admin", admin)
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "catalog server listening");
    println!("Catalog server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Query-string extractor whose rejection is the JSON error body.
struct QueryArgs<T>(T);

impl<S, T> FromRequestParts<S> for QueryArgs<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::try_from_uri(&parts.uri)?;
        Ok(QueryArgs(value))
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: "invalid admin token".to_string(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn provider_unavailable() -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "provider_unavailable",
        message: "no catalog provider configured".to_string(),
    }
}

type HmacSha256 = Hmac<Sha256>;

const TOKEN_MAC_KEY: &[u8] = b"ferretero admin token";

/// Compares the digests of both tokens so the time taken does not depend on
/// where they first differ.
fn tokens_match(given: &str, expected: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(TOKEN_MAC_KEY) else {
        return false;
    };
    mac.update(given.as_bytes());
    let given_digest = mac.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(TOKEN_MAC_KEY) else {
        return false;
    };
    mac.update(expected.as_bytes());
    mac.verify_slice(&given_digest).is_ok()
}

fn check_token(state: &AppState, token: Option<&str>) -> Result<(), AppError> {
    let expected = state.config.admin.token.as_str();
    match token {
        Some(t) if !expected.is_empty() && tokens_match(t, expected) => Ok(()),
        _ => Err(unauthorized()),
    }
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<i64, AppError> {
    if value < min || value > max {
        return Err(bad_request(format!(
            "{} must be between {} and {}",
            name, min, max
        )));
    }
    Ok(value)
}

fn provider_of(state: &AppState) -> Result<Arc<dyn CatalogProvider>, AppError> {
    state.provider.clone().ok_or_else(provider_unavailable)
}

// ============ Public routes ============

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

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    items: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params
        .q
        .ok_or_else(|| bad_request("query parameter 'q' is required"))?;
    let limit = params
        .limit
        .unwrap_or(state.config.search.default_limit)
        .clamp(1, state.config.search.max_limit);

    let items = search_products(&state.pool, &query, limit).await?;
    Ok(Json(SearchResponse {
        query,
        count: items.len(),
        items,
    }))
}

async fn handle_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductDetail>, AppError> {
    match get_product(&state.pool, id).await {
        Ok(product) => Ok(Json(product)),
        Err(e) if e.to_string().contains("not found") => Err(not_found(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

// ============ Admin routes ============

#[derive(Deserialize)]
struct TokenParams {
    token: Option<String>,
}

#[derive(Deserialize)]
struct LimitParams {
    token: Option<String>,
    limit: Option<i64>,
}

async fn handle_count(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<TokenParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let counts = stats::catalog_counts(&state.pool).await?;
    Ok(Json(json!({ "ok": true, "counts": counts })))
}

async fn handle_ingest_stats(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<TokenParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let rows = stats::ingest_stats(&state.pool).await?;
    Ok(Json(json!({ "ok": true, "stats": rows })))
}

async fn handle_recent(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<LimitParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let limit = check_range("limit", params.limit.unwrap_or(RECENT_DEFAULT), 1, RECENT_MAX)?;
    let items = stats::recent_products(&state.pool, limit).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

#[derive(Deserialize)]
struct SeedParams {
    token: Option<String>,
    queries: Option<String>,
}

async fn handle_seed_basic(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<SeedParams>,
) -> Result<Json<SeedReply>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let provider = provider_of(&state)?;

    let mut terms = params
        .queries
        .as_deref()
        .map(split_batch)
        .unwrap_or_default();
    if terms.is_empty() {
        terms = state.config.provider.default_queries.clone();
    }

    let reply = seed_queries(&state.pool, provider.as_ref(), &terms).await?;
    Ok(Json(reply))
}

async fn handle_count_missing_ean(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<TokenParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let missing = stats::count_missing_ean(&state.pool).await?;
    Ok(Json(json!({ "ok": true, "missing": missing })))
}

#[derive(Deserialize)]
struct BackfillQuery {
    token: Option<String>,
    batch: Option<u32>,
    loops: Option<u32>,
    pause_ms: Option<u64>,
    dry: Option<bool>,
}

async fn handle_backfill(
    State(state): State<AppState>,
    QueryArgs(q): QueryArgs<BackfillQuery>,
) -> Result<Json<BackfillReply>, AppError> {
    check_token(&state, q.token.as_deref())?;

    let defaults = BackfillParams::default();
    let params = BackfillParams {
        batch: q.batch.unwrap_or(defaults.batch),
        loops: q.loops.unwrap_or(defaults.loops),
        pause_ms: q.pause_ms.unwrap_or(defaults.pause_ms),
        dry: q.dry.unwrap_or(defaults.dry),
    };
    if params.batch == 0 || params.batch > BACKFILL_MAX_BATCH {
        return Err(bad_request(format!(
            "batch must be between 1 and {}",
            BACKFILL_MAX_BATCH
        )));
    }
    if params.loops == 0 || params.loops > BACKFILL_MAX_LOOPS {
        return Err(bad_request(format!(
            "loops must be between 1 and {}",
            BACKFILL_MAX_LOOPS
        )));
    }
    if params.pause_ms > BACKFILL_MAX_PAUSE_MS {
        return Err(bad_request(format!(
            "pause_ms must be at most {}",
            BACKFILL_MAX_PAUSE_MS
        )));
    }

    let provider = provider_of(&state)?;
    let reply = run_backfill_loop(&state.pool, provider.as_ref(), params).await?;
    Ok(Json(reply))
}

async fn handle_ingest_log(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<LimitParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let limit = check_range("limit", params.limit.unwrap_or(LOG_DEFAULT), 1, LOG_MAX)?;
    let rows = stats::ingest_log(&state.pool, limit).await?;
    Ok(Json(json!({ "ok": true, "rows": rows, "limit": limit })))
}

async fn handle_progress(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<TokenParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let counts = stats::catalog_counts(&state.pool).await?;
    let latest = stats::latest_ingest(&state.pool).await?;
    Ok(Json(json!({
        "ok": true,
        "counts": counts,
        "latest": latest.map(|r| json!(r)).unwrap_or_else(|| json!({})),
    })))
}

async fn handle_tables(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<TokenParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    let tables = stats::list_tables(&state.pool).await?;
    Ok(Json(json!({ "ok": true, "tables": tables })))
}

async fn handle_migrate(
    State(state): State<AppState>,
    QueryArgs(params): QueryArgs<TokenParams>,
) -> Result<Json<Value>, AppError> {
    check_token(&state, params.token.as_deref())?;
    apply_schema(&state.pool).await?;
    info!("schema re-applied via admin");
    Ok(Json(json!({ "ok": true, "migrated": "catalog" })))
}

async fn handle_token_status(State(state): State<AppState>) -> Json<Value> {
    let token = &state.config.admin.token;
    Json(json!({ "present": !token.is_empty(), "length": token.len() }))
}
