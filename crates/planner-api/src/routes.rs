use std::hash::{Hash, Hasher};
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use planner_core::models::DEFAULT_PULL_BATCH_SIZE;
use planner_core::services::DatabaseService;
use planner_core::{Checkpoint, Collection, PullResponse, PushRow, WireDocument};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, SupabaseJwtVerifier};
use crate::config::{AppConfig, DatabaseLocation};
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    database: DatabaseService,
    jwt_verifier: Arc<SupabaseJwtVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub async fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let database = match &config.database {
            DatabaseLocation::InMemory => DatabaseService::open_in_memory(),
            DatabaseLocation::Path(path) => DatabaseService::open_path(path).await,
        }
        .map_err(|error| AppError::Config(format!("Cannot open planner database: {error}")))?;
        Ok(Self::new(config, database))
    }

    fn new(config: Arc<AppConfig>, database: DatabaseService) -> Self {
        Self {
            database,
            jwt_verifier: Arc::new(SupabaseJwtVerifier::new(config.clone())),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/{collection}/pull", get(pull))
        .route("/{collection}/push", post(push))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullQuery {
    #[serde(alias = "uuid")]
    id: Option<String>,
    change_time: Option<i64>,
    batch_size: Option<usize>,
}

impl PullQuery {
    fn checkpoint(self) -> Result<Option<Checkpoint>, AppError> {
        match (self.id, self.change_time) {
            (Some(id), Some(change_time)) => Ok(Some(Checkpoint::new(id, change_time))),
            (None, None) => Ok(None),
            _ => Err(AppError::bad_request(
                "checkpoint requires both `id` and `changeTime`",
            )),
        }
    }
}

async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(collection): Path<String>,
    query: Result<Query<PullQuery>, QueryRejection>,
) -> Result<Json<PullResponse>, AppError> {
    let collection: Collection = collection.parse()?;
    let Query(query) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let max = state.config.pull_max_batch_size;
    let batch_size = query.batch_size.unwrap_or(DEFAULT_PULL_BATCH_SIZE);
    if !(1..=max).contains(&batch_size) {
        return Err(AppError::bad_request(format!(
            "batchSize must be in [1, {max}]"
        )));
    }
    let checkpoint = query.checkpoint()?;

    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Pull, &user.user_id)
        .await?;

    let user_hash = user_fingerprint(&user.user_id);
    let response = state
        .database
        .pull(collection, user.user_id, checkpoint, batch_size)
        .await?;
    tracing::info!(
        endpoint = "pull",
        collection = collection.name(),
        user = user_hash,
        documents = response.documents.len(),
        exhausted = response.is_exhausted(),
        "Served pull batch"
    );
    Ok(Json(response))
}

async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(collection): Path<String>,
    body: Result<Json<Vec<PushRow>>, JsonRejection>,
) -> Result<Json<Vec<WireDocument>>, AppError> {
    let collection: Collection = collection.parse()?;
    let Json(rows) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let max = state.config.push_max_batch_size;
    if rows.len() > max {
        return Err(AppError::bad_request(format!(
            "push batch exceeds {max} rows"
        )));
    }

    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Push, &user.user_id)
        .await?;

    let user_hash = user_fingerprint(&user.user_id);
    let row_count = rows.len();
    let conflicts = state
        .database
        .push(collection, user.user_id, rows)
        .await?;
    tracing::info!(
        endpoint = "push",
        collection = collection.name(),
        user = user_hash,
        session = user.session_id.as_deref().unwrap_or("none"),
        rows = row_count,
        conflicts = conflicts.len(),
        "Applied push batch"
    );
    Ok(Json(conflicts))
}

pub(crate) fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
