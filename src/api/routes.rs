use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::admin::auth::{AuthError, AuthService, Identity, SessionGrant};
use crate::admin::publish::{PublishRequest, PublishRules};
use crate::api::feed_socket::feed_ws;
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::countdown::{Countdown, CountdownState};
use crate::db::DealStore;
use crate::error::AppError;
use crate::feed::filter::{self, CategoryFilter, FeedFilter};
use crate::feed::{FeedHandle, FeedStatus};
use crate::types::{now_ms, Deal};

#[derive(Clone)]
pub struct ApiState {
    pub store: DealStore,
    pub feed: Arc<FeedHandle>,
    pub auth: Arc<AuthService>,
    pub rules: Arc<PublishRules>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub purge_chunk_size: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/deals", get(get_deals))
        .route("/feed/ws", get(feed_ws))
        .route("/feed/retry", post(post_feed_retry))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/auth/signup", post(post_signup))
        .route("/auth/login", post(post_login))
        .route("/auth/logout", post(post_logout))
        .route(
            "/admin/deals",
            get(get_admin_deals).post(post_admin_deal).delete(purge_admin_deals),
        )
        .route("/admin/deals/:id", delete(delete_admin_deal))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// A signed-in admin, taken from `Authorization: Bearer <token>`.
pub struct AdminSession {
    pub token: String,
    pub identity: Identity,
}

#[axum::async_trait]
impl FromRequestParts<ApiState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::SignedOut)?;
        let identity = state.auth.identity(token)?;
        Ok(Self {
            token: token.to_string(),
            identity,
        })
    }
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DealsQuery {
    pub category: Option<String>,
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct PurgeQuery {
    pub confirm: Option<bool>,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A deal as the storefront renders it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealCard {
    #[serde(flatten)]
    pub deal: Deal,
    pub discount_percent: i64,
    /// Evaluated when the response was built.
    pub countdown: CountdownState,
}

impl DealCard {
    pub fn new(deal: Deal, now_ms: i64) -> Self {
        let countdown = Countdown::start(deal.expires_at, now_ms).state().clone();
        Self {
            discount_percent: deal.discount_percent(),
            countdown,
            deal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealsResponse {
    pub category: CategoryFilter,
    pub q: String,
    pub status: FeedStatus,
    pub revision: u64,
    /// Size of the unfiltered mirror.
    pub total: usize,
    pub deals: Vec<DealCard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryResponse {
    pub retrying: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: FeedStatus,
    pub feed_live: bool,
    pub revision: u64,
    pub deals_mirrored: u64,
    pub last_snapshot_at_ms: u64,
    pub snapshot_errors: u64,
    pub admin_sessions: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyResponse {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub sample_count: u64,
}

// ---------------------------------------------------------------------------
// Storefront handlers
// ---------------------------------------------------------------------------

async fn get_deals(
    State(state): State<ApiState>,
    Query(params): Query<DealsQuery>,
) -> Result<Json<DealsResponse>, AppError> {
    let category: CategoryFilter = params
        .category
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(AppError::Validation)?;
    let visible = FeedFilter::new(category, params.q.unwrap_or_default());

    let feed = state.feed.current();
    if let FeedStatus::Degraded { message } = &feed.status {
        // Nothing mirrored yet, so there is no last good list to serve.
        if state.health.last_snapshot_at_ms() == 0 {
            return Err(AppError::Subscription(message.clone()));
        }
    }
    let now = now_ms();
    let deals = filter::apply(&feed.deals, &visible)
        .into_iter()
        .map(|deal| DealCard::new(deal, now))
        .collect();

    Ok(Json(DealsResponse {
        category: visible.category,
        q: visible.query,
        status: feed.status,
        revision: feed.revision,
        total: feed.deals.len(),
        deals,
    }))
}

async fn post_feed_retry(State(state): State<ApiState>) -> Json<RetryResponse> {
    let retrying = state.feed.retry();
    if retrying {
        info!("Feed retry requested over HTTP");
    }
    Json(RetryResponse { retrying })
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let feed = state.feed.current();
    Json(HealthResponse {
        status: feed.status,
        feed_live: state.health.feed_live(),
        revision: feed.revision,
        deals_mirrored: state.health.deals_mirrored(),
        last_snapshot_at_ms: state.health.last_snapshot_at_ms(),
        snapshot_errors: state.health.snapshot_errors(),
        admin_sessions: state.auth.session_count(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50, p95, p99) = state.latency.percentiles();
    let to_ms = |us: Option<u64>| us.map(|v| v as f64 / 1000.0);
    Json(LatencyResponse {
        p50_ms: to_ms(p50),
        p95_ms: to_ms(p95),
        p99_ms: to_ms(p99),
        sample_count: state.latency.len(),
    })
}

// ---------------------------------------------------------------------------
// Auth handlers
// ---------------------------------------------------------------------------

async fn post_signup(
    State(state): State<ApiState>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<SessionGrant>), AppError> {
    let grant = state.auth.sign_up(&body.email, &body.password).await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

async fn post_login(
    State(state): State<ApiState>,
    Json(body): Json<Credentials>,
) -> Result<Json<SessionGrant>, AppError> {
    Ok(Json(state.auth.sign_in(&body.email, &body.password).await?))
}

async fn post_logout(State(state): State<ApiState>, session: AdminSession) -> StatusCode {
    state.auth.sign_out(&session.token);
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

/// The dashboard list follows the live mirror, not a separate query.
async fn get_admin_deals(State(state): State<ApiState>, _session: AdminSession) -> Json<Vec<Deal>> {
    Json(state.feed.current().deals.to_vec())
}

async fn post_admin_deal(
    State(state): State<ApiState>,
    session: AdminSession,
    Json(body): Json<PublishRequest>,
) -> Result<(StatusCode, Json<Deal>), AppError> {
    let new_deal = body.into_new_deal(&state.rules, now_ms())?;
    match state.store.add(new_deal).await {
        Ok(deal) => {
            info!(id = %deal.id, by = %session.identity.email, "Deal published");
            Ok((StatusCode::CREATED, Json(deal)))
        }
        Err(e) => {
            error!(by = %session.identity.email, "Publish failed: {e}");
            Err(e)
        }
    }
}

async fn delete_admin_deal(
    State(state): State<ApiState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match state.store.delete(&id).await {
        Ok(removed) => {
            info!(id = %id, removed, by = %session.identity.email, "Deal delete");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            error!(id = %id, by = %session.identity.email, "Delete failed: {e}");
            Err(e)
        }
    }
}

async fn purge_admin_deals(
    State(state): State<ApiState>,
    session: AdminSession,
    Query(params): Query<PurgeQuery>,
) -> Result<Json<PurgeResponse>, AppError> {
    if params.confirm != Some(true) {
        return Err(AppError::Validation(
            "purge requires confirm=true".to_string(),
        ));
    }
    match state.store.purge_all(state.purge_chunk_size).await {
        Ok(deleted) => {
            info!(deleted, by = %session.identity.email, "All deals purged");
            Ok(Json(PurgeResponse { deleted }))
        }
        Err(e) => {
            error!(by = %session.identity.email, "Purge failed: {e}");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
