//! JSON HTTP surface over the listing lifecycle.

mod auth;
mod error;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, StatusCode,
    },
    routing::{get, post},
    Json, Router,
};
use fridge_core::{ListingInput, ListingUpdateInput, ListingsParams, User, UserSearchParams};
use fridge_identity::IdentityProvider;
use fridge_lifecycle::{
    LifecycleError, ListingPageView, ListingService, ListingView, RatingInput, UserActivity, UserStats,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use auth::{AuthUser, MaybeAuthUser};
pub use error::ApiError;

pub const CRATE_NAME: &str = "fridge-web";

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_ACTIVITY_LIMIT: u64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub service: ListingService,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(service: ListingService, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { service, identity }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        let port = match std::env::var("FRIDGE_WEB_PORT") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = %raw, default = DEFAULT_PORT, "ignoring unparsable FRIDGE_WEB_PORT");
                DEFAULT_PORT
            }),
            Err(_) => DEFAULT_PORT,
        };
        Self { port }
    }
}

/// Body of every successful listing mutation.
#[derive(Debug, Serialize)]
struct ListingMessage {
    message: &'static str,
    listing: ListingView,
}

impl ListingMessage {
    fn json(message: &'static str, listing: ListingView) -> Json<Self> {
        Json(Self { message, listing })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ActivityParams {
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RatingResponse {
    message: &'static str,
    new_rating: f64,
}

#[derive(Debug, Serialize)]
struct UserSearchResponse {
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    stats: UserStats,
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/listings", get(list_listings_handler).post(create_listing_handler))
        .route("/listings/mine/donated", get(donated_handler))
        .route("/listings/mine/received", get(received_handler))
        .route(
            "/listings/{id}",
            get(listing_detail_handler)
                .put(update_listing_handler)
                .delete(delete_listing_handler),
        )
        .route("/listings/{id}/reserve", post(reserve_handler))
        .route("/listings/{id}/claim", post(claim_handler))
        .route("/listings/{id}/cancel-reservation", post(cancel_reservation_handler))
        .route("/users/search", get(user_search_handler))
        .route("/users/{id}", get(user_profile_handler))
        .route("/users/{id}/stats", get(user_stats_handler))
        .route("/users/{id}/activity", get(user_activity_handler))
        .route("/users/{id}/rate", post(rate_user_handler))
        .layer(cors)
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, config: WebConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!(port = config.port, "http server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;
    info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Ids that do not parse cannot name a stored record.
fn listing_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| LifecycleError::NotFound.into())
}

fn user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| LifecycleError::UserNotFound.into())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": state.service.now().to_rfc3339(),
    }))
}

async fn list_listings_handler(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    params: Result<Query<ListingsParams>, QueryRejection>,
) -> Result<Json<ListingPageView>, ApiError> {
    let Query(params) = params?;
    debug!(viewer = ?viewer, "listing query");
    Ok(Json(state.service.list(params).await?))
}

async fn listing_detail_handler(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<String>,
) -> Result<Json<ListingView>, ApiError> {
    let id = listing_id(&id)?;
    debug!(viewer = ?viewer, listing_id = %id, "listing detail");
    Ok(Json(state.service.get(id).await?))
}

async fn create_listing_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    body: Result<Json<ListingInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ListingMessage>), ApiError> {
    let Json(input) = body?;
    let listing = state.service.create(actor, &input).await?;
    Ok((
        StatusCode::CREATED,
        ListingMessage::json("Listing created successfully", listing),
    ))
}

async fn update_listing_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
    body: Result<Json<ListingUpdateInput>, JsonRejection>,
) -> Result<Json<ListingMessage>, ApiError> {
    let id = listing_id(&id)?;
    let Json(input) = body?;
    let listing = state.service.update(actor, id, &input).await?;
    Ok(ListingMessage::json("Listing updated successfully", listing))
}

async fn delete_listing_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = listing_id(&id)?;
    state.service.delete(actor, id).await?;
    Ok(Json(json!({ "message": "Listing deleted successfully" })))
}

async fn reserve_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ListingMessage>, ApiError> {
    let listing = state.service.reserve(actor, listing_id(&id)?).await?;
    Ok(ListingMessage::json("Listing reserved successfully", listing))
}

async fn claim_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ListingMessage>, ApiError> {
    let listing = state.service.claim(actor, listing_id(&id)?).await?;
    Ok(ListingMessage::json("Listing claimed successfully", listing))
}

async fn cancel_reservation_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ListingMessage>, ApiError> {
    let listing = state.service.cancel_reservation(actor, listing_id(&id)?).await?;
    Ok(ListingMessage::json("Reservation cancelled successfully", listing))
}

async fn donated_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
) -> Result<Json<Vec<ListingView>>, ApiError> {
    Ok(Json(state.service.donated(actor).await?))
}

async fn received_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(actor): AuthUser,
) -> Result<Json<Vec<ListingView>>, ApiError> {
    Ok(Json(state.service.received(actor).await?))
}

async fn user_search_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<UserSearchParams>, QueryRejection>,
) -> Result<Json<UserSearchResponse>, ApiError> {
    let Query(params) = params?;
    let users = state.service.users().search(params).await?;
    Ok(Json(UserSearchResponse { users }))
}

async fn user_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.service.users().profile(user_id(&id)?).await?))
}

async fn user_stats_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.service.users().stats(user_id(&id)?).await?;
    Ok(Json(StatsResponse { stats }))
}

async fn user_activity_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<ActivityParams>, QueryRejection>,
) -> Result<Json<UserActivity>, ApiError> {
    let id = user_id(&id)?;
    let Query(params) = params?;
    let limit = match params.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => DEFAULT_ACTIVITY_LIMIT,
        Some(raw) => match raw.parse::<u64>() {
            Ok(n) if n > 0 => n.min(state.service.config().max_page_size),
            _ => return Err(ApiError::BadRequest("limit must be a positive integer".into())),
        },
    };
    Ok(Json(state.service.users().activity(id, limit).await?))
}

async fn rate_user_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(rater): AuthUser,
    Path(id): Path<String>,
    body: Result<Json<RatingInput>, JsonRejection>,
) -> Result<Json<RatingResponse>, ApiError> {
    let rated = user_id(&id)?;
    let Json(input) = body?;
    let new_rating = state.service.users().apply_rating(rater, rated, &input).await?;
    Ok(Json(RatingResponse {
        message: "Rating submitted successfully",
        new_rating,
    }))
}
