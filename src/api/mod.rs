//! REST endpoints under `/api`.
//!
//! Handlers run store calls through [`DbHandle::call`], record a
//! best-effort activity entry for every mutation and broadcast a
//! [`WsMessage`] so connected clients can refresh.

mod areas;
mod boards;
mod misc;
mod prds;
mod projects;

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::ai::TaskExtractor;
use crate::errors::{BenError, BoardError};
use crate::store::DbHandle;
use crate::store::models::{Actor, Page};
use crate::ws::{WsMessage, broadcast_message};

pub use misc::health_check;

/// Header naming who performed a request: `user:<id>` or `agent:<id>`.
pub const ACTOR_HEADER: &str = "x-benos-actor";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub extractor: Arc<dyn TaskExtractor>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, extractor: Arc<dyn TaskExtractor>) -> SharedState {
        let (ws_tx, _rx) = broadcast::channel::<String>(256);
        Arc::new(Self {
            db,
            ws_tx,
            extractor,
        })
    }

    pub fn notify(&self, msg: &WsMessage) {
        broadcast_message(&self.ws_tx, msg);
    }

    /// Append to the activity log. Failures are logged and swallowed so
    /// auditing never fails the mutation that triggered it.
    pub async fn audit(
        &self,
        entity_type: &'static str,
        entity_id: &str,
        action: &'static str,
        actor: &Actor,
        changes: serde_json::Value,
    ) {
        let entity_id = entity_id.to_string();
        let actor = actor.clone();
        let result = self
            .db
            .call(move |db| {
                db.record_activity(entity_type, &entity_id, action, &actor, &changes)
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(entity_type, action, error = %e, "Failed to record activity");
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::CardNotFound { .. } => ApiError::NotFound(err.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(ben) = err.downcast_ref::<BenError>() {
            return match ben {
                BenError::NotFound { .. } => ApiError::NotFound(ben.to_string()),
                BenError::Validation(msg) => ApiError::BadRequest(msg.clone()),
                BenError::InvalidTransition { .. } => ApiError::BadRequest(ben.to_string()),
                BenError::Board(board) => ApiError::from(board.clone()),
                BenError::LockPoisoned => ApiError::Internal(ben.to_string()),
            };
        }
        if let Some(board) = err.downcast_ref::<BoardError>() {
            return ApiError::from(board.clone());
        }
        tracing::error!(error = %format!("{:#}", err), "Request failed");
        ApiError::Internal(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn not_found(entity: &str, id: &str) -> ApiError {
    ApiError::NotFound(format!("{} {} not found", entity, id))
}

// ── Extractors ────────────────────────────────────────────────────────

/// JSON body whose rejections use the `{"error": ...}` shape.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Query string whose rejections use the `{"error": ...}` shape.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Caller identity from `X-Benos-Actor`, defaulting to `user:local`.
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(ACTOR_HEADER) {
            None => Ok(Self(Actor::local_user())),
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| ApiError::BadRequest("X-Benos-Actor must be ASCII".into()))?;
                let actor = raw.parse::<Actor>().map_err(ApiError::BadRequest)?;
                Ok(Self(actor))
            }
        }
    }
}

// ── Query helpers ─────────────────────────────────────────────────────

/// Validate `limit`/`offset`. Limits above the maximum are clamped.
pub(crate) fn page(limit: Option<i64>, offset: Option<i64>) -> ApiResult<Page> {
    let limit = limit.unwrap_or(Page::DEFAULT_LIMIT);
    if limit < 1 {
        return Err(ApiError::BadRequest("limit must be at least 1".into()));
    }
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::BadRequest("offset must not be negative".into()));
    }
    Ok(Page {
        limit: limit.min(Page::MAX_LIMIT),
        offset,
    })
}

/// Parse an optional enum filter from the query string.
pub(crate) fn parse_filter<T>(value: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>().map_err(ApiError::BadRequest))
        .transpose()
}

/// Blank query values mean "no filter".
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .merge(areas::routes())
        .merge(projects::routes())
        .merge(boards::routes())
        .merge(prds::routes())
        .merge(misc::routes())
}
