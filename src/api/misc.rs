use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use super::{
    ApiError, ApiJson, ApiQuery, ApiResult, RequestActor, SharedState, non_blank, not_found,
    page, parse_filter,
};
use crate::openapi;
use crate::search;
use crate::store::NewReport;
use crate::store::models::{ActivityQuery, ReportQuery};
use crate::ws::WsMessage;

/// Rows fetched per entity type before ranking.
const SEARCH_CANDIDATES_PER_TYPE: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ActivityParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub report_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/activity", get(list_activity))
        .route("/api/reports", get(list_reports).post(create_report))
        .route("/api/reports/{id}", get(get_report).delete(delete_report))
        .route("/api/search", get(search_all))
        .route("/api/openapi.json", get(openapi_document))
}

pub async fn health_check() -> &'static str {
    "ok"
}

async fn list_activity(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<ActivityParams>,
) -> ApiResult<impl IntoResponse> {
    let query = ActivityQuery {
        page: page(params.limit, params.offset)?,
        entity_type: non_blank(params.entity_type),
        entity_id: non_blank(params.entity_id),
    };
    let entries = state.db.call(move |db| db.list_activity(&query)).await?;
    Ok(Json(entries))
}

// ── Reports ───────────────────────────────────────────────────────────

async fn list_reports(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<ReportParams>,
) -> ApiResult<impl IntoResponse> {
    let query = ReportQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
        report_type: parse_filter(params.report_type.as_deref())?,
    };
    let reports = state.db.call(move |db| db.list_reports(&query)).await?;
    Ok(Json(reports))
}

async fn create_report(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewReport>,
) -> ApiResult<impl IntoResponse> {
    let report = state.db.call(move |db| db.create_report(&req)).await?;
    state
        .audit(
            "report",
            &report.id,
            "created",
            &actor,
            serde_json::json!({
                "report_type": report.report_type,
                "period_start": report.period_start,
                "period_end": report.period_end,
            }),
        )
        .await;
    state.notify(&WsMessage::changed("report", &report.id, "created"));
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_report(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    match state.db.call(move |db| db.get_report(&lookup)).await? {
        Some(report) => Ok(Json(report)),
        None => Err(not_found("Report", &id)),
    }
}

async fn delete_report(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    if !state.db.call(move |db| db.delete_report(&target)).await? {
        return Err(not_found("Report", &id));
    }
    state
        .audit("report", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::changed("report", &id, "deleted"));
    Ok(StatusCode::NO_CONTENT)
}

// ── Search ────────────────────────────────────────────────────────────

/// Ranked matches across every entity type.
async fn search_all(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> ApiResult<impl IntoResponse> {
    let Some(term) = non_blank(params.q) else {
        return Err(ApiError::BadRequest("q is required".into()));
    };
    let window = page(params.limit, params.offset)?;
    let lookup = term.clone();
    let candidates = state
        .db
        .call(move |db| db.search_candidates(&lookup, SEARCH_CANDIDATES_PER_TYPE))
        .await?;
    let hits: Vec<_> = search::rank(candidates, &term)
        .into_iter()
        .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
        .take(usize::try_from(window.limit).unwrap_or(usize::MAX))
        .collect();
    Ok(Json(hits))
}

async fn openapi_document() -> impl IntoResponse {
    Json(openapi::document())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_scores_and_orders() {
        let state = test_state();
        let app = test_app(&state);
        let (_, _, board_id) = seed_board(&app).await;
        for title in ["Launch", "Relaunch site", "Launch checklist", "Plan the launch"] {
            send(&app, "POST", "/api/tasks", Some(json!({"board_id": board_id, "title": title}))).await;
        }

        let (status, hits) = send(&app, "GET", "/api/search?q=launch", None).await;
        assert_eq!(status, StatusCode::OK);
        let scored: Vec<(&str, i64)> = hits
            .as_array()
            .unwrap()
            .iter()
            .filter(|h| h["entity_type"] == "task")
            .map(|h| (h["title"].as_str().unwrap(), h["score"].as_i64().unwrap()))
            .collect();
        assert_eq!(
            scored,
            vec![
                ("Launch", 100),
                ("Launch checklist", 90),
                ("Plan the launch", 80),
                ("Relaunch site", 60),
            ]
        );
        // The seeded project is titled "Launch" too.
        assert!(hits.as_array().unwrap().iter().any(|h| h["entity_type"] == "project"));
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let state = test_state();
        let app = test_app(&state);
        let (status, _) = send(&app, "GET", "/api/search?q=%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reports_store_opaque_json() {
        let state = test_state();
        let app = test_app(&state);
        let (status, report) = send(
            &app,
            "POST",
            "/api/reports",
            Some(json!({
                "report_type": "weekly",
                "title": "Week 10",
                "period_start": "2025-03-03",
                "period_end": "2025-03-09",
                "content": {"done": 7},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = report["id"].as_str().unwrap();

        let (_, fetched) = send(&app, "GET", &format!("/api/reports/{}", id), None).await;
        assert_eq!(fetched["content"]["done"], 7);

        let (_, weekly) = send(&app, "GET", "/api/reports?report_type=weekly", None).await;
        assert_eq!(weekly.as_array().unwrap().len(), 1);
        let (status, _) = send(&app, "GET", "/api/reports?report_type=yearly", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "DELETE", &format!("/api/reports/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_activity_filters_by_entity() {
        let state = test_state();
        let app = test_app(&state);
        let (area_id, _, _) = seed_board(&app).await;
        send(&app, "PATCH", &format!("/api/areas/{}", area_id), Some(json!({"icon": "briefcase"}))).await;

        let (_, entries) = send(
            &app,
            "GET",
            &format!("/api/activity?entity_type=area&entity_id={}", area_id),
            None,
        )
        .await;
        let actions: Vec<&str> = entries.as_array().unwrap().iter().map(|e| e["action"].as_str().unwrap()).collect();
        assert_eq!(actions, vec!["updated", "created"]);
        assert_eq!(entries[0]["actor_id"], "local");
    }

    #[tokio::test]
    async fn test_openapi_served() {
        let state = test_state();
        let app = test_app(&state);
        let (status, doc) = send(&app, "GET", "/api/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["openapi"].as_str().unwrap().starts_with("3."));
        assert!(doc["paths"]["/api/tasks/{id}/move"]["post"].is_object());
    }
}
