use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use super::{
    ApiJson, ApiQuery, ApiResult, RequestActor, SharedState, non_blank, not_found, page,
};
use crate::store::models::AreaQuery;
use crate::store::{AreaPatch, NewArea};
use crate::ws::WsMessage;

#[derive(Debug, Default, Deserialize)]
pub struct AreaParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
}

/// Body for reorder endpoints: every id of the collection, in new order.
#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<String>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/areas", get(list_areas).post(create_area))
        .route("/api/areas/reorder", post(reorder_areas))
        .route(
            "/api/areas/{id}",
            get(get_area).patch(update_area).delete(delete_area),
        )
}

async fn list_areas(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<AreaParams>,
) -> ApiResult<impl IntoResponse> {
    let query = AreaQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
    };
    let areas = state.db.call(move |db| db.list_areas(&query)).await?;
    Ok(Json(areas))
}

async fn create_area(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewArea>,
) -> ApiResult<impl IntoResponse> {
    let area = state.db.call(move |db| db.create_area(&req)).await?;
    state
        .audit("area", &area.id, "created", &actor, serde_json::to_value(&area).unwrap_or_default())
        .await;
    state.notify(&WsMessage::changed("area", &area.id, "created"));
    Ok((StatusCode::CREATED, Json(area)))
}

async fn get_area(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    let area = state.db.call(move |db| db.get_area(&lookup)).await?;
    match area {
        Some(area) => Ok(Json(area)),
        None => Err(not_found("Area", &id)),
    }
}

async fn update_area(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<AreaPatch>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::to_value(&patch).unwrap_or_default();
    let area = state.db.call(move |db| db.update_area(&id, &patch)).await?;
    state.audit("area", &area.id, "updated", &actor, changes).await;
    state.notify(&WsMessage::changed("area", &area.id, "updated"));
    Ok(Json(area))
}

async fn delete_area(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    let deleted = state.db.call(move |db| db.delete_area(&target)).await?;
    if !deleted {
        return Err(not_found("Area", &id));
    }
    state
        .audit("area", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::changed("area", &id, "deleted"));
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_areas(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<ReorderRequest>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::json!({ "ids": req.ids });
    let areas = state.db.call(move |db| db.reorder_areas(&req.ids)).await?;
    state.audit("area", "*", "reordered", &actor, changes).await;
    state.notify(&WsMessage::changed("area", "*", "reordered"));
    Ok(Json(areas))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_area_crud() {
        let state = test_state();
        let app = test_app(&state);

        let (status, area) = send(&app, "POST", "/api/areas", Some(json!({"name": "Health"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(area["color"], "#6366f1");
        let id = area["id"].as_str().unwrap().to_string();

        let (status, fetched) = send(&app, "GET", &format!("/api/areas/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["name"], "Health");

        let (status, updated) = send(
            &app,
            "PATCH",
            &format!("/api/areas/{}", id),
            Some(json!({"color": "#22c55e"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["color"], "#22c55e");
        assert_eq!(updated["name"], "Health");

        let (status, _) = send(&app, "DELETE", &format!("/api/areas/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, "GET", &format!("/api/areas/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_blank_name_is_400() {
        let state = test_state();
        let app = test_app(&state);
        let (status, body) = send(&app, "POST", "/api/areas", Some(json!({"name": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_list_pagination_and_search() {
        let state = test_state();
        let app = test_app(&state);
        for name in ["Work", "Home", "Hobbies"] {
            send(&app, "POST", "/api/areas", Some(json!({"name": name}))).await;
        }

        let (_, page) = send(&app, "GET", "/api/areas?limit=2&offset=1", None).await;
        let names: Vec<&str> = page.as_array().unwrap().iter().map(|a| a["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Home", "Hobbies"]);

        let (_, found) = send(&app, "GET", "/api/areas?search=HO", None).await;
        assert_eq!(found.as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "GET", "/api/areas?limit=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, "GET", "/api/areas?limit=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reorder_areas() {
        let state = test_state();
        let app = test_app(&state);
        let mut ids = Vec::new();
        for name in ["A", "B", "C"] {
            let (_, area) = send(&app, "POST", "/api/areas", Some(json!({"name": name}))).await;
            ids.push(area["id"].as_str().unwrap().to_string());
        }
        ids.reverse();
        let (status, areas) = send(&app, "POST", "/api/areas/reorder", Some(json!({"ids": ids}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(areas[0]["name"], "C");
        assert_eq!(areas[2]["position"], 2);

        let (status, _) = send(&app, "POST", "/api/areas/reorder", Some(json!({"ids": ["nope"]}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
