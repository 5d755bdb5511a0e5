use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use super::areas::ReorderRequest;
use super::{
    ApiJson, ApiQuery, ApiResult, RequestActor, SharedState, non_blank, not_found, page,
    parse_filter,
};
use crate::store::models::{MilestoneQuery, ProjectQuery};
use crate::store::{MilestonePatch, NewMilestone, NewProject, ProjectPatch};
use crate::ws::WsMessage;

#[derive(Debug, Default, Deserialize)]
pub struct ProjectParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub area_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MilestoneParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<String>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route(
            "/api/projects/{id}/milestones/reorder",
            post(reorder_milestones),
        )
        .route("/api/milestones", get(list_milestones).post(create_milestone))
        .route(
            "/api/milestones/{id}",
            get(get_milestone)
                .patch(update_milestone)
                .delete(delete_milestone),
        )
}

// ── Projects ──────────────────────────────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<ProjectParams>,
) -> ApiResult<impl IntoResponse> {
    let query = ProjectQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
        area_id: non_blank(params.area_id),
        status: parse_filter(params.status.as_deref())?,
    };
    let projects = state.db.call(move |db| db.list_projects(&query)).await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewProject>,
) -> ApiResult<impl IntoResponse> {
    let project = state.db.call(move |db| db.create_project(&req)).await?;
    state
        .audit(
            "project",
            &project.id,
            "created",
            &actor,
            serde_json::to_value(&project).unwrap_or_default(),
        )
        .await;
    state.notify(&WsMessage::changed("project", &project.id, "created"));
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    match state.db.call(move |db| db.get_project(&lookup)).await? {
        Some(project) => Ok(Json(project)),
        None => Err(not_found("Project", &id)),
    }
}

async fn update_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<ProjectPatch>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::to_value(&patch).unwrap_or_default();
    let project = state
        .db
        .call(move |db| db.update_project(&id, &patch))
        .await?;
    state
        .audit("project", &project.id, "updated", &actor, changes)
        .await;
    state.notify(&WsMessage::changed("project", &project.id, "updated"));
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    if !state.db.call(move |db| db.delete_project(&target)).await? {
        return Err(not_found("Project", &id));
    }
    state
        .audit("project", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::changed("project", &id, "deleted"));
    Ok(StatusCode::NO_CONTENT)
}

// ── Milestones ────────────────────────────────────────────────────────

async fn list_milestones(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<MilestoneParams>,
) -> ApiResult<impl IntoResponse> {
    let query = MilestoneQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
        project_id: non_blank(params.project_id),
        status: parse_filter(params.status.as_deref())?,
    };
    let milestones = state.db.call(move |db| db.list_milestones(&query)).await?;
    Ok(Json(milestones))
}

async fn create_milestone(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewMilestone>,
) -> ApiResult<impl IntoResponse> {
    let milestone = state.db.call(move |db| db.create_milestone(&req)).await?;
    let id = milestone.milestone.id.clone();
    state
        .audit(
            "milestone",
            &id,
            "created",
            &actor,
            serde_json::to_value(&milestone.milestone).unwrap_or_default(),
        )
        .await;
    state.notify(&WsMessage::changed("milestone", &id, "created"));
    Ok((StatusCode::CREATED, Json(milestone)))
}

async fn get_milestone(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    match state.db.call(move |db| db.get_milestone(&lookup)).await? {
        Some(milestone) => Ok(Json(milestone)),
        None => Err(not_found("Milestone", &id)),
    }
}

async fn update_milestone(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<MilestonePatch>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::to_value(&patch).unwrap_or_default();
    let target = id.clone();
    let milestone = state
        .db
        .call(move |db| db.update_milestone(&target, &patch))
        .await?;
    state.audit("milestone", &id, "updated", &actor, changes).await;
    state.notify(&WsMessage::changed("milestone", &id, "updated"));
    Ok(Json(milestone))
}

async fn delete_milestone(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    if !state.db.call(move |db| db.delete_milestone(&target)).await? {
        return Err(not_found("Milestone", &id));
    }
    state
        .audit("milestone", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::changed("milestone", &id, "deleted"));
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_milestones(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<ReorderRequest>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::json!({ "ids": req.ids });
    let target = project_id.clone();
    let milestones = state
        .db
        .call(move |db| db.reorder_milestones(&target, &req.ids))
        .await?;
    state
        .audit("project", &project_id, "milestones_reordered", &actor, changes)
        .await;
    state.notify(&WsMessage::changed("milestone", &project_id, "reordered"));
    Ok(Json(milestones))
}
