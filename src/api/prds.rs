use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{
    ApiError, ApiJson, ApiQuery, ApiResult, RequestActor, SharedState, non_blank, not_found,
    page, parse_filter,
};
use crate::ai::DraftTask;
use crate::errors::BenError;
use crate::prd::{allowed_transitions, extract_requirements};
use crate::store::models::{Prd, PrdQuery, PrdStatus};
use crate::store::{NewPrd, NewTask, PrdPatch};
use crate::ws::WsMessage;

#[derive(Debug, Default, Deserialize)]
pub struct PrdParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: PrdStatus,
}

#[derive(Debug, Serialize)]
pub struct ExtractionResult {
    /// `llm` or `pattern`
    pub extractor: &'static str,
    pub tasks: Vec<DraftTask>,
}

/// Turn extracted drafts into real tasks on a board.
#[derive(Debug, Deserialize)]
pub struct CreateTasksRequest {
    pub board_id: String,
    #[serde(default)]
    pub column_id: Option<String>,
    /// Tasks to create; when absent, the PRD is extracted first.
    #[serde(default)]
    pub tasks: Option<Vec<DraftTask>>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/prds", get(list_prds).post(create_prd))
        .route(
            "/api/prds/{id}",
            get(get_prd).patch(update_prd).delete(delete_prd),
        )
        .route("/api/prds/{id}/status", post(set_status))
        .route("/api/prds/{id}/transitions", get(list_transitions))
        .route("/api/prds/{id}/versions", get(list_versions))
        .route("/api/prds/{id}/versions/{version}", get(get_version))
        .route(
            "/api/prds/{id}/versions/{version}/restore",
            post(restore_version),
        )
        .route("/api/prds/{id}/requirements", get(list_requirements))
        .route("/api/prds/{id}/extract", post(extract_tasks))
        .route("/api/prds/{id}/tasks", post(create_tasks_from_prd))
}

async fn load_prd(state: &SharedState, id: &str) -> ApiResult<Prd> {
    let lookup = id.to_string();
    state
        .db
        .call(move |db| db.get_prd(&lookup))
        .await?
        .ok_or_else(|| not_found("PRD", id))
}

async fn list_prds(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<PrdParams>,
) -> ApiResult<impl IntoResponse> {
    let query = PrdQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
        project_id: non_blank(params.project_id),
        status: parse_filter(params.status.as_deref())?,
    };
    let prds = state.db.call(move |db| db.list_prds(&query)).await?;
    Ok(Json(prds))
}

async fn create_prd(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewPrd>,
) -> ApiResult<impl IntoResponse> {
    let prd = state.db.call(move |db| db.create_prd(&req)).await?;
    state
        .audit(
            "prd",
            &prd.id,
            "created",
            &actor,
            serde_json::json!({ "title": prd.title, "version": prd.version }),
        )
        .await;
    state.notify(&WsMessage::PrdUpdated { prd: prd.clone() });
    Ok((StatusCode::CREATED, Json(prd)))
}

async fn get_prd(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(load_prd(&state, &id).await?))
}

async fn update_prd(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<PrdPatch>,
) -> ApiResult<impl IntoResponse> {
    let changed_fields: Vec<&str> = [
        ("title", patch.title.is_some()),
        ("content", patch.content.is_some()),
        ("sections", patch.sections.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then_some(name))
    .collect();
    let prd = state.db.call(move |db| db.update_prd(&id, &patch)).await?;
    state
        .audit(
            "prd",
            &prd.id,
            "updated",
            &actor,
            serde_json::json!({ "fields": changed_fields, "version": prd.version }),
        )
        .await;
    state.notify(&WsMessage::PrdUpdated { prd: prd.clone() });
    Ok(Json(prd))
}

async fn delete_prd(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    if !state.db.call(move |db| db.delete_prd(&target)).await? {
        return Err(not_found("PRD", &id));
    }
    state
        .audit("prd", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::changed("prd", &id, "deleted"));
    Ok(StatusCode::NO_CONTENT)
}

async fn set_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<StatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let status = req.status;
    let (from, prd) = state
        .db
        .call(move |db| {
            let from = db
                .get_prd(&id)?
                .ok_or_else(|| BenError::not_found("PRD", &id))?
                .status;
            Ok((from, db.set_prd_status(&id, status)?))
        })
        .await?;
    state
        .audit(
            "prd",
            &prd.id,
            "status_changed",
            &actor,
            serde_json::json!({ "from": from, "to": prd.status }),
        )
        .await;
    state.notify(&WsMessage::PrdUpdated { prd: prd.clone() });
    Ok(Json(prd))
}

/// Statuses reachable from the PRD's current status.
async fn list_transitions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let prd = load_prd(&state, &id).await?;
    Ok(Json(serde_json::json!({
        "status": prd.status,
        "allowed": allowed_transitions(prd.status),
    })))
}

async fn list_versions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    load_prd(&state, &id).await?;
    let versions = state
        .db
        .call(move |db| db.list_prd_versions(&id))
        .await?;
    Ok(Json(versions))
}

async fn get_version(
    State(state): State<SharedState>,
    Path((id, version)): Path<(String, i32)>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    match state
        .db
        .call(move |db| db.get_prd_version(&lookup, version))
        .await?
    {
        Some(v) => Ok(Json(v)),
        None => Err(not_found("PRD version", &format!("{}@{}", id, version))),
    }
}

async fn restore_version(
    State(state): State<SharedState>,
    Path((id, version)): Path<(String, i32)>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let prd = state
        .db
        .call(move |db| db.restore_prd_version(&id, version))
        .await?;
    state
        .audit(
            "prd",
            &prd.id,
            "restored",
            &actor,
            serde_json::json!({ "restored_from": version, "version": prd.version }),
        )
        .await;
    state.notify(&WsMessage::PrdUpdated { prd: prd.clone() });
    Ok(Json(prd))
}

async fn list_requirements(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let prd = load_prd(&state, &id).await?;
    Ok(Json(extract_requirements(&prd)))
}

async fn extract_tasks(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let prd = load_prd(&state, &id).await?;
    let tasks = state.extractor.extract(&prd).await?;
    tracing::info!(prd_id = %prd.id, count = tasks.len(), extractor = state.extractor.name(), "Extracted tasks from PRD");
    Ok(Json(ExtractionResult {
        extractor: state.extractor.name(),
        tasks,
    }))
}

async fn create_tasks_from_prd(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<CreateTasksRequest>,
) -> ApiResult<impl IntoResponse> {
    let prd = load_prd(&state, &id).await?;
    let drafts = match req.tasks {
        Some(tasks) => tasks,
        None => state.extractor.extract(&prd).await?,
    };
    if drafts.is_empty() {
        return Err(ApiError::BadRequest("PRD has no requirements to turn into tasks".into()));
    }

    let board_id = req.board_id;
    let column_id = req.column_id;
    let prd_id = prd.id.clone();
    let project_id = prd.project_id.clone();
    let tasks = state
        .db
        .call(move |db| {
            let board = db
                .get_board(&board_id)?
                .ok_or_else(|| BenError::validation(format!("board_id {} does not exist", board_id)))?;
            if board.project_id != project_id {
                return Err(BenError::validation("Board belongs to a different project").into());
            }
            let inputs: Vec<NewTask> = drafts
                .into_iter()
                .map(|draft| NewTask {
                    board_id: board_id.clone(),
                    title: draft.title,
                    description: draft.description,
                    column_id: column_id.clone(),
                    priority: Some(draft.priority),
                    prd_id: Some(prd_id.clone()),
                    ..Default::default()
                })
                .collect();
            db.create_tasks(&inputs)
        })
        .await?;

    state
        .audit(
            "prd",
            &prd.id,
            "tasks_created",
            &actor,
            serde_json::json!({ "task_ids": tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>() }),
        )
        .await;
    for task in &tasks {
        state.notify(&WsMessage::TaskCreated { task: task.clone() });
    }
    Ok((StatusCode::CREATED, Json(tasks)))
}
