use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::Deserialize;

use super::areas::ReorderRequest;
use super::{
    ApiJson, ApiQuery, ApiResult, RequestActor, SharedState, non_blank, not_found, page,
    parse_filter,
};
use crate::board::TaskFilter;
use crate::store::models::{BoardQuery, SubtaskQuery, TaskQuery};
use crate::store::{BoardPatch, NewBoard, NewSubtask, NewTask, SubtaskPatch, TaskPatch};
use crate::ws::WsMessage;

#[derive(Debug, Default, Deserialize)]
pub struct BoardParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BoardViewParams {
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub milestone_id: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub board_id: Option<String>,
    pub column_id: Option<String>,
    pub priority: Option<String>,
    pub milestone_id: Option<String>,
    pub prd_id: Option<String>,
    pub assignee: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubtaskParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewColumnRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameColumnRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveTaskRequest {
    pub column_id: String,
    pub position: usize,
}

#[derive(Debug, Deserialize)]
pub struct NewSubtaskRequest {
    pub title: String,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/boards", get(list_boards).post(create_board))
        .route(
            "/api/boards/{id}",
            get(get_board).patch(update_board).delete(delete_board),
        )
        .route("/api/boards/{id}/view", get(board_view))
        .route("/api/boards/{id}/columns", post(add_column))
        .route("/api/boards/{id}/columns/reorder", post(reorder_columns))
        .route(
            "/api/boards/{id}/columns/{column_id}",
            patch(rename_column).delete(delete_column),
        )
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", post(move_task))
        .route(
            "/api/tasks/{id}/subtasks",
            get(list_subtasks).post(create_subtask),
        )
        .route("/api/tasks/{id}/subtasks/reorder", post(reorder_subtasks))
        .route(
            "/api/subtasks/{id}",
            get(get_subtask).patch(update_subtask).delete(delete_subtask),
        )
}

// ── Boards ────────────────────────────────────────────────────────────

async fn list_boards(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<BoardParams>,
) -> ApiResult<impl IntoResponse> {
    let query = BoardQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
        project_id: non_blank(params.project_id),
    };
    let boards = state.db.call(move |db| db.list_boards(&query)).await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewBoard>,
) -> ApiResult<impl IntoResponse> {
    let board = state.db.call(move |db| db.create_board(&req)).await?;
    state
        .audit(
            "board",
            &board.id,
            "created",
            &actor,
            serde_json::to_value(&board).unwrap_or_default(),
        )
        .await;
    state.notify(&WsMessage::BoardUpdated {
        board: board.clone(),
    });
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    match state.db.call(move |db| db.get_board(&lookup)).await? {
        Some(board) => Ok(Json(board)),
        None => Err(not_found("Board", &id)),
    }
}

async fn update_board(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<BoardPatch>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::to_value(&patch).unwrap_or_default();
    let board = state.db.call(move |db| db.update_board(&id, &patch)).await?;
    state.audit("board", &board.id, "updated", &actor, changes).await;
    state.notify(&WsMessage::BoardUpdated {
        board: board.clone(),
    });
    Ok(Json(board))
}

async fn delete_board(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    if !state.db.call(move |db| db.delete_board(&target)).await? {
        return Err(not_found("Board", &id));
    }
    state
        .audit("board", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::changed("board", &id, "deleted"));
    Ok(StatusCode::NO_CONTENT)
}

/// Board with cards bucketed per column, optionally filtered.
async fn board_view(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<BoardViewParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = TaskFilter {
        priority: parse_filter(params.priority.as_deref())?,
        assignee: non_blank(params.assignee),
        milestone_id: non_blank(params.milestone_id),
        search: non_blank(params.search),
    };
    let view = state.db.call(move |db| db.board_view(&id, &filter)).await?;
    Ok(Json(view))
}

// ── Columns ───────────────────────────────────────────────────────────

async fn add_column(
    State(state): State<SharedState>,
    Path(board_id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewColumnRequest>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::json!({ "id": req.id, "name": req.name });
    let board = state
        .db
        .call(move |db| db.add_column(&board_id, req.id.as_deref(), &req.name))
        .await?;
    state
        .audit("board", &board.id, "column_added", &actor, changes)
        .await;
    state.notify(&WsMessage::BoardUpdated {
        board: board.clone(),
    });
    Ok((StatusCode::CREATED, Json(board)))
}

async fn rename_column(
    State(state): State<SharedState>,
    Path((board_id, column_id)): Path<(String, String)>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<RenameColumnRequest>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::json!({ "column_id": column_id, "name": req.name });
    let board = state
        .db
        .call(move |db| db.rename_column(&board_id, &column_id, &req.name))
        .await?;
    state
        .audit("board", &board.id, "column_renamed", &actor, changes)
        .await;
    state.notify(&WsMessage::BoardUpdated {
        board: board.clone(),
    });
    Ok(Json(board))
}

async fn delete_column(
    State(state): State<SharedState>,
    Path((board_id, column_id)): Path<(String, String)>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = column_id.clone();
    let (board, removed) = state
        .db
        .call(move |db| db.delete_column(&board_id, &target))
        .await?;
    state
        .audit(
            "board",
            &board.id,
            "column_removed",
            &actor,
            serde_json::json!({ "column_id": column_id, "removed_tasks": removed }),
        )
        .await;
    for task_id in &removed {
        state.notify(&WsMessage::TaskDeleted {
            task_id: task_id.clone(),
            board_id: board.id.clone(),
        });
    }
    state.notify(&WsMessage::BoardUpdated {
        board: board.clone(),
    });
    Ok(Json(board))
}

async fn reorder_columns(
    State(state): State<SharedState>,
    Path(board_id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<ReorderRequest>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::json!({ "ids": req.ids });
    let board = state
        .db
        .call(move |db| db.reorder_columns(&board_id, &req.ids))
        .await?;
    state
        .audit("board", &board.id, "columns_reordered", &actor, changes)
        .await;
    state.notify(&WsMessage::BoardUpdated {
        board: board.clone(),
    });
    Ok(Json(board))
}

// ── Tasks ─────────────────────────────────────────────────────────────

async fn list_tasks(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<TaskParams>,
) -> ApiResult<impl IntoResponse> {
    let query = TaskQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
        board_id: non_blank(params.board_id),
        column_id: non_blank(params.column_id),
        priority: parse_filter(params.priority.as_deref())?,
        milestone_id: non_blank(params.milestone_id),
        prd_id: non_blank(params.prd_id),
        assignee: non_blank(params.assignee),
    };
    let tasks = state.db.call(move |db| db.list_tasks(&query)).await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewTask>,
) -> ApiResult<impl IntoResponse> {
    let task = state.db.call(move |db| db.create_task(&req)).await?;
    state
        .audit(
            "task",
            &task.id,
            "created",
            &actor,
            serde_json::to_value(&task).unwrap_or_default(),
        )
        .await;
    state.notify(&WsMessage::TaskCreated { task: task.clone() });
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    match state.db.call(move |db| db.get_task(&lookup)).await? {
        Some(task) => Ok(Json(task)),
        None => Err(not_found("Task", &id)),
    }
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<TaskPatch>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::to_value(&patch).unwrap_or_default();
    let task = state.db.call(move |db| db.update_task(&id, &patch)).await?;
    state.audit("task", &task.id, "updated", &actor, changes).await;
    state.notify(&WsMessage::TaskUpdated { task: task.clone() });
    Ok(Json(task))
}

async fn move_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<MoveTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let (from_column, task) = state
        .db
        .call(move |db| {
            let from_column = db
                .get_task(&id)?
                .map(|t| t.column_id)
                .unwrap_or_default();
            let task = db.move_task(&id, &req.column_id, req.position)?;
            Ok((from_column, task))
        })
        .await?;
    state
        .audit(
            "task",
            &task.id,
            "moved",
            &actor,
            serde_json::json!({
                "from_column": from_column,
                "to_column": task.column_id,
                "position": task.position,
            }),
        )
        .await;
    state.notify(&WsMessage::TaskMoved {
        task_id: task.id.clone(),
        board_id: task.board_id.clone(),
        from_column,
        to_column: task.column_id.clone(),
        position: task.position,
    });
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    let deleted = state
        .db
        .call(move |db| {
            let task = db.get_task(&target)?;
            db.delete_task(&target)?;
            Ok(task)
        })
        .await?;
    let Some(task) = deleted else {
        return Err(not_found("Task", &id));
    };
    state
        .audit("task", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::TaskDeleted {
        task_id: id,
        board_id: task.board_id,
    });
    Ok(StatusCode::NO_CONTENT)
}

// ── Subtasks ──────────────────────────────────────────────────────────

async fn list_subtasks(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    ApiQuery(params): ApiQuery<SubtaskParams>,
) -> ApiResult<impl IntoResponse> {
    let query = SubtaskQuery {
        page: page(params.limit, params.offset)?,
        search: non_blank(params.search),
    };
    let subtasks = state
        .db
        .call(move |db| db.list_subtasks(&task_id, &query))
        .await?;
    Ok(Json(subtasks))
}

async fn create_subtask(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<NewSubtaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let input = NewSubtask {
        task_id,
        title: req.title,
    };
    let subtask = state.db.call(move |db| db.create_subtask(&input)).await?;
    state
        .audit(
            "subtask",
            &subtask.id,
            "created",
            &actor,
            serde_json::to_value(&subtask).unwrap_or_default(),
        )
        .await;
    state.notify(&WsMessage::changed("subtask", &subtask.id, "created"));
    Ok((StatusCode::CREATED, Json(subtask)))
}

async fn get_subtask(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lookup = id.clone();
    match state.db.call(move |db| db.get_subtask(&lookup)).await? {
        Some(subtask) => Ok(Json(subtask)),
        None => Err(not_found("Subtask", &id)),
    }
}

async fn update_subtask(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(patch): ApiJson<SubtaskPatch>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::to_value(&patch).unwrap_or_default();
    let subtask = state
        .db
        .call(move |db| db.update_subtask(&id, &patch))
        .await?;
    state
        .audit("subtask", &subtask.id, "updated", &actor, changes)
        .await;
    state.notify(&WsMessage::changed("subtask", &subtask.id, "updated"));
    Ok(Json(subtask))
}

async fn delete_subtask(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let target = id.clone();
    if !state.db.call(move |db| db.delete_subtask(&target)).await? {
        return Err(not_found("Subtask", &id));
    }
    state
        .audit("subtask", &id, "deleted", &actor, serde_json::json!({}))
        .await;
    state.notify(&WsMessage::changed("subtask", &id, "deleted"));
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_subtasks(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    RequestActor(actor): RequestActor,
    ApiJson(req): ApiJson<ReorderRequest>,
) -> ApiResult<impl IntoResponse> {
    let changes = serde_json::json!({ "ids": req.ids });
    let target = task_id.clone();
    let subtasks = state
        .db
        .call(move |db| db.reorder_subtasks(&target, &req.ids))
        .await?;
    state
        .audit("task", &task_id, "subtasks_reordered", &actor, changes)
        .await;
    state.notify(&WsMessage::changed("subtask", &task_id, "reordered"));
    Ok(Json(subtasks))
}
