//! Request handlers: thin glue forwarding to the managers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentHealth, AgentSessionInfo};
use crate::project::{CreateProjectRequest, FileEntry, Project};
use crate::pty::TerminalInfo;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

// ============================================================================
// Projects
// ============================================================================

/// POST /api/projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("project name cannot be empty"));
    }
    let project = state.projects.create(request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects
pub async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    Json(state.projects.list())
}

/// GET /api/projects/{id}
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.projects.get(&project_id).await?))
}

/// DELETE /api/projects/{id}
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.projects.remove(&project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

/// GET /api/projects/{id}/file?path=...
pub async fn read_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileContentResponse>> {
    let content = state.projects.read_file(&project_id, &query.path).await?;
    Ok(Json(FileContentResponse {
        path: query.path,
        content,
    }))
}

/// PUT /api/projects/{id}/file
pub async fn write_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<WriteFileRequest>,
) -> ApiResult<StatusCode> {
    state
        .projects
        .write_file(&project_id, &request.path, &request.content)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/projects/{id}/files?path=...
pub async fn list_files(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Vec<FileEntry>>> {
    Ok(Json(
        state.projects.list_files(&project_id, &query.path).await?,
    ))
}

// ============================================================================
// Container exec
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub output: String,
}

/// POST /api/projects/{id}/exec
pub async fn exec_in_container(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> ApiResult<Json<ExecResponse>> {
    let output = state.projects.exec(&project_id, &request.command).await?;
    Ok(Json(ExecResponse { output }))
}

// ============================================================================
// Terminals
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct OpenTerminalRequest {
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TerminalInputRequest {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct TerminalResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// POST /api/projects/{id}/terminals
pub async fn open_terminal(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    request: Option<Json<OpenTerminalRequest>>,
) -> ApiResult<(StatusCode, Json<TerminalInfo>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let working_dir = state
        .projects
        .session_working_dir(&project_id, request.working_dir.as_deref())
        .await?;
    let info = state.ptys.open(&project_id, &working_dir).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// POST /api/terminals/{sid}/input
pub async fn terminal_input(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<TerminalInputRequest>,
) -> Json<OkResponse> {
    Json(OkResponse {
        ok: state.ptys.write(&session_id, request.data.as_bytes()),
    })
}

/// POST /api/terminals/{sid}/resize
pub async fn terminal_resize(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<TerminalResizeRequest>,
) -> Json<OkResponse> {
    Json(OkResponse {
        ok: state.ptys.resize(&session_id, request.cols, request.rows),
    })
}

/// POST /api/terminals/{sid}/interrupt
pub async fn terminal_interrupt(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<OkResponse> {
    Json(OkResponse {
        ok: state.ptys.interrupt(&session_id),
    })
}

/// POST /api/terminals/{sid}/clear
pub async fn terminal_clear(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<OkResponse> {
    Json(OkResponse {
        ok: state.ptys.clear(&session_id),
    })
}

#[derive(Debug, Serialize)]
pub struct KillTerminalResponse {
    pub killed: bool,
}

/// DELETE /api/terminals/{sid}
///
/// Killing an already-gone session succeeds: the flag reports whether a
/// live session was found.
pub async fn kill_terminal(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<KillTerminalResponse> {
    Json(KillTerminalResponse {
        killed: state.ptys.kill(&session_id),
    })
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AgentExecuteRequest {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub interactive: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentExecuteResponse {
    pub output: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentSessionRequest {
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AgentMessageResponse {
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentStopResponse {
    pub stopped: bool,
}

/// POST /api/projects/{id}/agent/execute
pub async fn agent_execute(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<AgentExecuteRequest>,
) -> ApiResult<Json<AgentExecuteResponse>> {
    let working_dir = state
        .projects
        .session_working_dir(&project_id, request.working_dir.as_deref())
        .await?;
    let output = state
        .agent
        .execute(&project_id, &request.command, &working_dir, request.interactive)
        .await?;
    Ok(Json(AgentExecuteResponse { output }))
}

/// POST /api/projects/{id}/agent/session
pub async fn agent_start_session(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    request: Option<Json<AgentSessionRequest>>,
) -> ApiResult<(StatusCode, Json<AgentSessionInfo>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let working_dir = state
        .projects
        .session_working_dir(&project_id, request.working_dir.as_deref())
        .await?;
    let info = state
        .agent
        .start_interactive_session(&project_id, &working_dir)
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// POST /api/projects/{id}/agent/message
pub async fn agent_send_message(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<AgentMessageRequest>,
) -> Json<AgentMessageResponse> {
    Json(AgentMessageResponse {
        delivered: state.agent.send_to_session(&project_id, &request.message).await,
    })
}

/// DELETE /api/projects/{id}/agent/session
pub async fn agent_stop_session(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<AgentStopResponse> {
    Json(AgentStopResponse {
        stopped: state.agent.terminate_session(&project_id).await,
    })
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent: AgentHealth,
    pub container_runtime: bool,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let agent = state.agent.health_check().await;
    let container_runtime = state.runtime.health_check().await.is_ok();
    Json(HealthResponse {
        status: "ok",
        agent,
        container_runtime,
    })
}
