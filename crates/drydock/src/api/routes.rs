//! API route definitions.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ws::ws_handler;

use super::handlers;
use super::state::AppState;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Projects
        .route(
            "/api/projects",
            post(handlers::create_project).get(handlers::list_projects),
        )
        .route(
            "/api/projects/{id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        // Files
        .route(
            "/api/projects/{id}/file",
            get(handlers::read_file).put(handlers::write_file),
        )
        .route("/api/projects/{id}/files", get(handlers::list_files))
        // Container exec
        .route("/api/projects/{id}/exec", post(handlers::exec_in_container))
        // Terminals
        .route("/api/projects/{id}/terminals", post(handlers::open_terminal))
        .route("/api/terminals/{sid}/input", post(handlers::terminal_input))
        .route("/api/terminals/{sid}/resize", post(handlers::terminal_resize))
        .route(
            "/api/terminals/{sid}/interrupt",
            post(handlers::terminal_interrupt),
        )
        .route("/api/terminals/{sid}/clear", post(handlers::terminal_clear))
        .route("/api/terminals/{sid}", delete(handlers::kill_terminal))
        // Agent
        .route(
            "/api/projects/{id}/agent/execute",
            post(handlers::agent_execute),
        )
        .route(
            "/api/projects/{id}/agent/session",
            post(handlers::agent_start_session).delete(handlers::agent_stop_session),
        )
        .route(
            "/api/projects/{id}/agent/message",
            post(handlers::agent_send_message),
        )
        // Health + events
        .route("/api/health", get(handlers::health))
        .route("/api/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
