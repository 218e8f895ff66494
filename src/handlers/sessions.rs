use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// List every active session with its ingest counters and queue backlog.
pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.registry.session_infos();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "sessions": sessions
    }))
}
