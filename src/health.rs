use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let sessions = state.registry.summary();

    let session_usage = if sessions.max_sessions > 0 {
        sessions.active_sessions as f64 / sessions.max_sessions as f64
    } else {
        0.0
    };

    let load_status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "streamscribe",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "active_sessions": sessions.active_sessions
        },
        "system": {
            "status": load_status,
            "session_usage_percent": (session_usage * 100.0).round(),
            "max_sessions": sessions.max_sessions
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let sessions = state.registry.summary();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            }
        },
        "sessions": {
            "active": sessions.active_sessions,
            "max": sessions.max_sessions,
            "by_status": sessions.status_counts,
            "total_frames": sessions.total_frames,
            "total_bytes": sessions.total_bytes
        },
        "audio": {
            "sample_rate": config.audio.sample_rate,
            "sample_format": config.audio.sample_format.as_str(),
            "channels": config.audio.channels
        }
    }))
}
