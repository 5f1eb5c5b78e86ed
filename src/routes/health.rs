use std::fmt::Write;

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Liveness
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness: the database must answer within 5s
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

// Prometheus text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let series: [(&str, &str, &str, u64); 10] = [
        ("scans_started", "counter", "Scan jobs started", m.scans_started as u64),
        ("scans_completed", "counter", "Scan jobs completed", m.scans_completed as u64),
        ("scans_failed", "counter", "Scan jobs failed", m.scans_failed as u64),
        ("games_added", "counter", "Games added by scans", m.games_added),
        ("unmatched_found", "counter", "Folders without a metadata match", m.unmatched_found),
        ("downloads_prepared", "counter", "Download requests made available", m.downloads_prepared),
        ("downloads_failed", "counter", "Download requests failed", m.downloads_failed),
        ("bytes_packaged", "counter", "Bytes written into download archives", m.bytes_packaged),
        ("images_downloaded", "counter", "Cover and screenshot images stored", m.images_downloaded),
        ("uptime_seconds", "gauge", "Uptime seconds", m.uptime_seconds),
    ];

    let mut body = String::new();
    for (name, kind, help, value) in series {
        let _ = writeln!(body, "# HELP sharewarez_{name} {help}");
        let _ = writeln!(body, "# TYPE sharewarez_{name} {kind}");
        let _ = writeln!(body, "sharewarez_{name} {value}");
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
