//! HTTP route handlers for the SharewareZ API.
//!
//! - `health`: liveness, readiness, metrics and version
//! - `libraries`: library CRUD and per-library game listing
//! - `games`: game detail and removal
//! - `downloads`: download requests and file delivery
//! - `scans`: scan jobs, their progress stream and unmatched folders
//! - `unmatched`: triage of folders the scanner could not match
//! - `igdb`: metadata search
//! - `names`: the folder-name cleaning heuristic

pub mod downloads;
pub mod games;
pub mod health;
pub mod igdb;
pub mod libraries;
pub mod names;
pub mod scans;
pub mod unmatched;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::services::ServeDir;

use crate::middleware;
use crate::state::AppState;

/// Builds the API router with auth, validation and security headers applied.
/// Transport layers (compression, tracing, CORS, global rate limit) are added
/// by the binary.
pub fn router(state: AppState) -> Router {
    let cfg = state.config.clone();
    let images = ServeDir::new(&state.config.images.dir);

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .route("/libraries", get(libraries::list_libraries).post(libraries::create_library))
        .route("/libraries/{uuid}", get(libraries::get_library).delete(libraries::delete_library))
        .route("/libraries/{uuid}/games", get(libraries::library_games))
        .route("/games/{uuid}", get(games::get_game).delete(games::delete_game))
        .route("/games/{uuid}/download", post(downloads::request_download))
        .route("/downloads", get(downloads::list_downloads))
        .route("/downloads/{id}", get(downloads::get_download).delete(downloads::delete_download))
        .route("/downloads/{id}/file", get(downloads::download_file))
        .route("/scans", post(scans::create_scan).get(scans::list_scans))
        .route("/scans/{id}", get(scans::get_scan).delete(scans::cancel_scan))
        .route("/scans/{id}/events", get(scans::scan_events))
        .route("/scans/{id}/unmatched", get(scans::scan_unmatched))
        .route("/unmatched/{id}", patch(unmatched::update_unmatched))
        .route("/unmatched/{id}/match", post(unmatched::match_unmatched))
        .route("/igdb/search", get(igdb::search_igdb))
        .route("/names/clean", get(names::clean_name))
        .nest_service("/images", images)
        .with_state(state)
        .layer(DefaultBodyLimit::max(middleware::validation::max_body_size()))
        .layer(from_fn(middleware::validation::validate_request_middleware))
        .layer(from_fn_with_state(cfg.clone(), middleware::auth::auth_middleware))
        .layer(from_fn_with_state(cfg, middleware::security_headers::security_headers_middleware))
}
