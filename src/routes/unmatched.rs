use std::path::PathBuf;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::Row;

use crate::{
    db,
    error::{AppError, AppResult, OptionExt},
    middleware::ip::MaybeRemoteAddr,
    routes::{games::load_game_detail, scans::unmatched_from_row},
    scanner::{catalog, dir_size},
    state::AppState,
    types::{MatchUnmatchedRequest, UnmatchedStatus, UpdateUnmatchedRequest},
};

const UNMATCHED_SELECT: &str =
    "SELECT id, library_uuid, scan_job_id, folder_path, cleaned_name, status, failed_time FROM unmatched_folders";

/// Moves an unmatched folder between `Unmatched` and `Ignore`. Ignored
/// folders are skipped by later scans.
pub async fn update_unmatched(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUnmatchedRequest>,
) -> AppResult<impl IntoResponse> {
    if req.status == UnmatchedStatus::Duplicate {
        return Err(AppError::ValidationError {
            field: "status".into(),
            message: "status must be Unmatched or Ignore".into(),
        });
    }
    let updated = sqlx::query("UPDATE unmatched_folders SET status = ?1 WHERE id = ?2")
        .bind(req.status.as_str())
        .bind(id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(AppError::NotFound("unmatched folder not found".into()));
    }

    let row = sqlx::query(&format!("{} WHERE id = ?1", UNMATCHED_SELECT)).bind(id).fetch_one(&state.db).await?;
    Ok(Json(unmatched_from_row(&row)))
}

/// Resolves an unmatched folder by hand: fetches the given IGDB entry and
/// catalogues the folder as that game.
pub async fn match_unmatched(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<MatchUnmatchedRequest>,
) -> AppResult<impl IntoResponse> {
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/unmatched/match", ip).await?;

    if req.igdb_id <= 0 {
        return Err(AppError::ValidationError { field: "igdb_id".into(), message: "must be positive".into() });
    }
    let metadata = state
        .metadata
        .clone()
        .ok_or_else(|| AppError::ServiceUnavailable("IGDB credentials are not configured".into()))?;

    let row = sqlx::query("SELECT library_uuid, folder_path FROM unmatched_folders WHERE id = ?1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("unmatched folder")?;
    let library_uuid: String = row.get("library_uuid");
    let folder_path: String = row.get("folder_path");

    if catalog::game_exists_at(&state.db, &folder_path).await? {
        return Err(AppError::Conflict(format!("a game already exists at {}", folder_path)));
    }
    let path = PathBuf::from(&folder_path);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::NotFound(format!("folder no longer exists: {}", folder_path)));
    }

    let meta = metadata.fetch_by_id(req.igdb_id).await?;
    let size = tokio::task::spawn_blocking(move || dir_size(&path))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("size task failed: {}", e)))?;

    let game_uuid = catalog::create_game(&state.db, &library_uuid, &meta.name, &folder_path, size, Some(&meta)).await?;
    state.metrics.inc_games_added();
    db::log_system_event(
        &state.db,
        "game_matched",
        &format!("Matched {} to IGDB {} ({})", folder_path, meta.igdb_id, meta.name),
        "information",
    )
    .await;

    Ok((StatusCode::CREATED, Json(load_game_detail(&state, &game_uuid).await?)))
}
