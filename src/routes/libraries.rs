use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use crate::{
    db,
    error::{validation::validate_name, AppError, AppResult, OptionExt},
    middleware::validation::validate_file_path,
    routes::games::{game_summary_from_row, GAME_SUMMARY_COLUMNS},
    scanner,
    state::AppState,
    types::{CreateLibraryRequest, GameListQuery, GameSummary, LibraryDto, LibraryPlatform, ScanMode},
};

const LIBRARY_SELECT: &str = r#"SELECT l.uuid, l.name, l.platform, l.watch_path, l.auto_scan, l.scan_mode, l.created_at,
       (SELECT COUNT(*) FROM games g WHERE g.library_uuid = l.uuid) AS game_count
FROM libraries l"#;

fn library_from_row(r: &SqliteRow) -> LibraryDto {
    LibraryDto {
        uuid: r.get("uuid"),
        name: r.get("name"),
        platform: r.get("platform"),
        watch_path: r.get("watch_path"),
        auto_scan: r.get::<i64, _>("auto_scan") != 0,
        scan_mode: r.get("scan_mode"),
        created_at: r.get("created_at"),
        game_count: r.get("game_count"),
    }
}

async fn load_library(state: &AppState, uuid: &str) -> AppResult<LibraryDto> {
    let row = sqlx::query(&format!("{} WHERE l.uuid = ?1", LIBRARY_SELECT))
        .bind(uuid)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("library")?;
    Ok(library_from_row(&row))
}

pub async fn list_libraries(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let rows = sqlx::query(&format!("{} ORDER BY l.name", LIBRARY_SELECT)).fetch_all(&state.db).await?;
    Ok(Json(rows.iter().map(library_from_row).collect::<Vec<_>>()))
}

pub async fn get_library(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> AppResult<impl IntoResponse> {
    Ok(Json(load_library(&state, &uuid.to_string()).await?))
}

pub async fn create_library(
    State(state): State<AppState>,
    Json(req): Json<CreateLibraryRequest>,
) -> AppResult<impl IntoResponse> {
    validate_name(&req.name, "name", 128)?;
    let name = req.name.trim().to_string();

    let platform = match req.platform.as_deref() {
        Some(p) => p
            .parse::<LibraryPlatform>()
            .map_err(|message| AppError::ValidationError { field: "platform".into(), message })?,
        None => LibraryPlatform::Pcwin,
    };

    let watch_path = req.watch_path.as_deref().map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);
    if let Some(p) = &watch_path {
        validate_file_path("watch_path", p)?;
        if !tokio::fs::metadata(p).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(AppError::BadRequest(format!("watch_path is not a directory: {}", p)));
        }
    }
    let auto_scan = req.auto_scan.unwrap_or(false);
    if auto_scan && watch_path.is_none() {
        return Err(AppError::ValidationError {
            field: "auto_scan".into(),
            message: "auto_scan requires a watch_path".into(),
        });
    }

    let taken: Option<String> = sqlx::query_scalar("SELECT uuid FROM libraries WHERE name = ?1")
        .bind(&name)
        .fetch_optional(&state.db)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!("a library named '{}' already exists", name)));
    }

    let uuid = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO libraries (uuid, name, platform, watch_path, auto_scan, scan_mode) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&uuid)
    .bind(&name)
    .bind(platform.as_str())
    .bind(watch_path.as_deref())
    .bind(auto_scan as i64)
    .bind(req.scan_mode.unwrap_or(ScanMode::Folders).as_str())
    .execute(&state.db)
    .await?;

    db::log_system_event(&state.db, "library_created", &format!("Library '{}' created", name), "information").await;
    tracing::info!("Created library '{}' ({})", name, uuid);
    Ok((StatusCode::CREATED, Json(load_library(&state, &uuid).await?)))
}

/// Deletes the library and, through the cascades, its games, scan jobs and
/// unmatched folders. Files on disk are left alone.
pub async fn delete_library(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> AppResult<impl IntoResponse> {
    let uuid = uuid.to_string();
    let library = load_library(&state, &uuid).await?;
    if scanner::library_has_running_job(&state, &uuid).await {
        return Err(AppError::Conflict("a scan is running for this library".into()));
    }

    sqlx::query("DELETE FROM libraries WHERE uuid = ?1").bind(&uuid).execute(&state.db).await?;
    db::log_system_event(
        &state.db,
        "library_deleted",
        &format!("Library '{}' deleted with {} games", library.name, library.game_count),
        "warning",
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn library_games(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Query(q): Query<GameListQuery>,
) -> AppResult<impl IntoResponse> {
    let uuid = uuid.to_string();
    load_library(&state, &uuid).await?;

    let limit = q.limit.unwrap_or(100).clamp(1, 500);
    let offset = q.offset.unwrap_or(0).max(0);
    let rows = sqlx::query(&format!(
        "SELECT {} FROM games WHERE library_uuid = ?1 ORDER BY name COLLATE NOCASE LIMIT ?2 OFFSET ?3",
        GAME_SUMMARY_COLUMNS
    ))
    .bind(&uuid)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let games: Vec<GameSummary> = rows.iter().map(game_summary_from_row).collect();
    Ok(Json(games))
}
