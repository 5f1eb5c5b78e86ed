use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::{sqlite::SqliteRow, Row};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, OptionExt},
    middleware::ip::MaybeRemoteAddr,
    packaging::{prepare_download, remove_prepared_zip, DownloadContext},
    state::AppState,
    types::{CreateDownloadRequest, DownloadRequestDto, DownloadStatus},
};

const DOWNLOAD_SELECT: &str = r#"SELECT d.id, d.game_uuid, g.name AS game_name, d.user_id, d.status, d.is_direct,
       d.file_size, d.error_message, d.request_time, d.completion_time
FROM download_requests d JOIN games g ON g.uuid = d.game_uuid"#;

fn download_from_row(r: &SqliteRow) -> DownloadRequestDto {
    DownloadRequestDto {
        id: r.get("id"),
        game_uuid: r.get("game_uuid"),
        game_name: r.get("game_name"),
        user_id: r.get("user_id"),
        status: r.get("status"),
        is_direct: r.get::<i64, _>("is_direct") != 0,
        file_size: r.get("file_size"),
        error_message: r.get("error_message"),
        request_time: r.get("request_time"),
        completion_time: r.get("completion_time"),
    }
}

async fn load_download(state: &AppState, id: i64) -> AppResult<DownloadRequestDto> {
    let row = sqlx::query(&format!("{} WHERE d.id = ?1", DOWNLOAD_SELECT))
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("download request")?;
    Ok(download_from_row(&row))
}

/// Requests a download of a game.
///
/// An open request (pending, processing or available) for the same game and
/// user is returned as is. Otherwise a new request is queued and prepared in
/// the background; poll `GET /downloads/{id}` until it is `available`.
pub async fn request_download(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Path(game_uuid): Path<Uuid>,
    Query(req): Query<CreateDownloadRequest>,
) -> AppResult<Response> {
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/games/download", ip).await?;

    let game_uuid = game_uuid.to_string();
    let exists: Option<String> = sqlx::query_scalar("SELECT uuid FROM games WHERE uuid = ?1")
        .bind(&game_uuid)
        .fetch_optional(&state.db)
        .await?;
    exists.ok_or_not_found("game")?;

    if let Some(user_id) = req.user_id {
        let user: Option<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = ?1").bind(user_id).fetch_optional(&state.db).await?;
        user.ok_or_not_found("user")?;
    }

    let open: Option<i64> = sqlx::query_scalar(
        r#"SELECT id FROM download_requests
           WHERE game_uuid = ?1 AND user_id IS ?2 AND status IN ('pending', 'processing', 'available')
           ORDER BY id DESC LIMIT 1"#,
    )
    .bind(&game_uuid)
    .bind(req.user_id)
    .fetch_optional(&state.db)
    .await?;
    if let Some(id) = open {
        return Ok((StatusCode::OK, Json(load_download(&state, id).await?)).into_response());
    }

    let id = sqlx::query("INSERT INTO download_requests (user_id, game_uuid, status) VALUES (?1, ?2, ?3)")
        .bind(req.user_id)
        .bind(&game_uuid)
        .bind(DownloadStatus::Pending.as_str())
        .execute(&state.db)
        .await?
        .last_insert_rowid();
    let dto = load_download(&state, id).await?;

    let ctx = DownloadContext::from_state(&state);
    tokio::spawn(async move {
        if let Err(e) = prepare_download(&ctx, id).await {
            tracing::warn!("Download {} could not be prepared: {:#}", id, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(dto)).into_response())
}

pub async fn list_downloads(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let rows = sqlx::query(&format!("{} ORDER BY d.id DESC", DOWNLOAD_SELECT)).fetch_all(&state.db).await?;
    Ok(Json(rows.iter().map(download_from_row).collect::<Vec<_>>()))
}

pub async fn get_download(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<impl IntoResponse> {
    Ok(Json(load_download(&state, id).await?))
}

/// Deletes a request and its prepared archive. Requests still being packaged
/// cannot be deleted.
pub async fn delete_download(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<impl IntoResponse> {
    let row: Option<(String, Option<String>, i64)> =
        sqlx::query_as("SELECT status, zip_file_path, is_direct FROM download_requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
    let (status, zip_path, is_direct) = row.ok_or_not_found("download request")?;
    if status == DownloadStatus::Processing.as_str() {
        return Err(AppError::Conflict("download is still being prepared".into()));
    }

    sqlx::query("DELETE FROM download_requests WHERE id = ?1").bind(id).execute(&state.db).await?;

    if let (Some(zip), 0) = (zip_path, is_direct) {
        // Another request may still point at the same archive
        let shared: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_requests WHERE zip_file_path = ?1")
            .bind(&zip)
            .fetch_one(&state.db)
            .await?;
        if shared == 0 {
            let save_path = PathBuf::from(&state.config.downloads.zip_save_path);
            match remove_prepared_zip(&save_path, std::path::Path::new(&zip)) {
                Ok(true) => tracing::info!("Removed archive {}", zip),
                Ok(false) => {}
                Err(e) => tracing::warn!("Could not remove archive {}: {}", zip, e),
            }
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Streams the prepared file of an `available` request.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    req: Request,
) -> AppResult<Response> {
    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT status, zip_file_path FROM download_requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
    let (status, path) = row.ok_or_not_found("download request")?;
    if status != DownloadStatus::Available.as_str() {
        return Err(AppError::Conflict(format!("download is {}, not available", status)));
    }
    let path = path.map(PathBuf::from).ok_or_else(|| AppError::Internal(anyhow::anyhow!("available download {} has no file", id)))?;
    if !tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
        return Err(AppError::NotFound(format!("download file is gone: {}", path.display())));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| format!("download-{}", id));
    let mut res = match ServeFile::new(&path).oneshot(req).await {
        Ok(r) => r.map(Body::new),
        Err(never) => match never {},
    };
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        res.headers_mut().insert(header::CONTENT_DISPOSITION, v);
    }
    Ok(res)
}
