use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use futures::Stream;
use serde_json::json;
use sqlx::{sqlite::SqliteRow, Row};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, OptionExt},
    middleware::ip::MaybeRemoteAddr,
    middleware::validation::validate_file_path,
    scanner,
    state::AppState,
    types::{CreateScanRequest, ScanJobDto, ScanJobStatus, UnmatchedFolderDto},
};

const SCAN_COLUMNS: &str = "id, library_uuid, folder_path, scan_mode, status, remove_missing, total_folders, \
     folders_success, folders_failed, removed_count, error_message, created_at, finished_at";

fn scan_from_row(r: &SqliteRow) -> AppResult<ScanJobDto> {
    let id: String = r.get("id");
    Ok(ScanJobDto {
        id: Uuid::parse_str(&id).map_err(|e| AppError::Internal(anyhow::anyhow!("bad scan id {}: {}", id, e)))?,
        library_uuid: r.get("library_uuid"),
        folder_path: r.get("folder_path"),
        scan_mode: r.get("scan_mode"),
        status: r.get("status"),
        remove_missing: r.get::<i64, _>("remove_missing") != 0,
        total_folders: r.get("total_folders"),
        folders_success: r.get("folders_success"),
        folders_failed: r.get("folders_failed"),
        removed_count: r.get("removed_count"),
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
        finished_at: r.get("finished_at"),
    })
}

pub(crate) fn unmatched_from_row(r: &SqliteRow) -> UnmatchedFolderDto {
    UnmatchedFolderDto {
        id: r.get("id"),
        library_uuid: r.get("library_uuid"),
        scan_job_id: r.get("scan_job_id"),
        folder_path: r.get("folder_path"),
        cleaned_name: r.get("cleaned_name"),
        status: r.get("status"),
        failed_time: r.get("failed_time"),
    }
}

pub async fn create_scan(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Json(req): Json<CreateScanRequest>,
) -> AppResult<impl IntoResponse> {
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/scans", ip).await?;

    let library_uuid = Uuid::parse_str(req.library_uuid.trim())
        .map_err(|_| AppError::ValidationError {
            field: "library_uuid".into(),
            message: "must be a UUID".into(),
        })?
        .to_string();
    if let Some(folder) = &req.folder_path {
        validate_file_path("folder_path", folder)?;
    }

    let resp = scanner::start_scan_job(
        &state,
        &library_uuid,
        req.folder_path.clone(),
        req.scan_mode,
        req.remove_missing.unwrap_or(false),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct ScanListQuery {
    pub library_uuid: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_scans(
    State(state): State<AppState>,
    Query(q): Query<ScanListQuery>,
) -> AppResult<impl IntoResponse> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let rows = match q.library_uuid.as_deref() {
        Some(lib) => {
            sqlx::query(&format!(
                "SELECT {} FROM scan_jobs WHERE library_uuid = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                SCAN_COLUMNS
            ))
            .bind(lib)
            .bind(limit)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query(&format!("SELECT {} FROM scan_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1", SCAN_COLUMNS))
                .bind(limit)
                .fetch_all(&state.db)
                .await?
        }
    };
    let items = rows.iter().map(scan_from_row).collect::<AppResult<Vec<_>>>()?;
    Ok(Json(items))
}

pub async fn get_scan(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<impl IntoResponse> {
    let r = sqlx::query(&format!("SELECT {} FROM scan_jobs WHERE id = ?1", SCAN_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("scan")?;
    Ok(Json(scan_from_row(&r)?))
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct CancelQuery {
    pub purge: Option<bool>,
}

/// Cancels a running scan. With `?purge=true` a finished scan's row is
/// deleted instead; purging a running scan is refused.
pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<CancelQuery>,
) -> AppResult<impl IntoResponse> {
    let purge = q.purge.unwrap_or(false);

    let running = {
        let jobs = state.jobs.read().await;
        jobs.get(&id).map(|h| h.cancel.clone())
    };
    if let Some(cancel) = running {
        if purge {
            return Err(AppError::Conflict("cancel the scan before purging it".into()));
        }
        // The job task records the cancelled status and drops its handle
        cancel.cancel();
        tracing::info!("Cancellation requested for scan {}", id);
        return Ok(StatusCode::ACCEPTED);
    }

    let status: Option<String> = sqlx::query_scalar("SELECT status FROM scan_jobs WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    let status = status.ok_or_not_found("scan")?;

    if purge {
        sqlx::query("DELETE FROM scan_jobs WHERE id = ?1").bind(id.to_string()).execute(&state.db).await?;
    } else if status == ScanJobStatus::Scheduled.as_str() || status == ScanJobStatus::Running.as_str() {
        // Left behind by a previous process
        sqlx::query(
            r#"UPDATE scan_jobs SET status = ?1, finished_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?2"#,
        )
        .bind(ScanJobStatus::Cancelled.as_str())
        .bind(id.to_string())
        .execute(&state.db)
        .await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn scan_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    let rx = {
        let jobs = state.jobs.read().await;
        match jobs.get(&id) {
            Some(handle) => handle.sender.subscribe(),
            None => return Err(AppError::NotFound("scan not running".into())),
        }
    };

    let stream = BroadcastStream::new(rx).filter_map(|res| res.ok()).map(|ev| {
        let data = serde_json::to_string(&ev)
            .unwrap_or_else(|_| json!({"type":"warning","message":"serialization error"}).to_string());
        Ok::<Event, std::convert::Infallible>(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)).text("keep-alive")))
}

pub async fn scan_unmatched(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<impl IntoResponse> {
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM scan_jobs WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(&state.db)
        .await?;
    exists.ok_or_not_found("scan")?;

    let rows = sqlx::query(
        r#"SELECT id, library_uuid, scan_job_id, folder_path, cleaned_name, status, failed_time
           FROM unmatched_folders WHERE scan_job_id = ?1 ORDER BY folder_path"#,
    )
    .bind(id.to_string())
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows.iter().map(unmatched_from_row).collect::<Vec<_>>()))
}
