use std::path::PathBuf;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use crate::{
    db::{self, LOOKUP_TABLES},
    error::{AppError, AppResult, OptionExt},
    packaging::remove_prepared_zip,
    state::AppState,
    types::{DeleteGameQuery, GameDetail, GameSummary, ImageDto},
};

pub(crate) const GAME_SUMMARY_COLUMNS: &str =
    "uuid, library_uuid, name, igdb_id, size, rating, first_release_date, cover_url, times_downloaded";

pub(crate) fn game_summary_from_row(r: &SqliteRow) -> GameSummary {
    GameSummary {
        uuid: r.get("uuid"),
        library_uuid: r.get("library_uuid"),
        name: r.get("name"),
        igdb_id: r.get("igdb_id"),
        size: r.get("size"),
        rating: r.get("rating"),
        first_release_date: r.get("first_release_date"),
        cover_url: r.get("cover_url"),
        times_downloaded: r.get("times_downloaded"),
    }
}

/// Game row plus its lookups and images.
pub(crate) async fn load_game_detail(state: &AppState, uuid: &str) -> AppResult<GameDetail> {
    let r = sqlx::query(&format!(
        "SELECT {}, full_disk_path, summary, storyline, url, category, status, date_created, last_updated FROM games WHERE uuid = ?1",
        GAME_SUMMARY_COLUMNS
    ))
    .bind(uuid)
    .fetch_optional(&state.db)
    .await?
    .ok_or_not_found("game")?;

    let mut lookups = Vec::with_capacity(LOOKUP_TABLES.len());
    for lookup in LOOKUP_TABLES {
        lookups.push(db::linked_names(&state.db, uuid, lookup).await?);
    }
    let [genres, themes, game_modes, platforms, developers, publishers]: [Vec<String>; 6] =
        lookups.try_into().map_err(|_| AppError::Internal(anyhow::anyhow!("lookup count mismatch")))?;

    let images = sqlx::query("SELECT image_type, url, file_name, is_downloaded FROM images WHERE game_uuid = ?1 ORDER BY id")
        .bind(uuid)
        .fetch_all(&state.db)
        .await?
        .into_iter()
        .map(|i| ImageDto {
            image_type: i.get("image_type"),
            url: i.get("url"),
            local_url: (i.get::<i64, _>("is_downloaded") != 0)
                .then(|| format!("/images/{}", i.get::<String, _>("file_name"))),
        })
        .collect();

    Ok(GameDetail {
        summary: game_summary_from_row(&r),
        full_disk_path: r.get("full_disk_path"),
        description: r.get("summary"),
        storyline: r.get("storyline"),
        url: r.get("url"),
        category: r.get("category"),
        status: r.get("status"),
        date_created: r.get("date_created"),
        last_updated: r.get("last_updated"),
        genres,
        themes,
        game_modes,
        platforms,
        developers,
        publishers,
        images,
    })
}

pub async fn get_game(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> AppResult<impl IntoResponse> {
    Ok(Json(load_game_detail(&state, &uuid.to_string()).await?))
}

/// Removes a game from the catalogue. With `?delete_files=true` its files are
/// deleted from disk too, which the global settings must allow.
pub async fn delete_game(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Query(q): Query<DeleteGameQuery>,
) -> AppResult<impl IntoResponse> {
    let uuid = uuid.to_string();
    let delete_files = q.delete_files.unwrap_or(false);

    let (name, path): (String, String) = sqlx::query_as("SELECT name, full_disk_path FROM games WHERE uuid = ?1")
        .bind(&uuid)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("game")?;

    if delete_files && !db::load_settings(&state.db).await?.enable_delete_game_on_disk {
        return Err(AppError::Forbidden("Deleting game files from disk is disabled in the settings".into()));
    }

    let prepared: Vec<String> = sqlx::query_scalar(
        "SELECT zip_file_path FROM download_requests WHERE game_uuid = ?1 AND is_direct = 0 AND zip_file_path IS NOT NULL",
    )
    .bind(&uuid)
    .fetch_all(&state.db)
    .await?;

    if delete_files {
        let target = PathBuf::from(&path);
        let md = tokio::fs::metadata(&target).await;
        match md {
            Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(&target).await?,
            Ok(_) => tokio::fs::remove_file(&target).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Files of game '{}' already gone: {}", name, path);
            }
            Err(e) => return Err(e.into()),
        }
    }

    sqlx::query("DELETE FROM games WHERE uuid = ?1").bind(&uuid).execute(&state.db).await?;

    let save_path = PathBuf::from(&state.config.downloads.zip_save_path);
    for zip in prepared {
        if let Err(e) = remove_prepared_zip(&save_path, std::path::Path::new(&zip)) {
            tracing::warn!("Could not remove archive {}: {}", zip, e);
        }
    }

    let text = if delete_files {
        format!("Game '{}' deleted together with {}", name, path)
    } else {
        format!("Game '{}' removed from the library", name)
    };
    db::log_system_event(&state.db, "game_removed", &text, "warning").await;
    tracing::info!("{}", text);
    Ok(StatusCode::NO_CONTENT)
}
