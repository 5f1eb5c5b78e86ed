//! Persistence for scan results: games, their lookups and images, and the
//! unmatched-folder queue.

use std::path::Path;

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::{link_lookups, LOOKUP_TABLES};
use crate::igdb::GameMetadata;
use crate::types::UnmatchedStatus;

pub async fn game_exists_at(pool: &SqlitePool, path: &str) -> sqlx::Result<bool> {
    let found: Option<String> = sqlx::query_scalar("SELECT uuid FROM games WHERE full_disk_path = ?1")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn unmatched_status(pool: &SqlitePool, path: &str) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar("SELECT status FROM unmatched_folders WHERE folder_path = ?1")
        .bind(path)
        .fetch_optional(pool)
        .await
}

/// Inserts a game row plus everything hanging off it in one transaction.
///
/// Without metadata the game is stored under `name` with no IGDB id.
pub async fn create_game(
    pool: &SqlitePool,
    library_uuid: &str,
    name: &str,
    full_disk_path: &str,
    size: u64,
    metadata: Option<&GameMetadata>,
) -> sqlx::Result<String> {
    let game_uuid = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    let title = metadata.map(|m| m.name.trim()).filter(|n| !n.is_empty()).unwrap_or(name);
    sqlx::query(
        r#"INSERT INTO games (uuid, library_uuid, igdb_id, name, summary, storyline, url, full_disk_path,
                              size, rating, first_release_date, category, status, cover_url)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
    )
    .bind(&game_uuid)
    .bind(library_uuid)
    .bind(metadata.map(|m| m.igdb_id))
    .bind(title)
    .bind(metadata.and_then(|m| m.summary.as_deref()))
    .bind(metadata.and_then(|m| m.storyline.as_deref()))
    .bind(metadata.and_then(|m| m.url.as_deref()))
    .bind(full_disk_path)
    .bind(size as i64)
    .bind(metadata.and_then(|m| m.rating))
    .bind(metadata.and_then(|m| m.first_release_date.as_deref()))
    .bind(metadata.and_then(|m| m.category.as_deref()))
    .bind(metadata.and_then(|m| m.status.as_deref()))
    .bind(metadata.and_then(|m| m.cover_url.as_deref()))
    .execute(&mut *tx)
    .await?;

    if let Some(meta) = metadata {
        let lists = [&meta.genres, &meta.themes, &meta.game_modes, &meta.platforms, &meta.developers, &meta.publishers];
        for (lookup, names) in LOOKUP_TABLES.iter().zip(lists) {
            link_lookups(&mut *tx, &game_uuid, *lookup, names).await?;
        }

        let covers = meta.cover_url.iter().map(|u| ("cover", u));
        let shots = meta.screenshot_urls.iter().map(|u| ("screenshot", u));
        for (idx, (kind, url)) in covers.chain(shots).enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO images (game_uuid, image_type, url, file_name) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&game_uuid)
            .bind(kind)
            .bind(url)
            .bind(image_file_name(&game_uuid, kind, idx, url))
            .execute(&mut *tx)
            .await?;
        }
    }

    // A folder that finally matched leaves the triage queue
    sqlx::query("DELETE FROM unmatched_folders WHERE folder_path = ?1")
        .bind(full_disk_path)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(game_uuid)
}

fn image_file_name(game_uuid: &str, kind: &str, idx: usize, url: &str) -> String {
    let ext = Path::new(url)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| matches!(e.as_str(), "jpg" | "jpeg" | "png" | "webp"))
        .unwrap_or_else(|| "jpg".to_string());
    format!("{}_{}_{}.{}", game_uuid, kind, idx, ext)
}

/// Adds `path` to the unmatched queue, or refreshes the existing row. The
/// triage status of an existing row is kept.
pub async fn record_unmatched(
    pool: &SqlitePool,
    library_uuid: &str,
    scan_job_id: Option<&str>,
    path: &str,
    cleaned_name: &str,
    status: UnmatchedStatus,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"INSERT INTO unmatched_folders (library_uuid, scan_job_id, folder_path, cleaned_name, status)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(folder_path) DO UPDATE SET
             scan_job_id = excluded.scan_job_id,
             cleaned_name = excluded.cleaned_name,
             failed_time = strftime('%Y-%m-%dT%H:%M:%SZ','now')"#,
    )
    .bind(library_uuid)
    .bind(scan_job_id)
    .bind(path)
    .bind(cleaned_name)
    .bind(status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Deletes games of `library_uuid` whose path no longer exists on disk and
/// returns how many were removed.
pub async fn remove_missing_games(pool: &SqlitePool, library_uuid: &str) -> sqlx::Result<u64> {
    let rows = sqlx::query("SELECT uuid, full_disk_path FROM games WHERE library_uuid = ?1")
        .bind(library_uuid)
        .fetch_all(pool)
        .await?;

    let mut removed = 0u64;
    for r in rows {
        let path: String = r.get("full_disk_path");
        if tokio::fs::try_exists(&path).await.unwrap_or(true) {
            continue;
        }
        let uuid: String = r.get("uuid");
        let res = sqlx::query("DELETE FROM games WHERE uuid = ?1").bind(&uuid).execute(pool).await?;
        removed += res.rows_affected();
        tracing::info!("Removed game {} with missing path {}", uuid, path);
    }
    Ok(removed)
}
