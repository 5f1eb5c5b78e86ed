//! Download preparation: decides whether a game is served as-is or zipped,
//! builds the archive, and tracks the `download_requests` row through
//! `pending → processing → available | failed`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::db;
use crate::metrics::Metrics;
use crate::state::AppState;
use crate::types::DownloadStatus;

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("source does not exist: {0}")]
    SourceMissing(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated,
}

impl Compression {
    /// Parses `downloads.compression`; anything but `deflated` stores.
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("deflated") {
            Compression::Deflated
        } else {
            Compression::Stored
        }
    }

    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPlan {
    /// Serve this file without packaging.
    DirectFile(PathBuf),
    /// Zip the whole directory.
    Zip(PathBuf),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZipOutcome {
    pub entries: u64,
    pub bytes: u64,
}

/// Case-insensitive match against the excluded folder names.
pub fn is_excluded_dir(name: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|e| e.eq_ignore_ascii_case(name))
}

fn walk_included<'a>(source: &Path, excluded: &'a [String]) -> impl Iterator<Item = walkdir::Result<DirEntry>> + 'a {
    WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            !(e.depth() > 0 && e.file_type().is_dir() && is_excluded_dir(&e.file_name().to_string_lossy(), excluded))
        })
}

/// A single file, or a folder holding exactly one file outside the excluded
/// folders, is served directly. Everything else gets zipped.
pub fn plan_download(game_path: &Path, excluded: &[String]) -> Result<DownloadPlan, PackagingError> {
    let md = fs::metadata(game_path).map_err(|_| PackagingError::SourceMissing(game_path.display().to_string()))?;
    if md.is_file() {
        return Ok(DownloadPlan::DirectFile(game_path.to_path_buf()));
    }

    let mut files = Vec::with_capacity(2);
    for entry in walk_included(game_path, excluded) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
            if files.len() > 1 {
                return Ok(DownloadPlan::Zip(game_path.to_path_buf()));
            }
        }
    }
    Ok(match files.pop() {
        Some(only) => DownloadPlan::DirectFile(only),
        None => DownloadPlan::Zip(game_path.to_path_buf()),
    })
}

/// Temp file next to `dest_zip`, unique per build so concurrent writers never
/// share one.
fn part_path(dest_zip: &Path) -> PathBuf {
    let mut name = dest_zip.as_os_str().to_owned();
    name.push(format!(".{}.part", Uuid::new_v4().simple()));
    PathBuf::from(name)
}

fn file_options(compression: Compression, large: bool) -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(compression.method()).large_file(large).unix_permissions(0o644)
}

/// Zips `source` into `dest_zip`, leaving out excluded folders at any depth.
///
/// The archive is written to a uniquely named `.part` file beside `dest_zip`
/// and renamed on success, so a file at `dest_zip` is always complete. The
/// partial file is removed on error.
pub fn zip_directory(
    source: &Path,
    dest_zip: &Path,
    excluded: &[String],
    compression: Compression,
) -> Result<ZipOutcome, PackagingError> {
    if !source.is_dir() {
        return Err(PackagingError::SourceMissing(source.display().to_string()));
    }
    if let Some(parent) = dest_zip.parent() {
        fs::create_dir_all(parent)?;
    }

    let part = part_path(dest_zip);
    match write_archive(source, &part, excluded, compression) {
        Ok(outcome) => {
            fs::rename(&part, dest_zip)?;
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&part) {
                tracing::debug!("Could not remove partial archive {}: {}", part.display(), rm);
            }
            Err(e)
        }
    }
}

fn write_archive(
    source: &Path,
    part: &Path,
    excluded: &[String],
    compression: Compression,
) -> Result<ZipOutcome, PackagingError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(part)?));
    let mut outcome = ZipOutcome::default();

    for entry in walk_included(source, excluded) {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry.path().strip_prefix(source).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        // Zip entry names always use '/'
        let name = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, file_options(compression, false))?;
        } else if entry.file_type().is_file() {
            let len = entry.metadata()?.len();
            zip.start_file(name, file_options(compression, len >= u32::MAX as u64))?;
            let mut f = File::open(entry.path())?;
            outcome.bytes += io::copy(&mut f, &mut zip)?;
            outcome.entries += 1;
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(outcome)
}

/// Archive file name for a game: the sanitized title plus a short id suffix.
pub fn zip_file_name(game_name: &str, game_uuid: &str) -> String {
    let safe: String = game_name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') { c } else { '_' })
        .collect();
    let safe = safe.trim().trim_matches('.');
    let short: String = game_uuid.chars().take(8).collect();
    if safe.is_empty() {
        format!("{}.zip", short)
    } else {
        format!("{}_{}.zip", safe, short)
    }
}

/// Deletes a prepared archive, but only when it lives under `save_path`.
/// Direct-file downloads point at the game itself and are never removed.
pub fn remove_prepared_zip(save_path: &Path, zip_path: &Path) -> io::Result<bool> {
    let (Ok(root), Ok(target)) = (save_path.canonicalize(), zip_path.canonicalize()) else {
        return Ok(false);
    };
    if !target.starts_with(&root) || !target.is_file() {
        return Ok(false);
    }
    fs::remove_file(&target)?;
    Ok(true)
}

/// One async lock per archive path. A request that finds a build of its
/// archive in progress waits for it and then reuses the result.
#[derive(Clone, Default)]
pub struct ArchiveLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl ArchiveLocks {
    pub async fn acquire(&self, dest: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only the map still holds are idle
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(dest.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// What `prepare_download` needs from the application.
#[derive(Clone)]
pub struct DownloadContext {
    pub db: SqlitePool,
    pub metrics: Metrics,
    pub zip_save_path: PathBuf,
    pub compression: Compression,
    pub archive_locks: ArchiveLocks,
}

impl DownloadContext {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            metrics: state.metrics.clone(),
            zip_save_path: PathBuf::from(&state.config.downloads.zip_save_path),
            compression: Compression::from_config(&state.config.downloads.compression),
            archive_locks: state.archive_locks.clone(),
        }
    }
}

async fn set_request_status(pool: &SqlitePool, request_id: i64, status: DownloadStatus) -> sqlx::Result<()> {
    sqlx::query("UPDATE download_requests SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(request_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Prepares a pending download request.
///
/// Any failure leaves the row `failed` with the error text; the error is also
/// returned to the caller for logging.
pub async fn prepare_download(ctx: &DownloadContext, request_id: i64) -> anyhow::Result<()> {
    set_request_status(&ctx.db, request_id, DownloadStatus::Processing).await?;

    match build_download(ctx, request_id).await {
        Ok((path, size, is_direct, game_uuid)) => {
            sqlx::query(
                r#"UPDATE download_requests SET status = ?1, zip_file_path = ?2, file_size = ?3, is_direct = ?4,
                     error_message = NULL, completion_time = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                   WHERE id = ?5"#,
            )
            .bind(DownloadStatus::Available.as_str())
            .bind(path.to_string_lossy().to_string())
            .bind(size as i64)
            .bind(is_direct as i64)
            .bind(request_id)
            .execute(&ctx.db)
            .await?;
            sqlx::query("UPDATE games SET times_downloaded = times_downloaded + 1 WHERE uuid = ?1")
                .bind(&game_uuid)
                .execute(&ctx.db)
                .await?;

            ctx.metrics.inc_downloads_prepared();
            db::log_system_event(
                &ctx.db,
                "download_prepared",
                &format!("Download {} ready at {}", request_id, path.display()),
                "information",
            )
            .await;
            Ok(())
        }
        Err(e) => {
            ctx.metrics.inc_downloads_failed();
            sqlx::query(
                r#"UPDATE download_requests SET status = ?1, error_message = ?2,
                     completion_time = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                   WHERE id = ?3"#,
            )
            .bind(DownloadStatus::Failed.as_str())
            .bind(e.to_string())
            .bind(request_id)
            .execute(&ctx.db)
            .await?;
            db::log_system_event(&ctx.db, "download_failed", &format!("Download {} failed: {}", request_id, e), "error")
                .await;
            Err(e)
        }
    }
}

async fn build_download(ctx: &DownloadContext, request_id: i64) -> anyhow::Result<(PathBuf, u64, bool, String)> {
    let row = sqlx::query(
        r#"SELECT g.uuid, g.name, g.full_disk_path FROM download_requests d
           JOIN games g ON g.uuid = d.game_uuid WHERE d.id = ?1"#,
    )
    .bind(request_id)
    .fetch_one(&ctx.db)
    .await?;
    let game_uuid: String = row.get("uuid");
    let game_name: String = row.get("name");
    let game_path = PathBuf::from(row.get::<String, _>("full_disk_path"));

    let excluded = db::load_settings(&ctx.db).await?.excluded_folders();
    let plan = {
        let game_path = game_path.clone();
        let excluded = excluded.clone();
        tokio::task::spawn_blocking(move || plan_download(&game_path, &excluded)).await??
    };

    match plan {
        DownloadPlan::DirectFile(file) => {
            let size = tokio::fs::metadata(&file).await?.len();
            tracing::info!("Download {} served directly from {}", request_id, file.display());
            Ok((file, size, true, game_uuid))
        }
        DownloadPlan::Zip(source) => {
            let dest = ctx.zip_save_path.join(zip_file_name(&game_name, &game_uuid));
            let _build = ctx.archive_locks.acquire(&dest).await;
            if let Ok(md) = tokio::fs::metadata(&dest).await {
                if md.is_file() && md.len() > 0 {
                    tracing::info!("Reusing archive {} for download {}", dest.display(), request_id);
                    return Ok((dest, md.len(), false, game_uuid));
                }
            }

            let started = std::time::Instant::now();
            let compression = ctx.compression;
            let dest_cl = dest.clone();
            let outcome =
                tokio::task::spawn_blocking(move || zip_directory(&source, &dest_cl, &excluded, compression)).await??;
            let size = tokio::fs::metadata(&dest).await?.len();
            ctx.metrics.add_bytes_packaged(outcome.bytes);
            tracing::info!(
                "Packaged {} files ({} bytes) into {} in {:?}",
                outcome.entries,
                outcome.bytes,
                dest.display(),
                started.elapsed()
            );
            Ok((dest, size, false, game_uuid))
        }
    }
}
