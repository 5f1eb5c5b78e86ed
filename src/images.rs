//! Background cover/screenshot downloader.
//!
//! Polls the `images` table for rows not yet on disk and fetches them into
//! `images.dir`, which is served under `/images`. A row is given up on after
//! [`MAX_ATTEMPTS`] failures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::{Row, SqlitePool};
use tokio_util::sync::CancellationToken;

use crate::config::ImagesConfig;
use crate::metrics::Metrics;

pub const MAX_ATTEMPTS: i64 = 3;

#[derive(Debug, Clone)]
struct PendingImage {
    id: i64,
    url: String,
    file_name: String,
}

async fn pending_images(pool: &SqlitePool, limit: usize) -> sqlx::Result<Vec<PendingImage>> {
    let rows = sqlx::query(
        r#"SELECT id, url, file_name FROM images
           WHERE is_downloaded = 0 AND download_attempts < ?1
           ORDER BY id LIMIT ?2"#,
    )
    .bind(MAX_ATTEMPTS)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| PendingImage { id: r.get("id"), url: r.get("url"), file_name: r.get("file_name") })
        .collect())
}

/// Keeps only the final path component so a stored name cannot escape `dir`.
fn target_path(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let name = Path::new(file_name).file_name()?;
    Some(dir.join(name))
}

async fn fetch_one(http: &reqwest::Client, dir: &Path, image: &PendingImage) -> anyhow::Result<u64> {
    let target = target_path(dir, &image.file_name)
        .ok_or_else(|| anyhow::anyhow!("invalid image file name '{}'", image.file_name))?;
    let resp = http.get(&image.url).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    tokio::fs::write(&target, &bytes).await?;
    Ok(bytes.len() as u64)
}

/// Downloads one batch and returns how many images were stored.
pub async fn download_batch(
    pool: &SqlitePool,
    http: &reqwest::Client,
    dir: &Path,
    batch_size: usize,
    metrics: &Metrics,
) -> anyhow::Result<usize> {
    let batch = pending_images(pool, batch_size).await?;
    if batch.is_empty() {
        return Ok(0);
    }
    tokio::fs::create_dir_all(dir).await?;

    let mut stored = 0;
    for image in batch {
        match fetch_one(http, dir, &image).await {
            Ok(bytes) => {
                sqlx::query("UPDATE images SET is_downloaded = 1 WHERE id = ?1").bind(image.id).execute(pool).await?;
                metrics.inc_images_downloaded();
                stored += 1;
                tracing::debug!("Stored image {} ({} bytes)", image.file_name, bytes);
            }
            Err(e) => {
                sqlx::query("UPDATE images SET download_attempts = download_attempts + 1 WHERE id = ?1")
                    .bind(image.id)
                    .execute(pool)
                    .await?;
                tracing::warn!("Image download failed for {}: {}", image.url, e);
            }
        }
    }
    Ok(stored)
}

/// Runs until `shutdown` is cancelled, downloading a batch every
/// `poll_interval_secs`.
pub async fn run_image_downloader(pool: SqlitePool, cfg: ImagesConfig, metrics: Metrics, shutdown: CancellationToken) {
    let http = match reqwest::Client::builder()
        .user_agent(concat!("sharewarez/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Image downloader disabled, HTTP client failed to build: {}", e);
            return;
        }
    };
    let dir = PathBuf::from(&cfg.dir);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!("Image downloader started (dir: {}, every {}s)", dir.display(), cfg.poll_interval_secs);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match download_batch(&pool, &http, &dir, cfg.batch_size, &metrics).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Downloaded {} images", n),
                    Err(e) => tracing::warn!("Image download pass failed: {:#}", e),
                }
            }
        }
    }
    tracing::info!("Image downloader stopped");
}
