pub mod catalog;
pub mod discovery;

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use discovery::{build_globset, dir_size, discover_files, discover_folders, GameCandidate};

use crate::{
    db,
    error::{AppError, AppResult, OptionExt},
    igdb::{best_match, MetadataSource},
    metrics::Metrics,
    naming::NameCleaner,
    state::{AppState, JobHandle},
    types::{CreateScanResponse, ScanEvent, ScanJobStatus, ScanMode, UnmatchedStatus},
};

/// Parameters of one scan job, as stored in `scan_jobs`.
#[derive(Debug, Clone)]
pub struct ScanJobSpec {
    pub id: Uuid,
    pub library_uuid: String,
    pub folder_path: PathBuf,
    pub mode: ScanMode,
    pub remove_missing: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Already catalogued or marked `Ignore`.
    pub skipped: u64,
    pub removed: u64,
}

/// Everything a scan job needs from the application, detached from `AppState`
/// so the job can run in a spawned task.
#[derive(Clone)]
pub struct ScanContext {
    pub db: SqlitePool,
    pub metadata: Option<Arc<dyn MetadataSource>>,
    pub metrics: Metrics,
    pub excludes: Vec<String>,
    pub progress_every: usize,
}

impl ScanContext {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            metadata: state.metadata.clone(),
            metrics: state.metrics.clone(),
            excludes: state.config.scanner.excludes.clone(),
            progress_every: state.config.scanner.progress_every.max(1),
        }
    }
}

async fn set_status(pool: &SqlitePool, id: Uuid, status: ScanJobStatus) -> sqlx::Result<()> {
    sqlx::query("UPDATE scan_jobs SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

async fn persist_counters(pool: &SqlitePool, id: Uuid, outcome: &ScanOutcome) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE scan_jobs SET total_folders = ?1, folders_success = ?2, folders_failed = ?3, removed_count = ?4 WHERE id = ?5",
    )
    .bind(outcome.total as i64)
    .bind(outcome.success as i64)
    .bind(outcome.failed as i64)
    .bind(outcome.removed as i64)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Runs one scan job to completion.
///
/// Moves the job row to `Running`, discovers candidates, catalogues each one
/// and keeps the counters in `scan_jobs` current. The caller records the final
/// status; a cancelled job returns an error while `cancel` is cancelled.
pub async fn run_scan_job(
    ctx: &ScanContext,
    job: &ScanJobSpec,
    tx: broadcast::Sender<ScanEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<ScanOutcome> {
    set_status(&ctx.db, job.id, ScanJobStatus::Running).await?;

    let groups = db::load_release_groups(&ctx.db).await?;
    let allowed = db::load_allowed_extensions(&ctx.db).await?;
    let ignored = db::load_ignored_extensions(&ctx.db).await?;
    let excludes = build_globset(&ctx.excludes)?;
    let cleaner = NameCleaner::new(&groups);

    let root = job.folder_path.clone();
    let mode = job.mode;
    let candidates = tokio::task::spawn_blocking(move || match mode {
        ScanMode::Folders => discover_folders(&root, &cleaner, &excludes),
        ScanMode::Files => discover_files(&root, &allowed, &ignored, &cleaner, &excludes),
    })
    .await??;

    let mut outcome = ScanOutcome { total: candidates.len() as u64, ..Default::default() };
    persist_counters(&ctx.db, job.id, &outcome).await?;
    let _ = tx.send(ScanEvent::Started {
        library_uuid: job.library_uuid.clone(),
        folder_path: job.folder_path.to_string_lossy().to_string(),
        total: outcome.total,
    });
    tracing::info!(
        "Scan {} found {} candidates in {} ({})",
        job.id,
        outcome.total,
        job.folder_path.display(),
        job.mode.as_str()
    );

    let job_id = job.id.to_string();
    for (idx, candidate) in candidates.iter().enumerate() {
        if cancel.is_cancelled() {
            persist_counters(&ctx.db, job.id, &outcome).await?;
            anyhow::bail!("scan cancelled");
        }

        let path = candidate.full_path.to_string_lossy().to_string();
        match process_candidate(ctx, job, &job_id, candidate, &path, &tx).await {
            Ok(CandidateResult::Added) => outcome.success += 1,
            Ok(CandidateResult::Unmatched) => outcome.failed += 1,
            Ok(CandidateResult::Skipped) => outcome.skipped += 1,
            Err(e) => {
                // One bad entry does not abort the job
                outcome.failed += 1;
                tracing::warn!("Failed to process {}: {:#}", path, e);
                let _ = tx.send(ScanEvent::Warning { path: path.clone(), code: "process_failed".into(), message: e.to_string() });
            }
        }

        let processed = idx as u64 + 1;
        if processed % ctx.progress_every as u64 == 0 || processed == outcome.total {
            persist_counters(&ctx.db, job.id, &outcome).await?;
            let _ = tx.send(ScanEvent::Progress {
                processed,
                total: outcome.total,
                success: outcome.success,
                failed: outcome.failed,
                current: path,
            });
        }
    }

    if job.remove_missing {
        outcome.removed = catalog::remove_missing_games(&ctx.db, &job.library_uuid).await?;
        if outcome.removed > 0 {
            db::log_system_event(
                &ctx.db,
                "game_removed",
                &format!("Removed {} games with missing files from library {}", outcome.removed, job.library_uuid),
                "information",
            )
            .await;
        }
    }

    persist_counters(&ctx.db, job.id, &outcome).await?;
    Ok(outcome)
}

enum CandidateResult {
    Added,
    Unmatched,
    Skipped,
}

async fn process_candidate(
    ctx: &ScanContext,
    job: &ScanJobSpec,
    job_id: &str,
    candidate: &GameCandidate,
    path: &str,
    tx: &broadcast::Sender<ScanEvent>,
) -> anyhow::Result<CandidateResult> {
    if catalog::game_exists_at(&ctx.db, path).await? {
        return Ok(CandidateResult::Skipped);
    }
    if catalog::unmatched_status(&ctx.db, path).await?.as_deref() == Some(UnmatchedStatus::Ignore.as_str()) {
        return Ok(CandidateResult::Skipped);
    }

    let metadata = match &ctx.metadata {
        Some(source) => match source.search_by_name(&candidate.name, 5).await {
            Ok(results) => match best_match(&candidate.name, &results) {
                Some(m) => Some(m.clone()),
                None => {
                    record_unmatched(ctx, job, job_id, candidate, path, tx).await?;
                    return Ok(CandidateResult::Unmatched);
                }
            },
            Err(e) => {
                tracing::warn!("Metadata lookup for '{}' failed: {}", candidate.name, e);
                let _ = tx.send(ScanEvent::Warning {
                    path: path.to_string(),
                    code: "metadata_lookup_failed".into(),
                    message: e.to_string(),
                });
                record_unmatched(ctx, job, job_id, candidate, path, tx).await?;
                return Ok(CandidateResult::Unmatched);
            }
        },
        None => None,
    };

    let full_path = candidate.full_path.clone();
    let size = tokio::task::spawn_blocking(move || dir_size(&full_path)).await?;
    let uuid = catalog::create_game(&ctx.db, &job.library_uuid, &candidate.name, path, size, metadata.as_ref()).await?;
    let name = metadata.as_ref().map(|m| m.name.clone()).unwrap_or_else(|| candidate.name.clone());

    ctx.metrics.inc_games_added();
    db::log_system_event(&ctx.db, "game_added", &format!("Added game '{}' from {}", name, path), "information").await;
    let _ = tx.send(ScanEvent::GameAdded { uuid, name, path: path.to_string() });
    Ok(CandidateResult::Added)
}

async fn record_unmatched(
    ctx: &ScanContext,
    job: &ScanJobSpec,
    job_id: &str,
    candidate: &GameCandidate,
    path: &str,
    tx: &broadcast::Sender<ScanEvent>,
) -> anyhow::Result<()> {
    catalog::record_unmatched(&ctx.db, &job.library_uuid, Some(job_id), path, &candidate.name, UnmatchedStatus::Unmatched)
        .await?;
    ctx.metrics.inc_unmatched_found();
    let _ = tx.send(ScanEvent::Unmatched { path: path.to_string(), cleaned_name: candidate.name.clone() });
    Ok(())
}

/// Whether a job for `library_uuid` is currently registered.
pub async fn library_has_running_job(state: &AppState, library_uuid: &str) -> bool {
    state.jobs.read().await.values().any(|h| h.library_uuid == library_uuid)
}

/// Creates the `scan_jobs` row, registers the job handle and spawns the job.
///
/// Shared by `POST /scans` and the watcher. At most one job runs per library.
pub async fn start_scan_job(
    state: &AppState,
    library_uuid: &str,
    folder_path: Option<String>,
    mode: Option<ScanMode>,
    remove_missing: bool,
) -> AppResult<CreateScanResponse> {
    let library: Option<(Option<String>, String)> =
        sqlx::query_as("SELECT watch_path, scan_mode FROM libraries WHERE uuid = ?1")
            .bind(library_uuid)
            .fetch_optional(&state.db)
            .await?;
    let (watch_path, default_mode) = library.ok_or_not_found("library")?;

    let folder = folder_path
        .or(watch_path)
        .ok_or_else(|| AppError::BadRequest("folder_path is required when the library has no watch_path".into()))?;
    crate::error::validation::validate_path(&folder)?;
    let folder = PathBuf::from(folder);
    if !tokio::fs::metadata(&folder).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(AppError::BadRequest(format!("folder does not exist: {}", folder.display())));
    }
    let mode = mode.unwrap_or_else(|| default_mode.parse().unwrap_or_default());

    let id = Uuid::new_v4();
    let (tx, _rx) = broadcast::channel::<ScanEvent>(256);
    let cancel = state.shutdown.child_token();

    // Register under the write lock so two requests cannot both pass the check
    {
        let mut jobs = state.jobs.write().await;
        if jobs.values().any(|h| h.library_uuid == library_uuid) {
            return Err(AppError::Conflict(format!("a scan is already running for library {}", library_uuid)));
        }
        jobs.insert(
            id,
            JobHandle { cancel: cancel.clone(), sender: tx.clone(), library_uuid: library_uuid.to_string() },
        );
    }

    let inserted = sqlx::query(
        r#"INSERT INTO scan_jobs (id, library_uuid, folder_path, scan_mode, status, remove_missing)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
    )
    .bind(id.to_string())
    .bind(library_uuid)
    .bind(folder.to_string_lossy().to_string())
    .bind(mode.as_str())
    .bind(ScanJobStatus::Scheduled.as_str())
    .bind(remove_missing as i64)
    .execute(&state.db)
    .await;
    if let Err(e) = inserted {
        state.jobs.write().await.remove(&id);
        return Err(e.into());
    }

    let created_at: String = sqlx::query_scalar("SELECT created_at FROM scan_jobs WHERE id = ?1")
        .bind(id.to_string())
        .fetch_one(&state.db)
        .await?;

    state.metrics.inc_scans_started();
    db::log_system_event(
        &state.db,
        "scan_started",
        &format!("Scan {} started for {} ({})", id, folder.display(), mode.as_str()),
        "information",
    )
    .await;

    let spec = ScanJobSpec { id, library_uuid: library_uuid.to_string(), folder_path: folder, mode, remove_missing };
    let ctx = ScanContext::from_state(state);
    let jobs_map = state.jobs.clone();

    tokio::spawn(async move {
        let res = run_scan_job(&ctx, &spec, tx.clone(), cancel.clone()).await;
        let (status, error) = match res {
            Ok(outcome) => {
                ctx.metrics.inc_scans_completed();
                let _ = tx.send(ScanEvent::Done {
                    total: outcome.total,
                    success: outcome.success,
                    failed: outcome.failed,
                    removed: outcome.removed,
                });
                tracing::info!(
                    "Scan {} completed: {} added, {} unmatched, {} skipped, {} removed",
                    id,
                    outcome.success,
                    outcome.failed,
                    outcome.skipped,
                    outcome.removed
                );
                (ScanJobStatus::Completed, None)
            }
            Err(_) if cancel.is_cancelled() => {
                let _ = tx.send(ScanEvent::Cancelled);
                tracing::info!("Scan {} cancelled", id);
                (ScanJobStatus::Cancelled, None)
            }
            Err(e) => {
                ctx.metrics.inc_scans_failed();
                let _ = tx.send(ScanEvent::Failed { message: e.to_string() });
                tracing::error!("Scan {} failed: {:#}", id, e);
                (ScanJobStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = sqlx::query(
            r#"UPDATE scan_jobs SET status = ?1, error_message = ?2,
                finished_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?3"#,
        )
        .bind(status.as_str())
        .bind(error.as_deref())
        .bind(id.to_string())
        .execute(&ctx.db)
        .await
        {
            tracing::error!("Failed to record final status of scan {}: {}", id, e);
        }
        let level = if status == ScanJobStatus::Failed { "error" } else { "information" };
        db::log_system_event(&ctx.db, "scan_finished", &format!("Scan {} finished: {}", id, status), level).await;

        jobs_map.write().await.remove(&id);
    });

    Ok(CreateScanResponse { id, status: ScanJobStatus::Scheduled.as_str().to_string(), created_at })
}
