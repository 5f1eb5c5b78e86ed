//! Library folder monitoring.
//!
//! Each watched root gets its own OS thread running a debounced `notify`
//! watcher. Paths that pass the extension filter and the per-path throttle are
//! forwarded as [`WatchNotification`]s; a single async consumer turns them into
//! scan jobs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;
use crate::db;
use crate::scanner;
use crate::state::AppState;
use crate::types::ScanMode;

/// How often a monitor thread wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Allow/deny lists of lowercase extensions without the dot.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    allowed: HashSet<String>,
    ignored: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new(allowed: Vec<String>, ignored: Vec<String>) -> Self {
        let norm = |v: Vec<String>| -> HashSet<String> {
            v.into_iter().map(|e| e.trim().trim_start_matches('.').to_lowercase()).filter(|e| !e.is_empty()).collect()
        };
        Self { allowed: norm(allowed), ignored: norm(ignored) }
    }

    /// Directories always pass. Files pass when their extension is not
    /// ignored and is allowed (an empty allow list allows everything).
    pub fn accepts(&self, path: &Path, is_dir: bool) -> bool {
        if is_dir {
            return true;
        }
        let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
        if self.ignored.contains(&ext) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(&ext)
    }
}

/// Drops repeated events for the same path inside `threshold`.
#[derive(Debug)]
pub struct EventThrottle {
    threshold: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl EventThrottle {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold, last_seen: HashMap::new() }
    }

    pub fn should_emit(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(prev) = self.last_seen.get(path) {
            if now.saturating_duration_since(*prev) < self.threshold {
                return false;
            }
        }
        self.last_seen.insert(path.to_path_buf(), now);
        true
    }

    /// Forgets entries older than the threshold.
    pub fn prune(&mut self, now: Instant) {
        let threshold = self.threshold;
        self.last_seen.retain(|_, seen| now.saturating_duration_since(*seen) < threshold);
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNotification {
    pub library_uuid: String,
    pub root: PathBuf,
    pub path: PathBuf,
}

/// A watcher thread for one library root.
pub struct FileMonitor {
    root: PathBuf,
    handle: JoinHandle<()>,
}

impl FileMonitor {
    /// Starts watching `root` recursively. Returns once the watcher is
    /// installed, or with the error that prevented it.
    pub fn spawn(
        root: PathBuf,
        library_uuid: String,
        filter: ExtensionFilter,
        cfg: &WatcherConfig,
        shutdown: CancellationToken,
        notify_tx: UnboundedSender<WatchNotification>,
    ) -> anyhow::Result<Self> {
        let debounce = Duration::from_millis(cfg.debounce_ms);
        let threshold = Duration::from_secs(cfg.event_threshold_secs);
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();
        let thread_root = root.clone();

        let handle = std::thread::Builder::new()
            .name(format!("watch-{}", library_uuid.chars().take(8).collect::<String>()))
            .spawn(move || {
                let (tx, rx) = mpsc::channel::<DebounceEventResult>();
                let mut debouncer = match new_debouncer(debounce, tx) {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e).context("Failed to create file watcher"));
                        return;
                    }
                };
                if let Err(e) = debouncer.watcher().watch(&thread_root, RecursiveMode::Recursive) {
                    let _ = ready_tx.send(
                        Err(e).with_context(|| format!("Failed to watch directory: {}", thread_root.display())),
                    );
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                tracing::info!("Watching {} for library {}", thread_root.display(), library_uuid);

                let mut throttle = EventThrottle::new(threshold);
                let mut last_prune = Instant::now();
                while !shutdown.is_cancelled() {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(Ok(events)) => {
                            let now = Instant::now();
                            for event in events {
                                // Deletions show up as events for paths that are gone
                                let Ok(md) = std::fs::metadata(&event.path) else { continue };
                                if !filter.accepts(&event.path, md.is_dir()) || !throttle.should_emit(&event.path, now) {
                                    continue;
                                }
                                tracing::debug!("Change detected: {}", event.path.display());
                                let note = WatchNotification {
                                    library_uuid: library_uuid.clone(),
                                    root: thread_root.clone(),
                                    path: event.path,
                                };
                                if notify_tx.send(note).is_err() {
                                    // Consumer gone, nothing left to notify
                                    return;
                                }
                            }
                        }
                        Ok(Err(e)) => tracing::warn!("Watch error on {}: {}", thread_root.display(), e),
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                    if last_prune.elapsed() > threshold.max(POLL_INTERVAL) {
                        throttle.prune(Instant::now());
                        last_prune = Instant::now();
                    }
                }
                tracing::info!("Stopped watching {}", thread_root.display());
            })
            .context("Failed to spawn watcher thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { root, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                anyhow::bail!("watcher thread for {} exited during startup", root.display())
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the thread to exit; call after cancelling the shutdown token.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("Watcher thread for {} panicked", self.root.display());
        }
    }
}

/// Starts a monitor for every library with a `watch_path` and `auto_scan`
/// enabled, plus the consumer that schedules scans for their notifications.
pub async fn spawn_watchers(state: &AppState) -> anyhow::Result<Vec<FileMonitor>> {
    if !state.config.watcher.enabled {
        tracing::info!("Folder watcher disabled by configuration");
        return Ok(Vec::new());
    }

    let libraries: Vec<(String, String)> = sqlx::query_as(
        "SELECT uuid, watch_path FROM libraries WHERE auto_scan = 1 AND watch_path IS NOT NULL AND watch_path <> ''",
    )
    .fetch_all(&state.db)
    .await?;
    if libraries.is_empty() {
        return Ok(Vec::new());
    }

    let filter = ExtensionFilter::new(
        db::load_allowed_extensions(&state.db).await?,
        db::load_ignored_extensions(&state.db).await?,
    );
    let (tx, rx) = unbounded_channel();

    let mut monitors = Vec::with_capacity(libraries.len());
    for (library_uuid, watch_path) in libraries {
        let root = PathBuf::from(&watch_path);
        if !root.is_dir() {
            tracing::warn!("Not watching {} for library {}: not a directory", watch_path, library_uuid);
            continue;
        }
        match FileMonitor::spawn(root, library_uuid.clone(), filter.clone(), &state.config.watcher, state.shutdown.clone(), tx.clone()) {
            Ok(m) => monitors.push(m),
            Err(e) => tracing::error!("Could not watch {} for library {}: {:#}", watch_path, library_uuid, e),
        }
    }

    tokio::spawn(consume_notifications(state.clone(), rx));
    Ok(monitors)
}

/// Collects notifications for one debounce period, then starts at most one
/// scan per affected library. Libraries with a scan already running are
/// skipped; the next change after that scan triggers another.
async fn consume_notifications(state: AppState, mut rx: UnboundedReceiver<WatchNotification>) {
    let settle = Duration::from_millis(state.config.watcher.debounce_ms);
    loop {
        let first = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            note = rx.recv() => match note {
                Some(n) => n,
                None => break,
            },
        };

        let mut pending: HashMap<String, PathBuf> = HashMap::new();
        pending.insert(first.library_uuid, first.root);
        tokio::time::sleep(settle).await;
        while let Ok(n) = rx.try_recv() {
            pending.entry(n.library_uuid).or_insert(n.root);
        }

        for (library_uuid, root) in pending {
            if scanner::library_has_running_job(&state, &library_uuid).await {
                tracing::debug!("Scan already running for library {}, skipping watcher trigger", library_uuid);
                continue;
            }
            let mode: Option<ScanMode> = sqlx::query_scalar::<_, String>("SELECT scan_mode FROM libraries WHERE uuid = ?1")
                .bind(&library_uuid)
                .fetch_optional(&state.db)
                .await
                .ok()
                .flatten()
                .and_then(|m| m.parse().ok());
            match scanner::start_scan_job(&state, &library_uuid, Some(root.to_string_lossy().to_string()), mode, false).await {
                Ok(resp) => tracing::info!("Watcher scheduled scan {} for library {}", resp.id, library_uuid),
                Err(e) => tracing::warn!("Watcher could not schedule scan for library {}: {}", library_uuid, e),
            }
        }
    }
    tracing::debug!("Watch notification consumer stopped");
}
