use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide counters for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub scans_started: Arc<AtomicUsize>,
    pub scans_completed: Arc<AtomicUsize>,
    pub scans_failed: Arc<AtomicUsize>,
    pub games_added: Arc<AtomicU64>,
    pub unmatched_found: Arc<AtomicU64>,
    pub downloads_prepared: Arc<AtomicU64>,
    pub downloads_failed: Arc<AtomicU64>,
    pub bytes_packaged: Arc<AtomicU64>,
    pub images_downloaded: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_started: Arc::new(AtomicUsize::new(0)),
            scans_completed: Arc::new(AtomicUsize::new(0)),
            scans_failed: Arc::new(AtomicUsize::new(0)),
            games_added: Arc::new(AtomicU64::new(0)),
            unmatched_found: Arc::new(AtomicU64::new(0)),
            downloads_prepared: Arc::new(AtomicU64::new(0)),
            downloads_failed: Arc::new(AtomicU64::new(0)),
            bytes_packaged: Arc::new(AtomicU64::new(0)),
            images_downloaded: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_scans_started(&self) {
        self.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_games_added(&self) {
        self.games_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unmatched_found(&self) {
        self.unmatched_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_downloads_prepared(&self) {
        self.downloads_prepared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_downloads_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_packaged(&self, bytes: u64) {
        self.bytes_packaged.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_images_downloaded(&self) {
        self.images_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scans_started: self.scans_started.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            games_added: self.games_added.load(Ordering::Relaxed),
            unmatched_found: self.unmatched_found.load(Ordering::Relaxed),
            downloads_prepared: self.downloads_prepared.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            bytes_packaged: self.bytes_packaged.load(Ordering::Relaxed),
            images_downloaded: self.images_downloaded.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub scans_started: usize,
    pub scans_completed: usize,
    pub scans_failed: usize,
    pub games_added: u64,
    pub unmatched_found: u64,
    pub downloads_prepared: u64,
    pub downloads_failed: u64,
    pub bytes_packaged: u64,
    pub images_downloaded: u64,
    pub uptime_seconds: u64,
}
