use std::{collections::HashMap, sync::Arc};

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::igdb::{IgdbClient, MetadataSource};
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;
use crate::packaging::ArchiveLocks;
use crate::types::ScanEvent;

/// A running scan job.
#[derive(Clone)]
pub struct JobHandle {
    /// Cancelled by `DELETE /scans/{id}` or on shutdown.
    pub cancel: CancellationToken,
    /// Progress events for SSE subscribers.
    pub sender: broadcast::Sender<ScanEvent>,
    pub library_uuid: String,
}

/// Shared state handed to every handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    /// Running scan jobs by id.
    pub jobs: Arc<RwLock<HashMap<Uuid, JobHandle>>>,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    pub rate_limiter: EndpointRateLimiter,
    /// `None` when no IGDB credentials are configured.
    pub metadata: Option<Arc<dyn MetadataSource>>,
    /// Serializes builds of the same download archive.
    pub archive_locks: ArchiveLocks,
    /// Cancelled once on shutdown; watchers, the image downloader and scan
    /// jobs all derive from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Builds the state and an IGDB client when credentials are present.
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let metadata: Option<Arc<dyn MetadataSource>> = if config.igdb.is_configured() {
            match IgdbClient::new(config.igdb.clone()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!("IGDB client disabled: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("IGDB credentials not configured; scans add games by cleaned name");
            None
        };

        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("/scans", 30, 60),
            ("/games/download", 60, 60),
            ("/igdb/search", 120, 60),
            ("/unmatched/match", 60, 60),
        ]);

        Self {
            db,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            metrics: Metrics::new(),
            rate_limiter,
            metadata,
            archive_locks: ArchiveLocks::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replaces the metadata source, e.g. with a stub in tests.
    pub fn with_metadata(mut self, metadata: Option<Arc<dyn MetadataSource>>) -> Self {
        self.metadata = metadata;
        self
    }
}
