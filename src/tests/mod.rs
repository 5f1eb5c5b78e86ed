//! Tests for the SharewareZ backend.
//!
//! - **naming_tests**: release-name cleaning
//! - **scanner_tests**: discovery and scan jobs against a stub metadata source
//! - **packaging_tests**: download planning and ZIP packaging
//! - **watcher_tests**: extension filter, throttle and a live folder monitor
//! - **db_tests**: schema, seed data and lookup helpers
//! - **config_tests**: defaults and validation
//! - **error_tests**: error mapping and validation helpers
//! - **images_tests**: background image downloader against a local HTTP server
//! - **admin_tests**: admin creation and path reconciliation
//! - **api_tests**: library, game, scan, unmatched and download endpoints
//! - **health_api_tests**: health checks, metrics and auth
//!
//! Run a single module with e.g. `cargo test scanner_tests`.

pub mod api_tests;
pub mod db_tests;
pub mod error_tests;
pub mod health_api_tests;

/// Shared fixtures.
#[cfg(test)]
pub(crate) mod support {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    use crate::config::AppConfig;
    use crate::igdb::{GameMetadata, IgdbError, MetadataSource};
    use crate::state::AppState;

    /// In-memory database on a single connection that never gets recycled.
    pub async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_db(&pool).await.unwrap();
        pool
    }

    /// Default config with every on-disk location under `dir` and the
    /// background services switched off.
    pub fn test_config(dir: &Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.database.url = "sqlite::memory:".into();
        cfg.downloads.zip_save_path = dir.join("zips").to_string_lossy().to_string();
        cfg.images.dir = dir.join("images").to_string_lossy().to_string();
        cfg.images.enabled = false;
        cfg.watcher.enabled = false;
        cfg.igdb.client_id = String::new();
        cfg.igdb.client_secret = String::new();
        cfg.scanner.progress_every = 1;
        cfg
    }

    pub async fn test_state(dir: &Path) -> AppState {
        AppState::new(test_pool().await, test_config(dir))
    }

    pub async fn insert_library(pool: &SqlitePool, name: &str, watch_path: Option<&Path>) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO libraries (uuid, name, watch_path) VALUES (?1, ?2, ?3)")
            .bind(&uuid)
            .bind(name)
            .bind(watch_path.map(|p| p.to_string_lossy().to_string()))
            .execute(pool)
            .await
            .unwrap();
        uuid
    }

    pub fn metadata(igdb_id: i64, name: &str) -> GameMetadata {
        GameMetadata {
            igdb_id,
            name: name.to_string(),
            summary: Some(format!("{} summary", name)),
            cover_url: Some(format!("https://images.igdb.com/igdb/image/upload/t_cover_big/{}.jpg", igdb_id)),
            screenshot_urls: vec![format!("https://images.igdb.com/igdb/image/upload/t_original/s{}.png", igdb_id)],
            genres: vec!["Role-playing (RPG)".into()],
            developers: vec!["Studio".into()],
            ..Default::default()
        }
    }

    /// Answers searches from a fixed catalogue by exact (case-insensitive) name.
    #[derive(Default)]
    pub struct StubMetadata {
        pub games: Vec<GameMetadata>,
        pub fail: bool,
        pub searches: Mutex<Vec<String>>,
    }

    impl StubMetadata {
        pub fn with_games(games: Vec<GameMetadata>) -> Self {
            Self { games, ..Default::default() }
        }

        pub fn failing() -> Self {
            Self { fail: true, ..Default::default() }
        }
    }

    #[async_trait]
    impl MetadataSource for StubMetadata {
        async fn search_by_name(&self, name: &str, limit: usize) -> Result<Vec<GameMetadata>, IgdbError> {
            self.searches.lock().unwrap().push(name.to_string());
            if self.fail {
                return Err(IgdbError::Api { status: 503, message: "unavailable".into() });
            }
            Ok(self.games.iter().filter(|g| g.name.eq_ignore_ascii_case(name)).take(limit).cloned().collect())
        }

        async fn fetch_by_id(&self, igdb_id: i64) -> Result<GameMetadata, IgdbError> {
            if self.fail {
                return Err(IgdbError::Api { status: 503, message: "unavailable".into() });
            }
            self.games.iter().find(|g| g.igdb_id == igdb_id).cloned().ok_or(IgdbError::NotFound(igdb_id))
        }
    }
}
