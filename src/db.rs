use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::naming::ReleaseGroups;

/// Lookup tables joined to `games` through an association table.
/// (lookup table, association table, foreign key column)
pub const LOOKUP_TABLES: [(&str, &str, &str); 6] = [
    ("genres", "game_genres", "genre_id"),
    ("themes", "game_themes", "theme_id"),
    ("game_modes", "game_game_modes", "game_mode_id"),
    ("platforms", "game_platforms", "platform_id"),
    ("developers", "game_developers", "developer_id"),
    ("publishers", "game_publishers", "publisher_id"),
];

const DEFAULT_RELEASE_GROUPS: &[(&str, bool)] = &[
    ("-Repack", false),
    ("-FitGirl", false),
    ("-DODI", false),
    ("-ElAmigos", false),
    ("-GOG", false),
    ("-CODEX", false),
    ("-PLAZA", false),
    ("-RUNE", false),
    ("-SKIDROW", false),
    ("-RELOADED", false),
    ("-EMPRESS", false),
    ("-DARKSiDERS", false),
    ("-TiNYiSO", false),
    ("-PROPHET", false),
    ("-HOODLUM", false),
    ("-RAZOR1911", false),
    ("-FLT", false),
    ("-SiMPLEX", false),
    ("-DINOByTES", false),
    ("-GOLDBERG", false),
    ("-P2P", false),
    ("-CPY", true),
    ("-TENOKE", true),
    ("-ANOMALY", true),
];

const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "iso", "exe", "msi", "nsp", "xci", "nsz", "xcz", "gb", "gbc", "gba", "nes", "sfc",
    "smc", "n64", "z64", "v64", "nds", "3ds", "cia", "cue", "bin", "chd", "pkg", "wbfs", "rvz", "gcm",
];

const DEFAULT_IGNORED_EXTENSIONS: &[&str] =
    &["txt", "nfo", "url", "sfv", "md5", "jpg", "jpeg", "png", "ini", "log", "db", "part", "tmp", "crdownload"];

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Cascades depend on this one
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS libraries (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            platform TEXT NOT NULL DEFAULT 'PCWIN',
            watch_path TEXT NULL,
            auto_scan INTEGER NOT NULL DEFAULT 0,
            scan_mode TEXT NOT NULL DEFAULT 'folders',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS games (
            uuid TEXT PRIMARY KEY,
            library_uuid TEXT NOT NULL,
            igdb_id INTEGER NULL,
            name TEXT NOT NULL,
            summary TEXT NULL,
            storyline TEXT NULL,
            url TEXT NULL,
            full_disk_path TEXT NOT NULL UNIQUE,
            size INTEGER NOT NULL DEFAULT 0,
            rating REAL NULL,
            first_release_date TEXT NULL,
            category TEXT NULL,
            status TEXT NULL,
            cover_url TEXT NULL,
            times_downloaded INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            last_updated TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(library_uuid) REFERENCES libraries(uuid) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS download_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NULL,
            game_uuid TEXT NOT NULL,
            status TEXT NOT NULL,
            zip_file_path TEXT NULL,
            is_direct INTEGER NOT NULL DEFAULT 0,
            file_size INTEGER NULL,
            error_message TEXT NULL,
            request_time TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            completion_time TEXT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE SET NULL,
            FOREIGN KEY(game_uuid) REFERENCES games(uuid) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS scan_jobs (
            id TEXT PRIMARY KEY,
            library_uuid TEXT NOT NULL,
            folder_path TEXT NOT NULL,
            scan_mode TEXT NOT NULL,
            status TEXT NOT NULL,
            remove_missing INTEGER NOT NULL DEFAULT 0,
            total_folders INTEGER NOT NULL DEFAULT 0,
            folders_success INTEGER NOT NULL DEFAULT 0,
            folders_failed INTEGER NOT NULL DEFAULT 0,
            removed_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            finished_at TEXT NULL,
            FOREIGN KEY(library_uuid) REFERENCES libraries(uuid) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS unmatched_folders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_uuid TEXT NOT NULL,
            scan_job_id TEXT NULL,
            folder_path TEXT NOT NULL UNIQUE,
            cleaned_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Unmatched',
            failed_time TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            FOREIGN KEY(library_uuid) REFERENCES libraries(uuid) ON DELETE CASCADE,
            FOREIGN KEY(scan_job_id) REFERENCES scan_jobs(id) ON DELETE SET NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_uuid TEXT NOT NULL,
            image_type TEXT NOT NULL,
            url TEXT NOT NULL,
            file_name TEXT NOT NULL,
            is_downloaded INTEGER NOT NULL DEFAULT 0,
            download_attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
            UNIQUE(game_uuid, url),
            FOREIGN KEY(game_uuid) REFERENCES games(uuid) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    for (table, assoc, fk) in LOOKUP_TABLES {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)",
            table
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS {assoc} (
                game_uuid TEXT NOT NULL,
                {fk} INTEGER NOT NULL,
                PRIMARY KEY(game_uuid, {fk}),
                FOREIGN KEY(game_uuid) REFERENCES games(uuid) ON DELETE CASCADE,
                FOREIGN KEY({fk}) REFERENCES {table}(id) ON DELETE CASCADE
            )"#
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS global_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            update_folder_name TEXT NOT NULL DEFAULT 'updates',
            extras_folder_name TEXT NOT NULL DEFAULT 'extras',
            enable_delete_game_on_disk INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS system_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            event_text TEXT NOT NULL,
            event_level TEXT NOT NULL DEFAULT 'information',
            audit_user INTEGER NULL,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS release_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rg_name TEXT NOT NULL UNIQUE,
            case_sensitive INTEGER NOT NULL DEFAULT 0
        )"#,
    )
    .execute(pool)
    .await?;

    for table in ["allowed_file_types", "ignored_file_types"] {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, value TEXT NOT NULL UNIQUE)",
            table
        ))
        .execute(pool)
        .await?;
    }

    let indexes = [
        ("idx_games_library", "CREATE INDEX IF NOT EXISTS idx_games_library ON games(library_uuid, name)"),
        ("idx_games_igdb", "CREATE INDEX IF NOT EXISTS idx_games_igdb ON games(igdb_id)"),
        ("idx_downloads_game", "CREATE INDEX IF NOT EXISTS idx_downloads_game ON download_requests(game_uuid, status)"),
        ("idx_scan_jobs_library", "CREATE INDEX IF NOT EXISTS idx_scan_jobs_library ON scan_jobs(library_uuid, created_at DESC)"),
        ("idx_unmatched_library", "CREATE INDEX IF NOT EXISTS idx_unmatched_library ON unmatched_folders(library_uuid, status)"),
        ("idx_images_pending", "CREATE INDEX IF NOT EXISTS idx_images_pending ON images(is_downloaded, download_attempts)"),
        ("idx_events_time", "CREATE INDEX IF NOT EXISTS idx_events_time ON system_events(timestamp DESC)"),
    ];
    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            tracing::warn!("Failed to create index {}: {}", name, e);
        }
    }

    seed_defaults(pool).await?;

    Ok(())
}

/// Inserts the settings row and default filter lists. Existing rows are left alone.
async fn seed_defaults(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query("INSERT OR IGNORE INTO global_settings (id) VALUES (1)").execute(pool).await?;

    let groups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM release_groups").fetch_one(pool).await?;
    if groups == 0 {
        for (name, sensitive) in DEFAULT_RELEASE_GROUPS {
            sqlx::query("INSERT OR IGNORE INTO release_groups (rg_name, case_sensitive) VALUES (?1, ?2)")
                .bind(*name)
                .bind(*sensitive as i64)
                .execute(pool)
                .await?;
        }
        tracing::debug!("Seeded {} release group patterns", DEFAULT_RELEASE_GROUPS.len());
    }

    for (table, defaults) in
        [("allowed_file_types", DEFAULT_ALLOWED_EXTENSIONS), ("ignored_file_types", DEFAULT_IGNORED_EXTENSIONS)]
    {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table)).fetch_one(pool).await?;
        if count == 0 {
            for ext in defaults {
                sqlx::query(&format!("INSERT OR IGNORE INTO {} (value) VALUES (?1)", table))
                    .bind(*ext)
                    .execute(pool)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Release-group patterns split by case sensitivity.
pub async fn load_release_groups(pool: &SqlitePool) -> sqlx::Result<ReleaseGroups> {
    let rows = sqlx::query("SELECT rg_name, case_sensitive FROM release_groups ORDER BY LENGTH(rg_name) DESC")
        .fetch_all(pool)
        .await?;
    let mut groups = ReleaseGroups::default();
    for r in rows {
        let name: String = r.get("rg_name");
        if r.get::<i64, _>("case_sensitive") != 0 {
            groups.sensitive.push(name);
        } else {
            groups.insensitive.push(name);
        }
    }
    Ok(groups)
}

pub async fn load_allowed_extensions(pool: &SqlitePool) -> sqlx::Result<Vec<String>> {
    load_extensions(pool, "allowed_file_types").await
}

pub async fn load_ignored_extensions(pool: &SqlitePool) -> sqlx::Result<Vec<String>> {
    load_extensions(pool, "ignored_file_types").await
}

async fn load_extensions(pool: &SqlitePool, table: &str) -> sqlx::Result<Vec<String>> {
    let values: Vec<String> =
        sqlx::query_scalar(&format!("SELECT value FROM {} ORDER BY value", table)).fetch_all(pool).await?;
    Ok(values
        .into_iter()
        .map(|v| v.trim().trim_start_matches('.').to_lowercase())
        .filter(|v| !v.is_empty())
        .collect())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GlobalSettings {
    pub update_folder_name: String,
    pub extras_folder_name: String,
    pub enable_delete_game_on_disk: bool,
}

impl GlobalSettings {
    /// Folder names left out of download archives.
    pub fn excluded_folders(&self) -> Vec<String> {
        [&self.update_folder_name, &self.extras_folder_name]
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub async fn load_settings(pool: &SqlitePool) -> sqlx::Result<GlobalSettings> {
    let row = sqlx::query(
        "SELECT update_folder_name, extras_folder_name, enable_delete_game_on_disk FROM global_settings WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(GlobalSettings {
        update_folder_name: row.get("update_folder_name"),
        extras_folder_name: row.get("extras_folder_name"),
        enable_delete_game_on_disk: row.get::<i64, _>("enable_delete_game_on_disk") != 0,
    })
}

/// Appends an audit row. Failures are logged, never propagated.
pub async fn log_system_event(pool: &SqlitePool, event_type: &str, event_text: &str, event_level: &str) {
    if let Err(e) =
        sqlx::query("INSERT INTO system_events (event_type, event_text, event_level) VALUES (?1, ?2, ?3)")
            .bind(event_type)
            .bind(event_text)
            .bind(event_level)
            .execute(pool)
            .await
    {
        tracing::warn!("Failed to record system event '{}': {}", event_type, e);
    }
}

/// Returns the id of the lookup row called `name`, inserting it when missing.
pub async fn upsert_lookup(conn: &mut SqliteConnection, table: &str, name: &str) -> sqlx::Result<i64> {
    sqlx::query(&format!("INSERT OR IGNORE INTO {} (name) VALUES (?1)", table))
        .bind(name)
        .execute(&mut *conn)
        .await?;
    sqlx::query_scalar(&format!("SELECT id FROM {} WHERE name = ?1", table))
        .bind(name)
        .fetch_one(&mut *conn)
        .await
}

/// Links a game to every named lookup value of one kind.
pub async fn link_lookups(
    conn: &mut SqliteConnection,
    game_uuid: &str,
    lookup: (&str, &str, &str),
    names: &[String],
) -> sqlx::Result<()> {
    let (table, assoc, fk) = lookup;
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let id = upsert_lookup(conn, table, name).await?;
        sqlx::query(&format!("INSERT OR IGNORE INTO {} (game_uuid, {}) VALUES (?1, ?2)", assoc, fk))
            .bind(game_uuid)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Names of the lookup values linked to a game, for one lookup kind.
pub async fn linked_names(pool: &SqlitePool, game_uuid: &str, lookup: (&str, &str, &str)) -> sqlx::Result<Vec<String>> {
    let (table, assoc, fk) = lookup;
    sqlx::query_scalar(&format!(
        "SELECT t.name FROM {table} t JOIN {assoc} a ON a.{fk} = t.id WHERE a.game_uuid = ?1 ORDER BY t.name"
    ))
    .bind(game_uuid)
    .fetch_all(pool)
    .await
}
