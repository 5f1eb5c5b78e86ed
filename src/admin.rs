//! Operator tooling behind the `create-admin` and `reconcile-paths`
//! subcommands.

use std::path::{Path, PathBuf};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::naming::NameCleaner;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Creates the first admin account. Refuses when any admin already exists.
pub async fn create_admin(pool: &SqlitePool, username: &str, email: &str, password: &str) -> anyhow::Result<i64> {
    let username = username.trim();
    let email = email.trim();
    if username.is_empty() || email.is_empty() {
        anyhow::bail!("username and email must not be empty");
    }
    if !email.contains('@') {
        anyhow::bail!("'{}' is not a valid email address", email);
    }
    if password.chars().count() < 8 {
        anyhow::bail!("password must be at least 8 characters");
    }

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin'").fetch_one(pool).await?;
    if admins > 0 {
        anyhow::bail!("an admin user already exists");
    }

    let hash = hash_password(password)?;
    let id = sqlx::query("INSERT INTO users (username, email, password_hash, role) VALUES (?1, ?2, ?3, 'admin')")
        .bind(username)
        .bind(email)
        .bind(&hash)
        .execute(pool)
        .await?
        .last_insert_rowid();

    db::log_system_event(pool, "admin_created", &format!("Admin user '{}' created", username), "information").await;
    tracing::info!("Created admin user '{}' (id {})", username, id);
    Ok(id)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PathMatch {
    pub game_uuid: String,
    pub game_name: String,
    pub old_path: String,
    /// Best candidate on disk, if any reached the threshold.
    pub new_path: Option<String>,
    pub similarity: f64,
    pub applied: bool,
}

/// Finds new locations for games whose path vanished from disk.
///
/// Every missing game of the library is compared against the entries of
/// `root` by normalized Levenshtein similarity of their cleaned names. The
/// best candidate at or above `threshold` is reported, and written to the
/// game row when `apply` is set. Entries already used by another game are
/// not offered.
pub async fn reconcile_paths(
    pool: &SqlitePool,
    library_uuid: &str,
    root: &Path,
    threshold: f64,
    apply: bool,
) -> anyhow::Result<Vec<PathMatch>> {
    if !(0.0..=1.0).contains(&threshold) {
        anyhow::bail!("threshold must be between 0 and 1");
    }
    let cleaner = NameCleaner::new(&db::load_release_groups(pool).await?);

    let root_owned = root.to_path_buf();
    let entries: Vec<PathBuf> = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<PathBuf>> {
        let mut out: Vec<PathBuf> = std::fs::read_dir(&root_owned)?.filter_map(Result::ok).map(|e| e.path()).collect();
        out.sort();
        Ok(out)
    })
    .await??;

    let claimed: Vec<String> = sqlx::query_scalar("SELECT full_disk_path FROM games").fetch_all(pool).await?;
    let mut candidates: Vec<(PathBuf, String)> = entries
        .into_iter()
        .filter(|p| !claimed.iter().any(|c| Path::new(c) == p.as_path()))
        .map(|p| {
            let raw = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let stem = if p.is_file() { Path::new(&raw).file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or(raw) } else { raw };
            let cleaned = cleaner.clean(&stem).to_lowercase();
            (p, cleaned)
        })
        .collect();

    let rows = sqlx::query("SELECT uuid, name, full_disk_path FROM games WHERE library_uuid = ?1 ORDER BY name")
        .bind(library_uuid)
        .fetch_all(pool)
        .await?;

    let mut report = Vec::new();
    for r in rows {
        let old_path: String = r.get("full_disk_path");
        if tokio::fs::try_exists(&old_path).await.unwrap_or(true) {
            continue;
        }
        let game_uuid: String = r.get("uuid");
        let game_name: String = r.get("name");
        let wanted = cleaner.clean(&game_name).to_lowercase();

        let best = candidates
            .iter()
            .enumerate()
            .map(|(i, (_, cleaned))| (i, strsim::normalized_levenshtein(&wanted, cleaned)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let mut entry =
            PathMatch { game_uuid, game_name, old_path, new_path: None, similarity: 0.0, applied: false };
        if let Some((idx, score)) = best {
            entry.similarity = score;
            if score >= threshold {
                let (path, _) = candidates.remove(idx);
                let new_path = path.to_string_lossy().to_string();
                if apply {
                    sqlx::query(
                        "UPDATE games SET full_disk_path = ?1, last_updated = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE uuid = ?2",
                    )
                    .bind(&new_path)
                    .bind(&entry.game_uuid)
                    .execute(pool)
                    .await?;
                    entry.applied = true;
                    db::log_system_event(
                        pool,
                        "path_reconciled",
                        &format!("Moved '{}' from {} to {}", entry.game_name, entry.old_path, new_path),
                        "information",
                    )
                    .await;
                }
                entry.new_path = Some(new_path);
            }
        }
        report.push(entry);
    }
    Ok(report)
}
