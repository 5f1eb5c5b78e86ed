#[cfg(test)]
mod tests {
    use crate::db::{self, LOOKUP_TABLES};
    use crate::tests::support::{insert_library, test_pool};

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let pool = test_pool().await;
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();

        for expected in [
            "libraries",
            "games",
            "users",
            "download_requests",
            "scan_jobs",
            "unmatched_folders",
            "images",
            "global_settings",
            "system_events",
            "release_groups",
            "allowed_file_types",
            "ignored_file_types",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }
        for (table, assoc, _) in LOOKUP_TABLES {
            assert!(tables.contains(&table.to_string()));
            assert!(tables.contains(&assoc.to_string()));
        }
    }

    #[tokio::test]
    async fn test_init_db_is_idempotent() {
        let pool = test_pool().await;
        db::init_db(&pool).await.unwrap();
        let settings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM global_settings").fetch_one(&pool).await.unwrap();
        assert_eq!(settings, 1);
        let groups = db::load_release_groups(&pool).await.unwrap();
        let seeded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM release_groups").fetch_one(&pool).await.unwrap();
        assert_eq!((groups.insensitive.len() + groups.sensitive.len()) as i64, seeded);
    }

    #[tokio::test]
    async fn test_seeded_defaults() {
        let pool = test_pool().await;
        let groups = db::load_release_groups(&pool).await.unwrap();
        assert!(groups.insensitive.iter().any(|g| g == "-GOG"));
        assert!(groups.sensitive.iter().any(|g| g == "-CPY"));

        let allowed = db::load_allowed_extensions(&pool).await.unwrap();
        let ignored = db::load_ignored_extensions(&pool).await.unwrap();
        assert!(allowed.contains(&"iso".to_string()));
        assert!(ignored.contains(&"nfo".to_string()));

        let settings = db::load_settings(&pool).await.unwrap();
        assert!(!settings.enable_delete_game_on_disk);
        assert_eq!(settings.excluded_folders(), vec!["updates".to_string(), "extras".to_string()]);
    }

    #[tokio::test]
    async fn test_lookups_are_shared_and_listed() {
        let pool = test_pool().await;
        let library = insert_library(&pool, "PC", None).await;
        for (uuid, path) in [("g1", "/games/one"), ("g2", "/games/two")] {
            sqlx::query("INSERT INTO games (uuid, library_uuid, name, full_disk_path) VALUES (?1, ?2, ?3, ?4)")
                .bind(uuid)
                .bind(&library)
                .bind(uuid)
                .bind(path)
                .execute(&pool)
                .await
                .unwrap();
        }

        let genres = LOOKUP_TABLES[0];
        let mut conn = pool.acquire().await.unwrap();
        db::link_lookups(&mut *conn, "g1", genres, &["Shooter".into(), " Puzzle ".into(), "".into()]).await.unwrap();
        db::link_lookups(&mut *conn, "g2", genres, &["Shooter".into()]).await.unwrap();
        drop(conn);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM genres").fetch_one(&pool).await.unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            db::linked_names(&pool, "g1", genres).await.unwrap(),
            vec!["Puzzle".to_string(), "Shooter".to_string()]
        );
    }

    #[tokio::test]
    async fn test_library_delete_cascades() {
        let pool = test_pool().await;
        let library = insert_library(&pool, "PC", None).await;
        sqlx::query("INSERT INTO games (uuid, library_uuid, name, full_disk_path) VALUES ('g1', ?1, 'One', '/g/one')")
            .bind(&library)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO download_requests (game_uuid, status) VALUES ('g1', 'pending')")
            .execute(&pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM libraries WHERE uuid = ?1").bind(&library).execute(&pool).await.unwrap();
        let games: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games").fetch_one(&pool).await.unwrap();
        let requests: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_requests").fetch_one(&pool).await.unwrap();
        assert_eq!((games, requests), (0, 0));
    }

    #[tokio::test]
    async fn test_system_events_are_recorded() {
        let pool = test_pool().await;
        db::log_system_event(&pool, "test_event", "something happened", "warning").await;
        let (kind, level): (String, String) =
            sqlx::query_as("SELECT event_type, event_level FROM system_events ORDER BY id DESC LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((kind.as_str(), level.as_str()), ("test_event", "warning"));
    }
}
