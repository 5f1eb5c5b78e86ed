#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{Body, Bytes},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::routes;
    use crate::scanner::catalog;
    use crate::state::AppState;
    use crate::tests::support::{insert_library, metadata, test_state, StubMetadata};

    async fn send_raw(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder.header(header::CONTENT_TYPE, "application/json").body(Body::from(v.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, _, bytes) = send_raw(app, method, uri, body).await;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
        (status, value)
    }

    async fn create_library(app: &Router, name: &str, root: &Path) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/libraries",
            Some(json!({ "name": name, "platform": "pcwin", "watch_path": root.to_string_lossy() })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["uuid"].as_str().unwrap().to_string()
    }

    /// Polls `uri` until `field` leaves the given in-flight values.
    async fn wait_until_settled(app: &Router, uri: &str, field: &str, in_flight: &[&str]) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let (status, body) = send(app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            let current = body[field].as_str().unwrap_or_default().to_string();
            if !in_flight.contains(&current.as_str()) {
                return body;
            }
            assert!(tokio::time::Instant::now() < deadline, "{} still {} after 10s", uri, current);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// The job handle is dropped just after the final status is written.
    async fn wait_for_idle(state: &AppState, library: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while crate::scanner::library_has_running_job(state, library).await {
            assert!(tokio::time::Instant::now() < deadline, "scan handle for {} never released", library);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn games_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("library");
        fs::create_dir_all(root.join("Doom-GOG")).unwrap();
        fs::write(root.join("Doom-GOG/doom.exe"), b"0123456789").unwrap();
        fs::create_dir_all(root.join("Unknown.Thing")).unwrap();
        fs::write(root.join("Unknown.Thing/thing.bin"), b"abc").unwrap();
        dir
    }

    fn app_with(state: AppState) -> Router {
        routes::router(state)
    }

    #[tokio::test]
    async fn test_library_crud() {
        let dir = games_root();
        let root = dir.path().join("library");
        let app = app_with(test_state(dir.path()).await);

        let uuid = create_library(&app, "PC Games", &root).await;

        let (status, body) = send(&app, Method::GET, &format!("/libraries/{}", uuid), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "PC Games");
        assert_eq!(body["platform"], "PCWIN");
        assert_eq!(body["scan_mode"], "folders");
        assert_eq!(body["game_count"], 0);

        // Duplicate name
        let (status, _) = send(&app, Method::POST, "/libraries", Some(json!({ "name": "PC Games" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) =
            send(&app, Method::POST, "/libraries", Some(json!({ "name": "Dreamcast", "platform": "DC" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let missing = dir.path().join("nope").to_string_lossy().to_string();
        let (status, _) =
            send(&app, Method::POST, "/libraries", Some(json!({ "name": "Missing", "watch_path": missing }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&app, Method::POST, "/libraries", Some(json!({ "name": "Auto", "auto_scan": true }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            send(&app, Method::POST, "/libraries", Some(json!({ "name": "Retro", "platform": "snes" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["watch_path"].is_null());

        let (status, body) = send(&app, Method::GET, "/libraries", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body.as_array().unwrap().iter().map(|l| l["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["PC Games", "Retro"]);

        let (status, _) = send(&app, Method::DELETE, &format!("/libraries/{}", uuid), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::GET, &format!("/libraries/{}", uuid), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        // Files on disk stay
        assert!(root.join("Doom-GOG").is_dir());
    }

    #[tokio::test]
    async fn test_scan_match_and_triage_flow() {
        let dir = games_root();
        let root = dir.path().join("library");
        let stub = StubMetadata::with_games(vec![metadata(1942, "Doom"), metadata(7, "The Unknown Thing")]);
        let state = test_state(dir.path()).await.with_metadata(Some(Arc::new(stub)));
        let app = app_with(state.clone());
        let library = create_library(&app, "PC", &root).await;

        let (status, body) = send(&app, Method::POST, "/scans", Some(json!({ "library_uuid": library }))).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
        let scan_id = body["id"].as_str().unwrap().to_string();

        let scan = wait_until_settled(&app, &format!("/scans/{}", scan_id), "status", &["Scheduled", "Running"]).await;
        assert_eq!(scan["status"], "Completed");
        assert_eq!(scan["total_folders"], 2);
        assert_eq!(scan["folders_success"], 1);
        assert_eq!(scan["folders_failed"], 1);

        let (_, scans) = send(&app, Method::GET, &format!("/scans?library_uuid={}", library), None).await;
        assert_eq!(scans.as_array().unwrap().len(), 1);

        let (status, games) = send(&app, Method::GET, &format!("/libraries/{}/games", library), None).await;
        assert_eq!(status, StatusCode::OK);
        let games = games.as_array().unwrap().clone();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0]["name"], "Doom");
        assert_eq!(games[0]["igdb_id"], 1942);
        assert_eq!(games[0]["size"], 10);

        let game_uuid = games[0]["uuid"].as_str().unwrap();
        let (status, detail) = send(&app, Method::GET, &format!("/games/{}", game_uuid), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["genres"], json!(["Role-playing (RPG)"]));
        assert_eq!(detail["developers"], json!(["Studio"]));
        assert_eq!(detail["images"].as_array().unwrap().len(), 2);

        let (status, unmatched) = send(&app, Method::GET, &format!("/scans/{}/unmatched", scan_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let unmatched = unmatched.as_array().unwrap().clone();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0]["cleaned_name"], "Unknown Thing");
        assert_eq!(unmatched[0]["status"], "Unmatched");
        let unmatched_id = unmatched[0]["id"].as_i64().unwrap();

        let uri = format!("/unmatched/{}", unmatched_id);
        let (status, body) = send(&app, Method::PATCH, &uri, Some(json!({ "status": "Ignore" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Ignore");
        let (status, _) = send(&app, Method::PATCH, &uri, Some(json!({ "status": "Duplicate" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::PATCH, "/unmatched/9999", Some(json!({ "status": "Ignore" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let match_uri = format!("/unmatched/{}/match", unmatched_id);
        let (status, _) = send(&app, Method::POST, &match_uri, Some(json!({ "igdb_id": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::POST, &match_uri, Some(json!({ "igdb_id": 404 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, game) = send(&app, Method::POST, &match_uri, Some(json!({ "igdb_id": 7 }))).await;
        assert_eq!(status, StatusCode::CREATED, "{}", game);
        assert_eq!(game["name"], "The Unknown Thing");
        assert_eq!(game["igdb_id"], 7);
        assert_eq!(game["size"], 3);

        // The folder left the triage list
        let (status, _) = send(&app, Method::POST, &match_uri, Some(json!({ "igdb_id": 7 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, library_body) = send(&app, Method::GET, &format!("/libraries/{}", library), None).await;
        assert_eq!(library_body["game_count"], 2);

        // A rescan finds nothing new
        wait_for_idle(&state, &library).await;
        let (status, body) = send(&app, Method::POST, "/scans", Some(json!({ "library_uuid": library }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let uri = format!("/scans/{}", body["id"].as_str().unwrap());
        let scan = wait_until_settled(&app, &uri, "status", &["Scheduled", "Running"]).await;
        assert_eq!(scan["status"], "Completed");
        let (_, games) = send(&app, Method::GET, &format!("/libraries/{}/games", library), None).await;
        assert_eq!(games.as_array().unwrap().len(), 2);

        // Finished scans can be purged
        wait_for_idle(&state, &library).await;
        let (status, _) = send(&app, Method::DELETE, &format!("{}?purge=true", uri), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scan_request_validation() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path()).await;
        let bare = insert_library(&state.db, "No Path", None).await;
        let app = app_with(state);

        let (status, _) = send(&app, Method::POST, "/scans", Some(json!({ "library_uuid": "not-a-uuid" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = uuid::Uuid::new_v4().to_string();
        let (status, _) = send(&app, Method::POST, "/scans", Some(json!({ "library_uuid": unknown }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // No watch path and no folder
        let (status, _) = send(&app, Method::POST, "/scans", Some(json!({ "library_uuid": bare }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Method::POST,
            "/scans",
            Some(json!({ "library_uuid": bare, "folder_path": "/games/../etc" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, &format!("/scans/{}/events", unknown), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::DELETE, &format!("/scans/{}", unknown), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scan_without_metadata_adds_cleaned_names() {
        let dir = games_root();
        let root = dir.path().join("library");
        let app = app_with(test_state(dir.path()).await);
        let library = create_library(&app, "PC", &root).await;

        let (status, body) = send(&app, Method::POST, "/scans", Some(json!({ "library_uuid": library }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let uri = format!("/scans/{}", body["id"].as_str().unwrap());
        let scan = wait_until_settled(&app, &uri, "status", &["Scheduled", "Running"]).await;
        assert_eq!(scan["status"], "Completed");

        let (_, games) = send(&app, Method::GET, &format!("/libraries/{}/games", library), None).await;
        let names: Vec<&str> = games.as_array().unwrap().iter().map(|g| g["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Doom", "Unknown Thing"]);
        assert!(games[0]["igdb_id"].is_null());

        let (status, body) = send(&app, Method::GET, "/igdb/search?name=Doom", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
        let (status, _) = send(&app, Method::POST, "/unmatched/1/match", Some(json!({ "igdb_id": 1 }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_delete_game_respects_settings() {
        let dir = games_root();
        let root = dir.path().join("library");
        let state = test_state(dir.path()).await;
        let library = insert_library(&state.db, "PC", Some(&root)).await;
        let doom_path = root.join("Doom-GOG");
        let thing_path = root.join("Unknown.Thing");
        let doom = catalog::create_game(&state.db, &library, "Doom", &doom_path.to_string_lossy(), 10, None)
            .await
            .unwrap();
        let thing = catalog::create_game(&state.db, &library, "Thing", &thing_path.to_string_lossy(), 3, None)
            .await
            .unwrap();
        let db = state.db.clone();
        let app = app_with(state);

        let (status, _) = send(&app, Method::DELETE, &format!("/games/{}?delete_files=true", doom), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, Method::DELETE, &format!("/games/{}", doom), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(doom_path.is_dir());
        let (status, _) = send(&app, Method::GET, &format!("/games/{}", doom), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        sqlx::query("UPDATE global_settings SET enable_delete_game_on_disk = 1").execute(&db).await.unwrap();
        let (status, _) = send(&app, Method::DELETE, &format!("/games/{}?delete_files=true", thing), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!thing_path.exists());

        let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM system_events WHERE event_type = 'game_removed'")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(events, 2);
    }

    #[tokio::test]
    async fn test_download_flow() {
        let dir = games_root();
        let root = dir.path().join("library");
        let game_dir = root.join("Big Game");
        fs::create_dir_all(game_dir.join("data")).unwrap();
        fs::write(game_dir.join("setup.exe"), b"setup").unwrap();
        fs::write(game_dir.join("data/main.pak"), b"pak").unwrap();

        let state = test_state(dir.path()).await;
        let library = insert_library(&state.db, "PC", Some(&root)).await;
        let game = catalog::create_game(&state.db, &library, "Big Game", &game_dir.to_string_lossy(), 8, None)
            .await
            .unwrap();
        let app = app_with(state);

        let uri = format!("/games/{}/download", game);
        let (status, body) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
        assert_eq!(body["game_name"], "Big Game");
        let id = body["id"].as_i64().unwrap();

        // An open request is handed back instead of queueing another one
        let (status, body) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"].as_i64().unwrap(), id);

        let download =
            wait_until_settled(&app, &format!("/downloads/{}", id), "status", &["pending", "processing"]).await;
        assert_eq!(download["status"], "available", "{}", download);
        assert_eq!(download["is_direct"], false);

        let (status, headers, bytes) = send_raw(&app, Method::GET, &format!("/downloads/{}/file", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let disposition = headers.get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.starts_with("attachment;"));
        assert!(disposition.contains("Big Game_"));
        assert!(disposition.ends_with(".zip\""));
        assert_eq!(&bytes[..2], b"PK");

        let (_, list) = send(&app, Method::GET, "/downloads", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let zips = dir.path().join("zips");
        assert_eq!(fs::read_dir(&zips).unwrap().count(), 1);
        let (status, _) = send(&app, Method::DELETE, &format!("/downloads/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(fs::read_dir(&zips).unwrap().count(), 0);
        let (status, _) = send(&app, Method::GET, &format!("/downloads/{}/file", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_request_errors() {
        let dir = games_root();
        let root = dir.path().join("library");
        let state = test_state(dir.path()).await;
        let library = insert_library(&state.db, "PC", Some(&root)).await;
        let game = catalog::create_game(&state.db, &library, "Doom", &root.join("Doom-GOG").to_string_lossy(), 10, None)
            .await
            .unwrap();
        let app = app_with(state);

        let (status, _) =
            send(&app, Method::POST, &format!("/games/{}/download", uuid::Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::POST, &format!("/games/{}/download?user_id=99", game), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, "/downloads/12345", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clean_name_and_search() {
        let dir = TempDir::new().unwrap();
        let stub = StubMetadata::with_games(vec![metadata(1942, "Doom")]);
        let app = app_with(test_state(dir.path()).await.with_metadata(Some(Arc::new(stub))));

        let (status, body) =
            send(&app, Method::GET, "/names/clean?raw=The_Witcher_3_Wild_Hunt_GOTY_Edition", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleaned"], "The Witcher 3 Wild Hunt");
        assert_eq!(body["raw"], "The_Witcher_3_Wild_Hunt_GOTY_Edition");

        let (status, _) = send(&app, Method::GET, "/names/clean?raw=%20%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::GET, "/igdb/search?name=doom", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["igdb_id"], 1942);

        let (status, _) = send(&app, Method::GET, "/igdb/search?name=", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected_before_routing() {
        let dir = TempDir::new().unwrap();
        let app = app_with(test_state(dir.path()).await);
        let (status, body) = send(&app, Method::GET, "/images/..%2f..%2fetc/passwd", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_endpoint_limits_are_per_peer() {
        use axum::extract::ConnectInfo;
        use std::net::SocketAddr;

        use crate::middleware::rate_limit::EndpointRateLimiter;

        let dir = TempDir::new().unwrap();
        let mut state = test_state(dir.path()).await;
        state.rate_limiter = EndpointRateLimiter::new().with_limits(vec![("/scans", 2, 60)]);
        let app = app_with(state);

        let scan_from = |peer: [u8; 4]| {
            let mut req = Request::builder()
                .method(Method::POST)
                .uri("/scans")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "library_uuid": "not-a-uuid" }).to_string()))
                .unwrap();
            req.extensions_mut().insert(ConnectInfo(SocketAddr::from((peer, 4000))));
            req
        };

        for _ in 0..2 {
            let res = app.clone().oneshot(scan_from([10, 0, 0, 1])).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
        let res = app.clone().oneshot(scan_from([10, 0, 0, 1])).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        // A second client behind its own address has a fresh budget
        let res = app.clone().oneshot(scan_from([10, 0, 0, 2])).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        // Proxy headers still take precedence over the socket address
        let mut forwarded = scan_from([10, 0, 0, 1]);
        forwarded.headers_mut().insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        let res = app.oneshot(forwarded).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
