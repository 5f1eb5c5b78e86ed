#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::SecurityConfig;
    use crate::routes;
    use crate::state::AppState;
    use crate::tests::support::{test_config, test_pool};

    async fn setup_test_app(dir: &TempDir, security: Option<SecurityConfig>) -> Router {
        let mut cfg = test_config(dir.path());
        cfg.security = security;
        routes::router(AppState::new(test_pool().await, cfg))
    }

    async fn get(app: &Router, uri: &str, token: Option<&str>) -> axum::response::Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        app.clone().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn body_bytes(res: axum::response::Response) -> Vec<u8> {
        res.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_healthz_and_readyz() {
        let dir = TempDir::new().unwrap();
        let app = setup_test_app(&dir, None).await;

        let res = get(&app, "/healthz", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_bytes(res).await, b"ok");

        let res = get(&app, "/readyz", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_bytes(res).await, b"ready");
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let dir = TempDir::new().unwrap();
        let app = setup_test_app(&dir, None).await;

        let res = get(&app, "/version", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_bytes(res).await).unwrap();
        assert_eq!(json["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert!(json["build"]["profile"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoints() {
        let dir = TempDir::new().unwrap();
        let app = setup_test_app(&dir, None).await;

        let res = get(&app, "/metrics", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_bytes(res).await).unwrap();
        assert_eq!(json["scans_started"], 0);
        assert_eq!(json["downloads_prepared"], 0);
        assert!(json["uptime_seconds"].is_u64());

        let res = get(&app, "/metrics/prometheus", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let content_type = res.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));
        let text = String::from_utf8(body_bytes(res).await).unwrap();
        assert!(text.contains("# TYPE sharewarez_scans_started counter"));
        assert!(text.contains("sharewarez_bytes_packaged 0"));
        assert!(text.contains("# TYPE sharewarez_uptime_seconds gauge"));
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let dir = TempDir::new().unwrap();
        let app = setup_test_app(&dir, None).await;

        let res = get(&app, "/metrics", None).await;
        let headers = res.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn test_hsts_when_enabled() {
        let dir = TempDir::new().unwrap();
        let security = SecurityConfig {
            enable_hsts: Some(true),
            hsts_max_age: Some(600),
            hsts_include_subdomains: Some(true),
            ..Default::default()
        };
        let app = setup_test_app(&dir, Some(security)).await;

        let res = get(&app, "/healthz", None).await;
        assert_eq!(res.headers().get("strict-transport-security").unwrap(), "max-age=600; includeSubDomains");
    }

    #[tokio::test]
    async fn test_bearer_token_required_when_configured() {
        let dir = TempDir::new().unwrap();
        let security = SecurityConfig { api_token: Some("s3cret".into()), ..Default::default() };
        let app = setup_test_app(&dir, Some(security)).await;

        // Health checks stay public
        for uri in ["/healthz", "/readyz", "/version"] {
            assert_eq!(get(&app, uri, None).await.status(), StatusCode::OK, "{}", uri);
        }

        let res = get(&app, "/libraries", None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let json: Value = serde_json::from_slice(&body_bytes(res).await).unwrap();
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");

        assert_eq!(get(&app, "/libraries", Some("wrong")).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(get(&app, "/metrics", Some("s3cret")).await.status(), StatusCode::OK);
        assert_eq!(get(&app, "/libraries", Some("s3cret")).await.status(), StatusCode::OK);
    }
}
