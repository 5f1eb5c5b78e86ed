use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{AppError, AppResult};

const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Upper bound for request bodies. `SHAREWAREZ_MAX_BODY_SIZE` overrides the
/// 1 MiB default, clamped to 64 KiB..=16 MiB.
pub fn max_body_size() -> usize {
    std::env::var("SHAREWAREZ_MAX_BODY_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_SIZE)
        .clamp(64 * 1024, 16 * 1024 * 1024)
}

/// Rejects traversal sequences in the URI and oversized bodies before routing.
/// Scanner-like user agents are only logged.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    if contains_path_traversal(req.uri().path()) {
        return AppError::BadRequest("Path traversal detected in request".into()).into_response();
    }

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    if matches!(req.method(), &Method::POST | &Method::PUT | &Method::PATCH) {
        let length = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<usize>().ok());
        let max = max_body_size();
        if let Some(length) = length.filter(|l| *l > max) {
            tracing::debug!("Rejecting body of {} bytes", length);
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "error": {
                        "code": "PAYLOAD_TOO_LARGE",
                        "message": format!("Request body exceeds maximum size of {} bytes", max),
                    },
                    "status": 413,
                })),
            )
                .into_response();
        }
    }

    next.run(req).await
}

/// Detects `..` segments, `/./` and their percent-encoded forms, and NUL bytes.
pub fn contains_path_traversal(path: &str) -> bool {
    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") || path.contains("....") {
        return true;
    }

    let lower = path.to_lowercase();
    const ENCODED: [&str; 11] =
        ["%2e%2e", "%252e%252e", "%2e/", "%252e%2f", "/%2e", "%2f%2e", "%2e\\", "%2e%5c", "%5c%2e", "%5c%5c", "%00"];
    if ENCODED.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua = ua.to_lowercase();
    ua.contains("scanner")
        || (ua.contains("crawler") && !ua.contains("googlebot") && !ua.contains("bingbot"))
        || ["nikto", "sqlmap", "havij", "acunetix"].iter().any(|s| ua.contains(s))
}

/// Checks a filesystem path supplied in a request body (library roots, scan
/// folders). Traversal segments are refused because these paths are used
/// verbatim for scanning.
pub fn validate_file_path(field: &str, path: &str) -> AppResult<()> {
    const MAX_PATH_LENGTH: usize = 4096;

    crate::error::validation::validate_path(path).map_err(|_| AppError::ValidationError {
        field: field.to_string(),
        message: "Path must not be empty or contain NUL characters".into(),
    })?;
    if contains_path_traversal(path) {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: "Path traversal is not allowed".into(),
        });
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: format!("Path exceeds maximum length of {} characters", MAX_PATH_LENGTH),
        });
    }
    Ok(())
}

/// Strips control characters and caps the length of user input before it
/// goes into a log line.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}
