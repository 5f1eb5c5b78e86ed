use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::AppConfig;
use crate::error::AppError;

/// Health checks stay reachable without a token.
const PUBLIC_PATHS: &[&str] = &["/healthz", "/readyz", "/version"];

/// Enforces `Authorization: Bearer <security.api_token>` when a token is
/// configured. Without one the middleware is a no-op.
pub async fn auth_middleware(State(cfg): State<Arc<AppConfig>>, req: Request, next: Next) -> Response {
    let Some(expected) = cfg.api_token() else {
        return next.run(req).await;
    };
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(token.trim().as_bytes(), expected.as_bytes()) => next.run(req).await,
        Some(_) => AppError::Unauthorized("Invalid API token".into()).into_response(),
        None => AppError::Unauthorized("Missing bearer token".into()).into_response(),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::constant_time_eq;

    #[test]
    fn compares_tokens() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
    }
}
