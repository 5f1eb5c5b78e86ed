//! Response hardening: security headers plus a caching policy per content type.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::config::AppConfig;

/// Adds `nosniff`, frame, referrer and cross-origin headers to every response,
/// HSTS and CSP when configured, and sets `Cache-Control`:
///
/// - JSON and SSE: `no-store`
/// - cover images: cached for a day
/// - prepared downloads (`application/zip`, `application/octet-stream`): `private, no-store`
pub async fn security_headers_middleware(
    State(cfg): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
    headers.insert(HeaderName::from_static("referrer-policy"), HeaderValue::from_static("no-referrer"));
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );

    if let Some(sec) = cfg.security.as_ref() {
        if sec.enable_hsts.unwrap_or(false) {
            let max_age = sec.hsts_max_age.unwrap_or(31536000);
            let include_sub =
                if sec.hsts_include_subdomains.unwrap_or(false) { "; includeSubDomains" } else { "" };
            let value = format!("max-age={}{}", max_age, include_sub);
            headers.insert(
                HeaderName::from_static("strict-transport-security"),
                HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("max-age=31536000")),
            );
        }
        if let Some(val) = sec.csp.as_deref().filter(|c| !c.trim().is_empty()).and_then(|c| HeaderValue::from_str(c).ok()) {
            headers.insert(HeaderName::from_static("content-security-policy"), val);
        }
    }

    let content_type = headers.get(CONTENT_TYPE).and_then(|ct| ct.to_str().ok()).map(str::to_string);
    if let Some(ct) = content_type.as_deref() {
        if ct.starts_with("application/json") || ct.starts_with("text/event-stream") {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            if ct.starts_with("text/event-stream") {
                // Keep reverse proxies from buffering scan progress
                headers.insert(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"));
            }
        } else if ct.starts_with("image/") {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));
            headers.remove(PRAGMA);
        } else if ct.starts_with("application/zip") || ct.starts_with("application/octet-stream") {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, no-store"));
        }
    }

    res
}
