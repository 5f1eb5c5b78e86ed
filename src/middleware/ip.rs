use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

/// Client IP from `X-Forwarded-For` / `X-Real-IP`, else the transport address,
/// else loopback.
pub fn extract_ip_from_headers(headers: &HeaderMap, fallback: Option<IpAddr>) -> IpAddr {
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|hv| hv.to_str().ok())
        .and_then(|h| h.split(',').next())
    {
        if let Ok(ip) = first.trim().parse::<IpAddr>() {
            return ip;
        }
    }
    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|hv| hv.to_str().ok())
        .and_then(|h| h.trim().parse::<IpAddr>().ok())
    {
        return ip;
    }
    fallback.unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Transport address of the peer, if the server recorded one. Never rejects,
/// so handlers also work when driven without a socket (tests, `oneshot`).
#[derive(Clone, Copy, Debug, Default)]
pub struct MaybeRemoteAddr(pub Option<SocketAddr>);

impl MaybeRemoteAddr {
    /// Client IP for rate limiting: proxy headers first, then this address.
    pub fn client_ip(&self, headers: &HeaderMap) -> IpAddr {
        extract_ip_from_headers(headers, self.0.map(|addr| addr.ip()))
    }
}

impl<S> FromRequestParts<S> for MaybeRemoteAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeRemoteAddr(parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0)))
    }
}
