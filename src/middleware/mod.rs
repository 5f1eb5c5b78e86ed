//! Cross-cutting request handling: authentication, rate limiting, request
//! validation and response security headers.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use rate_limit::EndpointRateLimiter;
