use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};

use crate::{
    error::{validation::validate_name, AppError, AppResult},
    middleware::ip::MaybeRemoteAddr,
    state::AppState,
    types::IgdbSearchQuery,
};

pub async fn search_igdb(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Query(q): Query<IgdbSearchQuery>,
) -> AppResult<impl IntoResponse> {
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/igdb/search", ip).await?;

    validate_name(&q.name, "name", 200)?;
    let metadata = state
        .metadata
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("IGDB credentials are not configured".into()))?;

    let limit = q.limit.unwrap_or(10).clamp(1, 50);
    let results = metadata.search_by_name(q.name.trim(), limit).await?;
    Ok(Json(results))
}
