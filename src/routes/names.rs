use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};

use crate::{
    db,
    error::{validation::validate_name, AppResult},
    naming::NameCleaner,
    state::AppState,
    types::{CleanNameQuery, CleanNameResponse},
};

/// Runs the folder-name heuristic with the release groups stored in the
/// database. Handy for checking why a folder did not match.
pub async fn clean_name(
    State(state): State<AppState>,
    Query(q): Query<CleanNameQuery>,
) -> AppResult<impl IntoResponse> {
    validate_name(&q.raw, "raw", 512)?;
    let cleaner = NameCleaner::new(&db::load_release_groups(&state.db).await?);
    let cleaned = cleaner.clean(&q.raw);
    Ok(Json(CleanNameResponse { raw: q.raw, cleaned }))
}
