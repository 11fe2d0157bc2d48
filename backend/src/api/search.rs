use crate::models::{
    AggregateSnapshot, ErrorResponse, KeywordResults, SearchResponse, SessionId,
    WordStatsResponse,
};
use crate::services::session_service::AggregateScope;
use crate::AppState;
use log::error;
use rocket::serde::json::Json;
use rocket::{get, State};

#[get("/search?<query>")]
pub async fn search_videos(
    query: &str,
    session: SessionId,
    state: &State<AppState>,
) -> Result<Json<SearchResponse>, ErrorResponse> {
    match state.sessions.search(&session.0, query).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Search for '{query}' failed: {e}");
            Err(e.into())
        }
    }
}

#[get("/history")]
pub fn get_history(session: SessionId, state: &State<AppState>) -> Json<Vec<KeywordResults>> {
    Json(state.sessions.get_history(&session.0))
}

/// Aggregates for one keyword, or over the whole session when none is given.
#[get("/aggregates?<keyword>")]
pub async fn get_aggregates(
    keyword: Option<String>,
    session: SessionId,
    state: &State<AppState>,
) -> Result<Json<AggregateSnapshot>, ErrorResponse> {
    let scope = match keyword {
        Some(keyword) => AggregateScope::Keyword(keyword),
        None => AggregateScope::Overall,
    };

    state
        .sessions
        .get_aggregates(&session.0, scope)
        .await
        .map(Json)
        .map_err(ErrorResponse::from)
}

#[get("/wordstats/<keyword>")]
pub async fn get_word_stats(
    keyword: &str,
    session: SessionId,
    state: &State<AppState>,
) -> Result<Json<WordStatsResponse>, ErrorResponse> {
    match state.sessions.word_stats_for(&session.0, keyword).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Word stats for '{keyword}' failed: {e}");
            Err(e.into())
        }
    }
}
