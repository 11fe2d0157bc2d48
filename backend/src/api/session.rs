use crate::models::{ErrorResponse, OutboundMessage, SessionId, SessionKeywordsResponse};
use crate::AppState;
use log::{info, warn};
use rocket::http::Status;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::error::RecvError;
use rocket::{delete, get, Shutdown, State};

#[get("/session/keywords")]
pub async fn get_session_keywords(
    session: SessionId,
    state: &State<AppState>,
) -> Result<Json<SessionKeywordsResponse>, ErrorResponse> {
    state
        .sessions
        .session_keywords(&session.0)
        .await
        .map(Json)
        .map_err(ErrorResponse::from)
}

#[delete("/session")]
pub fn clear_session(session: SessionId, state: &State<AppState>) -> Status {
    if state.sessions.clear_session(&session.0) {
        Status::NoContent
    } else {
        Status::NotFound
    }
}

/// Server-sent events carrying the session's outbound messages.
#[get("/stream")]
pub fn stream(session: SessionId, state: &State<AppState>, mut end: Shutdown) -> EventStream![] {
    let mut messages = state.sessions.subscribe(&session.0);
    info!("Session {}: stream opened", session.0);

    EventStream! {
        loop {
            let message: OutboundMessage = select! {
                message = messages.recv() => match message {
                    Ok(message) => message,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Session {}: stream lagged, {skipped} messages dropped", session.0);
                        continue;
                    }
                },
                _ = &mut end => break,
            };

            yield Event::json(&message);
        }
    }
}
