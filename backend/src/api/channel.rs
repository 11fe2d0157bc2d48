use crate::models::{ChannelProfileResponse, ErrorResponse, OutboundMessage};
use crate::utils::parse_video_id;
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, State};

#[get("/tags/<video>")]
pub async fn get_video_tags(video: &str, state: &State<AppState>) -> Json<OutboundMessage> {
    let Some(video_id) = parse_video_id(video) else {
        return Json(OutboundMessage::Error {
            message: format!("'{video}' is not a YouTube video"),
        });
    };
    Json(state.sessions.video_tags(&video_id).await)
}

#[get("/channel/<channel_id>")]
pub async fn get_channel_profile(
    channel_id: &str,
    state: &State<AppState>,
) -> Result<Json<ChannelProfileResponse>, ErrorResponse> {
    state
        .sessions
        .channel_profile(channel_id)
        .await
        .map(Json)
        .map_err(ErrorResponse::from)
}
