#[macro_use]
extern crate rocket;

mod api;
mod config;
mod error;
mod models;
mod services;
mod utils;

use crate::api::*;
use crate::config::{create_app_state, create_cors, init_logger, load_environment, Settings};
use crate::services::session_service::SessionService;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;

pub struct AppState {
    pub sessions: SessionService,
    pub scheduler: Mutex<JobScheduler>,
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    load_environment();
    init_logger();

    let settings = Settings::from_env()?;
    let cors = create_cors(&settings)?;
    let app_state = create_app_state(settings).await?;

    let rocket = rocket::build()
        .manage(app_state)
        .mount(
            "/",
            routes![
                search_videos,
                get_history,
                get_aggregates,
                get_word_stats,
                get_session_keywords,
                clear_session,
                stream,
                get_video_tags,
                get_channel_profile,
            ],
        )
        .attach(cors)
        .launch()
        .await?;

    if let Some(state) = rocket.state::<AppState>() {
        if let Err(e) = state.scheduler.lock().await.shutdown().await {
            warn!("Fetch tick scheduler did not shut down cleanly: {e}");
        }
    }
    info!("Backend stopped.");

    Ok(())
}
