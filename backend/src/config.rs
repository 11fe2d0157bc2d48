use crate::models::SessionId;
use crate::services::coordinator::CoordinatorSettings;
use crate::services::sentiment::LexiconClassifier;
use crate::services::session_service::SessionService;
use crate::services::supervisor::{RestartPolicy, Supervisor};
use crate::services::youtube::{
    VideoSearchProvider, YouTubeClient, DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT,
};
use crate::AppState;
use anyhow::{anyhow, Result};
use env_logger::Builder;
use log::{info, warn, LevelFilter};
use rocket::http::{Cookie, Method, SameSite};
use rocket::request::{FromRequest, Outcome};
use rocket::Request;
use rocket_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};
use std::convert::Infallible;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub const SESSION_COOKIE: &str = "sessionId";

/// Everything the backend reads from its environment, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub youtube_api_key: String,
    pub youtube_api_url: String,
    pub max_history_entries: usize,
    pub fetch_interval: Duration,
    pub fetch_start_delay: Duration,
    pub heartbeat_interval: Duration,
    pub batch_size: usize,
    pub restart_limit: usize,
    pub restart_window: Duration,
    pub aggregation_timeout: Duration,
    pub request_timeout: Duration,
    pub sentiment_sample_size: usize,
    pub word_stats_sample_size: usize,
    pub max_videos_per_keyword: usize,
    pub frontend_origin: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            youtube_api_key: String::new(),
            youtube_api_url: DEFAULT_API_URL.to_string(),
            max_history_entries: 10,
            fetch_interval: Duration::from_secs(30),
            fetch_start_delay: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            batch_size: 10,
            restart_limit: 10,
            restart_window: Duration::from_secs(60),
            aggregation_timeout: Duration::from_secs(5),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sentiment_sample_size: 50,
            word_stats_sample_size: 50,
            max_videos_per_keyword: 50,
            frontend_origin: "http://localhost:8080".to_string(),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{name}={raw:?} is not a valid number, using the default");
            default
        }),
        None => default,
    }
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(lookup, name, default.as_secs()))
}

// Periods and timeouts; zero would make a timer spin or panic.
fn nonzero_secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Duration {
    let value = secs_or(lookup, name, default);
    if value.is_zero() {
        warn!("{name} must be at least one second, using the default");
        return default;
    }
    value
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Settings::default();
        let youtube_api_key = lookup("YOUTUBE_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("YOUTUBE_API_KEY environment variable must be set"))?;

        Ok(Settings {
            youtube_api_key,
            youtube_api_url: lookup("YOUTUBE_API_URL").unwrap_or(defaults.youtube_api_url),
            max_history_entries: parse_or(
                &lookup,
                "MAX_HISTORY_ENTRIES",
                defaults.max_history_entries,
            ),
            fetch_interval: nonzero_secs_or(
                &lookup,
                "FETCH_INTERVAL_SECS",
                defaults.fetch_interval,
            ),
            fetch_start_delay: secs_or(
                &lookup,
                "FETCH_START_DELAY_SECS",
                defaults.fetch_start_delay,
            ),
            heartbeat_interval: nonzero_secs_or(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            batch_size: parse_or(&lookup, "FETCH_BATCH_SIZE", defaults.batch_size),
            restart_limit: parse_or(&lookup, "RESTART_LIMIT", defaults.restart_limit),
            restart_window: nonzero_secs_or(
                &lookup,
                "RESTART_WINDOW_SECS",
                defaults.restart_window,
            ),
            aggregation_timeout: nonzero_secs_or(
                &lookup,
                "AGGREGATION_TIMEOUT_SECS",
                defaults.aggregation_timeout,
            ),
            request_timeout: nonzero_secs_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
            sentiment_sample_size: parse_or(
                &lookup,
                "SENTIMENT_SAMPLE_SIZE",
                defaults.sentiment_sample_size,
            ),
            word_stats_sample_size: parse_or(
                &lookup,
                "WORD_STATS_SAMPLE_SIZE",
                defaults.word_stats_sample_size,
            ),
            max_videos_per_keyword: parse_or(
                &lookup,
                "MAX_VIDEOS_PER_KEYWORD",
                defaults.max_videos_per_keyword,
            ),
            frontend_origin: lookup("FRONTEND_ORIGIN").unwrap_or(defaults.frontend_origin),
        })
    }

    pub fn coordinator(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            batch_size: self.batch_size,
            fetch_start_delay: self.fetch_start_delay,
            heartbeat_interval: self.heartbeat_interval,
            max_videos_per_keyword: self.max_videos_per_keyword,
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            limit: self.restart_limit,
            window: self.restart_window,
        }
    }
}

pub fn init_logger() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    info!("Starting Rocket backend...");
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}

/// Relays the supervisor's fetch tick to every coordinator on a fixed period.
pub async fn setup_tick_scheduler(
    supervisor: Arc<Supervisor>,
    interval: Duration,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let tick_job = Job::new_repeated_async(interval, move |_uuid, _l| {
        let supervisor = supervisor.clone();
        Box::pin(async move {
            supervisor.tick();
        })
    })?;

    scheduler.add(tick_job).await?;
    scheduler.start().await?;
    info!("Fetch tick scheduler started ({interval:?}).");

    Ok(scheduler)
}

pub async fn create_app_state(settings: Settings) -> Result<AppState> {
    let provider: Arc<dyn VideoSearchProvider> = Arc::new(YouTubeClient::new(
        &settings.youtube_api_url,
        &settings.youtube_api_key,
        settings.request_timeout,
    )?);
    info!("Using YouTube API at: {}", settings.youtube_api_url);

    let supervisor = Supervisor::start(settings.restart_policy());
    let scheduler = setup_tick_scheduler(supervisor.clone(), settings.fetch_interval).await?;

    let sessions = SessionService::new(
        provider,
        Arc::new(LexiconClassifier),
        supervisor,
        settings,
    );

    Ok(AppState {
        sessions,
        scheduler: Mutex::new(scheduler),
    })
}

pub fn create_cors(settings: &Settings) -> Result<rocket_cors::Cors> {
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::some_exact(&[settings.frontend_origin.as_str()]))
        .allowed_methods(
            vec![Method::Get, Method::Delete, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allowed_headers(AllowedHeaders::some(&["Accept", "Content-Type"]))
        .allow_credentials(true)
        .to_cors()
        .map_err(|e| anyhow!("Failed to create CORS options: {}", e))?;

    Ok(cors)
}

/// Resolves the caller's session from its cookie, issuing a fresh id the
/// first time a browser shows up.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionId {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cookies = request.cookies();
        if let Some(existing) = cookies.get(SESSION_COOKIE) {
            let id = existing.value().trim();
            if !id.is_empty() {
                return Outcome::Success(SessionId(id.to_string()));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        cookies.add(
            Cookie::build((SESSION_COOKIE, id.clone()))
                .path("/")
                .same_site(SameSite::Lax),
        );
        Outcome::Success(SessionId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let settings = Settings::from_lookup(lookup(&[("YOUTUBE_API_KEY", "abc")])).unwrap();

        assert_eq!(settings.youtube_api_key, "abc");
        assert_eq!(settings.youtube_api_url, DEFAULT_API_URL);
        assert_eq!(settings.max_history_entries, 10);
        assert_eq!(settings.fetch_interval, Duration::from_secs(30));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.restart_policy().limit, 10);
    }

    #[test]
    fn overrides_are_read() {
        let settings = Settings::from_lookup(lookup(&[
            ("YOUTUBE_API_KEY", "abc"),
            ("MAX_HISTORY_ENTRIES", "3"),
            ("FETCH_START_DELAY_SECS", "0"),
            ("FRONTEND_ORIGIN", "https://dash.example"),
        ]))
        .unwrap();

        assert_eq!(settings.max_history_entries, 3);
        assert_eq!(settings.coordinator().fetch_start_delay, Duration::ZERO);
        assert_eq!(settings.frontend_origin, "https://dash.example");
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("YOUTUBE_API_KEY", "abc"),
            ("FETCH_BATCH_SIZE", "ten"),
            ("RESTART_WINDOW_SECS", "-1"),
        ]))
        .unwrap();

        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.restart_window, Duration::from_secs(60));
    }

    #[test]
    fn zero_periods_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("YOUTUBE_API_KEY", "abc"),
            ("FETCH_INTERVAL_SECS", "0"),
            ("HEARTBEAT_INTERVAL_SECS", "0"),
            ("AGGREGATION_TIMEOUT_SECS", "0"),
            ("REQUEST_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(settings.fetch_interval, Duration::from_secs(30));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.aggregation_timeout, Duration::from_secs(5));
        assert_eq!(settings.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        assert!(Settings::from_lookup(lookup(&[])).is_err());
        assert!(Settings::from_lookup(lookup(&[("YOUTUBE_API_KEY", "  ")])).is_err());
    }
}
