use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BirdTagError, BirdTagResult};

/// Base URL of the hosted BirdTag query API.
pub const DEFAULT_API_BASE: &str = "https://l0ulh45lbj.execute-api.us-east-1.amazonaws.com";
/// Bucket used to build public display links for signed media URLs.
pub const DEFAULT_BUCKET: &str = "birdtag-storage-aus-dev";
pub const DEFAULT_POLL_ATTEMPTS: u32 = 20;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// AppConfig
///
/// Holds the client's entire configuration state. Loaded once at startup and
/// shared read-only through `AppState`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Root of the BirdTag REST API (no trailing slash).
    pub api_base: String,
    // Bucket name used when rewriting s3:// and signed links for display.
    pub bucket: String,
    // App client id of the Cognito user pool.
    pub cognito_client_id: String,
    // Identity endpoint. Defaults to the endpoint of the `COGNITO_REGION` pool; overridable for tests.
    pub identity_endpoint: String,
    // Where the signed-in session is persisted between invocations.
    pub session_file: PathBuf,
    // Query-by-upload polling: attempts and spacing.
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    // Runtime environment marker. Selects the log format and fail-fast rules.
    pub env: Env,
}

/// Env
///
/// Local runs get pretty logs and defaults; production demands explicit settings
/// and logs JSON lines.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Test-friendly configuration that never touches the environment.
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:3000".to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            cognito_client_id: "local-client-id".to_string(),
            identity_endpoint: "http://127.0.0.1:3001".to_string(),
            session_file: PathBuf::from(".birdtag-session.json"),
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            env: Env::Local,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every parameter from environment variables (call `dotenv` first).
    ///
    /// # Errors
    /// In `production`, a missing `BIRDTAG_API_BASE` or `COGNITO_CLIENT_ID` is a
    /// `Config` error so the client never talks to a half-configured backend.
    /// Malformed numeric settings are rejected in every environment.
    pub fn load() -> BirdTagResult<Self> {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());
        let env = match env_str.as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };

        let (api_base, cognito_client_id) = match env {
            Env::Production => (
                required("BIRDTAG_API_BASE")?,
                required("COGNITO_CLIENT_ID")?,
            ),
            Env::Local => (
                env::var("BIRDTAG_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
                env::var("COGNITO_CLIENT_ID").unwrap_or_else(|_| "local-client-id".to_string()),
            ),
        };

        let cognito_region = env::var("COGNITO_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let identity_endpoint = env::var("COGNITO_ENDPOINT")
            .unwrap_or_else(|_| format!("https://cognito-idp.{}.amazonaws.com", cognito_region));

        let session_file = match env::var("BIRDTAG_SESSION_FILE") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_session_file(),
        };

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            bucket: env::var("BIRDTAG_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            cognito_client_id,
            identity_endpoint: identity_endpoint.trim_end_matches('/').to_string(),
            session_file,
            poll_attempts: parse_or("BIRDTAG_POLL_ATTEMPTS", DEFAULT_POLL_ATTEMPTS)?,
            poll_interval: Duration::from_secs(parse_or(
                "BIRDTAG_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            http_timeout: Duration::from_secs(parse_or(
                "BIRDTAG_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            env,
        })
    }
}

fn required(key: &str) -> BirdTagResult<String> {
    env::var(key).map_err(|_| BirdTagError::Config(format!("{key} must be set in production")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> BirdTagResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BirdTagError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn default_session_file() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("birdtag").join("session.json"))
        .unwrap_or_else(|| PathBuf::from(".birdtag-session.json"))
}
