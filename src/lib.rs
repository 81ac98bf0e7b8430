use tracing::Instrument;

// --- Module Structure ---

// Core services: backend API, identity provider, session storage.
pub mod api;
pub mod auth;
pub mod identity;

// Domain logic shared by the handlers.
pub mod links;
pub mod tags;
pub mod upload;

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

// Command routing segregated by access tier (public, authenticated).
pub mod routes;

// --- Public Re-exports ---

pub use api::{ApiState, HttpMediaApi, MockMediaApi};
pub use auth::{FileSessionStore, MemorySessionStore, SessionState};
pub use cli::{Cli, Command};
pub use config::AppConfig;
pub use error::{BirdTagError, BirdTagResult};
pub use handlers::Report;
pub use identity::{CognitoIdentityClient, IdentityState, MockIdentityProvider};

/// AppState
///
/// The single container of services and configuration every command runs against.
/// Services sit behind trait objects so tests can swap in the in-memory mocks.
#[derive(Clone)]
pub struct AppState {
    /// BirdTag backend (API gateway) client.
    pub api: ApiState,
    /// Sign-up, sign-in and token refresh.
    pub identity: IdentityState,
    /// Where the signed-in session lives between invocations.
    pub sessions: SessionState,
    pub config: AppConfig,
}

/// run
///
/// Executes one command inside its own tracing span. `run_id` correlates every
/// log line of the invocation.
pub async fn run(command: &Command, state: &AppState) -> BirdTagResult<Report> {
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("command", name = command.name(), run_id = %run_id);

    async move {
        tracing::debug!("Command started");
        let result = routes::dispatch(command, state).await;
        match &result {
            Ok(report) if report.failed => tracing::warn!("Command finished with failures"),
            Ok(_) => tracing::debug!("Command finished"),
            Err(e) => tracing::error!(exit_code = e.exit_code(), "Command failed: {}", e),
        }
        result
    }
    .instrument(span)
    .await
}
