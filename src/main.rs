use std::process::ExitCode;
use std::sync::Arc;

use birdtag::{
    AppState, BirdTagError, BirdTagResult,
    api::{ApiState, HttpMediaApi},
    auth::{FileSessionStore, SessionState},
    cli::Cli,
    config::{AppConfig, Env},
    identity::{CognitoIdentityClient, IdentityState},
};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initialises logging, wires the real services into the
/// `AppState` and runs the parsed command. Command output goes to stdout; logs
/// and errors go to stderr.
#[tokio::main]
async fn main() -> ExitCode {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    // 2. Logging: RUST_LOG wins, otherwise the crate's own level.
    let default_filter = if cli.verbose { "birdtag=debug" } else { "birdtag=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
    }

    tracing::debug!("Running in {:?} mode", config.env);

    // 3. Services
    let state = match build_state(config) {
        Ok(state) => state,
        Err(e) => return fail(&e),
    };

    // 4. Command
    match birdtag::run(&cli.command, &state).await {
        Ok(report) => {
            if !report.lines.is_empty() {
                println!("{}", report.text());
            }
            if report.failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => fail(&e),
    }
}

fn build_state(config: AppConfig) -> BirdTagResult<AppState> {
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let api = Arc::new(HttpMediaApi::new(client.clone(), &config.api_base)) as ApiState;
    let identity = Arc::new(CognitoIdentityClient::new(
        client,
        &config.identity_endpoint,
        &config.cognito_client_id,
    )) as IdentityState;
    let sessions = Arc::new(FileSessionStore::new(config.session_file.clone())) as SessionState;

    Ok(AppState {
        api,
        identity,
        sessions,
        config,
    })
}

fn fail(error: &BirdTagError) -> ExitCode {
    eprintln!("{error}");
    ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(1))
}
