use crate::{
    AppState,
    cli::Command,
    error::{BirdTagError, BirdTagResult},
    handlers::{self, Report},
};

/// Public Command Router
///
/// Runs the commands that work without a session. Signing out is public so a
/// stale or broken session can always be cleared.
pub async fn dispatch(command: &Command, state: &AppState) -> BirdTagResult<Report> {
    match command {
        Command::Home => handlers::home(state).await,
        Command::Signup {
            email,
            first_name,
            last_name,
            password,
            confirm_password,
        } => handlers::signup(state, email, first_name, last_name, password, confirm_password).await,
        Command::Confirm { email, code } => handlers::confirm(state, email, code).await,
        Command::Signin { email, password } => handlers::signin(state, email, password).await,
        Command::Signout => handlers::signout(state).await,
        other => Err(BirdTagError::Config(format!(
            "{} is not a public command",
            other.name()
        ))),
    }
}
