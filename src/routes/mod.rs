//! Command routing, split by access tier the same way the commands are guarded.
//!
//! `dispatch` is the single entry point: public commands run as-is, every other
//! command first passes `auth::require_auth` and receives the resolved user.

use crate::{AppState, auth, cli::Command, error::BirdTagResult, handlers::Report};

/// Commands usable without a session: home, signup, confirm, signin, signout.
pub mod public;

/// Commands that need a valid (or refreshable) session.
pub mod authenticated;

pub async fn dispatch(command: &Command, state: &AppState) -> BirdTagResult<Report> {
    if !command.requires_auth() {
        return public::dispatch(command, state).await;
    }

    let user = auth::require_auth(state).await?;
    tracing::debug!(sub = %user.sub, "Session resolved");
    authenticated::dispatch(command, &user, state).await
}
