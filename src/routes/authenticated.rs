use crate::{
    AppState,
    auth::AuthUser,
    cli::{Command, MediaCommand, SearchCommand, SubscriptionsCommand, TagsCommand},
    error::{BirdTagError, BirdTagResult},
    handlers::{self, Report},
};

/// Authenticated Command Router
///
/// Every command here receives the `AuthUser` resolved by the guard; its ID
/// token is the bearer token for all backend calls the command makes.
pub async fn dispatch(command: &Command, user: &AuthUser, state: &AppState) -> BirdTagResult<Report> {
    match command {
        Command::Whoami => handlers::whoami(user).await,
        Command::Upload { files } => handlers::upload(state, user, files).await,

        // --- Media ---
        Command::Media { command } => match command {
            MediaCommand::List => handlers::media_list(state, user).await,
            MediaCommand::Delete { file_id, yes } => handlers::media_delete(state, user, file_id, *yes).await,
        },

        // --- Tag Editing ---
        Command::Tags { command } => match command {
            TagsCommand::Add { file_id, tag, count } => handlers::tags_add(state, user, file_id, tag, *count).await,
            TagsCommand::Remove { file_id, tag } => handlers::tags_remove(state, user, file_id, tag).await,
            TagsCommand::Set { file_id, tag, count } => handlers::tags_set(state, user, file_id, tag, *count).await,
        },

        // --- Search ---
        Command::Search { command } => match command {
            SearchCommand::Tags { filters } => handlers::search_tags(state, user, filters).await,
            SearchCommand::Species { names } => handlers::search_species(state, user, names).await,
        },
        Command::OriginalUrl { thumbnail_url } => handlers::original_url(state, user, thumbnail_url).await,
        Command::QueryUpload { file } => handlers::query_upload(state, user, file).await,

        // --- Notifications ---
        Command::Subscriptions { command } => match command {
            SubscriptionsCommand::Show => handlers::subscriptions_show(state, user).await,
            SubscriptionsCommand::Set { tags } => handlers::subscriptions_set(state, user, tags).await,
            SubscriptionsCommand::Toggle { tag } => handlers::subscriptions_toggle(state, user, tag).await,
        },

        other => Err(BirdTagError::Config(format!(
            "{} does not need a session",
            other.name()
        ))),
    }
}
