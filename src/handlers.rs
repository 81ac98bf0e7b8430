use std::path::{Path, PathBuf};

use crate::{
    AppState,
    auth::AuthUser,
    error::{BirdTagError, BirdTagResult},
    identity::SignUpRequest,
    links::{self, MediaKind},
    models::{MediaRecord, TagCounts},
    tags::{self, TagEdit},
    upload::{self, PollPolicy, QueryOutcome},
};

/// Report
///
/// What a command has to say to the user. Handlers build it; `main` prints it.
/// `failed` marks partial failures (e.g. one file of a batch) that still produce
/// output but must end with a non-zero exit code.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Report {
    pub lines: Vec<String>,
    pub failed: bool,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn single(line: impl Into<String>) -> Self {
        let mut report = Self::new();
        report.line(line);
        report
    }
}

fn format_tags(tags: &TagCounts) -> String {
    if tags.is_empty() {
        return "none".to_string();
    }
    tags.iter()
        .map(|(tag, count)| format!("{tag} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

// --- Public Handlers ---

/// home
///
/// The navigation bar: who is signed in and which commands make sense now.
/// Reads the stored session without refreshing it.
pub async fn home(state: &AppState) -> BirdTagResult<Report> {
    let mut report = Report::single("Welcome to BirdTag");
    report.line("Upload, tag and explore bird media.");
    report.line("");

    let signed_in = state
        .sessions
        .load()
        .await?
        .and_then(|session| session.claims().ok());

    match signed_in {
        Some(claims) => {
            let name = claims.display_name();
            let who = if name.is_empty() {
                claims.email.unwrap_or(claims.sub)
            } else {
                name
            };
            report.line(format!("Signed in as {who}"));
            report.line("Commands: upload, media list, search tags, search species, original-url, query-upload, subscriptions, signout");
        }
        None => {
            report.line("Not signed in.");
            report.line("Commands: signup, confirm, signin");
        }
    }
    Ok(report)
}

pub async fn signup(
    state: &AppState,
    email: &str,
    first_name: &str,
    last_name: &str,
    password: &str,
    confirm_password: &str,
) -> BirdTagResult<Report> {
    if password != confirm_password {
        return Err(BirdTagError::validation("Passwords do not match."));
    }

    let request = SignUpRequest {
        email: email.trim().to_string(),
        password: password.to_string(),
        given_name: first_name.trim().to_string(),
        family_name: last_name.trim().to_string(),
    };
    let outcome = state.identity.sign_up(&request).await?;
    tracing::info!(confirmed = outcome.user_confirmed, "Account created");

    Ok(if outcome.user_confirmed {
        Report::single("Account created. You can sign in now.")
    } else {
        Report::single(format!(
            "Account created. Enter the code sent to {} with `birdtag confirm`.",
            request.email
        ))
    })
}

pub async fn confirm(state: &AppState, email: &str, code: &str) -> BirdTagResult<Report> {
    state.identity.confirm_sign_up(email.trim(), code.trim()).await?;
    Ok(Report::single("Sign-up confirmed! You can now sign in."))
}

pub async fn signin(state: &AppState, email: &str, password: &str) -> BirdTagResult<Report> {
    let session = state.identity.sign_in(email.trim(), password).await?;
    let claims = session.claims()?;
    state.sessions.save(&session).await?;
    tracing::info!(sub = %claims.sub, "Signed in");

    let name = claims.display_name();
    Ok(Report::single(format!(
        "Signed in as {}",
        if name.is_empty() { email.trim() } else { name.as_str() }
    )))
}

/// signout
///
/// Revokes the tokens at the identity provider when possible; the local session
/// is dropped either way.
pub async fn signout(state: &AppState) -> BirdTagResult<Report> {
    if let Some(session) = state.sessions.load().await? {
        if let Err(e) = state.identity.global_sign_out(&session.access_token).await {
            tracing::warn!("Error signing out at the identity provider: {}", e);
        }
    }
    state.sessions.clear().await?;
    Ok(Report::single("Signed out."))
}

// --- Authenticated Handlers ---

pub async fn whoami(user: &AuthUser) -> BirdTagResult<Report> {
    let mut report = Report::new();
    if !user.display_name.is_empty() {
        report.line(user.display_name.clone());
    }
    if let Some(email) = &user.email {
        report.line(email.clone());
    }
    report.line(format!("id: {}", user.sub));
    Ok(report)
}

pub async fn upload(state: &AppState, user: &AuthUser, files: &[PathBuf]) -> BirdTagResult<Report> {
    let outcomes = upload::upload_files(state.api.as_ref(), &user.id_token, files).await?;

    let mut report = Report::new();
    for outcome in &outcomes {
        match &outcome.error {
            None => report.line(format!("{} uploaded successfully.", outcome.file_name)),
            Some(reason) => {
                report.failed = true;
                report.line(format!("{} failed to upload: {}", outcome.file_name, reason))
            }
        };
    }
    Ok(report)
}

pub async fn media_list(state: &AppState, user: &AuthUser) -> BirdTagResult<Report> {
    let records = state.api.list_media(&user.id_token).await?;
    if records.is_empty() {
        return Ok(Report::single("No media found."));
    }

    let mut report = Report::new();
    for record in &records {
        report.line(format!("File ID: {}", record.file_id));
        report.line(format!("  Type: {}", record.file_type));
        if let Some(original) = &record.original_url {
            report.line(format!("  Original: {original}"));
        }
        if let Some(thumbnail) = &record.thumbnail_url {
            report.line(format!("  Thumbnail: {}", links::s3_to_https(thumbnail)));
        }
        report.line(format!("  Tags: {}", format_tags(&record.tags)));
    }
    Ok(report)
}

async fn confirm_prompt(question: String) -> BirdTagResult<bool> {
    tokio::task::spawn_blocking(move || -> BirdTagResult<bool> {
        use std::io::Write;
        eprint!("{question} [y/N] ");
        std::io::stderr().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    })
    .await
    .map_err(|e| BirdTagError::Io(std::io::Error::other(e)))?
}

pub async fn media_delete(state: &AppState, user: &AuthUser, file_id: &str, yes: bool) -> BirdTagResult<Report> {
    if !yes && !confirm_prompt(format!("Are you sure you want to delete {file_id}?")).await? {
        return Ok(Report::single("Delete cancelled."));
    }
    state
        .api
        .delete_files(&user.id_token, &[file_id.to_string()])
        .await?;
    tracing::info!(file_id, "Deleted");
    Ok(Report::single(format!("Deleted {file_id}.")))
}

async fn find_record(state: &AppState, user: &AuthUser, file_id: &str) -> BirdTagResult<MediaRecord> {
    state
        .api
        .list_media(&user.id_token)
        .await?
        .into_iter()
        .find(|record| record.file_id == file_id)
        .ok_or_else(|| BirdTagError::NotFound(format!("No media with file id {file_id}")))
}

/// Sends the edit, then re-reads the record so the user sees the backend's result.
async fn apply_edit(state: &AppState, user: &AuthUser, edit: TagEdit) -> BirdTagResult<Report> {
    state.api.modify_tags(&user.id_token, &edit.request()).await?;
    tracing::info!(file_id = %edit.file_id, tag = %edit.change.tag, "Tags updated");

    let mut report = Report::single("Tag update complete.");
    match find_record(state, user, &edit.file_id).await {
        Ok(record) => report.line(format!("Tags: {}", format_tags(&record.tags))),
        Err(_) => report.line("The file is no longer listed."),
    };
    Ok(report)
}

pub async fn tags_add(state: &AppState, user: &AuthUser, file_id: &str, tag: &str, count: i64) -> BirdTagResult<Report> {
    let edit = tags::plan_add(file_id, tag, count)?;
    apply_edit(state, user, edit).await
}

pub async fn tags_remove(state: &AppState, user: &AuthUser, file_id: &str, tag: &str) -> BirdTagResult<Report> {
    let record = find_record(state, user, file_id).await?;
    let edit = tags::plan_remove(&record, tag)?;
    apply_edit(state, user, edit).await
}

pub async fn tags_set(state: &AppState, user: &AuthUser, file_id: &str, tag: &str, count: i64) -> BirdTagResult<Report> {
    let record = find_record(state, user, file_id).await?;
    match tags::plan_set(&record, tag, count)? {
        Some(edit) => apply_edit(state, user, edit).await,
        None => Ok(Report::single(format!("{} already has {} x {}.", file_id, count, tag.trim()))),
    }
}

pub async fn search_tags(state: &AppState, user: &AuthUser, filters: &[String]) -> BirdTagResult<Report> {
    let filters = tags::search_filters(filters)?;
    let results = state.api.search_by_tags(&user.id_token, &filters).await?;
    if results.is_empty() {
        return Ok(Report::single("No matching media found for the given tags."));
    }

    let mut report = Report::new();
    for link in &results {
        report.line(format!("{} [{}]", link.display_url, MediaKind::from_link(&link.display_url)));
        report.line(format!("  {}", link.signed_url));
    }
    Ok(report)
}

pub async fn search_species(state: &AppState, user: &AuthUser, names: &[String]) -> BirdTagResult<Report> {
    let species = tags::species_list(names)?;
    let results = state.api.search_by_species(&user.id_token, &species).await?;
    if results.is_empty() {
        return Ok(Report::single("No matching media found."));
    }

    let mut report = Report::new();
    for link in &results {
        report.line(format!(
            "{} [{}]",
            links::display_url(link, &state.config.bucket),
            MediaKind::from_link(link)
        ));
        report.line(format!("  {link}"));
    }
    Ok(report)
}

pub async fn original_url(state: &AppState, user: &AuthUser, thumbnail_url: &str) -> BirdTagResult<Report> {
    let thumbnail_url = thumbnail_url.trim();
    if thumbnail_url.is_empty() {
        return Err(BirdTagError::validation("Please enter a valid thumbnail URL."));
    }

    let original = state
        .api
        .original_url(&user.id_token, thumbnail_url)
        .await?
        .ok_or_else(|| BirdTagError::NotFound("Original media not found.".to_string()))?;

    let mut report = Report::single(format!(
        "Original URL: {}",
        links::display_url(&original, &state.config.bucket)
    ));
    report.line(format!("  {original}"));
    Ok(report)
}

pub async fn query_upload(state: &AppState, user: &AuthUser, file: &Path) -> BirdTagResult<Report> {
    let policy = PollPolicy::from(&state.config);
    let result = upload::query_by_upload(state.api.as_ref(), &user.id_token, file, policy).await?;
    let outcome = QueryOutcome::of(&result);

    let mut report = Report::new();
    if !result.tags.is_empty() {
        report.line("Detected tags:");
        for (tag, count) in &result.tags {
            report.line(format!("  {tag} ({count})"));
        }
    }
    if !result.links.is_empty() {
        report.line("Matching media:");
        // Links that are not URLs are skipped rather than failing the listing.
        for link in &result.links {
            if let Some(display) = links::bucket_path_url(link, &state.config.bucket) {
                report.line(format!("  {} [{}]", display, MediaKind::from_link(link)));
                report.line(format!("    {link}"));
            }
        }
    }
    report.line(outcome.message());
    Ok(report)
}

pub async fn subscriptions_show(state: &AppState, user: &AuthUser) -> BirdTagResult<Report> {
    let current = state.api.subscriptions(&user.id_token).await?;
    let mut report = if current.tags.is_empty() {
        Report::single("No subscriptions.")
    } else {
        Report::single(format!("Subscribed tags: {}", current.tags.join(", ")))
    };
    report.line(format!("Available tags: {}", tags::BIRD_TAGS.join(", ")));
    Ok(report)
}

pub async fn subscriptions_set(state: &AppState, user: &AuthUser, requested: &[String]) -> BirdTagResult<Report> {
    let selected = tags::subscription_tags(requested)?;
    let message = state.api.subscribe(&user.id_token, &selected).await?;
    Ok(Report::single(message))
}

pub async fn subscriptions_toggle(state: &AppState, user: &AuthUser, tag: &str) -> BirdTagResult<Report> {
    let current = state.api.subscriptions(&user.id_token).await?;
    let next = tags::toggle_subscription(&current.tags, tag)?;
    let message = state.api.subscribe(&user.id_token, &next).await?;
    Ok(Report::single(message))
}
