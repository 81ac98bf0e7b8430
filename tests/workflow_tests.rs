use birdtag::{
    AppConfig, AppState, BirdTagError, Cli, Command, MemorySessionStore, MockIdentityProvider, MockMediaApi,
    api::ApiState,
    auth::{Session, SessionState, SessionStore},
    identity::{IdentityState, MOCK_CONFIRMATION_CODE, mint_id_token},
    models::{MediaRecord, QueryByFileResult, TagOperation},
    run,
};
use chrono::{Duration, Utc};
use clap::Parser;
use std::sync::Arc;

// --- Harness ---

struct TestApp {
    state: AppState,
    api: Arc<MockMediaApi>,
    identity: Arc<MockIdentityProvider>,
    sessions: Arc<MemorySessionStore>,
}

fn records() -> Vec<MediaRecord> {
    vec![
        MediaRecord {
            file_id: "img-1".to_string(),
            file_type: "image".to_string(),
            original_url: Some("s3://birdtag-storage-aus-dev/images/crow.jpg".to_string()),
            thumbnail_url: Some("s3://birdtag-storage-aus-dev/thumbnails/crow_thumb.jpg".to_string()),
            tags: [("crow".to_string(), 3), ("myna".to_string(), 1)].into_iter().collect(),
        },
        MediaRecord {
            file_id: "vid-1".to_string(),
            file_type: "video".to_string(),
            original_url: Some("s3://birdtag-storage-aus-dev/videos/owl.mp4".to_string()),
            thumbnail_url: None,
            tags: [("owl".to_string(), 1)].into_iter().collect(),
        },
    ]
}

fn build(api: MockMediaApi, identity: MockIdentityProvider, sessions: MemorySessionStore) -> TestApp {
    let api = Arc::new(api);
    let identity = Arc::new(identity);
    let sessions = Arc::new(sessions);
    let state = AppState {
        api: api.clone() as ApiState,
        identity: identity.clone() as IdentityState,
        sessions: sessions.clone() as SessionState,
        config: AppConfig::default(),
    };
    TestApp {
        state,
        api,
        identity,
        sessions,
    }
}

fn ada() -> MockIdentityProvider {
    MockIdentityProvider::new().with_account("ada@example.com", "Secret123!", "Ada", "Lovelace")
}

fn session_expiring_in(seconds: i64) -> Session {
    let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
    Session {
        id_token: mint_id_token("sub-ada@example.com", "ada@example.com", "Ada", "Lovelace", exp).unwrap(),
        access_token: "access-ada@example.com".to_string(),
        refresh_token: Some("refresh-ada@example.com".to_string()),
    }
}

/// Signed-in user with two stored files.
fn signed_in() -> TestApp {
    build(
        MockMediaApi::new().with_records(records()),
        ada(),
        MemorySessionStore::with_session(session_expiring_in(3600)),
    )
}

fn cmd(args: &[&str]) -> Command {
    let argv = std::iter::once("birdtag").chain(args.iter().copied());
    Cli::try_parse_from(argv).unwrap().command
}

// --- Auth Guard ---

#[tokio::test]
async fn test_protected_commands_require_a_session() {
    let app = build(MockMediaApi::new(), ada(), MemorySessionStore::new());

    let err = run(&cmd(&["media", "list"]), &app.state).await.unwrap_err();
    assert!(matches!(err, BirdTagError::Unauthenticated));
    assert_eq!(err.exit_code(), 77);

    let home = run(&Command::Home, &app.state).await.unwrap();
    assert!(home.lines.contains(&"Not signed in.".to_string()));
}

#[tokio::test]
async fn test_expired_session_is_refreshed_and_persisted() {
    let app = build(
        MockMediaApi::new().with_records(records()),
        ada(),
        MemorySessionStore::with_session(session_expiring_in(-30)),
    );

    let report = run(&cmd(&["media", "list"]), &app.state).await.unwrap();
    assert!(report.lines.contains(&"File ID: img-1".to_string()));

    let stored = app.sessions.load().await.unwrap().unwrap();
    assert!(!stored.is_expired(Utc::now()).unwrap());
    // The refresh answer carries no refresh token; the old one is kept.
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-ada@example.com"));
}

#[tokio::test]
async fn test_failed_refresh_means_signed_out() {
    let app = build(
        MockMediaApi::new(),
        MockIdentityProvider::new_failing_refresh(),
        MemorySessionStore::with_session(session_expiring_in(-30)),
    );

    let err = run(&Command::Whoami, &app.state).await.unwrap_err();
    assert!(matches!(err, BirdTagError::Unauthenticated));
}

// --- Account Flows ---

#[tokio::test]
async fn test_signup_confirm_signin_whoami_signout() {
    let app = build(MockMediaApi::new(), MockIdentityProvider::new(), MemorySessionStore::new());

    let signup = cmd(&[
        "signup",
        "--email",
        "grace@example.com",
        "--first-name",
        "Grace",
        "--last-name",
        "Hopper",
        "--password",
        "Secret123!",
        "--confirm-password",
        "Secret123!",
    ]);
    let report = run(&signup, &app.state).await.unwrap();
    assert!(report.text().contains("birdtag confirm"));

    let confirm = cmd(&["confirm", "--email", "grace@example.com", "--code", MOCK_CONFIRMATION_CODE]);
    let report = run(&confirm, &app.state).await.unwrap();
    assert_eq!(report.text(), "Sign-up confirmed! You can now sign in.");

    let signin = cmd(&["signin", "--email", "grace@example.com", "--password", "Secret123!"]);
    let report = run(&signin, &app.state).await.unwrap();
    assert_eq!(report.text(), "Signed in as Grace Hopper");

    let whoami = run(&Command::Whoami, &app.state).await.unwrap();
    assert_eq!(whoami.lines[0], "Grace Hopper");
    assert_eq!(whoami.lines[1], "grace@example.com");

    run(&Command::Signout, &app.state).await.unwrap();
    assert!(app.sessions.load().await.unwrap().is_none());
    assert_eq!(app.identity.signed_out_tokens(), vec!["access-grace@example.com"]);
}

#[tokio::test]
async fn test_signout_clears_session_when_provider_fails() {
    let app = build(
        MockMediaApi::new(),
        MockIdentityProvider::new_failing_sign_out(),
        MemorySessionStore::with_session(session_expiring_in(3600)),
    );

    let report = run(&Command::Signout, &app.state).await.unwrap();
    assert_eq!(report.text(), "Signed out.");
    assert!(app.sessions.load().await.unwrap().is_none());
    assert!(app.identity.signed_out_tokens().is_empty());
}

#[tokio::test]
async fn test_signup_rejects_mismatched_passwords() {
    let app = build(MockMediaApi::new(), MockIdentityProvider::new(), MemorySessionStore::new());

    let signup = cmd(&[
        "signup",
        "--email",
        "grace@example.com",
        "--first-name",
        "Grace",
        "--last-name",
        "Hopper",
        "--password",
        "Secret123!",
        "--confirm-password",
        "Secret124!",
    ]);
    let err = run(&signup, &app.state).await.unwrap_err();
    assert_eq!(err.to_string(), "Passwords do not match.");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_wrong_password_keeps_user_signed_out() {
    let app = build(MockMediaApi::new(), ada(), MemorySessionStore::new());

    let signin = cmd(&["signin", "--email", "ada@example.com", "--password", "nope"]);
    let err = run(&signin, &app.state).await.unwrap_err();
    assert_eq!(err.to_string(), "Incorrect username or password.");
    assert!(app.sessions.load().await.unwrap().is_none());
}

// --- Media & Tags ---

#[tokio::test]
async fn test_media_list_and_delete() {
    let app = signed_in();

    let report = run(&cmd(&["media", "list"]), &app.state).await.unwrap();
    assert!(report.lines.contains(&"  Tags: crow (3), myna (1)".to_string()));
    assert!(
        report
            .lines
            .contains(&"  Thumbnail: https://birdtag-storage-aus-dev.s3.amazonaws.com/thumbnails/crow_thumb.jpg".to_string())
    );

    let report = run(&cmd(&["media", "delete", "vid-1", "--yes"]), &app.state).await.unwrap();
    assert_eq!(report.text(), "Deleted vid-1.");
    assert_eq!(app.api.records().len(), 1);
}

#[tokio::test]
async fn test_tag_set_sends_only_the_difference() {
    let app = signed_in();

    run(&cmd(&["tags", "set", "img-1", "crow", "1"]), &app.state).await.unwrap();

    let sent = app.api.modify_requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].operation, TagOperation::Remove);
    assert_eq!(sent[0].tags, vec!["crow,2"]);
    assert_eq!(app.api.records()[0].tag_count("crow"), Some(1));

    let report = run(&cmd(&["tags", "set", "img-1", "crow", "1"]), &app.state).await.unwrap();
    assert_eq!(report.text(), "img-1 already has 1 x crow.");
    assert_eq!(app.api.modify_requests().len(), 1);
}

#[tokio::test]
async fn test_tag_add_and_remove() {
    let app = signed_in();

    let report = run(&cmd(&["tags", "add", "img-1", "owl", "2"]), &app.state).await.unwrap();
    assert!(report.lines.contains(&"Tags: crow (3), myna (1), owl (2)".to_string()));

    run(&cmd(&["tags", "remove", "img-1", "crow"]), &app.state).await.unwrap();
    assert_eq!(app.api.records()[0].tag_count("crow"), None);

    let err = run(&cmd(&["tags", "remove", "img-1", "peacock"]), &app.state).await.unwrap_err();
    assert!(matches!(err, BirdTagError::NotFound(_)));
}

#[tokio::test]
async fn test_invalid_tag_edit_sends_nothing() {
    let app = signed_in();

    let err = run(&cmd(&["tags", "add", "img-1", "crow", "0"]), &app.state).await.unwrap_err();
    assert_eq!(err.to_string(), "Enter valid tag and count.");
    assert!(app.api.modify_requests().is_empty());

    let err = run(&cmd(&["tags", "set", "nope", "crow", "2"]), &app.state).await.unwrap_err();
    assert!(matches!(err, BirdTagError::NotFound(_)));
}

// --- Search ---

#[tokio::test]
async fn test_search_by_tags_and_species() {
    let app = signed_in();

    let report = run(&cmd(&["search", "tags", "crow=2", "myna"]), &app.state).await.unwrap();
    assert_eq!(
        report.lines[0],
        "https://birdtag-storage-aus-dev.s3.amazonaws.com/thumbnails/crow_thumb.jpg [image]"
    );

    let report = run(&cmd(&["search", "tags", "crow=9"]), &app.state).await.unwrap();
    assert_eq!(report.text(), "No matching media found for the given tags.");

    let err = run(&cmd(&["search", "tags", " ", "=3"]), &app.state).await.unwrap_err();
    assert_eq!(err.to_string(), "Please enter at least one valid tag.");

    let report = run(&cmd(&["search", "species", "owl"]), &app.state).await.unwrap();
    assert_eq!(
        report.lines[0],
        "https://birdtag-storage-aus-dev.s3.amazonaws.com/videos/owl.mp4 [video]"
    );
}

#[tokio::test]
async fn test_original_url_lookup() {
    let app = signed_in();

    let report = run(
        &cmd(&["original-url", "https://birdtag-storage-aus-dev.s3.amazonaws.com/thumbnails/crow_thumb.jpg"]),
        &app.state,
    )
    .await
    .unwrap();
    assert_eq!(
        report.lines[0],
        "Original URL: https://birdtag-storage-aus-dev.s3.amazonaws.com/images/crow.jpg"
    );

    let err = run(&cmd(&["original-url", "https://elsewhere/thumb.jpg"]), &app.state)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Original media not found.");
}

// --- Upload ---

#[tokio::test]
async fn test_upload_reports_each_file() {
    let app = signed_in();
    let dir = tempfile::tempdir().unwrap();
    let crow = dir.path().join("crow.jpg");
    let notes = dir.path().join("notes.txt");
    std::fs::write(&crow, b"jpeg").unwrap();
    std::fs::write(&notes, b"text").unwrap();

    let command = Command::Upload {
        files: vec![crow, notes],
    };
    let report = run(&command, &app.state).await.unwrap();

    assert!(report.failed);
    assert_eq!(report.lines[0], "crow.jpg uploaded successfully.");
    assert!(report.lines[1].starts_with("notes.txt failed to upload:"));
    assert_eq!(app.api.objects().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_query_upload_polls_until_tagged() {
    let result = QueryByFileResult {
        tags: [("crow".to_string(), 2)].into_iter().collect(),
        links: vec!["https://signed.example.com/images/crow.jpg?X-Amz-Signature=abc".to_string()],
    };
    let app = build(
        MockMediaApi::new().with_query_result("temp/sample.jpg", result, 2),
        ada(),
        MemorySessionStore::with_session(session_expiring_in(3600)),
    );
    let dir = tempfile::tempdir().unwrap();
    let sample = dir.path().join("sample.jpg");
    std::fs::write(&sample, b"jpeg").unwrap();

    let command = Command::QueryUpload { file: sample };
    let report = run(&command, &app.state).await.unwrap();

    assert_eq!(app.api.query_calls(), 3);
    assert!(report.lines.contains(&"  crow (2)".to_string()));
    assert!(
        report
            .lines
            .contains(&"  https://birdtag-storage-aus-dev.s3.amazonaws.com/images/crow.jpg [image]".to_string())
    );
    assert_eq!(report.lines.last().map(String::as_str), Some("Done!"));
}

// --- Subscriptions ---

#[tokio::test]
async fn test_subscription_toggle_and_set() {
    let app = signed_in();

    let report = run(&cmd(&["subscriptions", "show"]), &app.state).await.unwrap();
    assert_eq!(report.lines[0], "No subscriptions.");

    run(&cmd(&["subscriptions", "toggle", "Owl"]), &app.state).await.unwrap();
    assert_eq!(app.api.subscribed_tags(), vec!["owl"]);

    run(&cmd(&["subscriptions", "set", "owl", "myna", "owl"]), &app.state)
        .await
        .unwrap();
    assert_eq!(app.api.subscribed_tags(), vec!["owl", "myna"]);

    let err = run(&cmd(&["subscriptions", "set", "eagle"]), &app.state).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(app.api.subscribed_tags(), vec!["owl", "myna"]);
}

#[tokio::test]
async fn test_toggle_keeps_existing_tags_outside_the_catalogue() {
    let app = build(
        MockMediaApi::new().with_subscriptions(&["crow"]),
        ada(),
        MemorySessionStore::with_session(session_expiring_in(3600)),
    );

    run(&cmd(&["subscriptions", "toggle", "owl"]), &app.state).await.unwrap();
    assert_eq!(app.api.subscribed_tags(), vec!["crow", "owl"]);

    let err = run(&cmd(&["subscriptions", "toggle", "eagle"]), &app.state)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(app.api.subscribed_tags(), vec!["crow", "owl"]);
}
