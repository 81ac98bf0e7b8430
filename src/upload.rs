//! Media transfer workflows: multi-file upload through presigned URLs and the
//! upload-then-poll query flow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{
    api::{MediaApi, TEMP_FOLDER},
    config::AppConfig,
    error::{BirdTagError, BirdTagResult},
    models::QueryByFileResult,
};

/// content_type_for
///
/// MIME type sent with the presigned PUT. Must be identical to the type the URL
/// was signed for.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn file_name(path: &Path) -> BirdTagResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| BirdTagError::validation(format!("{} is not a file name", path.display())))
}

// --- Multi-file Upload ---

/// UploadOutcome
///
/// Result for one file of a batch. Failures carry the reason and never abort
/// the rest of the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub file_name: String,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

async fn upload_one(api: &dyn MediaApi, token: &str, path: &Path) -> BirdTagResult<String> {
    let name = file_name(path)?;
    let content_type = content_type_for(path);
    let bytes = tokio::fs::read(path).await?;

    let upload_url = api.media_upload_url(token, &name, content_type).await?;
    api.put_object(&upload_url, content_type, bytes)
        .await
        .map_err(|e| BirdTagError::Upload {
            file: name.clone(),
            reason: e.to_string(),
        })?;
    Ok(name)
}

/// upload_files
///
/// Uploads each file in order: presigned URL, then PUT. The batch is rejected
/// up front only when it is empty.
pub async fn upload_files(
    api: &dyn MediaApi,
    token: &str,
    paths: &[PathBuf],
) -> BirdTagResult<Vec<UploadOutcome>> {
    if paths.is_empty() {
        return Err(BirdTagError::validation("Please select files first."));
    }

    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match upload_one(api, token, path).await {
            Ok(name) => {
                tracing::info!(file = %name, "Uploaded");
                outcomes.push(UploadOutcome {
                    file_name: name,
                    error: None,
                });
            }
            Err(e) => {
                tracing::error!(file = %display_name, "Upload failed: {}", e);
                outcomes.push(UploadOutcome {
                    file_name: display_name,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Ok(outcomes)
}

// --- Query by Upload ---

/// PollPolicy
///
/// Fixed-interval polling: `max_attempts` requests spaced `interval` apart, no
/// backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_POLL_ATTEMPTS,
            interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl From<&AppConfig> for PollPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.poll_attempts,
            interval: config.poll_interval,
        }
    }
}

/// poll_for_result
///
/// Asks for the tagging result of `key` until it is ready. "Still processing"
/// replies and failed requests both just wait for the next attempt; after the
/// last attempt the wait ends with `PollTimeout`.
pub async fn poll_for_result(
    api: &dyn MediaApi,
    token: &str,
    key: &str,
    policy: PollPolicy,
) -> BirdTagResult<QueryByFileResult> {
    for attempt in 1..=policy.max_attempts {
        match api.query_by_file(token, key).await {
            Ok(Some(result)) => {
                tracing::info!(key, attempt, "Query result ready");
                return Ok(result);
            }
            Ok(None) => tracing::debug!(key, attempt, "Still processing"),
            Err(e) => tracing::debug!(key, attempt, "Poll request failed: {}", e),
        }
        tokio::time::sleep(policy.interval).await;
    }

    Err(BirdTagError::PollTimeout {
        attempts: policy.max_attempts,
    })
}

/// query_by_upload
///
/// Uploads `path` to the temporary folder (the backend tags it without keeping
/// it) and waits for the tags it detected plus the stored media that match them.
pub async fn query_by_upload(
    api: &dyn MediaApi,
    token: &str,
    path: &Path,
    policy: PollPolicy,
) -> BirdTagResult<QueryByFileResult> {
    let name = file_name(path)?;
    let content_type = content_type_for(path);
    let bytes = tokio::fs::read(path).await?;

    let target = api.temp_upload_url(token, &name).await?;
    api.put_object(&target.url, content_type, bytes)
        .await
        .map_err(|e| BirdTagError::Upload {
            file: name.clone(),
            reason: e.to_string(),
        })?;
    tracing::info!(file = %name, "Uploaded for query, waiting for tags");

    let key = target.key.unwrap_or_else(|| format!("{TEMP_FOLDER}/{name}"));
    poll_for_result(api, token, &key, policy).await
}

/// QueryOutcome
///
/// How a query result reads to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    NoSpeciesDetected,
    NoMatches,
    Matches,
}

impl QueryOutcome {
    pub fn of(result: &QueryByFileResult) -> Self {
        if result.tags.is_empty() {
            QueryOutcome::NoSpeciesDetected
        } else if result.links.is_empty() {
            QueryOutcome::NoMatches
        } else {
            QueryOutcome::Matches
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            QueryOutcome::NoSpeciesDetected => "No bird species detected in the uploaded file.",
            QueryOutcome::NoMatches => "No matches found.",
            QueryOutcome::Matches => "Done!",
        }
    }
}
