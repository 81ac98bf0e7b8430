use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tag name -> observed count, ordered by name for stable output.
pub type TagCounts = BTreeMap<String, u32>;

// --- Backend Records ---

/// MediaRecord
///
/// A backend-tracked file with its derived tags. Returned by `GET /get-all-media`
/// with `original_url`/`thumbnail_url` already presigned (or still `s3://` for
/// older rows). Unknown extra columns are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MediaRecord {
    pub file_id: String,
    // Storage type: "image", "video" or "audio".
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub original_url: Option<String>,
    // Only images carry a thumbnail.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: TagCounts,
}

impl MediaRecord {
    /// Current count for `tag`, if the record carries it.
    pub fn tag_count(&self, tag: &str) -> Option<u32> {
        self.tags.get(tag).copied()
    }
}

// --- Tag Mutation ---

/// TagOperation
///
/// Serialized as the integer the `/modify-tags` endpoint expects: 1 adds the
/// given counts, 0 subtracts them (dropping tags that reach zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TagOperation {
    Remove,
    Add,
}

impl From<TagOperation> for u8 {
    fn from(op: TagOperation) -> u8 {
        match op {
            TagOperation::Remove => 0,
            TagOperation::Add => 1,
        }
    }
}

impl TryFrom<u8> for TagOperation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TagOperation::Remove),
            1 => Ok(TagOperation::Add),
            other => Err(format!("unknown tag operation {other}")),
        }
    }
}

/// ModifyTagsRequest
///
/// Body of `POST /modify-tags`. Tags travel as `"name,count"` strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModifyTagsRequest {
    pub file_ids: Vec<String>,
    pub operation: TagOperation,
    pub tags: Vec<String>,
}

/// Body of `POST /delete-files`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteFilesRequest {
    pub file_ids: Vec<String>,
}

// --- Search ---

/// Body of `POST /search-by-tags`: every tag must be present with at least the given count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchByTagsRequest {
    pub tags: TagCounts,
}

/// A presigned link together with its public-bucket form for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedLink {
    pub signed_url: String,
    pub display_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignedLinksResponse {
    #[serde(default)]
    pub links: Vec<SignedLink>,
}

/// Body of `POST /search-by-species`: any listed species matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchBySpeciesRequest {
    pub species: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LinksResponse {
    #[serde(default)]
    pub links: Vec<String>,
}

// --- Upload ---

/// Response of `GET /generate-media-upload-url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadUrlResponse {
    pub upload_url: String,
}

/// Body of `POST /generate-temp-upload-url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TempUploadUrlRequest {
    pub filename: String,
    pub folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempUploadUrlResponse {
    pub url: String,
    // Object key chosen by the backend; older deployments omit it.
    #[serde(default)]
    pub key: Option<String>,
}

/// QueryByFileResult
///
/// Result of `GET /query-media-by-file` once the temporary upload has been tagged:
/// the detected tags and signed links to every stored file carrying all of them.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QueryByFileResult {
    #[serde(default)]
    pub tags: TagCounts,
    #[serde(default)]
    pub links: Vec<String>,
}

// --- Lookup ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OriginalUrlRequest {
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OriginalUrlResponse {
    #[serde(default)]
    pub original_url: Option<String>,
}

// --- Subscriptions ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SubscriptionsResponse {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeRequest {
    pub tags: Vec<String>,
}

/// ApiMessage
///
/// Some endpoints answer with a bare JSON string, others with `{"message": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ApiMessage {
    Text(String),
    Object { message: String },
}

impl ApiMessage {
    pub fn text(&self) -> &str {
        match self {
            ApiMessage::Text(text) => text,
            ApiMessage::Object { message } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_record_tolerates_missing_and_extra_fields() {
        let record: MediaRecord = serde_json::from_value(json!({
            "file_id": "abc",
            "file_type": "audio",
            "original_url": "s3://bucket/audios/a.mp3",
            "uploaded_by": "someone@example.com"
        }))
        .unwrap();

        assert_eq!(record.file_id, "abc");
        assert!(record.thumbnail_url.is_none());
        assert!(record.tags.is_empty());
    }

    #[test]
    fn test_tag_operation_is_an_integer_on_the_wire() {
        let body = ModifyTagsRequest {
            file_ids: vec!["f1".into()],
            operation: TagOperation::Add,
            tags: vec!["crow,2".into()],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["operation"], json!(1));

        let parsed: TagOperation = serde_json::from_value(json!(0)).unwrap();
        assert_eq!(parsed, TagOperation::Remove);
        assert!(serde_json::from_value::<TagOperation>(json!(7)).is_err());
    }

    #[test]
    fn test_api_message_accepts_both_shapes() {
        let bare: ApiMessage = serde_json::from_value(json!("Subscription request sent.")).unwrap();
        let wrapped: ApiMessage =
            serde_json::from_value(json!({"message": "Tag update complete"})).unwrap();

        assert_eq!(bare.text(), "Subscription request sent.");
        assert_eq!(wrapped.text(), "Tag update complete");
    }
}
