use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Response, StatusCode, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    error::{BirdTagError, BirdTagResult},
    links,
    models::{
        ApiMessage, DeleteFilesRequest, LinksResponse, MediaRecord, ModifyTagsRequest,
        OriginalUrlRequest, OriginalUrlResponse, QueryByFileResult, SearchBySpeciesRequest,
        SearchByTagsRequest, SignedLink, SignedLinksResponse, SubscribeRequest,
        SubscriptionsResponse, TagCounts, TempUploadUrlRequest, TempUploadUrlResponse,
        UploadUrlResponse,
    },
    tags::{TagChange, apply_tag_change},
};

/// Folder the backend tags query-by-upload files in without storing them.
pub const TEMP_FOLDER: &str = "temp";

// 1. MediaApi Contract
/// MediaApi
///
/// The BirdTag backend as the client sees it. Every call that touches user data
/// takes the caller's ID token and sends it as a bearer token; the presigned PUT
/// carries its authorisation in the URL instead.
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// `GET /get-all-media`
    async fn list_media(&self, token: &str) -> BirdTagResult<Vec<MediaRecord>>;

    /// `POST /delete-files`
    async fn delete_files(&self, token: &str, file_ids: &[String]) -> BirdTagResult<()>;

    /// `POST /modify-tags`
    async fn modify_tags(&self, token: &str, request: &ModifyTagsRequest) -> BirdTagResult<()>;

    /// `POST /search-by-tags`: files carrying every tag with at least its count.
    async fn search_by_tags(&self, token: &str, tags: &TagCounts) -> BirdTagResult<Vec<SignedLink>>;

    /// `POST /search-by-species`: files carrying any of the species.
    async fn search_by_species(&self, token: &str, species: &[String]) -> BirdTagResult<Vec<String>>;

    /// `GET /generate-media-upload-url`: presigned PUT URL for a permanent upload.
    async fn media_upload_url(&self, token: &str, filename: &str, content_type: &str) -> BirdTagResult<String>;

    /// `POST /generate-temp-upload-url`: presigned PUT URL under `temp/`.
    async fn temp_upload_url(&self, token: &str, filename: &str) -> BirdTagResult<TempUploadUrlResponse>;

    /// PUT the bytes to a presigned URL with the content type it was signed for.
    async fn put_object(&self, url: &str, content_type: &str, body: Vec<u8>) -> BirdTagResult<()>;

    /// `GET /query-media-by-file`: `Ok(None)` while the backend still reports the
    /// file as processing.
    async fn query_by_file(&self, token: &str, key: &str) -> BirdTagResult<Option<QueryByFileResult>>;

    /// `POST /get-original-url`: `Ok(None)` when the backend finds no original.
    async fn original_url(&self, token: &str, thumbnail_url: &str) -> BirdTagResult<Option<String>>;

    /// `GET /get-user-subscriptions`
    async fn subscriptions(&self, token: &str) -> BirdTagResult<SubscriptionsResponse>;

    /// `POST /subscribe-to-tags`: replaces the subscription set, returns the backend's message.
    async fn subscribe(&self, token: &str, tags: &[String]) -> BirdTagResult<String>;
}

pub type ApiState = Arc<dyn MediaApi>;

// 2. The Real Implementation (reqwest)
/// HttpMediaApi
///
/// Plain request/response calls against the API gateway. No retries: a failed call
/// surfaces as an error to the command that made it.
#[derive(Clone)]
pub struct HttpMediaApi {
    client: reqwest::Client,
    base: String,
}

impl HttpMediaApi {
    pub fn new(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    /// Passes successful responses through; turns anything else into `Api`.
    async fn check(endpoint: &str, response: Response) -> BirdTagResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = error_message(&response.text().await.unwrap_or_default());
        tracing::warn!(endpoint, status = status.as_u16(), %message, "Backend call failed");
        Err(BirdTagError::Api {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, endpoint: &str, token: &str) -> BirdTagResult<T> {
        tracing::debug!(endpoint, "GET");
        let response = self
            .client
            .get(self.url(endpoint))
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;
        Ok(Self::check(endpoint, response).await?.json().await?)
    }

    async fn post_json<B: serde::Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        endpoint: &str,
        token: &str,
        body: &B,
    ) -> BirdTagResult<T> {
        let response = self.post(endpoint, token, body).await?;
        Ok(Self::check(endpoint, response).await?.json().await?)
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        endpoint: &str,
        token: &str,
        body: &B,
    ) -> BirdTagResult<Response> {
        tracing::debug!(endpoint, "POST");
        Ok(self
            .client
            .post(self.url(endpoint))
            .header("Authorization", Self::bearer(token))
            .json(body)
            .send()
            .await?)
    }
}

/// error_message
///
/// Pulls a readable message out of an error body: `{"error": ..}`,
/// `{"message": ..}`, a bare JSON string, or the raw text.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Ok(Value::String(text)) => text,
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl MediaApi for HttpMediaApi {
    async fn list_media(&self, token: &str) -> BirdTagResult<Vec<MediaRecord>> {
        self.get_json("/get-all-media", token).await
    }

    async fn delete_files(&self, token: &str, file_ids: &[String]) -> BirdTagResult<()> {
        let body = DeleteFilesRequest {
            file_ids: file_ids.to_vec(),
        };
        let response = self.post("/delete-files", token, &body).await?;
        Self::check("/delete-files", response).await?;
        Ok(())
    }

    async fn modify_tags(&self, token: &str, request: &ModifyTagsRequest) -> BirdTagResult<()> {
        let response = self.post("/modify-tags", token, request).await?;
        Self::check("/modify-tags", response).await?;
        Ok(())
    }

    async fn search_by_tags(&self, token: &str, tags: &TagCounts) -> BirdTagResult<Vec<SignedLink>> {
        let body = SearchByTagsRequest { tags: tags.clone() };
        let response: SignedLinksResponse = self.post_json("/search-by-tags", token, &body).await?;
        Ok(response.links)
    }

    async fn search_by_species(&self, token: &str, species: &[String]) -> BirdTagResult<Vec<String>> {
        let body = SearchBySpeciesRequest {
            species: species.to_vec(),
        };
        let response: LinksResponse = self.post_json("/search-by-species", token, &body).await?;
        Ok(response.links)
    }

    async fn media_upload_url(&self, token: &str, filename: &str, content_type: &str) -> BirdTagResult<String> {
        let endpoint = "/generate-media-upload-url";
        tracing::debug!(endpoint, filename, content_type, "GET");
        let response = self
            .client
            .get(self.url(endpoint))
            .query(&[("filename", filename), ("content_type", content_type)])
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;
        let body: UploadUrlResponse = Self::check(endpoint, response).await?.json().await?;
        Ok(body.upload_url)
    }

    async fn temp_upload_url(&self, token: &str, filename: &str) -> BirdTagResult<TempUploadUrlResponse> {
        let body = TempUploadUrlRequest {
            filename: filename.to_string(),
            folder: TEMP_FOLDER.to_string(),
        };
        self.post_json("/generate-temp-upload-url", token, &body).await
    }

    async fn put_object(&self, url: &str, content_type: &str, body: Vec<u8>) -> BirdTagResult<()> {
        tracing::debug!(bytes = body.len(), content_type, "PUT presigned");
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Self::check("presigned upload", response).await?;
        Ok(())
    }

    async fn query_by_file(&self, token: &str, key: &str) -> BirdTagResult<Option<QueryByFileResult>> {
        let endpoint = "/query-media-by-file";
        let response = self
            .client
            .get(self.url(endpoint))
            .query(&[("key", key)])
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Self::check(endpoint, response).await.map(|_| None),
        }
    }

    async fn original_url(&self, token: &str, thumbnail_url: &str) -> BirdTagResult<Option<String>> {
        let endpoint = "/get-original-url";
        let body = OriginalUrlRequest {
            thumbnail_url: thumbnail_url.to_string(),
        };
        let response = self.post(endpoint, token, &body).await?;
        // Any refusal reads as "no original for this thumbnail".
        if !response.status().is_success() {
            tracing::debug!(endpoint, status = response.status().as_u16(), "No original found");
            return Ok(None);
        }
        let body: OriginalUrlResponse = response.json().await?;
        Ok(body.original_url.filter(|url| !url.is_empty()))
    }

    async fn subscriptions(&self, token: &str) -> BirdTagResult<SubscriptionsResponse> {
        self.get_json("/get-user-subscriptions", token).await
    }

    async fn subscribe(&self, token: &str, tags: &[String]) -> BirdTagResult<String> {
        let body = SubscribeRequest { tags: tags.to_vec() };
        let message: ApiMessage = self.post_json("/subscribe-to-tags", token, &body).await?;
        Ok(message.text().to_string())
    }
}

// 3. The Mock Implementation (For Tests)

/// One object PUT to a presigned URL.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

#[derive(Default)]
struct MockBackend {
    records: Vec<MediaRecord>,
    subscriptions: Vec<String>,
    objects: Vec<StoredObject>,
    query_results: HashMap<String, QueryByFileResult>,
    processing_polls: u32,
    query_calls: u32,
    failing_uploads: Vec<String>,
    modify_requests: Vec<ModifyTagsRequest>,
}

/// MockMediaApi
///
/// An in-memory BirdTag backend with the same matching and tag-update rules as
/// the hosted one. Used to exercise handlers and workflows without a network.
/// An empty token is rejected with 401.
#[derive(Default)]
pub struct MockMediaApi {
    state: Mutex<MockBackend>,
    /// Bucket used for the `s3://` locations of seeded records.
    pub bucket: String,
}

impl MockMediaApi {
    pub fn new() -> Self {
        Self {
            bucket: crate::config::DEFAULT_BUCKET.to_string(),
            ..Self::default()
        }
    }

    pub fn with_records(self, records: Vec<MediaRecord>) -> Self {
        self.lock().records = records;
        self
    }

    /// Tags the backend already holds for the caller.
    pub fn with_subscriptions(self, tags: &[&str]) -> Self {
        self.lock().subscriptions = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Registers the tagging result for a temp upload, answered after
    /// `processing_polls` "still processing" replies.
    pub fn with_query_result(self, key: &str, result: QueryByFileResult, processing_polls: u32) -> Self {
        {
            let mut state = self.lock();
            state.query_results.insert(key.to_string(), result);
            state.processing_polls = processing_polls;
        }
        self
    }

    /// PUTs to URLs containing `needle` fail with 403.
    pub fn with_failing_upload(self, needle: &str) -> Self {
        self.lock().failing_uploads.push(needle.to_string());
        self
    }

    pub fn records(&self) -> Vec<MediaRecord> {
        self.lock().records.clone()
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.lock().objects.clone()
    }

    pub fn subscribed_tags(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub fn modify_requests(&self) -> Vec<ModifyTagsRequest> {
        self.lock().modify_requests.clone()
    }

    /// Number of `query_by_file` calls seen so far.
    pub fn query_calls(&self) -> u32 {
        self.lock().query_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockBackend> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authorize(endpoint: &str, token: &str) -> BirdTagResult<()> {
        if token.is_empty() {
            return Err(BirdTagError::Api {
                endpoint: endpoint.to_string(),
                status: 401,
                message: "Unauthorized".to_string(),
            });
        }
        Ok(())
    }

    /// Images are served by thumbnail, everything else by original.
    fn served_location(record: &MediaRecord) -> Option<String> {
        if record.file_type == "image" {
            record.thumbnail_url.clone().or_else(|| record.original_url.clone())
        } else {
            record.original_url.clone()
        }
    }

    fn sign(location: &str) -> String {
        format!("{}?X-Amz-Signature=mock", links::s3_to_https(location))
    }
}

#[async_trait]
impl MediaApi for MockMediaApi {
    async fn list_media(&self, token: &str) -> BirdTagResult<Vec<MediaRecord>> {
        Self::authorize("/get-all-media", token)?;
        Ok(self.records())
    }

    async fn delete_files(&self, token: &str, file_ids: &[String]) -> BirdTagResult<()> {
        Self::authorize("/delete-files", token)?;
        self.lock().records.retain(|r| !file_ids.contains(&r.file_id));
        Ok(())
    }

    async fn modify_tags(&self, token: &str, request: &ModifyTagsRequest) -> BirdTagResult<()> {
        Self::authorize("/modify-tags", token)?;
        let changes: Vec<TagChange> = request
            .tags
            .iter()
            .filter_map(|raw| TagChange::parse_wire(raw))
            .collect();
        if request.file_ids.is_empty() || changes.is_empty() {
            return Err(BirdTagError::Api {
                endpoint: "/modify-tags".to_string(),
                status: 400,
                message: "Missing or invalid input".to_string(),
            });
        }

        let mut state = self.lock();
        state.modify_requests.push(request.clone());
        for record in state
            .records
            .iter_mut()
            .filter(|r| request.file_ids.contains(&r.file_id))
        {
            for change in &changes {
                apply_tag_change(&mut record.tags, request.operation, change);
            }
        }
        Ok(())
    }

    async fn search_by_tags(&self, token: &str, tags: &TagCounts) -> BirdTagResult<Vec<SignedLink>> {
        Self::authorize("/search-by-tags", token)?;
        let state = self.lock();
        Ok(state
            .records
            .iter()
            .filter(|r| tags.iter().all(|(tag, min)| r.tag_count(tag).is_some_and(|c| c >= *min)))
            .filter_map(Self::served_location)
            .map(|location| SignedLink {
                signed_url: Self::sign(&location),
                display_url: links::s3_to_https(&location),
            })
            .collect())
    }

    async fn search_by_species(&self, token: &str, species: &[String]) -> BirdTagResult<Vec<String>> {
        Self::authorize("/search-by-species", token)?;
        let state = self.lock();
        Ok(state
            .records
            .iter()
            .filter(|r| species.iter().any(|s| r.tag_count(s).is_some_and(|c| c >= 1)))
            .filter_map(Self::served_location)
            .map(|location| Self::sign(&location))
            .collect())
    }

    async fn media_upload_url(&self, token: &str, filename: &str, _content_type: &str) -> BirdTagResult<String> {
        Self::authorize("/generate-media-upload-url", token)?;
        let folder = links::storage_folder(filename).ok_or_else(|| BirdTagError::Api {
            endpoint: "/generate-media-upload-url".to_string(),
            status: 400,
            message: "Unsupported file type".to_string(),
        })?;
        Ok(format!(
            "{}/{}/{}?X-Amz-Signature=mock",
            links::public_host(&self.bucket),
            folder,
            filename
        ))
    }

    async fn temp_upload_url(&self, token: &str, filename: &str) -> BirdTagResult<TempUploadUrlResponse> {
        Self::authorize("/generate-temp-upload-url", token)?;
        let key = format!("{TEMP_FOLDER}/{filename}");
        Ok(TempUploadUrlResponse {
            url: format!("{}/{}?X-Amz-Signature=mock", links::public_host(&self.bucket), key),
            key: Some(key),
        })
    }

    async fn put_object(&self, url: &str, content_type: &str, body: Vec<u8>) -> BirdTagResult<()> {
        let mut state = self.lock();
        if state.failing_uploads.iter().any(|needle| url.contains(needle.as_str())) {
            return Err(BirdTagError::Api {
                endpoint: "presigned upload".to_string(),
                status: 403,
                message: "SignatureDoesNotMatch".to_string(),
            });
        }
        state.objects.push(StoredObject {
            url: url.to_string(),
            content_type: content_type.to_string(),
            size: body.len(),
        });
        Ok(())
    }

    async fn query_by_file(&self, token: &str, key: &str) -> BirdTagResult<Option<QueryByFileResult>> {
        Self::authorize("/query-media-by-file", token)?;
        let mut state = self.lock();
        state.query_calls += 1;
        if state.processing_polls > 0 {
            state.processing_polls -= 1;
            return Ok(None);
        }
        Ok(state.query_results.get(key).cloned())
    }

    async fn original_url(&self, token: &str, thumbnail_url: &str) -> BirdTagResult<Option<String>> {
        Self::authorize("/get-original-url", token)?;
        // Match on the object key so s3://, https:// and signed forms all resolve.
        let wanted = links::s3_to_https(thumbnail_url);
        let wanted = wanted.split('?').next().unwrap_or_default();
        let state = self.lock();
        Ok(state
            .records
            .iter()
            .find(|r| {
                r.thumbnail_url
                    .as_deref()
                    .is_some_and(|thumb| links::s3_to_https(thumb) == wanted)
            })
            .and_then(|r| r.original_url.as_deref())
            .map(Self::sign))
    }

    async fn subscriptions(&self, token: &str) -> BirdTagResult<SubscriptionsResponse> {
        Self::authorize("/get-user-subscriptions", token)?;
        Ok(SubscriptionsResponse {
            email: None,
            tags: self.subscribed_tags(),
        })
    }

    async fn subscribe(&self, token: &str, tags: &[String]) -> BirdTagResult<String> {
        Self::authorize("/subscribe-to-tags", token)?;
        self.lock().subscriptions = tags.to_vec();
        Ok("Subscription request sent. Please check your email to confirm.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crow_image() -> MediaRecord {
        MediaRecord {
            file_id: "img-1".into(),
            file_type: "image".into(),
            original_url: Some("s3://birdtag-storage-aus-dev/images/crow.jpg".into()),
            thumbnail_url: Some("s3://birdtag-storage-aus-dev/thumbnails/crow_thumb.jpg".into()),
            tags: [("crow".to_string(), 3)].into_iter().collect(),
        }
    }

    fn owl_video() -> MediaRecord {
        MediaRecord {
            file_id: "vid-1".into(),
            file_type: "video".into(),
            original_url: Some("s3://birdtag-storage-aus-dev/videos/owl.mp4".into()),
            thumbnail_url: None,
            tags: [("owl".to_string(), 1), ("crow".to_string(), 1)].into_iter().collect(),
        }
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(error_message(r#"{"error":"Missing key"}"#), "Missing key");
        assert_eq!(error_message(r#"{"message":"Processing"}"#), "Processing");
        assert_eq!(error_message(r#""Email and tags are required.""#), "Email and tags are required.");
        assert_eq!(error_message("Internal Server Error\n"), "Internal Server Error");
    }

    #[tokio::test]
    async fn test_mock_rejects_empty_token() {
        let api = MockMediaApi::new();
        let err = api.list_media("").await.unwrap_err();
        assert!(matches!(err, BirdTagError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_mock_tag_search_requires_every_tag_at_min_count() {
        let api = MockMediaApi::new().with_records(vec![crow_image(), owl_video()]);

        let crow2: TagCounts = [("crow".to_string(), 2)].into_iter().collect();
        let links = api.search_by_tags("t", &crow2).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].display_url,
            "https://birdtag-storage-aus-dev.s3.amazonaws.com/thumbnails/crow_thumb.jpg"
        );

        let crow1: TagCounts = [("crow".to_string(), 1)].into_iter().collect();
        assert_eq!(api.search_by_tags("t", &crow1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_species_search_matches_any() {
        let api = MockMediaApi::new().with_records(vec![crow_image(), owl_video()]);
        let links = api
            .search_by_species("t", &["owl".to_string(), "eagle".to_string()])
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert!(links[0].contains("/videos/owl.mp4"));
    }

    #[tokio::test]
    async fn test_mock_original_url_lookup() {
        let api = MockMediaApi::new().with_records(vec![crow_image()]);
        let found = api
            .original_url("t", "https://birdtag-storage-aus-dev.s3.amazonaws.com/thumbnails/crow_thumb.jpg")
            .await
            .unwrap();
        assert!(found.unwrap().contains("/images/crow.jpg"));

        assert!(api.original_url("t", "https://nope/x.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_upload_url_rejects_unsupported_type() {
        let api = MockMediaApi::new();
        assert!(api.media_upload_url("t", "crow.jpg", "image/jpeg").await.unwrap().contains("/images/crow.jpg"));
        assert!(api.media_upload_url("t", "notes.txt", "text/plain").await.is_err());
    }
}
