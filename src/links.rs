//! Link helpers: turning backend storage locations and presigned URLs into
//! something a person can read, and guessing what kind of media a link points at.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

static MEDIA_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(images|videos|audios|thumbnails|exports)/[^/?]+").expect("media path pattern is valid")
});

/// `https://<bucket>.s3.amazonaws.com`
pub fn public_host(bucket: &str) -> String {
    format!("https://{bucket}.s3.amazonaws.com")
}

/// s3_to_https
///
/// Rewrites `s3://bucket/key` to the bucket's public HTTPS form. Anything else is
/// returned unchanged.
pub fn s3_to_https(url: &str) -> String {
    match url.strip_prefix("s3://").and_then(|rest| rest.split_once('/')) {
        Some((bucket, key)) => format!("{}/{}", public_host(bucket), key),
        None => url.to_string(),
    }
}

/// display_url
///
/// Presigned links are long and expire; for printing, the media folder path is
/// lifted out of the link and put on the public bucket host. Links without a
/// recognisable media path are shown as-is.
pub fn display_url(link: &str, bucket: &str) -> String {
    match MEDIA_PATH.find(link) {
        Some(path) => format!("{}{}", public_host(bucket), path.as_str()),
        None => link.to_string(),
    }
}

/// bucket_path_url
///
/// Keeps the full object path of `link` but swaps its host for the public bucket
/// host. `None` when `link` is not a URL.
pub fn bucket_path_url(link: &str, bucket: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    Some(format!("{}{}", public_host(bucket), url.path()))
}

/// Backend folder an upload of `filename` lands in; `None` for unsupported types.
pub fn storage_folder(filename: &str) -> Option<&'static str> {
    match MediaKind::from_path(filename) {
        MediaKind::Image => Some("images"),
        MediaKind::Video => Some("videos"),
        MediaKind::Audio => Some("audios"),
        MediaKind::Other => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" => MediaKind::Image,
            "mp4" | "mov" | "avi" | "mkv" => MediaKind::Video,
            "mp3" | "wav" | "aac" | "flac" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(MediaKind::Other)
    }

    /// Kind of the object a (possibly presigned) link points at. The query
    /// string is ignored.
    pub fn from_link(link: &str) -> Self {
        match Url::parse(link) {
            Ok(url) => Self::from_path(url.path()),
            Err(_) => Self::from_path(link.split('?').next().unwrap_or(link)),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Other => "other",
        };
        f.write_str(label)
    }
}
