use thiserror::Error;

/// BirdTagResult
///
/// Result alias used by every fallible operation in the crate.
pub type BirdTagResult<T> = Result<T, BirdTagError>;

/// BirdTagError
///
/// The single error taxonomy for the client. Each variant maps to one user-facing
/// line on stderr and a process exit code (see `exit_code`).
#[derive(Debug, Error)]
pub enum BirdTagError {
    /// A required setting is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Advisory input check failed before any request was sent.
    /// The message is shown to the user as-is.
    #[error("{0}")]
    Validation(String),

    /// No usable session: the user must sign in again.
    #[error("Not signed in. Run `birdtag signin` first.")]
    Unauthenticated,

    /// The identity provider rejected a request (e.g. wrong password).
    #[error("{message}")]
    Identity { code: String, message: String },

    /// The backend answered with a non-success status.
    #[error("{endpoint} failed with status {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// A referenced record or tag does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Transfer of a single file to its presigned URL failed.
    #[error("{file} failed to upload: {reason}")]
    Upload { file: String, reason: String },

    /// The query-by-upload result never became available.
    #[error("Timed out waiting for query result after {attempts} attempts.")]
    PollTimeout { attempts: u32 },

    /// Transport level failure (DNS, TLS, connection reset, timeout).
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored ID token could not be decoded.
    #[error("Invalid session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl BirdTagError {
    /// exit_code
    ///
    /// Maps the error to a process exit code following sysexits.h where a
    /// category fits.
    pub fn exit_code(&self) -> i32 {
        match self {
            BirdTagError::Validation(_) => 2,
            BirdTagError::Unauthenticated | BirdTagError::Token(_) => 77, // EX_NOPERM
            BirdTagError::Config(_) => 78,                                // EX_CONFIG
            BirdTagError::Io(_) => 74,                                    // EX_IOERR
            BirdTagError::Http(_) => 69,                                  // EX_UNAVAILABLE
            _ => 1,
        }
    }

    /// Shorthand for advisory validation failures.
    pub fn validation(message: impl Into<String>) -> Self {
        BirdTagError::Validation(message.into())
    }
}
