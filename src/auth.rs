use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::{BirdTagError, BirdTagResult},
    identity::IdentityState,
};

/// Tokens closer than this to expiry are treated as expired, so a request never
/// leaves with a token that dies in flight.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Claims
///
/// The subset of the identity provider's ID-token payload the client reads.
/// Tokens are never verified here; the backend's authorizer does that. The
/// claims only drive display (name, e-mail) and the local expiry check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject: the user's stable id in the user pool.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
}

impl Claims {
    /// "given family", trimmed; empty when neither name attribute is set.
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.given_name.as_deref().unwrap_or(""),
            self.family_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// decode_claims
///
/// Reads the payload of an ID token without checking its signature, audience or
/// expiry. Fails only when the token is structurally broken.
pub fn decode_claims(token: &str) -> BirdTagResult<Claims> {
    // The provider signs with RS256; no key is held here, so no verifier is built.
    let data = jsonwebtoken::dangerous::insecure_decode::<Claims>(token)?;
    Ok(data.claims)
}

/// Session
///
/// The token set returned by the identity provider after sign-in or refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id_token: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn claims(&self) -> BirdTagResult<Claims> {
        decode_claims(&self.id_token)
    }

    /// True when the ID token is expired (or within the skew window) at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> BirdTagResult<bool> {
        let claims = self.claims()?;
        Ok(match claims.expires_at() {
            Some(expires_at) => expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= now,
            None => true,
        })
    }
}

// --- Session Persistence ---

/// SessionStore
///
/// Where the signed-in session lives between invocations. The file store backs
/// the CLI; the memory store backs tests.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> BirdTagResult<Option<Session>>;
    async fn save(&self, session: &Session) -> BirdTagResult<()>;
    /// Removing a session that does not exist is not an error.
    async fn clear(&self) -> BirdTagResult<()>;
}

pub type SessionState = Arc<dyn SessionStore>;

/// FileSessionStore
///
/// Persists the session as JSON. On unix the file is restricted to the owner.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> BirdTagResult<Option<Session>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session: &Session) -> BirdTagResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(session)?).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> BirdTagResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store used by tests and embedders that manage tokens themselves.
#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> BirdTagResult<Option<Session>> {
        Ok(self.slot().clone())
    }

    async fn save(&self, session: &Session) -> BirdTagResult<()> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> BirdTagResult<()> {
        *self.slot() = None;
        Ok(())
    }
}

// --- Auth Guard ---

/// AuthUser
///
/// The resolved identity of a protected command: who is calling and the bearer
/// token every backend request of this command carries.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub sub: String,
    pub email: Option<String>,
    pub display_name: String,
    pub id_token: String,
}

impl AuthUser {
    fn from_session(session: &Session) -> BirdTagResult<Self> {
        let claims = session.claims()?;
        Ok(Self {
            display_name: claims.display_name(),
            sub: claims.sub,
            email: claims.email,
            id_token: session.id_token.clone(),
        })
    }
}

/// resolve_user
///
/// The guard every protected command passes through:
/// 1. No stored session: `Unauthenticated`.
/// 2. Undecodable token: the session is dropped and `Unauthenticated` returned.
/// 3. Expired token: one refresh attempt with the refresh token; the refreshed
///    session is persisted. A failed or impossible refresh is `Unauthenticated`.
pub async fn resolve_user(
    sessions: &SessionState,
    identity: &IdentityState,
) -> BirdTagResult<AuthUser> {
    let Some(session) = sessions.load().await? else {
        tracing::debug!("No stored session");
        return Err(BirdTagError::Unauthenticated);
    };

    let expired = match session.is_expired(Utc::now()) {
        Ok(expired) => expired,
        Err(e) => {
            tracing::warn!("Stored session is unreadable, discarding it: {}", e);
            sessions.clear().await?;
            return Err(BirdTagError::Unauthenticated);
        }
    };

    if !expired {
        return AuthUser::from_session(&session);
    }

    let Some(refresh_token) = session.refresh_token.clone() else {
        tracing::info!("Session expired and no refresh token is available");
        return Err(BirdTagError::Unauthenticated);
    };

    match identity.refresh(&refresh_token).await {
        Ok(mut refreshed) => {
            // The refresh flow does not rotate the refresh token.
            if refreshed.refresh_token.is_none() {
                refreshed.refresh_token = Some(refresh_token);
            }
            sessions.save(&refreshed).await?;
            tracing::info!("Session refreshed");
            AuthUser::from_session(&refreshed)
        }
        Err(e) => {
            tracing::warn!("Session refresh failed: {}", e);
            Err(BirdTagError::Unauthenticated)
        }
    }
}

/// require_auth
///
/// `resolve_user` against the application state.
pub async fn require_auth(state: &AppState) -> BirdTagResult<AuthUser> {
    resolve_user(&state.sessions, &state.identity).await
}
