use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::{
    auth::{Claims, Session},
    error::{BirdTagError, BirdTagResult},
};

/// SignUpRequest
///
/// A new account: the e-mail doubles as the username, the names become the
/// `given_name`/`family_name` attributes shown after sign-in.
#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub given_name: String,
    pub family_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    /// False when a confirmation code was sent and `confirm_sign_up` is still required.
    pub user_confirmed: bool,
    pub user_sub: Option<String>,
}

// 1. IdentityProvider Contract
/// IdentityProvider
///
/// The managed identity service the client signs in against. Swappable so the
/// auth guard and the account commands run against `MockIdentityProvider` in tests.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, request: &SignUpRequest) -> BirdTagResult<SignUpOutcome>;

    async fn confirm_sign_up(&self, email: &str, code: &str) -> BirdTagResult<()>;

    async fn sign_in(&self, email: &str, password: &str) -> BirdTagResult<Session>;

    /// Exchanges a refresh token for fresh ID/access tokens.
    async fn refresh(&self, refresh_token: &str) -> BirdTagResult<Session>;

    /// Revokes every token issued to the user.
    async fn global_sign_out(&self, access_token: &str) -> BirdTagResult<()>;
}

pub type IdentityState = Arc<dyn IdentityProvider>;

// 2. The Real Implementation (Cognito user pool JSON API)

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    id_token: String,
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CognitoSignUpResponse {
    #[serde(default)]
    user_confirmed: bool,
    user_sub: Option<String>,
}

#[derive(Deserialize)]
struct CognitoErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(default, alias = "Message")]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UserAttribute<'a> {
    name: &'a str,
    value: &'a str,
}

/// CognitoIdentityClient
///
/// Talks to the Cognito Identity Provider JSON protocol: every operation is a
/// POST to the pool endpoint, selected by the `X-Amz-Target` header.
#[derive(Clone)]
pub struct CognitoIdentityClient {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
}

impl CognitoIdentityClient {
    pub fn new(client: reqwest::Client, endpoint: &str, client_id: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
        }
    }

    async fn call<B: Serialize + Sync + ?Sized, R: DeserializeOwned + Send>(
        &self,
        operation: &str,
        body: &B,
    ) -> BirdTagResult<R> {
        tracing::debug!(operation, "Calling identity provider");

        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header(CONTENT_TYPE, "application/x-amz-json-1.1")
            .header(
                "X-Amz-Target",
                format!("AWSCognitoIdentityProviderService.{operation}"),
            )
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let parsed: Option<CognitoErrorBody> = serde_json::from_slice(&bytes).ok();
            let (code, message) = match parsed {
                Some(body) => {
                    // "__type" is sometimes namespaced: "prefix#NotAuthorizedException".
                    let code = body
                        .error_type
                        .rsplit('#')
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    (code, body.message)
                }
                None => (String::new(), String::from_utf8_lossy(&bytes).into_owned()),
            };
            tracing::warn!(operation, status = status.as_u16(), code = %code, "Identity provider rejected request");
            let message = if message.is_empty() {
                format!("{operation} failed with status {}", status.as_u16())
            } else {
                message
            };
            return Err(BirdTagError::Identity { code, message });
        }

        // Operations without a result answer with an empty body or `{}`.
        if bytes.is_empty() {
            return Ok(serde_json::from_value(json!({}))?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn session_from(response: InitiateAuthResponse) -> BirdTagResult<Session> {
        match (response.authentication_result, response.challenge_name) {
            (Some(result), _) => Ok(Session {
                id_token: result.id_token,
                access_token: result.access_token,
                refresh_token: result.refresh_token,
            }),
            (None, Some(challenge)) => Err(BirdTagError::Identity {
                code: "UnsupportedChallenge".to_string(),
                message: format!("Sign-in requires the {challenge} challenge, which is not supported"),
            }),
            (None, None) => Err(BirdTagError::Identity {
                code: "EmptyResponse".to_string(),
                message: "Identity provider returned no tokens".to_string(),
            }),
        }
    }
}

#[async_trait]
impl IdentityProvider for CognitoIdentityClient {
    async fn sign_up(&self, request: &SignUpRequest) -> BirdTagResult<SignUpOutcome> {
        let attributes = [
            UserAttribute { name: "email", value: &request.email },
            UserAttribute { name: "given_name", value: &request.given_name },
            UserAttribute { name: "family_name", value: &request.family_name },
        ];
        let body = json!({
            "ClientId": self.client_id,
            "Username": request.email,
            "Password": request.password,
            "UserAttributes": attributes,
        });

        let response: CognitoSignUpResponse = self.call("SignUp", &body).await?;
        Ok(SignUpOutcome {
            user_confirmed: response.user_confirmed,
            user_sub: response.user_sub,
        })
    }

    async fn confirm_sign_up(&self, email: &str, code: &str) -> BirdTagResult<()> {
        let body = json!({
            "ClientId": self.client_id,
            "Username": email,
            "ConfirmationCode": code,
        });
        let _: serde_json::Value = self.call("ConfirmSignUp", &body).await?;
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> BirdTagResult<Session> {
        let body = json!({
            "AuthFlow": "USER_PASSWORD_AUTH",
            "ClientId": self.client_id,
            "AuthParameters": { "USERNAME": email, "PASSWORD": password },
        });
        let response: InitiateAuthResponse = self.call("InitiateAuth", &body).await?;
        Self::session_from(response)
    }

    async fn refresh(&self, refresh_token: &str) -> BirdTagResult<Session> {
        let body = json!({
            "AuthFlow": "REFRESH_TOKEN_AUTH",
            "ClientId": self.client_id,
            "AuthParameters": { "REFRESH_TOKEN": refresh_token },
        });
        let response: InitiateAuthResponse = self.call("InitiateAuth", &body).await?;
        Self::session_from(response)
    }

    async fn global_sign_out(&self, access_token: &str) -> BirdTagResult<()> {
        let body = json!({ "AccessToken": access_token });
        let _: serde_json::Value = self.call("GlobalSignOut", &body).await?;
        Ok(())
    }
}

// 3. The Mock Implementation (For Tests)

/// Secret the mock signs its tokens with. Signatures are never checked client-side.
const MOCK_SIGNING_SECRET: &[u8] = b"birdtag-mock-identity";
/// Confirmation code the mock accepts for every account.
pub const MOCK_CONFIRMATION_CODE: &str = "123456";

/// mint_id_token
///
/// Builds an HS256 ID token with the given identity and expiry.
pub fn mint_id_token(
    sub: &str,
    email: &str,
    given_name: &str,
    family_name: &str,
    exp: i64,
) -> BirdTagResult<String> {
    let claims = Claims {
        sub: sub.to_string(),
        email: Some(email.to_string()),
        given_name: Some(given_name.to_string()),
        family_name: Some(family_name.to_string()),
        exp,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(MOCK_SIGNING_SECRET),
    )?)
}

#[derive(Clone)]
struct MockAccount {
    sub: String,
    password: String,
    given_name: String,
    family_name: String,
    confirmed: bool,
}

#[derive(Default)]
struct MockIdentityInner {
    accounts: HashMap<String, MockAccount>,
    signed_out: Vec<String>,
}

/// MockIdentityProvider
///
/// An in-memory user pool: sign-up creates an unconfirmed account, the fixed
/// `MOCK_CONFIRMATION_CODE` confirms it, sign-in issues one-hour tokens.
#[derive(Default)]
pub struct MockIdentityProvider {
    inner: Mutex<MockIdentityInner>,
    /// When true, refresh always fails (simulates a revoked refresh token).
    pub fail_refresh: bool,
    /// When true, global sign-out fails (provider unreachable).
    pub fail_sign_out: bool,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing_refresh() -> Self {
        Self {
            fail_refresh: true,
            ..Self::default()
        }
    }

    pub fn new_failing_sign_out() -> Self {
        Self {
            fail_sign_out: true,
            ..Self::default()
        }
    }

    /// Registers an already-confirmed account.
    pub fn with_account(self, email: &str, password: &str, given_name: &str, family_name: &str) -> Self {
        self.lock().accounts.insert(
            email.to_string(),
            MockAccount {
                sub: format!("sub-{email}"),
                password: password.to_string(),
                given_name: given_name.to_string(),
                family_name: family_name.to_string(),
                confirmed: true,
            },
        );
        self
    }

    /// Access tokens passed to `global_sign_out`, oldest first.
    pub fn signed_out_tokens(&self) -> Vec<String> {
        self.lock().signed_out.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockIdentityInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn issue(email: &str, account: &MockAccount) -> BirdTagResult<Session> {
        let exp = (Utc::now() + chrono::Duration::hours(1)).timestamp();
        Ok(Session {
            id_token: mint_id_token(&account.sub, email, &account.given_name, &account.family_name, exp)?,
            access_token: format!("access-{email}"),
            refresh_token: Some(format!("refresh-{email}")),
        })
    }

    fn rejected(code: &str, message: &str) -> BirdTagError {
        BirdTagError::Identity {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn sign_up(&self, request: &SignUpRequest) -> BirdTagResult<SignUpOutcome> {
        let mut inner = self.lock();
        if inner.accounts.contains_key(&request.email) {
            return Err(Self::rejected("UsernameExistsException", "An account with the given email already exists."));
        }
        let sub = format!("sub-{}", request.email);
        inner.accounts.insert(
            request.email.clone(),
            MockAccount {
                sub: sub.clone(),
                password: request.password.clone(),
                given_name: request.given_name.clone(),
                family_name: request.family_name.clone(),
                confirmed: false,
            },
        );
        Ok(SignUpOutcome {
            user_confirmed: false,
            user_sub: Some(sub),
        })
    }

    async fn confirm_sign_up(&self, email: &str, code: &str) -> BirdTagResult<()> {
        let mut inner = self.lock();
        let account = inner
            .accounts
            .get_mut(email)
            .ok_or_else(|| Self::rejected("UserNotFoundException", "Username/client id combination not found."))?;
        if code != MOCK_CONFIRMATION_CODE {
            return Err(Self::rejected("CodeMismatchException", "Invalid verification code provided, please try again."));
        }
        account.confirmed = true;
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> BirdTagResult<Session> {
        let inner = self.lock();
        match inner.accounts.get(email) {
            Some(account) if account.password == password => {
                if !account.confirmed {
                    return Err(Self::rejected("UserNotConfirmedException", "User is not confirmed."));
                }
                Self::issue(email, account)
            }
            _ => Err(Self::rejected("NotAuthorizedException", "Incorrect username or password.")),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> BirdTagResult<Session> {
        if self.fail_refresh {
            return Err(Self::rejected("NotAuthorizedException", "Refresh Token has been revoked"));
        }
        let email = refresh_token
            .strip_prefix("refresh-")
            .ok_or_else(|| Self::rejected("NotAuthorizedException", "Invalid Refresh Token"))?;
        let inner = self.lock();
        let account = inner
            .accounts
            .get(email)
            .ok_or_else(|| Self::rejected("NotAuthorizedException", "Invalid Refresh Token"))?;
        let mut session = Self::issue(email, account)?;
        session.refresh_token = None;
        Ok(session)
    }

    async fn global_sign_out(&self, access_token: &str) -> BirdTagResult<()> {
        if self.fail_sign_out {
            return Err(Self::rejected("InternalErrorException", "Service unavailable"));
        }
        self.lock().signed_out.push(access_token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str) -> SignUpRequest {
        SignUpRequest {
            email: email.to_string(),
            password: "Secret123!".to_string(),
            given_name: "Ada".to_string(),
            family_name: "Lovelace".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_requires_confirmation_before_sign_in() {
        let idp = MockIdentityProvider::new();
        idp.sign_up(&request("ada@example.com")).await.unwrap();

        let err = idp.sign_in("ada@example.com", "Secret123!").await.unwrap_err();
        assert!(matches!(err, BirdTagError::Identity { ref code, .. } if code == "UserNotConfirmedException"));

        idp.confirm_sign_up("ada@example.com", MOCK_CONFIRMATION_CODE).await.unwrap();
        let session = idp.sign_in("ada@example.com", "Secret123!").await.unwrap();
        assert_eq!(session.claims().unwrap().display_name(), "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_mock_rejects_wrong_code_and_password() {
        let idp = MockIdentityProvider::new();
        idp.sign_up(&request("ada@example.com")).await.unwrap();

        assert!(idp.confirm_sign_up("ada@example.com", "000000").await.is_err());
        assert!(idp.sign_in("ada@example.com", "wrong").await.is_err());
        assert!(idp.sign_up(&request("ada@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_refresh_keeps_identity() {
        let idp = MockIdentityProvider::new().with_account("bob@example.com", "pw", "Bob", "Stone");
        let session = idp.sign_in("bob@example.com", "pw").await.unwrap();

        let refreshed = idp.refresh(session.refresh_token.as_deref().unwrap()).await.unwrap();
        assert_eq!(refreshed.claims().unwrap().email.as_deref(), Some("bob@example.com"));
        assert!(refreshed.refresh_token.is_none());
    }

    #[test]
    fn test_session_from_challenge_is_an_error() {
        let response = InitiateAuthResponse {
            authentication_result: None,
            challenge_name: Some("NEW_PASSWORD_REQUIRED".to_string()),
        };
        let err = CognitoIdentityClient::session_from(response).unwrap_err();
        assert!(err.to_string().contains("NEW_PASSWORD_REQUIRED"));
    }
}
