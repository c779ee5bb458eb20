//! OAuth2 token lifecycle for the Google APIs.
//!
//! The manager owns the credential record: it trades authorization codes,
//! refreshes access tokens shortly before they expire, and persists every
//! grant through the injected [`CredentialStore`] before handing it out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use super::credential_store::{Credential, CredentialStore};
use crate::error::OAuthError;
use crate::storage::GoogleConfig;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Tokens expiring within this window are refreshed before use.
const EXPIRY_BUFFER_SECS: i64 = 30;

/// OAuth client registration plus endpoint locations.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl OAuthClientConfig {
    pub fn google(google: &GoogleConfig) -> Self {
        Self {
            client_id: google.client_id.clone(),
            client_secret: google.client_secret.clone(),
            redirect_uri: google.redirect_uri.clone(),
            scopes: google.scopes.clone(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        }
    }

    fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty()
            && !self.client_secret.trim().is_empty()
            && !self.redirect_uri.trim().is_empty()
    }
}

/// Per-account single-flight locks for token refresh.
///
/// Clones share the same table. Managers use the process-wide table unless
/// given another one.
#[derive(Clone, Default)]
pub struct RefreshGuards {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RefreshGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table shared by every manager in the process.
    pub fn process() -> Self {
        static PROCESS: OnceLock<RefreshGuards> = OnceLock::new();
        PROCESS.get_or_init(RefreshGuards::new).clone()
    }

    fn guard_for(&self, account: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    token_type: Option<String>,
    id_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Profile of the connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Connection summary without secrets.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub connected: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub has_refresh_token: bool,
    pub scope: String,
}

/// Token lifecycle manager for one account.
pub struct TokenManager {
    http: Client,
    config: OAuthClientConfig,
    store: Arc<dyn CredentialStore>,
    account: String,
    guards: RefreshGuards,
}

impl TokenManager {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: OAuthClientConfig,
        store: Arc<dyn CredentialStore>,
        account: impl Into<String>,
        timeout: StdDuration,
    ) -> Result<Self, OAuthError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            config,
            store,
            account: account.into(),
            guards: RefreshGuards::process(),
        })
    }

    /// Share refresh locks with other managers for the same accounts.
    pub fn with_refresh_guards(mut self, guards: RefreshGuards) -> Self {
        self.guards = guards;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn stored(&self) -> Result<Option<Credential>, OAuthError> {
        Ok(self.store.load()?)
    }

    pub fn status(&self) -> Result<TokenStatus, OAuthError> {
        let now = Utc::now();
        Ok(match self.store.load()? {
            Some(cred) => TokenStatus {
                connected: true,
                expires_at: cred.expires_at,
                expired: cred.is_expired(now),
                has_refresh_token: cred.has_refresh_token(),
                scope: cred.scope,
            },
            None => TokenStatus {
                connected: false,
                expires_at: None,
                expired: false,
                has_refresh_token: false,
                scope: String::new(),
            },
        })
    }

    /// Consent page URL for the authorization code flow.
    pub fn build_auth_url(&self, state: Option<&str>) -> Result<String, OAuthError> {
        if !self.config.is_configured() {
            return Err(OAuthError::ClientNotConfigured);
        }
        if self.config.scopes.is_empty() {
            return Err(OAuthError::NoScopes);
        }

        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&self.config.scopes.join(" ")),
        );
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        Ok(url)
    }

    /// Return a credential valid for at least the expiry buffer.
    ///
    /// If the refresh call fails while the stored token has not yet expired,
    /// the stored token is returned.
    pub async fn ensure_access_token(&self) -> Result<Credential, OAuthError> {
        let buffer = Duration::seconds(EXPIRY_BUFFER_SECS);
        let current = self.store.load()?.ok_or(OAuthError::NoCredential)?;
        if !current.expires_within(Utc::now(), buffer) {
            return Ok(current);
        }

        let guard = self.guards.guard_for(&self.account);
        let _held = guard.lock().await;

        // Another caller may have refreshed while we waited.
        let current = self.store.load()?.ok_or(OAuthError::NoCredential)?;
        if !current.expires_within(Utc::now(), buffer) {
            return Ok(current);
        }

        let Some(refresh_token) = current.refresh_token.clone().filter(|t| !t.is_empty()) else {
            if current.is_expired(Utc::now()) {
                return Err(OAuthError::TokenExpired);
            }
            return Ok(current);
        };

        match self.request_refresh(&refresh_token).await {
            Ok(refreshed) => Ok(refreshed),
            Err(e) if !current.is_expired(Utc::now()) => {
                tracing::warn!(account = %self.account, error = %e, "token refresh failed, using current token");
                Ok(current)
            }
            Err(e) => Err(OAuthError::RefreshFailed(e.to_string())),
        }
    }

    /// Trade an authorization code for tokens and persist them.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential, OAuthError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(OAuthError::MissingCode);
        }
        if !self.config.is_configured() {
            return Err(OAuthError::ClientNotConfigured);
        }

        let previous_refresh = self.store.load()?.and_then(|c| c.refresh_token);
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let credential = self.token_request(&form, previous_refresh).await?;
        tracing::info!(account = %self.account, "authorization code exchanged");
        Ok(credential)
    }

    /// Refresh explicitly with the given refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credential, OAuthError> {
        if refresh_token.trim().is_empty() {
            return Err(OAuthError::MissingRefreshToken);
        }
        let guard = self.guards.guard_for(&self.account);
        let _held = guard.lock().await;
        self.request_refresh(refresh_token.trim()).await
    }

    /// Delete the persisted credential.
    pub fn clear(&self) -> Result<(), OAuthError> {
        self.store.delete()?;
        tracing::info!(account = %self.account, "credential cleared");
        Ok(())
    }

    pub async fn fetch_user_info(&self) -> Result<UserInfo, OAuthError> {
        let credential = self.ensure_access_token().await?;
        let resp = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(&credential.access_token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OAuthError::TokenEndpoint {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<Credential, OAuthError> {
        if !self.config.is_configured() {
            return Err(OAuthError::ClientNotConfigured);
        }
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let credential = self
            .token_request(&form, Some(refresh_token.to_string()))
            .await?;
        tracing::debug!(account = %self.account, expires_at = ?credential.expires_at, "access token refreshed");
        Ok(credential)
    }

    /// POST a grant, build the credential and persist it.
    ///
    /// `fallback_refresh` is kept when the response omits a refresh token.
    async fn token_request(
        &self,
        form: &[(&str, &str)],
        fallback_refresh: Option<String>,
    ) -> Result<Credential, OAuthError> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
            return Err(OAuthError::InvalidGrant(body));
        }
        if !status.is_success() {
            return Err(OAuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            OAuthError::TokenEndpoint {
                status: status.as_u16(),
                body: format!("malformed token response: {e}"),
            }
        })?;
        if let Some(error) = parsed.error {
            let detail = match parsed.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            return Err(if error == "invalid_grant" {
                OAuthError::InvalidGrant(detail)
            } else {
                OAuthError::TokenEndpoint {
                    status: status.as_u16(),
                    body: detail,
                }
            });
        }
        if parsed.access_token.is_empty() {
            return Err(OAuthError::TokenEndpoint {
                status: status.as_u16(),
                body: "token response without access_token".to_string(),
            });
        }

        let credential = Credential {
            access_token: parsed.access_token,
            refresh_token: parsed
                .refresh_token
                .filter(|t| !t.is_empty())
                .or(fallback_refresh),
            expires_at: parsed.expires_in.and_then(expiry_from_now),
            scope: parsed.scope.unwrap_or_default(),
            token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
            id_token: parsed.id_token,
        };
        self.store.save(&credential)?;
        Ok(credential)
    }
}

/// Absolute expiry for a relative lifetime; `None` when out of range.
fn expiry_from_now(secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use mockito::Matcher;

    fn config_for(server_url: &str) -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: "client-123".into(),
            client_secret: "secret-456".into(),
            redirect_uri: "http://localhost:34115/oauth2/callback".into(),
            scopes: vec!["https://www.googleapis.com/auth/calendar.events".into()],
            auth_url: GOOGLE_AUTH_URL.into(),
            token_url: format!("{server_url}/token"),
            userinfo_url: format!("{server_url}/oauth2/v2/userinfo"),
        }
    }

    fn credential(expires_in_secs: i64, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: "old-access".into(),
            refresh_token: refresh.map(String::from),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
            scope: "calendar".into(),
            token_type: "Bearer".into(),
            id_token: None,
        }
    }

    fn manager(server_url: &str, store: Arc<MemoryCredentialStore>) -> TokenManager {
        TokenManager::new(
            config_for(server_url),
            store,
            "google",
            StdDuration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_returns_fresh_token_without_network() {
        let server = mockito::Server::new_async().await;
        let store = Arc::new(MemoryCredentialStore::with_credential(credential(3600, Some("r"))));
        let tm = manager(&server.url(), store);

        let cred = tm.ensure_access_token().await.unwrap();
        assert_eq!(cred.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_ensure_without_credential() {
        let server = mockito::Server::new_async().await;
        let tm = manager(&server.url(), Arc::new(MemoryCredentialStore::new()));
        assert!(matches!(
            tm.ensure_access_token().await,
            Err(OAuthError::NoCredential)
        ));
    }

    #[tokio::test]
    async fn test_ensure_refreshes_inside_buffer_and_keeps_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "keep-me".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new-access","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential(credential(10, Some("keep-me"))));
        let tm = manager(&server.url(), store.clone());

        let cred = tm.ensure_access_token().await.unwrap();
        assert_eq!(cred.access_token, "new-access");
        assert_eq!(cred.refresh_token.as_deref(), Some("keep-me"));

        let persisted = store.load().unwrap().unwrap();
        assert_eq!(persisted, cred);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_still_valid_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(500)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential(credential(10, Some("r"))));
        let tm = manager(&server.url(), store);

        let cred = tm.ensure_access_token().await.unwrap();
        assert_eq!(cred.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_failed_refresh_of_expired_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential(credential(-60, Some("r"))));
        let tm = manager(&server.url(), store);

        assert!(matches!(
            tm.ensure_access_token().await,
            Err(OAuthError::RefreshFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let server = mockito::Server::new_async().await;
        let store = Arc::new(MemoryCredentialStore::with_credential(credential(-60, None)));
        let tm = manager(&server.url(), store);

        assert!(matches!(
            tm.ensure_access_token().await,
            Err(OAuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"shared","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential(credential(5, Some("r"))));
        let guards = RefreshGuards::new();
        let first = manager(&server.url(), store.clone()).with_refresh_guards(guards.clone());
        let second = manager(&server.url(), store).with_refresh_guards(guards);

        let (a, b) = tokio::join!(first.ensure_access_token(), second.ensure_access_token());
        assert_eq!(a.unwrap().access_token, "shared");
        assert_eq!(b.unwrap().access_token, "shared");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_managers_for_same_account_share_refresh_by_default() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"once","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential(credential(5, Some("r"))));
        let build = || {
            TokenManager::new(
                config_for(&server.url()),
                store.clone(),
                "default-guard-account",
                StdDuration::from_secs(5),
            )
            .unwrap()
        };
        let (first, second) = (build(), build());

        let (a, b) = tokio::join!(first.ensure_access_token(), second.ensure_access_token());
        assert_eq!(a.unwrap().access_token, "once");
        assert_eq!(b.unwrap().access_token, "once");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_leaves_expiry_unset() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"forever","expires_in":9223372036854775807}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential(credential(5, Some("r"))));
        let tm = manager(&server.url(), store);

        let cred = tm.refresh("r").await.unwrap();
        assert_eq!(cred.access_token, "forever");
        assert_eq!(cred.expires_at, None);
    }

    #[tokio::test]
    async fn test_exchange_code_persists_credential() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "4/abc".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://localhost:34115/oauth2/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_body(
                r#"{"access_token":"a1","refresh_token":"r1","expires_in":3599,
                    "scope":"calendar openid","token_type":"Bearer","id_token":"jwt"}"#,
            )
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let tm = manager(&server.url(), store.clone());

        let cred = tm.exchange_code(" 4/abc ").await.unwrap();
        assert_eq!(cred.refresh_token.as_deref(), Some("r1"));
        assert_eq!(cred.id_token.as_deref(), Some("jwt"));
        assert_eq!(store.load().unwrap().unwrap().access_token, "a1");
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Bad Request"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let tm = manager(&server.url(), store.clone());

        assert!(matches!(
            tm.exchange_code("stale").await,
            Err(OAuthError::InvalidGrant(_))
        ));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exchange_code_requires_code() {
        let server = mockito::Server::new_async().await;
        let tm = manager(&server.url(), Arc::new(MemoryCredentialStore::new()));
        assert!(matches!(
            tm.exchange_code("  ").await,
            Err(OAuthError::MissingCode)
        ));
    }

    #[tokio::test]
    async fn test_refresh_requires_token() {
        let server = mockito::Server::new_async().await;
        let tm = manager(&server.url(), Arc::new(MemoryCredentialStore::new()));
        assert!(matches!(
            tm.refresh("").await,
            Err(OAuthError::MissingRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_fetch_user_info() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/oauth2/v2/userinfo")
            .match_header("authorization", "Bearer old-access")
            .with_status(200)
            .with_body(r#"{"email":"someone@example.com","name":"Someone"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential(credential(3600, None)));
        let tm = manager(&server.url(), store);

        let info = tm.fetch_user_info().await.unwrap();
        assert_eq!(info.email.as_deref(), Some("someone@example.com"));
        assert!(info.picture.is_none());
    }

    #[test]
    fn test_build_auth_url() {
        let tm = manager("http://127.0.0.1:1", Arc::new(MemoryCredentialStore::new()));
        let url = tm.build_auth_url(Some("xyz")).unwrap();

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A34115%2Foauth2%2Fcallback"));
    }

    #[test]
    fn test_build_auth_url_requires_client() {
        let mut config = config_for("http://127.0.0.1:1");
        config.client_secret.clear();
        let tm = TokenManager::new(
            config,
            Arc::new(MemoryCredentialStore::new()),
            "google",
            StdDuration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(
            tm.build_auth_url(None),
            Err(OAuthError::ClientNotConfigured)
        ));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = Arc::new(MemoryCredentialStore::with_credential(credential(3600, None)));
        let tm = manager("http://127.0.0.1:1", store.clone());
        tm.clear().unwrap();
        tm.clear().unwrap();
        assert!(!tm.status().unwrap().connected);
    }
}
