//! Session: bearer token, cached user summary, and credit refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use crate::models::UserSummary;
use crate::store::{load_json, save_json, StateStore, AUTH_TOKEN_KEY, USER_KEY};

/// Shared bearer token, read by every HTTP client of the session.
#[derive(Clone, Default)]
pub struct AuthToken {
    value: Arc<RwLock<Option<String>>>,
    store: Option<Arc<dyn StateStore>>,
}

impl AuthToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            value: Arc::new(RwLock::new(token)),
            store: None,
        }
    }

    /// Token whose revocation also clears the persisted session documents.
    pub fn persistent(store: Arc<dyn StateStore>) -> Self {
        Self {
            value: Arc::default(),
            store: Some(store),
        }
    }

    pub async fn get(&self) -> Option<String> {
        self.value.read().await.clone()
    }

    pub async fn set(&self, token: Option<String>) {
        *self.value.write().await = token;
    }

    /// Drops the token along with the stored token and cached user.
    pub async fn revoke(&self) {
        self.set(None).await;
        let Some(store) = &self.store else {
            return;
        };
        for key in [AUTH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = store.remove(key).await {
                warn!("Failed to clear '{key}': {e}");
            }
        }
    }
}

/// `POST /token` response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Refreshes the user's credit balance after a generation consumes credits.
#[async_trait]
pub trait CreditRefresher: Send + Sync {
    async fn refresh_credits(&self) -> Result<(), ApiError>;
}

/// Client for the session endpoints of the backend.
pub struct SessionClient {
    client: Client,
    base_url: String,
    token: AuthToken,
    store: Arc<dyn StateStore>,
}

impl SessionClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: AuthToken::persistent(store.clone()),
            store,
        })
    }

    /// Handle to the bearer token, shared with the job API client.
    pub fn token(&self) -> AuthToken {
        self.token.clone()
    }

    /// Loads the persisted token. Returns whether one was found.
    pub async fn load(&self) -> bool {
        let stored: Option<String> = load_json(self.store.as_ref(), AUTH_TOKEN_KEY)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to read stored auth token: {e}");
                None
            });
        let found = stored.is_some();
        self.token.set(stored).await;
        found
    }

    /// Sets and persists the bearer token.
    pub async fn set_token(&self, token: String) {
        if let Err(e) = save_json(self.store.as_ref(), AUTH_TOKEN_KEY, &token).await {
            warn!("Failed to persist auth token: {e}");
        }
        self.token.set(Some(token)).await;
    }

    /// POST /token with the OAuth2 password form, then loads the user.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserSummary, ApiError> {
        let response = self
            .client
            .post(format!("{}/token", self.base_url))
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let token: TokenResponse = response.json().await?;
        self.set_token(token.access_token).await;
        info!("Logged in as {email}");
        self.fetch_user().await
    }

    /// Whether the current token is still accepted by the backend.
    /// A rejected token is cleared.
    pub async fn validate_token(&self) -> bool {
        if !self.is_authenticated().await {
            return false;
        }
        match self.fetch_user().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Stored token failed validation: {e}");
                false
            }
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.get().await.is_some()
    }

    /// Cached user summary from the last successful `fetch_user`.
    pub async fn cached_user(&self) -> Option<UserSummary> {
        load_json(self.store.as_ref(), USER_KEY)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to read cached user: {e}");
                None
            })
    }

    /// GET /user: refreshes the cached user summary.
    /// A 401 logs the session out.
    pub async fn fetch_user(&self) -> Result<UserSummary, ApiError> {
        let mut request = self.client.get(format!("{}/user", self.base_url));
        if let Some(token) = self.token.get().await {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let err = ApiError::from_response(response).await;
            if matches!(err, ApiError::Unauthorized) {
                info!("Session rejected by backend, logging out");
                self.logout().await;
            }
            return Err(err);
        }

        let user: UserSummary = response.json().await?;
        debug!("Fetched user {} (credits: {:?})", user.id, user.credits);

        if let Err(e) = save_json(self.store.as_ref(), USER_KEY, &user).await {
            warn!("Failed to cache user summary: {e}");
        }
        Ok(user)
    }

    /// Clears the token and cached user.
    pub async fn logout(&self) {
        self.token.revoke().await;
    }
}

#[async_trait]
impl CreditRefresher for SessionClient {
    async fn refresh_credits(&self) -> Result<(), ApiError> {
        self.fetch_user().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn session_for(server: &mockito::ServerGuard) -> (SessionClient, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let session =
            SessionClient::new(&server.url(), Duration::from_secs(5), store.clone()).unwrap();
        (session, store)
    }

    #[tokio::test]
    async fn test_fetch_user_caches_summary() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 7, "email": "ada@example.com", "credits": 4}"#)
            .create_async()
            .await;

        let (session, _store) = session_for(&server).await;
        session.set_token("tok-1".to_string()).await;

        let user = session.fetch_user().await.unwrap();
        assert_eq!(user.credits, Some(4));
        assert_eq!(session.cached_user().await, Some(user));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_logs_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user")
            .with_status(401)
            .with_body(r#"{"detail": "Could not validate credentials"}"#)
            .create_async()
            .await;

        let (session, store) = session_for(&server).await;
        session.set_token("expired".to_string()).await;

        let err = session.refresh_credits().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!session.is_authenticated().await);
        assert!(store.load(AUTH_TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_stores_token_and_fetches_user() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("application/x-www-form-urlencoded".to_string()),
            )
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("username".into(), "ada@example.com".into()),
                mockito::Matcher::UrlEncoded("password".into(), "hunter2".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token": "tok-9", "token_type": "bearer"}"#)
            .create_async()
            .await;
        let user_mock = server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer tok-9")
            .with_status(200)
            .with_body(r#"{"id": 7, "email": "ada@example.com", "credits": 3}"#)
            .create_async()
            .await;

        let (session, store) = session_for(&server).await;
        let user = session.login("ada@example.com", "hunter2").await.unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert!(session.is_authenticated().await);
        let stored: Option<String> = load_json(store.as_ref(), AUTH_TOKEN_KEY).await.unwrap();
        assert_eq!(stored.as_deref(), Some("tok-9"));
        token_mock.assert_async().await;
        user_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected_leaves_session_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"detail": "Incorrect email or password"}"#)
            .create_async()
            .await;

        let (session, store) = session_for(&server).await;
        let err = session.login("ada@example.com", "wrong").await.unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!session.is_authenticated().await);
        assert!(store.load(AUTH_TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validate_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer good")
            .with_status(200)
            .with_body(r#"{"id": 1, "email": "ada@example.com"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(r#"{"detail": "Token expired"}"#)
            .create_async()
            .await;

        let (session, _store) = session_for(&server).await;
        assert!(!session.validate_token().await);

        session.set_token("good".to_string()).await;
        assert!(session.validate_token().await);

        session.set_token("stale".to_string()).await;
        assert!(!session.validate_token().await);
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_revoking_shared_token_clears_persisted_session() {
        let server = mockito::Server::new_async().await;
        let (session, store) = session_for(&server).await;
        session.set_token("tok".to_string()).await;

        session.token().revoke().await;

        assert!(!session.is_authenticated().await);
        assert!(store.load(AUTH_TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_restores_persisted_token() {
        let server = mockito::Server::new_async().await;
        let (session, store) = session_for(&server).await;
        save_json(store.as_ref(), AUTH_TOKEN_KEY, &"persisted")
            .await
            .unwrap();

        assert!(session.load().await);
        assert_eq!(session.token().get().await.as_deref(), Some("persisted"));
    }
}
