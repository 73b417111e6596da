//! [`SessionStore`] backed by the Supabase auth (GoTrue) REST API.
//!
//! Sessions and PKCE verifiers are persisted through a [`Storage`]
//! implementation, mirroring what the browser client keeps in local storage.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stagedoor_auth::{MemoryStorage, SupabaseAuth, SupabaseConfig};
//!
//! let config = SupabaseConfig::from_env()?;
//! let auth = SupabaseAuth::new(config, Arc::new(MemoryStorage::new()));
//! let login = auth.authorize_url("google")?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::error::{Error, ProviderError};
use crate::pkce;
use crate::storage::Storage;
use crate::store::{
    AuthStateListener, SessionStore, SignUpOptions, SignUpResponse, Subscription, TokenPair,
};
use crate::types::{
    AccessToken, AuthChangeEvent, RefreshToken, Session, SignOutScope, User, unix_now,
};

/// Supabase project settings.
///
/// ```rust,ignore
/// let config = SupabaseConfig::new("https://abcd.supabase.co".parse()?, "anon-key")
///     .with_redirect_to("https://stagedoor.example/".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SupabaseConfig {
    pub(crate) project_url: Url,
    pub(crate) anon_key: String,
    pub(crate) storage_key: String,
    pub(crate) redirect_to: Option<Url>,
}

impl SupabaseConfig {
    /// Storage key defaults to `sb-<project-ref>-auth-token`, the project ref
    /// being the first label of the project host.
    #[must_use]
    pub fn new(project_url: Url, anon_key: impl Into<String>) -> Self {
        let project_ref = project_url
            .host_str()
            .and_then(|h| h.split('.').next())
            .unwrap_or("local")
            .to_owned();
        Self {
            project_url,
            anon_key: anon_key.into(),
            storage_key: format!("sb-{project_ref}-auth-token"),
            redirect_to: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SUPABASE_URL`: project URL
    /// - `SUPABASE_ANON_KEY`: public anon key
    ///
    /// # Optional env vars
    /// - `SUPABASE_STORAGE_KEY`: override the session storage key
    /// - `SUPABASE_REDIRECT_TO`: where OAuth and magic links return to
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or URLs are invalid.
    pub fn from_env() -> Result<Self, Error> {
        let url_str = std::env::var("SUPABASE_URL")
            .map_err(|_| Error::Config("SUPABASE_URL is required".into()))?;
        let project_url: Url = url_str
            .parse()
            .map_err(|e| Error::Config(format!("SUPABASE_URL: {e}")))?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY")
            .map_err(|_| Error::Config("SUPABASE_ANON_KEY is required".into()))?;

        let mut config = Self::new(project_url, anon_key);

        if let Ok(key) = std::env::var("SUPABASE_STORAGE_KEY") {
            config = config.with_storage_key(key);
        }
        if let Ok(url_str) = std::env::var("SUPABASE_REDIRECT_TO") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("SUPABASE_REDIRECT_TO: {e}")))?;
            config = config.with_redirect_to(url);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    #[must_use]
    pub fn with_redirect_to(mut self, url: Url) -> Self {
        self.redirect_to = Some(url);
        self
    }

    #[must_use]
    pub fn project_url(&self) -> &Url {
        &self.project_url
    }

    #[must_use]
    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    #[must_use]
    pub fn redirect_to(&self) -> Option<&Url> {
        self.redirect_to.as_ref()
    }

    /// Storage key of the pending PKCE code verifier.
    #[must_use]
    pub fn code_verifier_key(&self) -> String {
        format!("{}-code-verifier", self.storage_key)
    }

    /// `<project>/auth/v1/<path>`.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let base = self.project_url.as_str().trim_end_matches('/');
        format!("{base}/auth/v1/{path}")
            .parse()
            .map_err(|e| Error::Config(format!("invalid auth endpoint {path}: {e}")))
    }
}

/// Supabase auth client.
pub struct SupabaseAuth<S> {
    config: SupabaseConfig,
    http: reqwest::Client,
    storage: Arc<S>,
    listeners: Arc<Mutex<Vec<(u64, AuthStateListener)>>>,
    next_listener: AtomicU64,
}

impl<S: Storage> SupabaseAuth<S> {
    #[must_use]
    pub fn new(config: SupabaseConfig, storage: Arc<S>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            storage,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    /// Builds the provider login URL for the PKCE flow.
    ///
    /// The code verifier is kept in storage until
    /// [`exchange_code_for_session`](SessionStore::exchange_code_for_session)
    /// redeems the returned code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the project URL cannot form an endpoint.
    pub fn authorize_url(&self, provider: &str) -> Result<Url, Error> {
        let challenge = self.start_pkce();
        let mut url = self.config.endpoint("authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            if let Some(redirect_to) = &self.config.redirect_to {
                query.append_pair("redirect_to", redirect_to.as_str());
            }
            query
                .append_pair("code_challenge", &challenge)
                .append_pair("code_challenge_method", pkce::CODE_CHALLENGE_METHOD);
        }
        Ok(url)
    }

    /// Emails a magic link that returns to `redirect_to` with a PKCE code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Provider`] if the endpoint returns an error.
    pub async fn sign_in_with_otp(&self, email: &str) -> Result<(), Error> {
        let challenge = self.start_pkce();
        let url = self.with_redirect(self.config.endpoint("otp")?);
        let body = json!({
            "email": email,
            "create_user": true,
            "code_challenge": challenge,
            "code_challenge_method": pkce::CODE_CHALLENGE_METHOD,
        });
        self.send(self.http.post(url).json(&body), "otp request")
            .await?;
        tracing::info!("Magic link requested");
        Ok(())
    }

    /// Trades the refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Provider`] if the refresh token is rejected.
    pub async fn refresh_session(&self, refresh_token: &RefreshToken) -> Result<Session, Error> {
        let url = self.token_endpoint("refresh_token")?;
        let body = json!({ "refresh_token": refresh_token.as_str() });
        let session: Session = self
            .send_json(self.http.post(url).json(&body), "token refresh")
            .await?;
        Ok(self.store_session(session, AuthChangeEvent::TokenRefreshed))
    }

    /// Session persisted in storage, without touching the network.
    #[must_use]
    pub fn stored_session(&self) -> Option<Session> {
        let raw = self.storage.get_item(&self.config.storage_key)?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable stored session");
                self.storage.remove_item(&self.config.storage_key);
                None
            }
        }
    }

    fn start_pkce(&self) -> String {
        let verifier = pkce::generate_code_verifier();
        self.storage
            .set_item(&self.config.code_verifier_key(), &verifier);
        pkce::generate_code_challenge(&verifier)
    }

    fn token_endpoint(&self, grant_type: &str) -> Result<Url, Error> {
        let mut url = self.config.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        Ok(url)
    }

    fn with_redirect(&self, mut url: Url) -> Url {
        if let Some(redirect_to) = &self.config.redirect_to {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect_to.as_str());
        }
        url
    }

    /// Persists `session` and tells listeners.
    fn store_session(&self, mut session: Session, event: AuthChangeEvent) -> Session {
        session.stamp_expiry(unix_now());
        match serde_json::to_string(&session) {
            Ok(raw) => self.storage.set_item(&self.config.storage_key, &raw),
            Err(e) => tracing::error!(error = %e, "Failed to serialize session"),
        }
        self.emit(event, Some(&session));
        session
    }

    fn clear_session(&self) {
        self.storage.remove_item(&self.config.storage_key);
        self.emit(AuthChangeEvent::SignedOut, None);
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<&Session>) {
        let listeners: Vec<AuthStateListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        tracing::debug!(event = %event, listeners = listeners.len(), "Auth state change");
        for listener in listeners {
            listener(event, session);
        }
    }

    async fn fetch_user(&self, access_token: &AccessToken) -> Result<User, Error> {
        let url = self.config.endpoint("user")?;
        self.send_json(
            self.http.get(url).bearer_auth(access_token.as_str()),
            "user request",
        )
        .await
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<R, Error> {
        let response = self.send(request, operation).await?;
        response.json::<R>().await.map_err(Into::into)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        let response = request
            .header("apikey", &self.config.anon_key)
            .send()
            .await?;
        Self::ensure_success(response, operation).await
    }

    /// Checks HTTP response status; returns the response on success or the provider error.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let error = ProviderError::from_body(status, &body);
        tracing::warn!(operation, status, error = %error, "Auth request failed");
        Err(error.into())
    }
}

impl<S: Storage> SessionStore for SupabaseAuth<S> {
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, Error> {
        let verifier_key = self.config.code_verifier_key();
        let verifier = self
            .storage
            .get_item(&verifier_key)
            .ok_or_else(|| ProviderError::new("PKCE code verifier not found in storage"))?;

        let url = self.token_endpoint("pkce")?;
        let body = json!({ "auth_code": code, "code_verifier": verifier });
        let result: Result<Session, Error> = self
            .send_json(self.http.post(url).json(&body), "code exchange")
            .await;
        self.storage.remove_item(&verifier_key);

        let session = self.store_session(result?, AuthChangeEvent::SignedIn);
        tracing::info!(user_id = %session.user.id, "Code exchanged for session");
        Ok(session)
    }

    async fn set_session(&self, tokens: TokenPair) -> Result<Session, Error> {
        let now = unix_now();
        let expires_at = jwt_expiry(tokens.access_token.as_str())
            .ok_or_else(|| ProviderError::new("Invalid JWT: missing exp claim"))?;

        if expires_at <= now {
            tracing::debug!("Redirect access token already expired, refreshing");
            return self.refresh_session(&tokens.refresh_token).await;
        }

        let user = self.fetch_user(&tokens.access_token).await?;
        let mut session = Session::new(tokens.access_token, tokens.refresh_token, user)
            .with_expires_at(expires_at);
        session.expires_in = Some(expires_at - now);
        Ok(self.store_session(session, AuthChangeEvent::SignedIn))
    }

    async fn get_session(&self) -> Result<Option<Session>, Error> {
        let Some(session) = self.stored_session() else {
            return Ok(None);
        };
        if !session.is_expired_at(unix_now()) {
            return Ok(Some(session));
        }

        match self.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(e) => {
                tracing::warn!(error = %e, "Stored session could not be refreshed");
                self.clear_session();
                Err(e)
            }
        }
    }

    fn on_auth_state_change(&self, listener: AuthStateListener) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        let listeners = Arc::clone(&self.listeners);
        Subscription::new(move || listeners.lock().retain(|(i, _)| *i != id))
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), Error> {
        if let Some(session) = self.stored_session() {
            let mut url = self.config.endpoint("logout")?;
            url.query_pairs_mut()
                .append_pair("scope", &scope.to_string());
            let request = self
                .http
                .post(url)
                .bearer_auth(session.access_token.as_str());
            match self.send(request, "sign out").await {
                Ok(_) => {}
                // Already invalid server-side: still clear locally.
                Err(e) if matches!(e.status(), Some(401 | 403 | 404)) => {
                    tracing::info!(error = %e, "Session already gone server-side");
                }
                Err(e) => return Err(e),
            }
        }

        if scope != SignOutScope::Others {
            self.clear_session();
        }
        Ok(())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: SignUpOptions,
    ) -> Result<SignUpResponse, Error> {
        let mut url = self.config.endpoint("signup")?;
        match options.email_redirect_to.as_deref() {
            Some(redirect_to) => {
                url.query_pairs_mut().append_pair("redirect_to", redirect_to);
            }
            None => url = self.with_redirect(url),
        }
        let mut body = json!({ "email": email, "password": password });
        if let Some(data) = options.data {
            body["data"] = data;
        }

        let response: SignUpResponse = self
            .send_json(self.http.post(url).json(&body), "sign up")
            .await?;
        Ok(match response {
            SignUpResponse::Session(session) => SignUpResponse::Session(Box::new(
                self.store_session(*session, AuthChangeEvent::SignedIn),
            )),
            user => user,
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        let url = self.token_endpoint("password")?;
        let body = json!({ "email": email, "password": password });
        let session: Session = self
            .send_json(self.http.post(url).json(&body), "password sign in")
            .await?;
        Ok(self.store_session(session, AuthChangeEvent::SignedIn))
    }
}

/// Reads the `exp` claim of a JWT without verifying it.
fn jwt_expiry(token: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<Claims>(&bytes).ok()?.exp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn config() -> SupabaseConfig {
        SupabaseConfig::new("https://abcd1234.supabase.co".parse().unwrap(), "anon")
    }

    #[test]
    fn test_default_storage_key_from_project_ref() {
        assert_eq!(config().storage_key(), "sb-abcd1234-auth-token");
        assert_eq!(
            config().code_verifier_key(),
            "sb-abcd1234-auth-token-code-verifier"
        );
    }

    #[test]
    fn test_endpoint_joins_under_auth_v1() {
        let with_slash = SupabaseConfig::new("https://x.supabase.co/".parse().unwrap(), "k");
        assert_eq!(
            with_slash.endpoint("token").unwrap().as_str(),
            "https://x.supabase.co/auth/v1/token"
        );
        let proxied = SupabaseConfig::new("https://stagedoor.test/supabase".parse().unwrap(), "k");
        assert_eq!(
            proxied.endpoint("user").unwrap().as_str(),
            "https://stagedoor.test/supabase/auth/v1/user"
        );
    }

    #[test]
    fn test_authorize_url_stores_verifier() {
        let storage = Arc::new(MemoryStorage::new());
        let auth = SupabaseAuth::new(
            config().with_redirect_to("https://stagedoor.test/".parse().unwrap()),
            storage.clone(),
        );

        let url = auth.authorize_url("google").unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| pairs.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(url.path(), "/auth/v1/authorize");
        assert_eq!(get("provider"), Some("google"));
        assert_eq!(get("redirect_to"), Some("https://stagedoor.test/"));
        assert_eq!(get("code_challenge_method"), Some("s256"));

        let verifier = storage
            .get_item("sb-abcd1234-auth-token-code-verifier")
            .unwrap();
        assert_eq!(
            get("code_challenge"),
            Some(pkce::generate_code_challenge(&verifier).as_str())
        );
    }

    #[test]
    fn test_jwt_expiry() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1","exp":1700000000}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig");
        assert_eq!(jwt_expiry(&token), Some(1_700_000_000));
        assert_eq!(jwt_expiry("not-a-jwt"), None);
        assert_eq!(jwt_expiry("a.%%%.c"), None);
    }

    #[test]
    fn test_unreadable_stored_session_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("sb-abcd1234-auth-token", "{not json");
        let auth = SupabaseAuth::new(config(), storage.clone());

        assert!(auth.stored_session().is_none());
        assert!(storage.is_empty());
    }
}
