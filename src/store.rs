use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{AccessToken, AuthChangeEvent, RefreshToken, Session, SignOutScope, User};

/// Callback invoked on every auth state change the store observes.
pub type AuthStateListener = Arc<dyn Fn(AuthChangeEvent, Option<&Session>) + Send + Sync>;

/// Implicit-flow credentials handed to [`SessionStore::set_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

/// Optional sign-up parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignUpOptions {
    /// Where the confirmation email link sends the user back to.
    #[serde(skip)]
    pub email_redirect_to: Option<String>,
    /// Initial `user_metadata`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Result of a sign-up.
///
/// Without email auto-confirm the provider returns only the user and the
/// session arrives later through the confirmation link.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(Box<Session>),
    User(User),
}

impl SignUpResponse {
    #[must_use]
    pub fn user(&self) -> &User {
        match self {
            Self::Session(session) => &session.user,
            Self::User(user) => user,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Session(session) => Some(session),
            Self::User(_) => None,
        }
    }
}

/// Registration handle returned by [`SessionStore::on_auth_state_change`].
///
/// Dropping it unregisters the listener.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    #[must_use]
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// The platform auth client: owns sessions and talks to the provider.
///
/// The reconciler and [`AuthContext`](crate::AuthContext) only trigger
/// transitions through this trait and observe the results.
pub trait SessionStore: Send + Sync + 'static {
    /// Redeems a PKCE authorization code.
    fn exchange_code_for_session(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Adopts an implicit-flow token pair.
    fn set_session(&self, tokens: TokenPair) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Current session, if one is stored.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>, Error>> + Send;

    fn on_auth_state_change(&self, listener: AuthStateListener) -> Subscription;

    fn sign_out(&self, scope: SignOutScope) -> impl Future<Output = Result<(), Error>> + Send;

    fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: SignUpOptions,
    ) -> impl Future<Output = Result<SignUpResponse, Error>> + Send;

    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, Error>> + Send;
}
