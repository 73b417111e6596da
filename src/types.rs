use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Seconds before `expires_at` at which a session already counts as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 10;

/// Opaque bearer credential.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AccessToken(pub String);

impl AccessToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Opaque renewal credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct RefreshToken(pub String);

impl RefreshToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshToken(..)")
    }
}

/// Provider-assigned user identifier (UUID string in GoTrue).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Identity record attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub app_metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            email: None,
            user_metadata: serde_json::Map::new(),
            app_metadata: serde_json::Map::new(),
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

fn default_token_type() -> String {
    "bearer".into()
}

/// Authenticated identity window, as returned by the GoTrue token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Session {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    #[must_use]
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken, user: User) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: default_token_type(),
            expires_in: None,
            expires_at: None,
            user,
        }
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Fills `expires_at` from `expires_in` when the provider omitted it.
    pub(crate) fn stamp_expiry(&mut self, now: i64) {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|secs| now + secs);
        }
    }

    /// Whether the session is expired at `now` (unix seconds).
    ///
    /// Sessions without a known expiry are never considered expired.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|at| at - EXPIRY_MARGIN_SECS <= now)
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Events delivered to auth state listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum AuthChangeEvent {
    #[display("INITIAL_SESSION")]
    InitialSession,
    #[display("SIGNED_IN")]
    SignedIn,
    #[display("SIGNED_OUT")]
    SignedOut,
    #[display("TOKEN_REFRESHED")]
    TokenRefreshed,
    #[display("USER_UPDATED")]
    UserUpdated,
    #[display("PASSWORD_RECOVERY")]
    PasswordRecovery,
}

/// Which sessions a sign-out revokes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum SignOutScope {
    #[display("global")]
    Global,
    #[default]
    #[display("local")]
    Local,
    #[display("others")]
    Others,
}

/// Application-visible auth state.
///
/// `loading` stays true until the first session resolution completes.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub loading: bool,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            session: None,
            loading: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_RESPONSE: &str = r#"{
        "access_token": "eyJhbGciOiJIUzI1NiJ9.e30.sig",
        "token_type": "bearer",
        "expires_in": 3600,
        "expires_at": 1700003600,
        "refresh_token": "r3fr3sh",
        "user": {
            "id": "8d2f0c3e-1111-4e4e-9999-0123456789ab",
            "aud": "authenticated",
            "email": "ada@example.com",
            "user_metadata": {"full_name": "Ada"},
            "app_metadata": {"provider": "email"},
            "created_at": "2024-03-01T12:00:00.123456Z"
        }
    }"#;

    #[test]
    fn test_session_from_token_response() {
        let session: Session = serde_json::from_str(TOKEN_RESPONSE).unwrap();
        assert_eq!(session.refresh_token.as_str(), "r3fr3sh");
        assert_eq!(session.expires_at, Some(1_700_003_600));
        assert_eq!(session.user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(session.user.user_metadata["full_name"], "Ada");
        assert!(session.user.created_at.is_some());
    }

    #[test]
    fn test_session_expiry_margin() {
        let session: Session = serde_json::from_str(TOKEN_RESPONSE).unwrap();
        assert!(!session.is_expired_at(1_700_000_000));
        assert!(session.is_expired_at(1_700_003_595));
        assert!(session.is_expired_at(1_700_003_600));
    }

    #[test]
    fn test_session_without_expiry_never_expires() {
        let session = Session::new(
            AccessToken("a".into()),
            RefreshToken("r".into()),
            User::new("u"),
        );
        assert!(!session.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_stamp_expiry_from_expires_in() {
        let mut session: Session = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":60,"user":{"id":"u"}}"#,
        )
        .unwrap();
        session.stamp_expiry(1_000);
        assert_eq!(session.expires_at, Some(1_060));
        assert_eq!(session.token_type, "bearer");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken("super-secret".into());
        assert_eq!(format!("{token:?}"), "AccessToken(..)");
        let refresh = RefreshToken("also-secret".into());
        assert!(!format!("{refresh:?}").contains("secret"));
    }

    #[test]
    fn test_auth_change_event_wire_names() {
        let json = serde_json::to_string(&AuthChangeEvent::TokenRefreshed).unwrap();
        assert_eq!(json, "\"TOKEN_REFRESHED\"");
        assert_eq!(AuthChangeEvent::SignedIn.to_string(), "SIGNED_IN");
        assert_eq!(SignOutScope::default().to_string(), "local");
    }

    #[test]
    fn test_snapshot_starts_loading() {
        let snapshot = AuthSnapshot::default();
        assert!(snapshot.loading);
        assert!(snapshot.session.is_none());
    }
}
