//! Auth artifacts carried on a redirect URL.
//!
//! After an OAuth or magic-link round trip the provider sends the browser
//! back with one of:
//!
//! - `?code=…` (PKCE authorization code)
//! - `#access_token=…&refresh_token=…` (implicit flow)
//! - `?error_description=…` or `#error_description=…` (provider failure)
//!
//! [`RedirectPayload::from_url`] extracts them and [`clean_url`] strips them
//! so the visible URL no longer carries credentials.

use std::borrow::Cow;

use url::Url;

use crate::types::{AccessToken, RefreshToken};

/// Query parameters owned by the auth redirect.
const AUTH_QUERY_PARAMS: &[&str] = &["code", "error", "error_code", "error_description"];

/// Fragment parameters whose presence marks the whole fragment as auth-owned.
const AUTH_FRAGMENT_PARAMS: &[&str] = &["access_token", "refresh_token", "error_description"];

/// Data extracted from the URL on a single page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectPayload {
    AuthorizationCode {
        code: String,
    },
    TokenPair {
        access_token: AccessToken,
        refresh_token: RefreshToken,
    },
    AuthError {
        description: String,
    },
    None,
}

impl RedirectPayload {
    /// Parses the redirect payload from `url`.
    ///
    /// An error description wins over everything else, then a query `code`,
    /// then a complete fragment token pair. Empty values count as absent.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let fragment = fragment_pairs(url);
        let query = |name: &str| find_pair(url.query_pairs(), name);
        let hash = |name: &str| find_pair(fragment.iter().cloned(), name);

        if let Some(description) = query("error_description").or_else(|| hash("error_description"))
        {
            return Self::AuthError { description };
        }

        if let Some(code) = query("code") {
            return Self::AuthorizationCode { code };
        }

        match (hash("access_token"), hash("refresh_token")) {
            (Some(access), Some(refresh)) => Self::TokenPair {
                access_token: AccessToken(access),
                refresh_token: RefreshToken(refresh),
            },
            _ => Self::None,
        }
    }

    /// Whether the URL carried nothing for the reconciler to act on.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Fingerprint identifying this payload, for payloads that get exchanged.
    ///
    /// Codes are single-use so the full value is kept. For token pairs the
    /// refresh token prefix is used: access tokens are JWTs whose leading
    /// characters are the shared header and do not tell tokens apart.
    #[must_use]
    pub fn fingerprint(&self, prefix_len: usize) -> Option<RedirectFingerprint> {
        match self {
            Self::AuthorizationCode { code } => Some(RedirectFingerprint(format!("code:{code}"))),
            Self::TokenPair { refresh_token, .. } => {
                let prefix: String = refresh_token.as_str().chars().take(prefix_len).collect();
                Some(RedirectFingerprint(format!("token:{prefix}")))
            }
            Self::AuthError { .. } | Self::None => None,
        }
    }
}

/// Short derived identifier of a consumed redirect payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct RedirectFingerprint(String);

impl RedirectFingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RedirectFingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Returns `url` with auth artifacts removed, or `None` if it had none.
///
/// Unrelated query pairs keep their order. A fragment carrying tokens or an
/// error is dropped entirely; any other fragment is kept.
#[must_use]
pub fn clean_url(url: &Url) -> Option<Url> {
    let query_dirty = url
        .query_pairs()
        .any(|(k, _)| is_listed(AUTH_QUERY_PARAMS, &k));
    let fragment_dirty = fragment_pairs(url)
        .iter()
        .any(|(k, _)| is_listed(AUTH_FRAGMENT_PARAMS, k));

    if !query_dirty && !fragment_dirty {
        return None;
    }

    let mut cleaned = url.clone();

    if query_dirty {
        // Kept segments are copied raw so their encoding is untouched.
        let kept: Vec<&str> = url
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty() && !is_auth_segment(segment))
            .collect();
        if kept.is_empty() {
            cleaned.set_query(None);
        } else {
            cleaned.set_query(Some(&kept.join("&")));
        }
    }

    if fragment_dirty {
        cleaned.set_fragment(None);
    }

    Some(cleaned)
}

fn is_listed(names: &[&str], key: &str) -> bool {
    names.contains(&key)
}

/// Whether a raw `key=value` query segment names an auth parameter.
fn is_auth_segment(segment: &str) -> bool {
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(k, _)| is_listed(AUTH_QUERY_PARAMS, &k))
}

fn fragment_pairs(url: &Url) -> Vec<(Cow<'_, str>, Cow<'_, str>)> {
    url.fragment()
        .map(|f| url::form_urlencoded::parse(f.as_bytes()).collect())
        .unwrap_or_default()
}

fn find_pair<'a>(
    mut pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
    name: &str,
) -> Option<String> {
    pairs
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}
