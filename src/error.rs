use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity provider answered with an error payload.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[cfg(feature = "supabase")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status reported by the provider, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider(e) => e.status,
            #[cfg(feature = "supabase")]
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Failure reported by the auth provider.
///
/// `Display` is the provider message verbatim so it can be shown to users.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
#[non_exhaustive]
pub struct ProviderError {
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
}

impl ProviderError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Builds an error from a GoTrue error body.
    ///
    /// GoTrue has answered with several shapes over time (`msg`, `message`,
    /// OAuth-style `error`/`error_description`); the first present wins.
    /// Falls back to the raw body when it is not JSON.
    #[must_use]
    pub fn from_body(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Body {
            msg: Option<String>,
            message: Option<String>,
            error_description: Option<String>,
            error: Option<String>,
            error_code: Option<String>,
            code: Option<serde_json::Value>,
        }

        let Ok(parsed) = serde_json::from_str::<Body>(body) else {
            let message = if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.trim().to_owned()
            };
            return Self::new(message).with_status(status);
        };

        let message = parsed
            .msg
            .or(parsed.message)
            .or(parsed.error_description)
            .or_else(|| parsed.error.clone())
            .unwrap_or_else(|| format!("HTTP {status}"));

        let code = parsed.error_code.or_else(|| match parsed.code {
            Some(serde_json::Value::String(s)) => Some(s),
            _ => parsed.error,
        });

        Self {
            message,
            status: Some(status),
            code,
        }
    }
}
