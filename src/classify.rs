//! Mapping of provider failures onto a closed set of kinds.
//!
//! The provider only reports failures as free text plus an HTTP status, so
//! every substring check on error messages lives here.

use crate::error::Error;

/// Why a code exchange failed, once no existing session could be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    /// The code was already consumed or its flow state expired.
    FlowStateInvalid,
    /// Malformed or unexpected provider response (404, pkce grant rejected).
    ProviderUnavailable,
    /// Anything else; the raw message is surfaced.
    Other,
}

/// Classifies a failed `exchange_code_for_session` call.
#[must_use]
pub fn classify_exchange_error(error: &Error) -> ExchangeErrorKind {
    let message = error.to_string().to_lowercase();

    if message.contains("invalid flow state") || message.contains("no valid flow state") {
        ExchangeErrorKind::FlowStateInvalid
    } else if message.contains("grant_type=pkce")
        || message.contains("404")
        || error.status() == Some(404)
    {
        ExchangeErrorKind::ProviderUnavailable
    } else {
        ExchangeErrorKind::Other
    }
}

/// Whether a sign-out failure only means there was no live session to end.
///
/// Such failures are treated as a successful sign-out. A bare 401 or 403
/// is not enough: it may just as well be a rejected API key.
#[must_use]
pub fn is_session_missing(error: &Error) -> bool {
    if error.status() == Some(404)
        || matches!(error, Error::Provider(e) if e.code.as_deref() == Some("session_not_found"))
    {
        return true;
    }
    let message = error.to_string().to_lowercase();
    message.contains("session missing")
        || message.contains("session_not_found")
        || message.contains("session not found")
}
