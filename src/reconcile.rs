//! Redirect session reconciliation.
//!
//! On every page load [`Reconciler::run`] turns whatever the provider left
//! on the URL into at most one session transition:
//!
//! ```text
//! Idle -> Parsing -> Skipped                          -> Cleaned
//!                 -> Exchanging -> Succeeded | Failed -> Cleaned
//! ```
//!
//! Authorization codes are single-use, so the reconciler must be safe to
//! call repeatedly for the same URL. Two guards make it so:
//!
//! - a fingerprint of the consumed payload, recorded in tab storage before
//!   the exchange and checked on every run
//! - a tab-wide [`ReconciliationLock`], held while an exchange is in flight
//!
//! Cross-tab races are not locked out; they are absorbed by adopting the
//! session another tab already established when an exchange fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::classify::{ExchangeErrorKind, classify_exchange_error};
use crate::context::AuthState;
use crate::location::Location;
use crate::notify::{Notification, NotificationSink};
use crate::redirect::{RedirectPayload, clean_url};
use crate::storage::Storage;
use crate::store::{SessionStore, TokenPair};
use crate::types::Session;

pub const LOGIN_FAILED_TITLE: &str = "Login failed";
pub const LINK_EXPIRED_TITLE: &str = "Login link expired";
pub const LINK_EXPIRED_MESSAGE: &str = "Your login link has expired. Please try logging in again.";
pub const LOGIN_INCOMPLETE_TITLE: &str = "Could not complete login";
pub const LOGIN_INCOMPLETE_MESSAGE: &str = "We could not complete your login. Please try again.";

/// Reconciler settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub(crate) fingerprint_key: String,
    pub(crate) fingerprint_len: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            fingerprint_key: "lastConsumedRedirectFingerprint".into(),
            fingerprint_len: 32,
        }
    }
}

impl ReconcilerConfig {
    /// Tab storage key holding the last consumed fingerprint.
    #[must_use]
    pub fn with_fingerprint_key(mut self, key: impl Into<String>) -> Self {
        self.fingerprint_key = key.into();
        self
    }

    /// Number of refresh token characters kept in a token pair fingerprint.
    #[must_use]
    pub fn with_fingerprint_len(mut self, len: usize) -> Self {
        self.fingerprint_len = len;
        self
    }

    #[must_use]
    pub fn fingerprint_key(&self) -> &str {
        &self.fingerprint_key
    }

    #[must_use]
    pub fn fingerprint_len(&self) -> usize {
        self.fingerprint_len
    }
}

/// Reconciliation phases, as traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Phase {
    Idle,
    Parsing,
    Skipped,
    Exchanging,
    Succeeded,
    Failed,
    Cleaned,
}

/// Why a reconciliation ended without a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The provider put `error_description` on the redirect.
    ProviderRedirect,
    /// Exchanging the payload failed and no session could be recovered.
    Exchange(ExchangeErrorKind),
}

/// Result of one [`Reconciler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No auth artifacts on the URL.
    NoOp,
    /// The payload was already consumed in this tab.
    Skipped,
    /// Another run holds the lock.
    Busy,
    /// The payload was exchanged and the session adopted.
    Succeeded,
    /// The exchange failed but an existing session was adopted.
    Recovered,
    Failed(FailureKind),
    /// The auth state was torn down before the result arrived.
    Cancelled,
}

impl Outcome {
    /// Whether this run put a session into the auth state.
    #[must_use]
    pub fn adopted_session(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Recovered)
    }
}

/// Tab-wide flag held while an exchange is in flight.
///
/// Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationLock(Arc<AtomicBool>);

impl ReconciliationLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock, or returns `None` if it is already held.
    ///
    /// The lock is released when the guard drops.
    #[must_use]
    pub fn try_acquire(&self) -> Option<LockGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LockGuard { flag: &self.0 })
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct LockGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Strips auth artifacts from the URL when dropped, then releases the lock.
///
/// Runs on every exit path, including a panic or a dropped future.
struct Cleanup<'a, L: Location> {
    location: &'a L,
    _lock: Option<LockGuard<'a>>,
}

impl<L: Location> Drop for Cleanup<'_, L> {
    fn drop(&mut self) {
        let href = self.location.href();
        if let Some(cleaned) = clean_url(&href) {
            self.location.replace(&cleaned);
        }
        enter(Phase::Cleaned);
    }
}

fn enter(phase: Phase) {
    tracing::debug!(phase = %phase, "Redirect reconciliation");
}

/// Converts auth redirect artifacts into exactly one session transition.
pub struct Reconciler<S, N, T, L> {
    store: Arc<S>,
    notifier: Arc<N>,
    tab_storage: Arc<T>,
    location: Arc<L>,
    lock: ReconciliationLock,
    config: ReconcilerConfig,
}

impl<S, N, T, L> Reconciler<S, N, T, L>
where
    S: SessionStore,
    N: NotificationSink,
    T: Storage,
    L: Location,
{
    /// `tab_storage` must be scoped to the browser tab (session storage).
    #[must_use]
    pub fn new(store: Arc<S>, notifier: Arc<N>, tab_storage: Arc<T>, location: Arc<L>) -> Self {
        Self {
            store,
            notifier,
            tab_storage,
            location,
            lock: ReconciliationLock::new(),
            config: ReconcilerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares `lock` with other reconcilers in the same tab.
    #[must_use]
    pub fn with_lock(mut self, lock: ReconciliationLock) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn lock(&self) -> &ReconciliationLock {
        &self.lock
    }

    /// Reconciles the current URL. Safe to call any number of times.
    ///
    /// Failures are reported to the notification sink, never returned.
    pub async fn run(&self, state: &AuthState) -> Outcome {
        enter(Phase::Parsing);
        let href = self.location.href();
        let payload = RedirectPayload::from_url(&href);
        if payload.is_none() {
            // Incomplete artifacts still leave the URL, without a store call.
            if let Some(cleaned) = clean_url(&href) {
                tracing::debug!("Stripping incomplete auth artifacts from URL");
                self.location.replace(&cleaned);
                enter(Phase::Cleaned);
            }
            return Outcome::NoOp;
        }

        let fingerprint = payload.fingerprint(self.config.fingerprint_len);
        if let Some(fingerprint) = &fingerprint {
            let last = self.tab_storage.get_item(&self.config.fingerprint_key);
            if last.as_deref() == Some(fingerprint.as_str()) {
                tracing::debug!("Redirect payload already consumed in this tab");
                enter(Phase::Skipped);
                let _cleanup = Cleanup {
                    location: &*self.location,
                    _lock: None,
                };
                return Outcome::Skipped;
            }
        }

        let Some(guard) = self.lock.try_acquire() else {
            tracing::debug!("Reconciliation already in flight");
            return Outcome::Busy;
        };
        let _cleanup = Cleanup {
            location: &*self.location,
            _lock: Some(guard),
        };

        if let Some(fingerprint) = &fingerprint {
            self.tab_storage
                .set_item(&self.config.fingerprint_key, fingerprint.as_str());
        }

        enter(Phase::Exchanging);
        match payload {
            RedirectPayload::AuthError { description } => {
                tracing::warn!(description = %description, "Auth provider reported a redirect error");
                self.fail(
                    state,
                    FailureKind::ProviderRedirect,
                    Notification::destructive(LOGIN_FAILED_TITLE, description),
                )
            }
            RedirectPayload::AuthorizationCode { code } => self.exchange_code(state, &code).await,
            RedirectPayload::TokenPair {
                access_token,
                refresh_token,
            } => {
                self.adopt_tokens(
                    state,
                    TokenPair {
                        access_token,
                        refresh_token,
                    },
                )
                .await
            }
            RedirectPayload::None => Outcome::NoOp,
        }
    }

    async fn exchange_code(&self, state: &AuthState, code: &str) -> Outcome {
        let error = match self.store.exchange_code_for_session(code).await {
            Ok(session) => return self.adopt(state, session, Outcome::Succeeded),
            Err(e) => e,
        };
        tracing::warn!(error = %error, "Code exchange failed");

        if state.is_cancelled() {
            return Outcome::Cancelled;
        }

        // Another tab or an earlier run may have redeemed the code already.
        match self.store.get_session().await {
            Ok(Some(session)) => {
                tracing::info!("Adopting session established outside this exchange");
                return self.adopt(state, session, Outcome::Recovered);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Session lookup after failed exchange failed"),
        }

        let kind = classify_exchange_error(&error);
        let notification = match kind {
            ExchangeErrorKind::FlowStateInvalid => {
                Notification::destructive(LINK_EXPIRED_TITLE, LINK_EXPIRED_MESSAGE)
            }
            ExchangeErrorKind::ProviderUnavailable => {
                Notification::destructive(LOGIN_INCOMPLETE_TITLE, LOGIN_INCOMPLETE_MESSAGE)
            }
            ExchangeErrorKind::Other => {
                Notification::destructive(LOGIN_FAILED_TITLE, error.to_string())
            }
        };
        self.fail(state, FailureKind::Exchange(kind), notification)
    }

    async fn adopt_tokens(&self, state: &AuthState, tokens: TokenPair) -> Outcome {
        match self.store.set_session(tokens).await {
            Ok(session) => self.adopt(state, session, Outcome::Succeeded),
            Err(error) => {
                tracing::warn!(error = %error, "Adopting redirect tokens failed");
                self.fail(
                    state,
                    FailureKind::Exchange(ExchangeErrorKind::Other),
                    Notification::destructive(LOGIN_FAILED_TITLE, error.to_string()),
                )
            }
        }
    }

    fn adopt(&self, state: &AuthState, session: Session, outcome: Outcome) -> Outcome {
        if !state.handle_session(Some(session)) {
            return Outcome::Cancelled;
        }
        enter(Phase::Succeeded);
        outcome
    }

    fn fail(&self, state: &AuthState, kind: FailureKind, notification: Notification) -> Outcome {
        if state.is_cancelled() {
            return Outcome::Cancelled;
        }
        self.notifier.notify(notification);
        enter(Phase::Failed);
        Outcome::Failed(kind)
    }
}
