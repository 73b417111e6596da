//! Application-wide auth state.
//!
//! [`AuthState`] is the reactive `{user, session, loading}` store that UI
//! code reads. [`AuthContext`] wires it to a [`SessionStore`], runs redirect
//! reconciliation on load and exposes the sign-up / sign-in / sign-out
//! pass-throughs.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::classify::is_session_missing;
use crate::error::Error;
use crate::location::Location;
use crate::notify::{Notification, NotificationSink};
use crate::reconcile::{Outcome, ReconcilerConfig, Reconciler};
use crate::storage::Storage;
use crate::store::{SessionStore, SignUpOptions, SignUpResponse, Subscription};
use crate::types::{AuthChangeEvent, AuthSnapshot, Session, SignOutScope};

/// Reactive auth state with a single mutation entry point.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct AuthState {
    tx: Arc<watch::Sender<AuthSnapshot>>,
    cancel: CancellationToken,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthSnapshot::default());
        Self {
            tx: Arc::new(tx),
            cancel: CancellationToken::new(),
        }
    }

    /// Adopts `session` (or its absence): session and user change together
    /// and `loading` clears in the same write.
    ///
    /// Returns `false` without touching the state once torn down.
    pub fn handle_session(&self, session: Option<Session>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let user = session.as_ref().map(|s| s.user.clone());
        self.tx.send_replace(AuthSnapshot {
            user,
            session,
            loading: false,
        });
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.tx.subscribe()
    }

    /// Marks the owning view as torn down; late results are dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub const SIGN_UP_FAILED_TITLE: &str = "Sign up failed";
pub const SIGN_IN_FAILED_TITLE: &str = "Sign in failed";
pub const SIGN_OUT_FAILED_TITLE: &str = "Sign out failed";

/// Auth provider for the application: state, redirect handling and
/// account operations behind one handle.
pub struct AuthContext<S, N, T, L> {
    store: Arc<S>,
    notifier: Arc<N>,
    reconciler: Reconciler<S, N, T, L>,
    state: AuthState,
    subscription: Mutex<Option<Subscription>>,
}

impl<S, N, T, L> AuthContext<S, N, T, L>
where
    S: SessionStore,
    N: NotificationSink,
    T: Storage,
    L: Location,
{
    #[must_use]
    pub fn new(store: Arc<S>, notifier: Arc<N>, tab_storage: Arc<T>, location: Arc<L>) -> Self {
        let reconciler = Reconciler::new(store.clone(), notifier.clone(), tab_storage, location);
        Self {
            store,
            notifier,
            reconciler,
            state: AuthState::new(),
            subscription: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.reconciler = self.reconciler.with_config(config);
        self
    }

    #[must_use]
    pub fn state(&self) -> &AuthState {
        &self.state
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler<S, N, T, L> {
        &self.reconciler
    }

    /// Runs on page load. Safe to call more than once.
    ///
    /// Subscribes to store events, reconciles the redirect URL, then resolves
    /// the stored session unless the redirect already produced one.
    pub async fn initialize(&self) -> Outcome {
        self.subscribe_to_store();

        let outcome = self.reconciler.run(&self.state).await;
        if outcome.adopted_session() || outcome == Outcome::Cancelled {
            return outcome;
        }
        // The run holding the lock settles the state; stay loading until then.
        if matches!(outcome, Outcome::Skipped | Outcome::Busy) && self.reconciler.lock().is_held()
        {
            tracing::debug!(outcome = ?outcome, "Deferring to in-flight reconciliation");
            return outcome;
        }

        let session = match self.store.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load stored session");
                None
            }
        };
        self.state.handle_session(session);
        outcome
    }

    fn subscribe_to_store(&self) {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() || self.state.is_cancelled() {
            return;
        }
        let state = self.state.clone();
        let listener = move |event: AuthChangeEvent, session: Option<&Session>| {
            tracing::debug!(event = %event, "Auth state change");
            state.handle_session(session.cloned());
        };
        *subscription = Some(self.store.on_auth_state_change(Arc::new(listener)));
    }

    /// Stops state updates and drops the store subscription.
    pub fn teardown(&self) {
        self.state.cancel();
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    /// Registers a new account.
    ///
    /// # Errors
    ///
    /// Returns the store error after notifying the user.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: SignUpOptions,
    ) -> Result<SignUpResponse, Error> {
        self.store
            .sign_up(email, password, options)
            .await
            .inspect_err(|e| self.report(SIGN_UP_FAILED_TITLE, e))
    }

    /// Signs in with email and password.
    ///
    /// # Errors
    ///
    /// Returns the store error after notifying the user.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        self.store
            .sign_in_with_password(email, password)
            .await
            .inspect_err(|e| self.report(SIGN_IN_FAILED_TITLE, e))
    }

    /// Signs out of this device.
    ///
    /// A session that is already gone counts as signed out. Local state is
    /// cleared whenever the sign-out succeeds or only found no session.
    ///
    /// # Errors
    ///
    /// Returns any other store error after notifying the user.
    pub async fn sign_out(&self) -> Result<(), Error> {
        match self.store.sign_out(SignOutScope::Local).await {
            Ok(()) => {}
            Err(e) if is_session_missing(&e) => {
                tracing::info!(error = %e, "Sign-out found no live session");
            }
            Err(e) => {
                self.report(SIGN_OUT_FAILED_TITLE, &e);
                return Err(e);
            }
        }
        self.state.handle_session(None);
        Ok(())
    }

    fn report(&self, title: &str, error: &Error) {
        tracing::warn!(error = %error, "{title}");
        if !self.state.is_cancelled() {
            self.notifier
                .notify(Notification::destructive(title, error.to_string()));
        }
    }
}
