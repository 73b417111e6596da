//! In-memory `SessionStore` for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, ProviderError};
use crate::store::{
    AuthStateListener, SessionStore, SignUpOptions, SignUpResponse, Subscription, TokenPair,
};
use crate::types::{AccessToken, AuthChangeEvent, RefreshToken, Session, SignOutScope, User};

pub(crate) fn session(user_id: &str) -> Session {
    Session::new(
        AccessToken(format!("access-{user_id}")),
        RefreshToken(format!("refresh-{user_id}")),
        User::new(user_id).with_email(format!("{user_id}@example.com")),
    )
}

/// Pauses `exchange_code_for_session` until released.
#[derive(Clone, Default)]
pub(crate) struct Gate {
    pub(crate) entered: Arc<Notify>,
    pub(crate) release: Arc<Notify>,
}

#[derive(Default)]
struct Calls {
    exchanged: Vec<String>,
    set_session: Vec<TokenPair>,
    get_session: usize,
    sign_out: Vec<SignOutScope>,
    sign_up: Vec<String>,
    sign_in: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeStore {
    exchange: Option<Result<Session, ProviderError>>,
    set_session: Option<Result<Session, ProviderError>>,
    stored: Mutex<Option<Session>>,
    sign_out: Option<ProviderError>,
    sign_in: Option<Result<Session, ProviderError>>,
    sign_up: Option<Result<SignUpResponse, ProviderError>>,
    gate: Option<Gate>,
    calls: Mutex<Calls>,
    listeners: Arc<Mutex<Vec<(u64, AuthStateListener)>>>,
    next_listener: Mutex<u64>,
}

impl FakeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn exchange_ok(mut self, session: Session) -> Self {
        self.exchange = Some(Ok(session));
        self
    }

    pub(crate) fn exchange_err(mut self, error: ProviderError) -> Self {
        self.exchange = Some(Err(error));
        self
    }

    pub(crate) fn set_session_ok(mut self, session: Session) -> Self {
        self.set_session = Some(Ok(session));
        self
    }

    pub(crate) fn set_session_err(mut self, error: ProviderError) -> Self {
        self.set_session = Some(Err(error));
        self
    }

    pub(crate) fn with_stored_session(self, session: Session) -> Self {
        *self.stored.lock() = Some(session);
        self
    }

    pub(crate) fn sign_out_err(mut self, error: ProviderError) -> Self {
        self.sign_out = Some(error);
        self
    }

    pub(crate) fn sign_in_result(mut self, result: Result<Session, ProviderError>) -> Self {
        self.sign_in = Some(result);
        self
    }

    pub(crate) fn sign_up_result(mut self, result: Result<SignUpResponse, ProviderError>) -> Self {
        self.sign_up = Some(result);
        self
    }

    pub(crate) fn gated(mut self) -> (Self, Gate) {
        let gate = Gate::default();
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub(crate) fn exchanged_codes(&self) -> Vec<String> {
        self.calls.lock().exchanged.clone()
    }

    pub(crate) fn exchange_calls(&self) -> usize {
        self.calls.lock().exchanged.len()
    }

    pub(crate) fn set_session_calls(&self) -> Vec<TokenPair> {
        self.calls.lock().set_session.clone()
    }

    pub(crate) fn get_session_calls(&self) -> usize {
        self.calls.lock().get_session
    }

    pub(crate) fn sign_out_calls(&self) -> Vec<SignOutScope> {
        self.calls.lock().sign_out.clone()
    }

    pub(crate) fn sign_in_calls(&self) -> Vec<String> {
        self.calls.lock().sign_in.clone()
    }

    pub(crate) fn sign_up_calls(&self) -> Vec<String> {
        self.calls.lock().sign_up.clone()
    }

    pub(crate) fn total_calls(&self) -> usize {
        let calls = self.calls.lock();
        calls.exchanged.len()
            + calls.set_session.len()
            + calls.get_session
            + calls.sign_out.len()
            + calls.sign_up.len()
            + calls.sign_in.len()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Delivers an event to every registered listener.
    pub(crate) fn emit(&self, event: AuthChangeEvent, session: Option<&Session>) {
        let listeners: Vec<AuthStateListener> =
            self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(event, session);
        }
    }

    fn adopt(&self, result: Option<Result<Session, ProviderError>>) -> Result<Session, Error> {
        let session = result
            .ok_or_else(|| ProviderError::new("not configured"))?
            .map_err(Error::from)?;
        *self.stored.lock() = Some(session.clone());
        self.emit(AuthChangeEvent::SignedIn, Some(&session));
        Ok(session)
    }
}

impl SessionStore for FakeStore {
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, Error> {
        self.calls.lock().exchanged.push(code.to_owned());
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.adopt(self.exchange.clone())
    }

    async fn set_session(&self, tokens: TokenPair) -> Result<Session, Error> {
        self.calls.lock().set_session.push(tokens);
        self.adopt(self.set_session.clone())
    }

    async fn get_session(&self) -> Result<Option<Session>, Error> {
        self.calls.lock().get_session += 1;
        Ok(self.stored.lock().clone())
    }

    fn on_auth_state_change(&self, listener: AuthStateListener) -> Subscription {
        let id = {
            let mut next = self.next_listener.lock();
            *next += 1;
            *next
        };
        self.listeners.lock().push((id, listener));
        let listeners = self.listeners.clone();
        Subscription::new(move || listeners.lock().retain(|(i, _)| *i != id))
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), Error> {
        self.calls.lock().sign_out.push(scope);
        if let Some(error) = &self.sign_out {
            return Err(error.clone().into());
        }
        *self.stored.lock() = None;
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _options: SignUpOptions,
    ) -> Result<SignUpResponse, Error> {
        self.calls.lock().sign_up.push(email.to_owned());
        self.sign_up
            .clone()
            .ok_or_else(|| ProviderError::new("not configured"))?
            .map_err(Error::from)
    }

    async fn sign_in_with_password(&self, email: &str, _password: &str) -> Result<Session, Error> {
        self.calls.lock().sign_in.push(email.to_owned());
        self.adopt(self.sign_in.clone())
    }
}
