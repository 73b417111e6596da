#![doc = include_str!("../README.md")]

pub mod classify;
pub mod context;
pub mod error;
pub mod location;
pub mod notify;
#[cfg(feature = "supabase")]
pub mod pkce;
pub mod reconcile;
pub mod redirect;
pub mod storage;
pub mod store;
#[cfg(feature = "supabase")]
pub mod supabase;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use classify::{ExchangeErrorKind, classify_exchange_error, is_session_missing};
pub use context::{AuthContext, AuthState};
pub use error::{Error, ProviderError};
pub use location::{Location, MemoryLocation};
pub use notify::{
    MemoryNotifications, Notification, NotificationSink, TracingNotifications, Variant,
};
pub use reconcile::{
    FailureKind, Outcome, Phase, ReconciliationLock, Reconciler, ReconcilerConfig,
};
pub use redirect::{RedirectFingerprint, RedirectPayload, clean_url};
pub use storage::{MemoryStorage, Storage};
pub use store::{
    AuthStateListener, SessionStore, SignUpOptions, SignUpResponse, Subscription, TokenPair,
};
#[cfg(feature = "supabase")]
pub use supabase::{SupabaseAuth, SupabaseConfig};
pub use types::{
    AccessToken, AuthChangeEvent, AuthSnapshot, RefreshToken, Session, SignOutScope, User, UserId,
};
