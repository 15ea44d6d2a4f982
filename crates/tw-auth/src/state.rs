//! Auth state container.
//!
//! State changes go through [`reduce`], which only mutates the snapshot and
//! returns [`AuthEffect`]s. [`AuthStore`] publishes the new snapshot first and
//! then runs the effects against [`Storage`], so observers never wait on I/O.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::REGISTRATION_TTL;
use crate::errors::StorageError;
use crate::models::{RegisteredUser, User};
use crate::session::{AuthSnapshot, RegistrationRecord, Tokens};
use crate::store::Storage;

/// Source of "now" for registration timestamps and expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// State transitions
#[derive(Debug, Clone)]
pub enum AuthAction {
    SetAuthenticated { tokens: Tokens, user: Option<User> },
    SetRegistered(RegistrationRecord),
    Logout,
    MarkHydrated,
}

/// Persistence work produced by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEffect {
    SaveTokens(Tokens),
    ClearTokens,
    SaveUser(User),
    DeleteUser,
    SaveRegistration(RegistrationRecord),
    DeleteRegistration,
}

/// Apply `action` to `state` and return the persistence it requires
pub fn reduce(state: &mut AuthSnapshot, action: AuthAction) -> Vec<AuthEffect> {
    let effects = match action {
        AuthAction::SetAuthenticated { tokens, user } => {
            state.access_token = Some(tokens.access_token.clone());
            state.refresh_token = Some(tokens.refresh_token.clone());
            state.user = user.clone();
            state.is_authenticated = true;
            state.registered_user = None;
            state.is_registered = false;

            vec![
                AuthEffect::SaveTokens(tokens),
                match user {
                    Some(user) => AuthEffect::SaveUser(user),
                    None => AuthEffect::DeleteUser,
                },
                AuthEffect::DeleteRegistration,
            ]
        }
        AuthAction::SetRegistered(record) => {
            state.access_token = None;
            state.refresh_token = None;
            state.user = None;
            state.is_authenticated = false;
            state.registered_user = Some(record.data.clone());
            state.is_registered = true;

            vec![
                AuthEffect::ClearTokens,
                AuthEffect::DeleteUser,
                AuthEffect::SaveRegistration(record),
            ]
        }
        AuthAction::Logout => {
            *state = AuthSnapshot {
                is_hydrated: state.is_hydrated,
                ..AuthSnapshot::default()
            };

            vec![
                AuthEffect::ClearTokens,
                AuthEffect::DeleteUser,
                AuthEffect::DeleteRegistration,
            ]
        }
        AuthAction::MarkHydrated => {
            state.is_hydrated = true;
            Vec::new()
        }
    };

    debug_assert!(state.is_consistent(), "inconsistent auth state: {state:?}");
    effects
}

/// Options for [`AuthStore::new`]
#[derive(Clone)]
pub struct StoreOptions {
    pub registration_ttl: TimeDelta,
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            registration_ttl: TimeDelta::from_std(REGISTRATION_TTL).unwrap_or(TimeDelta::days(7)),
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreOptions {
    pub fn with_registration_ttl(mut self, ttl: std::time::Duration) -> Self {
        if let Ok(ttl) = TimeDelta::from_std(ttl) {
            self.registration_ttl = ttl;
        }
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

struct Inner {
    state: watch::Sender<AuthSnapshot>,
    storage: Storage,
    options: StoreOptions,
}

/// Shared handle to the authentication state
///
/// Cloning is cheap; all clones observe and mutate the same snapshot.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<Inner>,
}

impl AuthStore {
    pub fn new(storage: Storage, options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: watch::Sender::new(AuthSnapshot::default()),
                storage,
                options,
            }),
        }
    }

    /// Store over in-memory storage with default options
    pub fn in_memory() -> Self {
        Self::new(Storage::in_memory(), StoreOptions::default())
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Current access token
    pub fn access_token(&self) -> Option<String> {
        self.inner.state.borrow().access_token.clone()
    }

    /// Receiver that is notified of every transition
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.options.clock.now()
    }

    /// Install a credential pair and user; clears any pending registration
    #[instrument(skip_all, fields(user = user.as_ref().map(|u| u.username.as_str())))]
    pub async fn set_authenticated(&self, tokens: Tokens, user: Option<User>) {
        info!("Session authenticated");
        self.dispatch(AuthAction::SetAuthenticated { tokens, user })
            .await;
    }

    /// Record a fresh registration awaiting verification
    #[instrument(skip_all, fields(user = %user.username))]
    pub async fn set_registered(&self, user: RegisteredUser) {
        let record = RegistrationRecord::new(user, self.now());
        self.restore_registration(record).await;
    }

    /// Reinstate a registration without resetting its timestamp
    pub(crate) async fn restore_registration(&self, record: RegistrationRecord) {
        info!("Registration pending verification");
        self.dispatch(AuthAction::SetRegistered(record)).await;
    }

    /// Drop all session and registration state
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        info!("Logged out");
        self.dispatch(AuthAction::Logout).await;
    }

    pub(crate) fn mark_hydrated(&self) {
        self.apply(AuthAction::MarkHydrated);
    }

    /// Publish the reduced snapshot, then persist
    async fn dispatch(&self, action: AuthAction) {
        let effects = self.apply(action);
        self.run_effects(effects).await;
    }

    fn apply(&self, action: AuthAction) -> Vec<AuthEffect> {
        let mut effects = Vec::new();
        self.inner.state.send_modify(|state| {
            effects = reduce(state, action);
        });
        effects
    }

    /// Failures are logged; the in-memory state is never rolled back
    async fn run_effects(&self, effects: Vec<AuthEffect>) {
        for effect in effects {
            if let Err(e) = self.run_effect(&effect).await {
                warn!(error = %e, effect = effect_name(&effect), "Failed to persist auth state");
            }
        }
    }

    async fn run_effect(&self, effect: &AuthEffect) -> Result<(), StorageError> {
        let storage = &self.inner.storage;
        debug!(effect = effect_name(effect), "Persisting auth state");
        match effect {
            AuthEffect::SaveTokens(tokens) => storage.tokens().save(tokens).await,
            AuthEffect::ClearTokens => storage.tokens().clear().await,
            AuthEffect::SaveUser(user) => storage.save_user(&serde_json::to_string(user)?).await,
            AuthEffect::DeleteUser => storage.delete_user().await,
            AuthEffect::SaveRegistration(record) => {
                storage
                    .save_registration(&serde_json::to_string(record)?)
                    .await
            }
            AuthEffect::DeleteRegistration => storage.delete_registration().await,
        }
    }
}

fn effect_name(effect: &AuthEffect) -> &'static str {
    match effect {
        AuthEffect::SaveTokens(_) => "save_tokens",
        AuthEffect::ClearTokens => "clear_tokens",
        AuthEffect::SaveUser(_) => "save_user",
        AuthEffect::DeleteUser => "delete_user",
        AuthEffect::SaveRegistration(_) => "save_registration",
        AuthEffect::DeleteRegistration => "delete_registration",
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}
