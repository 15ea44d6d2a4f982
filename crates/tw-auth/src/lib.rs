//! Client-side authentication state for token-based APIs
//!
//! This crate keeps a signed-in session alive against an API that issues
//! short-lived access tokens and longer-lived refresh tokens, and tracks the
//! "registered but not yet verified" state between sign-up and OTP
//! confirmation.
//!
//! # Components
//!
//! 1. [`AuthStore`]: the authentication snapshot and its three transitions
//!    (`set_authenticated`, `set_registered`, `logout`), mirrored to storage
//! 2. [`Dispatcher`]: sends requests through a middleware pipeline whose
//!    [`ReauthMiddleware`] attaches the bearer token and refreshes it exactly
//!    once when concurrent requests hit a 401
//! 3. [`hydrate`]: restores persisted state at startup
//! 4. [`AuthClient`]: the login, registration and profile endpoints
//! 5. [`route_for`]: which screen a front end should show
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tw_auth::{AuthClient, AuthConfig, AuthStore, FileStore, NoSecretProvider, Storage, StoreOptions, hydrate};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dir = FileStore::default_storage_dir()?;
//!     let secure = FileStore::new(dir.join("secure"), Arc::new(NoSecretProvider)).await?;
//!     let general = FileStore::new(dir.join("general"), Arc::new(NoSecretProvider)).await?;
//!
//!     let store = AuthStore::new(Storage::new(Arc::new(secure), Arc::new(general)), StoreOptions::default());
//!     hydrate(&store).await;
//!
//!     let client = AuthClient::new(AuthConfig::parse("https://api.example.com")?, store)?;
//!     if !client.store().snapshot().is_authenticated {
//!         client.login("alice", "Secret123!").await?;
//!     }
//!
//!     // A 401 here is refreshed and replayed transparently
//!     let user = client.get_user("alice").await?;
//!     println!("Signed in as {}", user.username);
//!     Ok(())
//! }
//! ```
//!
//! # Observing State
//!
//! ```
//! use tw_auth::{AuthStore, Route, Tokens, hydrate, route_for};
//!
//! # async fn example() {
//! let store = AuthStore::in_memory();
//! let mut changes = store.subscribe();
//!
//! hydrate(&store).await;
//! assert_eq!(route_for(&changes.borrow_and_update()), Route::SignIn);
//!
//! store.set_authenticated(Tokens::new("A1", "R1"), None).await;
//! assert_eq!(route_for(&changes.borrow_and_update()), Route::Home);
//! # }
//! # tokio_test::block_on(example());
//! ```
//!
//! # Storage
//!
//! Persistence goes through the [`KeyValueStore`] trait. [`MemoryStore`] is
//! meant for tests. [`FileStore`] encrypts each value with AES-256-GCM; the
//! data key lives in the OS keyring, or is derived from a passphrase supplied
//! by a [`SecretProvider`] when the keyring is unavailable.
//!
//! Tokens are never logged. [`Tokens`] and [`AuthSnapshot`] redact themselves
//! in `Debug` output.

pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod errors;
pub mod file_store;
pub mod hydration;
pub mod key_manager;
pub mod models;
pub mod navigation;
pub mod secret;
pub mod session;
pub mod shapes;
pub mod state;
pub mod store;
pub mod validation;

// Re-export main types
pub use client::AuthClient;
pub use config::{AuthConfig, HttpTimeouts};
pub use dispatch::{
    ApiRequest, ApiResponse, DispatchOptions, Dispatcher, HttpTransport, Middleware, Next,
    Pipeline, ReauthMiddleware, TracingMiddleware, Transport,
};
pub use errors::{ApiError, ApiResult, AuthError, Result, StorageError};
pub use file_store::FileStore;
pub use hydration::{HydrationOutcome, hydrate};
pub use models::{RegisteredUser, RegistrationForm, User, UsernameAvailability};
pub use navigation::{Route, route_for};
pub use secret::{EnvSecretProvider, NoSecretProvider, SecretProvider, StaticSecretProvider};
pub use session::{AuthSnapshot, RegistrationRecord, Tokens};
pub use state::{AuthStore, Clock, StoreOptions, SystemClock};
pub use store::{KeyValueStore, MemoryStore, SecureTokenStore, Storage};
pub use validation::FieldErrors;
