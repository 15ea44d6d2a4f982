//! Startup reconciliation of persisted state.
//!
//! A saved session always wins over a saved registration. Records that cannot
//! be read or parsed are treated as absent and removed where possible, so a
//! damaged store degrades to "signed out" rather than failing startup.

use tracing::{info, instrument, warn};

use crate::errors::StorageError;
use crate::models::User;
use crate::session::{RegistrationRecord, Tokens};
use crate::state::AuthStore;
use crate::store::Storage;

/// What hydration found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// Tokens and user restored
    Authenticated,
    /// A registration is waiting for its OTP
    PendingVerification,
    /// A registration was older than the TTL and was deleted
    ExpiredRegistration,
    /// A registration record could not be parsed and was deleted
    CorruptedRegistration,
    /// Nothing persisted
    Empty,
    /// Storage could not be read; nothing was restored
    Failed,
}

/// Prime `store` from its storage
///
/// Always finishes by marking the store hydrated, whatever it found. Safe to
/// run again over unchanged storage; the resulting snapshot is the same.
#[instrument(skip_all)]
pub async fn hydrate(store: &AuthStore) -> HydrationOutcome {
    let outcome = load(store).await;
    store.mark_hydrated();
    info!(?outcome, "Hydration complete");
    outcome
}

async fn load(store: &AuthStore) -> HydrationOutcome {
    let storage = store.storage();
    let mut read_failed = false;

    match restore_session(storage).await {
        Ok(Some((tokens, user))) => {
            // Also deletes any stale registration record
            store.set_authenticated(tokens, Some(user)).await;
            return HydrationOutcome::Authenticated;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Failed to read persisted session");
            read_failed = true;
        }
    }

    let raw = match storage.load_registration().await {
        Ok(Some(raw)) => raw,
        Ok(None) if read_failed => return HydrationOutcome::Failed,
        Ok(None) => return HydrationOutcome::Empty,
        Err(e) => {
            warn!(error = %e, "Failed to read persisted registration");
            return HydrationOutcome::Failed;
        }
    };

    let record = match serde_json::from_str::<RegistrationRecord>(&raw) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "Persisted registration is corrupted, deleting it");
            discard_registration(storage).await;
            return HydrationOutcome::CorruptedRegistration;
        }
    };

    if record.is_expired(store.now(), store.options().registration_ttl) {
        info!(username = %record.data.username, "Pending registration expired");
        discard_registration(storage).await;
        return HydrationOutcome::ExpiredRegistration;
    }

    store.restore_registration(record).await;
    HydrationOutcome::PendingVerification
}

/// Read tokens and user; a corrupted user clears all three session keys
async fn restore_session(storage: &Storage) -> Result<Option<(Tokens, User)>, StorageError> {
    let tokens = storage.tokens().load().await?.into_pair();
    let raw_user = storage.load_user().await?;

    let (Some(tokens), Some(raw_user)) = (tokens, raw_user) else {
        return Ok(None);
    };

    match serde_json::from_str::<User>(&raw_user) {
        Ok(user) => Ok(Some((tokens, user))),
        Err(e) => {
            warn!(error = %e, "Persisted user is corrupted, clearing session");
            if let Err(e) = storage.tokens().clear().await {
                warn!(error = %e, "Failed to clear persisted tokens");
            }
            if let Err(e) = storage.delete_user().await {
                warn!(error = %e, "Failed to delete persisted user");
            }
            Ok(None)
        }
    }
}

async fn discard_registration(storage: &Storage) {
    if let Err(e) = storage.delete_registration().await {
        warn!(error = %e, "Failed to delete persisted registration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StoreOptions;
    use crate::state::tests::{BrokenStore, FixedClock, alice, registered_alice};
    use crate::store::{KeyValueStore, MemoryStore, keys};
    use chrono::{DateTime, TimeDelta, Utc};
    use std::sync::Arc;

    struct Fixture {
        secure: Arc<MemoryStore>,
        general: Arc<MemoryStore>,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                secure: Arc::new(MemoryStore::new()),
                general: Arc::new(MemoryStore::new()),
                now: Utc::now(),
            }
        }

        fn store(&self) -> AuthStore {
            AuthStore::new(
                Storage::new(self.secure.clone(), self.general.clone()),
                StoreOptions::default().with_clock(FixedClock::at(self.now)),
            )
        }

        async fn persist_session(&self, user_json: &str) {
            self.secure.put(keys::ACCESS_TOKEN, "A1").await.unwrap();
            self.secure.put(keys::REFRESH_TOKEN, "R1").await.unwrap();
            self.secure.put(keys::USER, user_json).await.unwrap();
        }

        async fn persist_registration(&self, created: DateTime<Utc>) {
            let record = RegistrationRecord::new(registered_alice(), created);
            self.general
                .put(keys::REGISTERED_USER, &serde_json::to_string(&record).unwrap())
                .await
                .unwrap();
        }

        fn ttl(&self) -> TimeDelta {
            StoreOptions::default().registration_ttl
        }
    }

    #[tokio::test]
    async fn empty_storage_still_marks_hydrated() {
        let fixture = Fixture::new();
        let store = fixture.store();

        assert!(!store.snapshot().is_hydrated);
        assert_eq!(hydrate(&store).await, HydrationOutcome::Empty);

        let snapshot = store.snapshot();
        assert!(snapshot.is_hydrated);
        assert!(!snapshot.is_authenticated);
        assert!(!snapshot.is_registered);
    }

    #[tokio::test]
    async fn session_wins_over_registration() {
        let fixture = Fixture::new();
        fixture
            .persist_session(&serde_json::to_string(&alice()).unwrap())
            .await;
        fixture.persist_registration(fixture.now).await;
        let store = fixture.store();

        assert_eq!(hydrate(&store).await, HydrationOutcome::Authenticated);

        let snapshot = store.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(!snapshot.is_registered);
        assert_eq!(snapshot.access_token.as_deref(), Some("A1"));
        assert_eq!(snapshot.user, Some(alice()));
        assert!(fixture.general.get(keys::REGISTERED_USER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hydrating_twice_gives_the_same_snapshot() {
        for authenticated in [true, false] {
            let fixture = Fixture::new();
            if authenticated {
                fixture
                    .persist_session(&serde_json::to_string(&alice()).unwrap())
                    .await;
            } else {
                fixture.persist_registration(fixture.now).await;
            }
            let store = fixture.store();

            let first_outcome = hydrate(&store).await;
            let first = store.snapshot();
            let second_outcome = hydrate(&store).await;
            let second = store.snapshot();

            assert_eq!(first_outcome, second_outcome);
            assert_eq!(first, second);
            assert!(second.is_hydrated);
        }
    }

    #[tokio::test]
    async fn registration_just_past_ttl_is_pruned() {
        let fixture = Fixture::new();
        fixture
            .persist_registration(fixture.now - fixture.ttl() - TimeDelta::milliseconds(1))
            .await;
        let store = fixture.store();

        assert_eq!(hydrate(&store).await, HydrationOutcome::ExpiredRegistration);
        assert!(!store.snapshot().is_registered);
        assert!(fixture.general.is_empty());
    }

    #[tokio::test]
    async fn registration_just_inside_ttl_is_restored() {
        let fixture = Fixture::new();
        let created = fixture.now - fixture.ttl() + TimeDelta::milliseconds(1);
        fixture.persist_registration(created).await;
        let store = fixture.store();

        assert_eq!(hydrate(&store).await, HydrationOutcome::PendingVerification);

        let snapshot = store.snapshot();
        assert!(snapshot.is_registered);
        assert_eq!(snapshot.registered_user, Some(registered_alice()));

        // The original timestamp survives the rewrite
        let raw = fixture.general.get(keys::REGISTERED_USER).await.unwrap().unwrap();
        let record: RegistrationRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.timestamp, created.timestamp_millis());
    }

    #[tokio::test]
    async fn out_of_range_timestamp_is_pruned_not_fatal() {
        let fixture = Fixture::new();
        let record = serde_json::json!({
            "data": serde_json::to_value(registered_alice()).unwrap(),
            "timestamp": i64::MIN
        });
        fixture
            .general
            .put(keys::REGISTERED_USER, &record.to_string())
            .await
            .unwrap();
        let store = fixture.store();

        assert_eq!(hydrate(&store).await, HydrationOutcome::ExpiredRegistration);

        let snapshot = store.snapshot();
        assert!(snapshot.is_hydrated);
        assert!(!snapshot.is_registered);
        assert!(fixture.general.is_empty());
    }

    #[tokio::test]
    async fn corrupted_user_clears_session_and_falls_through() {
        let fixture = Fixture::new();
        fixture.persist_session("{not json").await;
        fixture.persist_registration(fixture.now).await;
        let store = fixture.store();

        assert_eq!(hydrate(&store).await, HydrationOutcome::PendingVerification);
        assert!(!store.snapshot().is_authenticated);
        assert!(fixture.secure.is_empty());
    }

    #[tokio::test]
    async fn corrupted_registration_is_deleted() {
        let fixture = Fixture::new();
        fixture
            .general
            .put(keys::REGISTERED_USER, r#"{"data": 5}"#)
            .await
            .unwrap();
        let store = fixture.store();

        assert_eq!(hydrate(&store).await, HydrationOutcome::CorruptedRegistration);
        assert!(!store.snapshot().is_registered);
        assert!(fixture.general.is_empty());
    }

    #[tokio::test]
    async fn half_a_token_pair_is_no_session() {
        let fixture = Fixture::new();
        fixture.secure.put(keys::ACCESS_TOKEN, "A1").await.unwrap();
        fixture
            .secure
            .put(keys::USER, &serde_json::to_string(&alice()).unwrap())
            .await
            .unwrap();
        let store = fixture.store();

        assert_eq!(hydrate(&store).await, HydrationOutcome::Empty);
        assert!(!store.snapshot().is_authenticated);
    }

    #[tokio::test]
    async fn unreadable_storage_fails_safe() {
        let broken: Arc<dyn KeyValueStore> = Arc::new(BrokenStore);
        let store = AuthStore::new(Storage::new(broken.clone(), broken), StoreOptions::default());

        assert_eq!(hydrate(&store).await, HydrationOutcome::Failed);

        let snapshot = store.snapshot();
        assert!(snapshot.is_hydrated);
        assert!(!snapshot.is_authenticated);
        assert!(!snapshot.is_registered);
    }
}
