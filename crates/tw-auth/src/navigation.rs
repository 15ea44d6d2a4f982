use crate::session::AuthSnapshot;

/// Top-level screen a front end should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Persisted state not loaded yet
    Splash,
    Home,
    /// Registered, waiting for the OTP
    VerifyOtp,
    SignIn,
}

/// Pick the route for a snapshot
///
/// Pair with [`AuthStore::subscribe`](crate::AuthStore::subscribe) to
/// re-route on every transition.
pub fn route_for(snapshot: &AuthSnapshot) -> Route {
    if !snapshot.is_hydrated {
        Route::Splash
    } else if snapshot.is_authenticated {
        Route::Home
    } else if snapshot.is_registered {
        Route::VerifyOtp
    } else {
        Route::SignIn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AuthStore;
    use crate::state::tests::{alice, registered_alice};
    use crate::session::Tokens;

    #[test]
    fn unhydrated_state_always_shows_splash() {
        let snapshot = AuthSnapshot {
            is_authenticated: true,
            access_token: Some("A1".to_string()),
            refresh_token: Some("R1".to_string()),
            ..Default::default()
        };
        assert_eq!(route_for(&snapshot), Route::Splash);
    }

    #[tokio::test]
    async fn routes_follow_store_transitions() {
        let store = AuthStore::in_memory();
        let mut rx = store.subscribe();
        assert_eq!(route_for(&rx.borrow_and_update()), Route::Splash);

        crate::hydration::hydrate(&store).await;
        assert_eq!(route_for(&rx.borrow_and_update()), Route::SignIn);

        store.set_registered(registered_alice()).await;
        assert_eq!(route_for(&rx.borrow_and_update()), Route::VerifyOtp);

        store
            .set_authenticated(Tokens::new("A1", "R1"), Some(alice()))
            .await;
        assert_eq!(route_for(&rx.borrow_and_update()), Route::Home);

        store.logout().await;
        assert_eq!(route_for(&rx.borrow_and_update()), Route::SignIn);
    }
}
