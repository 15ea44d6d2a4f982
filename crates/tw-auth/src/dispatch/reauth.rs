use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::StatusCode;
use reqwest::header::HeaderName;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{ApiRequest, ApiResponse, Middleware, Next};
use crate::config::{REFRESH_TOKEN_HEADER, endpoints};
use crate::errors::{ApiError, ApiResult};
use crate::shapes::{TokenGrant, parse_token_grant};
use crate::state::AuthStore;

/// How a refresh attempt ended for one queued caller
#[derive(Debug)]
enum RefreshOutcome {
    /// Another caller refreshed while this one was queued
    Superseded(Option<String>),
    Refreshed(String),
    LoggedOut,
}

/// Attaches the bearer token and performs single-flight refresh on 401
///
/// Authenticated requests wait for any in-progress refresh before sending, so
/// they always go out with the newest token. Only one refresh call is in
/// flight at a time; callers queued behind it replay with its result instead
/// of refreshing again. Anonymous requests skip this stage entirely.
pub struct ReauthMiddleware {
    store: AuthStore,
    refresh_lock: Arc<Mutex<()>>,
    /// Set only while a refresh call and its state update are running
    refreshing: Arc<AtomicBool>,
}

/// Raises a flag for as long as it lives
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ReauthMiddleware {
    pub fn new(store: AuthStore) -> Self {
        Self {
            store,
            refresh_lock: Arc::new(Mutex::new(())),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a refresh call is in flight
    ///
    /// Callers that only pass through the lock to wait for a refresh, or that
    /// find the token already replaced, do not count.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Take the refresh lock and run the refresh in its own task
    ///
    /// The task owns the guard, so a caller that gives up mid-refresh does
    /// not abort the refresh other queued callers are waiting on.
    async fn coordinate_refresh(
        &self,
        used_token: Option<String>,
        next: Next,
    ) -> ApiResult<RefreshOutcome> {
        let guard = Arc::clone(&self.refresh_lock).lock_owned().await;
        let store = self.store.clone();
        let refreshing = Arc::clone(&self.refreshing);

        let refresh = tokio::spawn(async move {
            let outcome = refresh_locked(&store, &refreshing, used_token, next).await;
            drop(guard);
            outcome
        });

        refresh
            .await
            .map_err(|e| ApiError::Internal(format!("refresh task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl Middleware for ReauthMiddleware {
    async fn handle(&self, mut request: ApiRequest, next: Next) -> ApiResult<ApiResponse> {
        if !request.requires_auth() {
            return next.run(request).await;
        }

        // Wait for a running refresh without taking the lock
        drop(self.refresh_lock.lock().await);

        let used_token = self.store.access_token();
        request.set_bearer(used_token.as_deref())?;

        let unauthorized = match next.clone().run(request.clone()).await {
            Err(e) if e.is_unauthorized() => e,
            other => return other,
        };

        debug!(path = %request.path, "Request unauthorized, coordinating refresh");
        let token = match self.coordinate_refresh(used_token, next.clone()).await? {
            RefreshOutcome::Superseded(token) => token,
            RefreshOutcome::Refreshed(token) => Some(token),
            RefreshOutcome::LoggedOut => return Err(unauthorized),
        };

        // Replayed exactly once; a second 401 is returned as-is
        request.set_bearer(token.as_deref())?;
        next.run(request).await
    }
}

/// Body of the refresh critical section; the caller holds the lock
#[instrument(skip_all)]
async fn refresh_locked(
    store: &AuthStore,
    refreshing: &AtomicBool,
    used_token: Option<String>,
    next: Next,
) -> ApiResult<RefreshOutcome> {
    let snapshot = store.snapshot();
    if snapshot.access_token != used_token {
        debug!("Token changed while queued, replaying");
        return Ok(RefreshOutcome::Superseded(snapshot.access_token));
    }

    let Some(refresh_token) = snapshot.refresh_token.filter(|t| !t.is_empty()) else {
        info!("No refresh token, logging out");
        store.logout().await;
        return Ok(RefreshOutcome::LoggedOut);
    };

    let _flag = RefreshingFlag::raise(refreshing);
    match exchange(&refresh_token, next).await {
        Ok(grant) => {
            let access_token = grant.tokens.access_token.clone();
            let user = grant.user.or(snapshot.user);
            store.set_authenticated(grant.tokens, user).await;
            info!("Access token refreshed");
            Ok(RefreshOutcome::Refreshed(access_token))
        }
        Err(e) => {
            warn!(error = %e, "Token refresh failed, logging out");
            store.logout().await;
            Err(e)
        }
    }
}

/// Trade a refresh token for a new credential pair
async fn exchange(refresh_token: &str, next: Next) -> ApiResult<TokenGrant> {
    let mut request = ApiRequest::post(endpoints::REFRESH_TOKEN)
        .json(&serde_json::json!({}))?
        .sensitive_header(HeaderName::from_static(REFRESH_TOKEN_HEADER), refresh_token)?;
    request.set_requires_auth(false);

    let response = next.run(request).await?;
    if response.status != StatusCode::OK {
        return Err(ApiError::InvalidRefreshResponse {
            status: response.status,
        });
    }

    parse_token_grant(&response.body).ok_or(ApiError::InvalidRefreshResponse {
        status: response.status,
    })
}
