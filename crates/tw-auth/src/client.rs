use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{AuthConfig, endpoints};
use crate::dispatch::{ApiRequest, DispatchOptions, Dispatcher, HttpTransport, Transport};
use crate::errors::{AuthError, Result};
use crate::models::*;
use crate::shapes::{parse_registered_user, parse_token_grant};
use crate::state::AuthStore;
use crate::validation::FieldErrors;

/// High-level client for the auth API
///
/// Every call goes through the reauth-aware [`Dispatcher`]; successful
/// credential exchanges are written into the shared [`AuthStore`].
#[derive(Clone)]
pub struct AuthClient {
    dispatcher: Dispatcher,
    store: AuthStore,
    config: AuthConfig,
}

impl AuthClient {
    /// Create a client that talks HTTP to `config.base_url`
    pub fn new(config: AuthConfig, store: AuthStore) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, store, Arc::new(transport)))
    }

    /// Create a client over a custom transport
    pub fn with_transport(config: AuthConfig, store: AuthStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            dispatcher: Dispatcher::new(transport, store.clone()),
            store,
            config,
        }
    }

    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Sign in with username and password
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let mut errors = FieldErrors::new();
        errors.require("username", username);
        errors.require("password", password);
        errors.into_result().map_err(AuthError::Validation)?;

        let request = ApiRequest::post(endpoints::LOGIN).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;
        let response = self
            .dispatcher
            .dispatch(request, DispatchOptions::anonymous())
            .await?;

        let login: LoginResponse = response.json()?;
        if login.tokens.access_token.is_empty() || login.tokens.refresh_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "login response is missing a token".to_string(),
            ));
        }

        self.store
            .set_authenticated(login.tokens.clone(), Some(login.user.clone()))
            .await;
        Ok(login)
    }

    /// Create an account; it stays pending until [`verify_otp`](Self::verify_otp)
    #[instrument(skip(self, form), fields(username = %form.username))]
    pub async fn register(&self, form: RegistrationForm) -> Result<RegisteredUser> {
        let mut errors = FieldErrors::new();
        errors.require("username", &form.username);
        errors.require("email", &form.email);
        errors.require("firstName", &form.first_name);
        errors.require("lastName", &form.last_name);
        errors.require("password", &form.password);
        errors.into_result().map_err(AuthError::Validation)?;

        let request = ApiRequest::post(endpoints::REGISTER).json(&form)?;
        let response = self
            .dispatcher
            .dispatch(request, DispatchOptions::anonymous())
            .await?;

        let user = parse_registered_user(&response.body).ok_or_else(|| {
            AuthError::InvalidResponse("unrecognised registration response".to_string())
        })?;

        self.store.set_registered(user.clone()).await;
        Ok(user)
    }

    /// Confirm the pending registration with the emailed code
    #[instrument(skip(self, otp))]
    pub async fn verify_otp(&self, otp: &str) -> Result<User> {
        let mut errors = FieldErrors::new();
        errors.require("otp", otp);
        errors.into_result().map_err(AuthError::Validation)?;

        let pending = self
            .store
            .snapshot()
            .registered_user
            .ok_or(AuthError::NotRegistered)?;

        let request = ApiRequest::post(endpoints::VERIFY_OTP).json(&VerifyOtpRequest {
            email: pending.email.clone(),
            username: pending.username.clone(),
            otp: otp.trim().to_string(),
        })?;
        let response = self
            .dispatcher
            .dispatch(request, DispatchOptions::anonymous())
            .await?;

        let grant = parse_token_grant(&response.body).ok_or_else(|| {
            AuthError::InvalidResponse("verification response has no credentials".to_string())
        })?;
        let user = grant.user.unwrap_or_else(|| User::from(pending));

        self.store
            .set_authenticated(grant.tokens, Some(user.clone()))
            .await;
        info!(username = %user.username, "Registration verified");
        Ok(user)
    }

    /// Fetch a user profile
    #[instrument(skip(self))]
    pub async fn get_user(&self, username: &str) -> Result<User> {
        let mut errors = FieldErrors::new();
        errors.require("username", username);
        errors.into_result().map_err(AuthError::Validation)?;

        let response = self
            .dispatcher
            .dispatch(
                ApiRequest::get(endpoints::user_profile(username)),
                DispatchOptions::default(),
            )
            .await?;

        let envelope: UserEnvelope = response.json()?;
        Ok(envelope.user)
    }

    /// Re-fetch the signed-in user's profile and install it
    #[instrument(skip(self))]
    pub async fn sync_profile(&self) -> Result<User> {
        let username = self
            .store
            .snapshot()
            .user
            .map(|user| user.username)
            .ok_or(AuthError::NotAuthenticated)?;

        let user = self.get_user(&username).await?;

        // The fetch may have refreshed the tokens or ended the session
        let tokens = self
            .store
            .snapshot()
            .tokens()
            .ok_or(AuthError::NotAuthenticated)?;
        self.store.set_authenticated(tokens, Some(user.clone())).await;

        debug!("Profile synced");
        Ok(user)
    }

    /// Tell the server, then forget the session locally
    ///
    /// The server call is best-effort; local state is always cleared.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let snapshot = self.store.snapshot();

        if let (true, Some(user)) = (snapshot.is_authenticated, snapshot.user) {
            let result = async {
                let request =
                    ApiRequest::post(endpoints::LOGOUT).json(&LogoutRequest { user_id: user.id })?;
                self.dispatcher
                    .dispatch(request, DispatchOptions::default())
                    .await
            }
            .await;

            if let Err(e) = result {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        self.store.logout().await;
    }

    /// Ask whether `username` is still free
    #[instrument(skip(self))]
    pub async fn check_username(&self, username: &str) -> Result<UsernameAvailability> {
        let mut errors = FieldErrors::new();
        errors.require("username", username);
        errors.into_result().map_err(AuthError::Validation)?;

        let request = ApiRequest::post(endpoints::USERNAME_AVAILABILITY).json(
            &UsernameAvailabilityRequest {
                username: username.to_string(),
            },
        )?;
        let response = self
            .dispatcher
            .dispatch(request, DispatchOptions::anonymous())
            .await?;

        Ok(response.json()?)
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiError;
    use crate::session::Tokens;
    use crate::state::tests::{alice, registered_alice};
    use reqwest::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{any, body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AuthClient {
        AuthClient::new(AuthConfig::parse(&server.uri()).unwrap(), AuthStore::in_memory()).unwrap()
    }

    fn alice_json() -> serde_json::Value {
        json!({
            "id": "u1",
            "username": "alice",
            "email": "alice@example.com",
            "firstName": "Alice",
            "lastName": "Liddell"
        })
    }

    fn alice_form() -> RegistrationForm {
        RegistrationForm {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
            password: "Secret123!".to_string(),
        }
    }

    #[tokio::test]
    async fn login_then_authenticated_request_carries_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_json(json!({"username": "alice", "password": "Secret123!"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tokens": {"accessToken": "A1", "refreshToken": "R1"},
                "user": alice_json()
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/alice"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": alice_json()})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let login = client.login("alice", "Secret123!").await.unwrap();
        assert_eq!(login.user.id, "u1");

        let snapshot = client.store().snapshot();
        assert!(snapshot.is_authenticated);
        assert_eq!(snapshot.access_token.as_deref(), Some("A1"));

        let user = client.get_user("alice").await.unwrap();
        assert_eq!(user, alice());
        server.verify().await;
    }

    #[tokio::test]
    async fn login_validation_happens_before_network() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server).login(" ", "").await.unwrap_err();

        match err {
            AuthError::Validation(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.get("username").is_some());
                assert!(errors.get("password").is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn rejected_login_leaves_state_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "bad credentials"})))
            .mount(&server)
            .await;
        Mock::given(path("/refresh-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.login("alice", "wrong").await.unwrap_err();

        assert!(matches!(err, AuthError::Api(ref e) if e.status() == Some(StatusCode::UNAUTHORIZED)));
        assert!(!client.store().snapshot().is_authenticated);
        server.verify().await;
    }

    #[tokio::test]
    async fn register_then_verify_promotes_registered_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 1,
                "username": "alice",
                "email": "alice@example.com",
                "first_name": "Alice",
                "last_name": "Liddell"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/verify-otp"))
            .and(body_json(json!({
                "email": "alice@example.com",
                "username": "alice",
                "otp": "123456"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "A1", "refreshToken": "R1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let registered = client.register(alice_form()).await.unwrap();
        assert_eq!(registered.id, "1");

        let snapshot = client.store().snapshot();
        assert!(snapshot.is_registered);
        assert!(!snapshot.is_authenticated);

        let user = client.verify_otp(" 123456 ").await.unwrap();
        assert_eq!(user.username, "alice");

        let snapshot = client.store().snapshot();
        assert!(snapshot.is_authenticated);
        assert!(!snapshot.is_registered);
        assert!(snapshot.registered_user.is_none());
        assert_eq!(snapshot.user.unwrap().id, "1");
        server.verify().await;
    }

    #[tokio::test]
    async fn verify_without_registration_is_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server).verify_otp("123456").await.unwrap_err();

        assert!(matches!(err, AuthError::NotRegistered));
        server.verify().await;
    }

    #[tokio::test]
    async fn unrecognised_registration_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.register(alice_form()).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert!(!client.store().snapshot().is_registered);
    }

    #[tokio::test]
    async fn logout_is_best_effort() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .and(header("authorization", "Bearer A1"))
            .and(body_json(json!({"user_id": "u1"})))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .store()
            .set_authenticated(Tokens::new("A1", "R1"), Some(alice()))
            .await;

        client.logout().await;

        let snapshot = client.store().snapshot();
        assert!(!snapshot.is_authenticated);
        assert!(snapshot.access_token.is_none());
        assert!(snapshot.user.is_none());
        server.verify().await;
    }

    #[tokio::test]
    async fn logout_while_registered_skips_server() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.store().set_registered(registered_alice()).await;

        client.logout().await;

        assert!(!client.store().snapshot().is_registered);
        server.verify().await;
    }

    #[tokio::test]
    async fn sync_profile_installs_fresh_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {
                    "id": "u1",
                    "username": "alice",
                    "email": "alice@example.org",
                    "firstName": "Alice",
                    "lastName": "Liddell",
                    "bio": "down the rabbit hole"
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .store()
            .set_authenticated(Tokens::new("A1", "R1"), Some(alice()))
            .await;

        let user = client.sync_profile().await.unwrap();
        assert_eq!(user.email, "alice@example.org");

        let snapshot = client.store().snapshot();
        assert_eq!(snapshot.user, Some(user));
        assert_eq!(snapshot.access_token.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn sync_profile_requires_a_session() {
        let server = MockServer::start().await;
        let err = client_for(&server).sync_profile().await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn check_username_reports_availability() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/username-availability"))
            .and(body_json(json!({"username": "alice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "available": false,
                "message": "Username is taken"
            })))
            .mount(&server)
            .await;

        let availability = client_for(&server).check_username("alice").await.unwrap();

        assert!(!availability.available);
        assert_eq!(availability.message.as_deref(), Some("Username is taken"));
    }

    #[tokio::test]
    async fn undecodable_profile_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"profile": {}})))
            .mount(&server)
            .await;

        let err = client_for(&server).get_user("alice").await.unwrap_err();

        assert!(matches!(err, AuthError::Api(ApiError::Parse { .. })));
    }
}
