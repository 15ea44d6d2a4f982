use std::time::Duration;
use url::Url;

/// Auth API endpoint paths, relative to [`AuthConfig::base_url`]
pub mod endpoints {
    pub const LOGIN: &str = "/login";
    pub const REGISTER: &str = "/register";
    pub const VERIFY_OTP: &str = "/verify-otp";
    pub const REFRESH_TOKEN: &str = "/refresh-token";
    pub const USER: &str = "/user";
    pub const LOGOUT: &str = "/logout";
    pub const USERNAME_AVAILABILITY: &str = "/username-availability";

    /// Path of a user's profile
    pub fn user_profile(username: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(username.as_bytes()).collect();
        format!("{USER}/{encoded}")
    }
}

/// Header carrying the refresh token on the refresh call (`Refresh-Token`)
///
/// Lowercase so it can feed `HeaderName::from_static`.
pub const REFRESH_TOKEN_HEADER: &str = "refresh-token";

/// How long a registered-but-unverified account survives on disk
pub const REGISTRATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default user agent
pub const USER_AGENT: &str = concat!("tokenward/", env!("CARGO_PKG_VERSION"));

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Configuration for [`AuthClient`](crate::AuthClient)
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Root of the auth API; endpoint paths are joined onto it
    pub base_url: Url,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,

    /// Lifetime of a pending registration record
    pub registration_ttl: Duration,
}

impl AuthConfig {
    /// Create config with default timeouts and TTL
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some(USER_AGENT.to_string()),
            registration_ttl: REGISTRATION_TTL,
        }
    }

    /// Parse `base_url` and create a default config for it
    pub fn parse(base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(base_url)?))
    }

    pub fn with_timeouts(mut self, http_timeouts: HttpTimeouts) -> Self {
        self.http_timeouts = http_timeouts;
        self
    }

    pub fn with_registration_ttl(mut self, ttl: Duration) -> Self {
        self.registration_ttl = ttl;
        self
    }
}
