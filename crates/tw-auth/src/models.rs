use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::session::Tokens;

/// Profile of an authenticated user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Any further profile fields the server sends
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Account created by `/register` and waiting for OTP verification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<RegisteredUser> for User {
    fn from(registered: RegisteredUser) -> Self {
        Self {
            id: registered.id,
            username: registered.username,
            email: registered.email,
            first_name: registered.first_name,
            last_name: registered.last_name,
            extra: Map::new(),
        }
    }
}

/// Servers disagree on whether ids are strings or integers
pub(crate) fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

/// `/login` request
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// `/login` response
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub tokens: Tokens,
    pub user: User,
}

/// `/register` request
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// `/verify-otp` request
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub username: String,
    pub otp: String,
}

/// `/user/{username}` response
#[derive(Debug, Clone, Deserialize)]
pub struct UserEnvelope {
    pub user: User,
}

/// `/logout` request
#[derive(Debug, Clone, Serialize)]
pub struct LogoutRequest {
    pub user_id: String,
}

/// `/username-availability` request
#[derive(Debug, Clone, Serialize)]
pub struct UsernameAvailabilityRequest {
    pub username: String,
}

/// `/username-availability` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsernameAvailability {
    pub available: bool,
    #[serde(default)]
    pub message: Option<String>,
}
