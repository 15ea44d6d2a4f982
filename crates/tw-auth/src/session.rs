use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{RegisteredUser, User};

/// Access/refresh credential pair
///
/// Both halves travel together; a session missing either one is not a
/// session.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl Tokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Build a pair only when both halves are present and non-empty
    pub fn from_parts(access_token: Option<String>, refresh_token: Option<String>) -> Option<Self> {
        match (access_token, refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Some(Self::new(access, refresh))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Persisted form of a pending registration (`registeredUserData`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRecord {
    pub data: RegisteredUser,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl RegistrationRecord {
    pub fn new(data: RegisteredUser, created_at: DateTime<Utc>) -> Self {
        Self {
            data,
            timestamp: created_at.timestamp_millis(),
        }
    }

    /// True once strictly more than `ttl` has elapsed since creation
    ///
    /// A timestamp too far in the past to subtract counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        match now.timestamp_millis().checked_sub(self.timestamp) {
            Some(age) => age > ttl.num_milliseconds(),
            None => true,
        }
    }
}

/// Complete in-memory authentication state
#[derive(Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_hydrated: bool,
    pub registered_user: Option<RegisteredUser>,
    pub is_registered: bool,
}

impl AuthSnapshot {
    /// Current credential pair, if both halves are held
    pub fn tokens(&self) -> Option<Tokens> {
        Tokens::from_parts(self.access_token.clone(), self.refresh_token.clone())
    }

    /// Check the invariants every reachable snapshot satisfies
    pub fn is_consistent(&self) -> bool {
        if self.is_authenticated {
            if self.access_token.is_none() || self.refresh_token.is_none() {
                return false;
            }
            if self.registered_user.is_some() || self.is_registered {
                return false;
            }
        }
        if self.is_registered && self.registered_user.is_none() {
            return false;
        }
        !(self.is_registered && self.is_authenticated)
    }
}

impl fmt::Debug for AuthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSnapshot")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user", &self.user.as_ref().map(|u| &u.username))
            .field("is_authenticated", &self.is_authenticated)
            .field("is_hydrated", &self.is_hydrated)
            .field(
                "registered_user",
                &self.registered_user.as_ref().map(|u| &u.username),
            )
            .field("is_registered", &self.is_registered)
            .finish()
    }
}
