//! Response shape detection.
//!
//! Some endpoints answer in more than one JSON convention. Each convention is
//! a named parser; parsers are tried in order and the first match wins.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{RegisteredUser, User, id_from_string_or_number};
use crate::session::Tokens;

/// A named way of reading `T` out of a JSON body
pub struct ShapeParser<T> {
    pub name: &'static str,
    pub parse: fn(&Value) -> Option<T>,
}

/// Apply `parsers` in order; the first `Some` wins
pub fn first_match<T>(value: &Value, parsers: &[ShapeParser<T>]) -> Option<T> {
    parsers.iter().find_map(|parser| {
        let parsed = (parser.parse)(value);
        if parsed.is_some() {
            debug!(shape = parser.name, "Matched response shape");
        }
        parsed
    })
}

/// Credentials issued by `/refresh-token` or `/verify-otp`
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub tokens: Tokens,
    /// Updated profile, when the server sends one
    pub user: Option<User>,
}

pub const TOKEN_SHAPES: &[ShapeParser<TokenGrant>] = &[
    ShapeParser {
        name: "camelCase",
        parse: tokens_camel_case,
    },
    ShapeParser {
        name: "snake_case",
        parse: tokens_snake_case,
    },
];

pub const USER_SHAPES: &[ShapeParser<User>] = &[
    ShapeParser {
        name: "camelCase",
        parse: user_camel_case,
    },
    ShapeParser {
        name: "snake_case",
        parse: user_snake_case,
    },
    ShapeParser {
        name: "minimal",
        parse: user_minimal,
    },
];

pub const REGISTERED_USER_SHAPES: &[ShapeParser<RegisteredUser>] = &[
    ShapeParser {
        name: "camelCase",
        parse: registered_camel_case,
    },
    ShapeParser {
        name: "snake_case",
        parse: registered_snake_case,
    },
    ShapeParser {
        name: "envelope",
        parse: registered_envelope,
    },
];

pub fn parse_token_grant(value: &Value) -> Option<TokenGrant> {
    first_match(value, TOKEN_SHAPES)
}

pub fn parse_user(value: &Value) -> Option<User> {
    first_match(value, USER_SHAPES)
}

pub fn parse_registered_user(value: &Value) -> Option<RegisteredUser> {
    first_match(value, REGISTERED_USER_SHAPES)
}

fn tokens_camel_case(value: &Value) -> Option<TokenGrant> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CamelTokens {
        access_token: String,
        refresh_token: String,
    }

    let raw = CamelTokens::deserialize(value).ok()?;
    Some(TokenGrant {
        tokens: Tokens::from_parts(Some(raw.access_token), Some(raw.refresh_token))?,
        user: None,
    })
}

fn tokens_snake_case(value: &Value) -> Option<TokenGrant> {
    #[derive(Deserialize)]
    struct SnakeTokens {
        access_token: String,
        refresh_token: String,
        #[serde(default)]
        user: Option<Value>,
    }

    let raw = SnakeTokens::deserialize(value).ok()?;
    Some(TokenGrant {
        tokens: Tokens::from_parts(Some(raw.access_token), Some(raw.refresh_token))?,
        // An unreadable profile is dropped rather than failing the refresh
        user: raw.user.as_ref().and_then(parse_user),
    })
}

fn user_camel_case(value: &Value) -> Option<User> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CamelUser {
        #[serde(deserialize_with = "id_from_string_or_number")]
        id: String,
        username: String,
        #[serde(default)]
        email: String,
        first_name: String,
        last_name: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    }

    let raw = CamelUser::deserialize(value).ok()?;
    Some(User {
        id: raw.id,
        username: raw.username,
        email: raw.email,
        first_name: raw.first_name,
        last_name: raw.last_name,
        extra: raw.extra,
    })
}

fn user_snake_case(value: &Value) -> Option<User> {
    #[derive(Deserialize)]
    struct SnakeUser {
        #[serde(deserialize_with = "id_from_string_or_number")]
        id: String,
        username: String,
        #[serde(default)]
        email: String,
        first_name: String,
        last_name: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    }

    let raw = SnakeUser::deserialize(value).ok()?;
    Some(User {
        id: raw.id,
        username: raw.username,
        email: raw.email,
        first_name: raw.first_name,
        last_name: raw.last_name,
        extra: raw.extra,
    })
}

/// Only `id` and `username`; names are left empty
fn user_minimal(value: &Value) -> Option<User> {
    User::deserialize(value).ok()
}

fn registered_camel_case(value: &Value) -> Option<RegisteredUser> {
    RegisteredUser::deserialize(value).ok()
}

fn registered_snake_case(value: &Value) -> Option<RegisteredUser> {
    #[derive(Deserialize)]
    struct SnakeRegistered {
        #[serde(deserialize_with = "id_from_string_or_number")]
        id: String,
        username: String,
        email: String,
        first_name: String,
        last_name: String,
    }

    let raw = SnakeRegistered::deserialize(value).ok()?;
    Some(RegisteredUser {
        id: raw.id,
        username: raw.username,
        email: raw.email,
        first_name: raw.first_name,
        last_name: raw.last_name,
    })
}

/// `{ "user": {...} }` or `{ "data": {...} }` around either flat shape
fn registered_envelope(value: &Value) -> Option<RegisteredUser> {
    let inner = value.get("user").or_else(|| value.get("data"))?;
    registered_camel_case(inner).or_else(|| registered_snake_case(inner))
}
