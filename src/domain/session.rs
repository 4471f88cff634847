//! Browsing-session identifiers.
//!
//! A session id is embedded verbatim in store keys (`view:<id>:<root>`) and in
//! temporary artifact names (`.temp.<id>.<filename>`), so it is restricted to a
//! character set containing neither `:` nor `.`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque identifier of one browsing session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_session_id(value, "must not be empty"));
        }
        if value.len() > MAX_SESSION_ID_LEN {
            return Err(DomainError::invalid_session_id(
                value,
                "exceeds 128 characters",
            ));
        }
        if !value.chars().all(is_token_char) {
            return Err(DomainError::invalid_session_id(
                value,
                "only ASCII letters, digits, `_` and `-` are allowed",
            ));
        }
        Ok(Self(value))
    }

    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
