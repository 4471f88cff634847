use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown cache key `{key}`")]
    UnknownKey { key: String },
    #[error("invalid session id `{value}`: {reason}")]
    InvalidSessionId { value: String, reason: &'static str },
    #[error("stored value for `{key}` could not be decoded: {message}")]
    InvalidValue { key: String, message: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    pub fn invalid_session_id(value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidSessionId {
            value: value.into(),
            reason,
        }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
