//! Liveness registry value: the roster of session checkins.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::session::SessionId;

/// Last time a session reported itself alive, in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkin {
    pub session: SessionId,
    pub timestamp: i64,
}

impl Checkin {
    /// A record is live while `now - timestamp < window`.
    pub fn is_live(&self, now: i64, window: Duration) -> bool {
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(self.timestamp) < window
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: Vec<Checkin>,
}

impl Registry {
    /// Encoding of a registry with no records.
    pub const EMPTY_ENCODED: &[u8] = b"[]";

    pub fn decode(bytes: &[u8]) -> Result<Self, DomainError> {
        serde_json::from_slice(bytes)
            .map_err(|err| DomainError::invalid_value("checkins", err.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self)
            .map_err(|err| DomainError::invalid_value("checkins", err.to_string()))
    }

    pub fn entries(&self) -> &[Checkin] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop stale records, then record `session` as seen at `timestamp`.
    pub fn upsert(&mut self, session: SessionId, timestamp: i64, window: Duration) {
        self.entries
            .retain(|entry| entry.is_live(timestamp, window) && entry.session != session);
        self.entries.push(Checkin { session, timestamp });
    }

    pub fn valid_sessions(&self, now: i64, window: Duration) -> BTreeSet<SessionId> {
        self.entries
            .iter()
            .filter(|entry| entry.is_live(now, window))
            .map(|entry| entry.session.clone())
            .collect()
    }
}
