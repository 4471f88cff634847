//! Temporary upload artifact naming.
//!
//! A partially uploaded file lives in the pending directory as
//! `.temp.<session_id>.<filename>` until it is completed and renamed. Session ids
//! never contain `.`, so the first two separators after the prefix are unambiguous.

use super::session::SessionId;

pub const TEMP_PREFIX: &str = ".temp.";

/// A temporary artifact owned by one browsing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempArtifact {
    pub session: SessionId,
    pub filename: String,
}

impl TempArtifact {
    pub fn new(session: SessionId, filename: impl Into<String>) -> Self {
        Self {
            session,
            filename: filename.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{TEMP_PREFIX}{}.{}", self.session, self.filename)
    }

    /// Parse an on-disk name. Names without the temporary prefix belong to
    /// completed or promoted artifacts and yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(TEMP_PREFIX)?;
        let (session, filename) = rest.split_once('.')?;
        if filename.is_empty() {
            return None;
        }
        let session = SessionId::parse(session).ok()?;
        Some(Self::new(session, filename))
    }
}

pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}
