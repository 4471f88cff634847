//! Cache key definitions.
//!
//! Root keys form a closed set of dataset names. View keys pair a session with a
//! root key. Both map onto flat backing-store keys, with `:working` and `:lock`
//! marker keys derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::dataset::Dataset;
use super::error::DomainError;
use super::registry::Registry;
use super::session::SessionId;

pub const VIEW_PREFIX: &str = "view:";
const SEPARATOR: char = ':';

/// Logical dataset names with a shared, recomputable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKey {
    ProcessedFiles,
    PendingFiles,
    DiscoveredFiles,
    DeletedFiles,
    Checkins,
}

/// What kind of value a root key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// Tabular data produced by a source resolver.
    Dataset,
    /// The liveness registry, mutated only by checkin and sweep.
    Registry,
}

impl RootKey {
    pub const ALL: [RootKey; 5] = [
        RootKey::ProcessedFiles,
        RootKey::PendingFiles,
        RootKey::DiscoveredFiles,
        RootKey::DeletedFiles,
        RootKey::Checkins,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RootKey::ProcessedFiles => "processed_files",
            RootKey::PendingFiles => "pending_files",
            RootKey::DiscoveredFiles => "discovered_files",
            RootKey::DeletedFiles => "deleted_files",
            RootKey::Checkins => "checkins",
        }
    }

    pub fn class(self) -> KeyClass {
        match self {
            RootKey::Checkins => KeyClass::Registry,
            RootKey::ProcessedFiles
            | RootKey::PendingFiles
            | RootKey::DiscoveredFiles
            | RootKey::DeletedFiles => KeyClass::Dataset,
        }
    }

    /// Column set of the dataset held under this key. Empty for the registry.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            RootKey::ProcessedFiles => &[
                "id",
                "level",
                "owner",
                "description",
                "filename",
                "uploaded",
                "url",
            ],
            RootKey::PendingFiles => &["id", "filename", "uploaded", "uploaded_by"],
            RootKey::DiscoveredFiles => &["id", "filename", "last_modified"],
            RootKey::DeletedFiles => &[
                "id",
                "filename",
                "description",
                "uploaded",
                "deleted",
                "original_id",
                "ftype",
            ],
            RootKey::Checkins => &[],
        }
    }

    /// Serialized value returned for a key that has never been computed.
    pub fn default_value(self) -> Vec<u8> {
        match self.class() {
            KeyClass::Dataset => Dataset::empty(self).encode(),
            KeyClass::Registry => Registry::EMPTY_ENCODED.to_vec(),
        }
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RootKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RootKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| DomainError::unknown_key(s))
    }
}

/// A session-private snapshot slot of a root key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewKey {
    pub session: SessionId,
    pub root: RootKey,
}

impl ViewKey {
    pub fn new(session: SessionId, root: RootKey) -> Self {
        Self { session, root }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VIEW_PREFIX}{}{SEPARATOR}{}", self.session, self.root)
    }
}

/// Marker keys stored next to a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Working,
    Lock,
}

impl Marker {
    pub fn suffix(self) -> &'static str {
        match self {
            Marker::Working => "working",
            Marker::Lock => "lock",
        }
    }

    fn from_suffix(value: &str) -> Option<Self> {
        match value {
            "working" => Some(Marker::Working),
            "lock" => Some(Marker::Lock),
            _ => None,
        }
    }
}

/// Unified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Root(RootKey),
    View(ViewKey),
}

impl CacheKey {
    pub fn view(session: SessionId, root: RootKey) -> Self {
        CacheKey::View(ViewKey::new(session, root))
    }

    /// The root key whose value this key holds or derives from.
    pub fn root(&self) -> RootKey {
        match self {
            CacheKey::Root(root) => *root,
            CacheKey::View(view) => view.root,
        }
    }

    pub fn session(&self) -> Option<&SessionId> {
        match self {
            CacheKey::Root(_) => None,
            CacheKey::View(view) => Some(&view.session),
        }
    }

    pub fn marker_key(&self, marker: Marker) -> String {
        format!("{self}{SEPARATOR}{}", marker.suffix())
    }

    pub fn working_key(&self) -> String {
        self.marker_key(Marker::Working)
    }

    pub fn lock_key(&self) -> String {
        self.marker_key(Marker::Lock)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Root(root) => root.fmt(f),
            CacheKey::View(view) => view.fmt(f),
        }
    }
}

impl From<RootKey> for CacheKey {
    fn from(value: RootKey) -> Self {
        CacheKey::Root(value)
    }
}

impl From<ViewKey> for CacheKey {
    fn from(value: ViewKey) -> Self {
        CacheKey::View(value)
    }
}

/// A backing-store key decomposed into its cache key and optional marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKey {
    pub key: CacheKey,
    pub marker: Option<Marker>,
}

impl FromStr for StoreKey {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let unknown = || DomainError::unknown_key(raw);

        let (key, rest) = match raw.strip_prefix(VIEW_PREFIX) {
            Some(tail) => {
                let mut parts = tail.splitn(3, SEPARATOR);
                let session = parts.next().ok_or_else(unknown)?;
                let root = parts.next().ok_or_else(unknown)?;
                let session = SessionId::parse(session).map_err(|_| unknown())?;
                let root = RootKey::from_str(root).map_err(|_| unknown())?;
                (CacheKey::view(session, root), parts.next())
            }
            None => {
                let mut parts = raw.splitn(2, SEPARATOR);
                let root = parts.next().ok_or_else(unknown)?;
                let root = RootKey::from_str(root).map_err(|_| unknown())?;
                (CacheKey::Root(root), parts.next())
            }
        };

        let marker = match rest {
            None => None,
            Some(suffix) => Some(Marker::from_suffix(suffix).ok_or_else(unknown)?),
        };

        Ok(StoreKey { key, marker })
    }
}

impl FromStr for CacheKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = StoreKey::from_str(s)?;
        match parsed.marker {
            None => Ok(parsed.key),
            Some(_) => Err(DomainError::unknown_key(s)),
        }
    }
}
