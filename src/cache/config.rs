//! Cache coordination configuration.
//!
//! Controls lock policies, working-flag expiry and the liveness window via the
//! `[cache]` section of `tidecache.toml`.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::keys::{CacheKey, RootKey};

// Default values for cache configuration
const DEFAULT_LOCK_RETRY_MS: u64 = 50;
const DEFAULT_LOCK_TTL_SECS: u64 = 60;
const DEFAULT_CHECKINS_LOCK_RETRY_MS: u64 = 50;
const DEFAULT_CHECKINS_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_WORKING_TTL_SECS: u64 = 600;
const DEFAULT_STALENESS_WINDOW_SECS: u64 = 60;

/// Polling interval and safety TTL for one class of lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub retry_interval: Duration,
    pub ttl: Duration,
}

impl LockPolicy {
    pub const fn new(retry_interval: Duration, ttl: Duration) -> Self {
        Self { retry_interval, ttl }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_LOCK_RETRY_MS),
            Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        )
    }
}

/// Lock policy class a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockClass {
    Standard,
    /// High-churn keys written on every heartbeat.
    Checkins,
}

impl LockClass {
    pub fn of(key: &CacheKey) -> Self {
        match key {
            CacheKey::Root(RootKey::Checkins) => LockClass::Checkins,
            CacheKey::Root(_) | CacheKey::View(_) => LockClass::Standard,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub lock_retry_ms: u64,
    pub lock_ttl_secs: u64,
    pub checkins_lock_retry_ms: u64,
    pub checkins_lock_ttl_secs: u64,
    /// Expiry of `<key>:working` markers, bounding how long a crashed worker can
    /// keep a key reporting "not ready".
    pub working_ttl_secs: u64,
    /// A checkin is valid while `now - timestamp` is below this window.
    pub staleness_window_secs: u64,
    /// Sweep period; `None` sweeps once per staleness window.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_retry_ms: DEFAULT_LOCK_RETRY_MS,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            checkins_lock_retry_ms: DEFAULT_CHECKINS_LOCK_RETRY_MS,
            checkins_lock_ttl_secs: DEFAULT_CHECKINS_LOCK_TTL_SECS,
            working_ttl_secs: DEFAULT_WORKING_TTL_SECS,
            staleness_window_secs: DEFAULT_STALENESS_WINDOW_SECS,
            sweep_interval_secs: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            lock_retry_ms: settings.lock_retry_ms,
            lock_ttl_secs: settings.lock_ttl_secs,
            checkins_lock_retry_ms: settings.checkins_lock_retry_ms,
            checkins_lock_ttl_secs: settings.checkins_lock_ttl_secs,
            working_ttl_secs: settings.working_ttl_secs,
            staleness_window_secs: settings.staleness_window_secs,
            sweep_interval_secs: settings.sweep_interval_secs,
        }
    }
}

impl CacheConfig {
    pub fn lock_policy(&self, class: LockClass) -> LockPolicy {
        match class {
            LockClass::Standard => LockPolicy::new(
                Duration::from_millis(self.lock_retry_ms.max(1)),
                Duration::from_secs(self.lock_ttl_secs.max(1)),
            ),
            LockClass::Checkins => LockPolicy::new(
                Duration::from_millis(self.checkins_lock_retry_ms.max(1)),
                Duration::from_secs(self.checkins_lock_ttl_secs.max(1)),
            ),
        }
    }

    pub fn working_ttl(&self) -> Duration {
        Duration::from_secs(self.working_ttl_secs.max(1))
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .sweep_interval_secs
            .unwrap_or(self.staleness_window_secs)
            .max(1);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionId;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(
            config.lock_policy(LockClass::Standard),
            LockPolicy::new(Duration::from_millis(50), Duration::from_secs(60))
        );
        assert_eq!(
            config.lock_policy(LockClass::Checkins),
            LockPolicy::new(Duration::from_millis(50), Duration::from_secs(10))
        );
        assert_eq!(config.working_ttl(), Duration::from_secs(600));
        assert_eq!(config.staleness_window(), Duration::from_secs(60));
    }

    #[test]
    fn sweep_interval_defaults_to_window() {
        let config = CacheConfig {
            staleness_window_secs: 90,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(90));

        let config = CacheConfig {
            sweep_interval_secs: Some(15),
            ..config
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(15));
    }

    #[test]
    fn zero_durations_clamp_to_minimum() {
        let config = CacheConfig {
            lock_retry_ms: 0,
            lock_ttl_secs: 0,
            ..Default::default()
        };
        let policy = config.lock_policy(LockClass::Standard);
        assert_eq!(policy.retry_interval, Duration::from_millis(1));
        assert_eq!(policy.ttl, Duration::from_secs(1));
    }

    #[test]
    fn checkins_is_the_only_high_churn_key() {
        assert_eq!(
            LockClass::of(&CacheKey::Root(RootKey::Checkins)),
            LockClass::Checkins
        );
        assert_eq!(
            LockClass::of(&CacheKey::Root(RootKey::ProcessedFiles)),
            LockClass::Standard
        );
        let session = SessionId::parse("a").expect("session");
        assert_eq!(
            LockClass::of(&CacheKey::view(session, RootKey::Checkins)),
            LockClass::Standard
        );
    }
}
