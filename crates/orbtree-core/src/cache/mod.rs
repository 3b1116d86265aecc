//! Time-bounded caches shared by the reconciliation core.
//!
//! - [`ci_status::CiStatusCache`]: per-PR CI status with tiered TTLs and a
//!   budgeted refresh cycle
//! - [`suggestion::SuggestionCache`]: advisory results keyed by snapshot
//!   digest, with single-flight computation
//!
//! Both read time through an injected [`Clock`] so tests can move time by hand.

pub mod ci_status;
pub mod suggestion;

use chrono::{DateTime, Duration, Utc};

pub use ci_status::{
    CiFetchError, CiFetcher, CiStatusCache, CiTtlPolicy, FetchOutcome, RefreshMode, RefreshReport,
};
pub use suggestion::{SuggestionCache, SuggestionOrigin, SuggestionServed};

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// An immutable cached value with its creation time and lifetime.
///
/// Refreshing a key always replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            created_at,
            ttl,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `now - created_at < ttl`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at < self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_expires_exactly_at_ttl() {
        let t0 = Utc.timestamp_opt(1_000, 0).unwrap();
        let entry = CacheEntry::new("v", t0, Duration::seconds(300));
        assert!(entry.is_valid(t0));
        assert!(entry.is_valid(t0 + Duration::seconds(299)));
        assert!(!entry.is_valid(t0 + Duration::seconds(300)));
        assert!(!entry.is_valid(t0 + Duration::seconds(301)));
    }
}
