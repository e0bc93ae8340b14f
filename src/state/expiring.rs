//! Values and maps whose entries carry their own expiry deadline.
//!
//! The deadline is set when an entry is created and moved forward every time
//! it is written. Reads never refresh it. Once the deadline has passed the
//! entry is invisible to lookups, whether or not it has been purged yet.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Compute `now + ttl`, saturating at the largest representable instant.
fn deadline(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A single value with an expiry deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    /// Wrap `value`, expiring `ttl` after `now`.
    pub fn new(value: T, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(now, ttl),
        }
    }

    /// The value, unless it has expired at `now`.
    pub fn get(&self, now: DateTime<Utc>) -> Option<&T> {
        if self.is_expired(now) {
            None
        } else {
            Some(&self.value)
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// A string-keyed map where every entry expires independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpiringMap<V> {
    entries: HashMap<String, Expiring<V>>,
}

impl<V> Default for ExpiringMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> ExpiringMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<&V> {
        self.entries.get(key).and_then(|entry| entry.get(now))
    }

    /// Insert or overwrite an entry, restarting its deadline.
    pub fn insert(&mut self, key: String, value: V, now: DateTime<Utc>, ttl: Duration) {
        self.entries.insert(key, Expiring::new(value, now, ttl));
    }

    /// Physically remove expired entries, returning how many were dropped.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries still visible at `now`.
    pub fn live_len(&self, now: DateTime<Utc>) -> usize {
        self.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Iterate over live entries.
    pub fn iter_live(&self, now: DateTime<Utc>) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .iter()
            .filter_map(move |(key, entry)| entry.get(now).map(|v| (key.as_str(), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiring_value_visibility() {
        let now = Utc::now();
        let cell = Expiring::new(7, now, Duration::hours(1));

        assert_eq!(cell.get(now), Some(&7));
        assert_eq!(cell.get(now + Duration::minutes(59)), Some(&7));
        assert_eq!(cell.get(now + Duration::hours(1)), None);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let now = Utc::now();
        let cell = Expiring::new((), now, Duration::MAX);
        assert_eq!(cell.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!cell.is_expired(now));
    }

    #[test]
    fn test_write_refreshes_deadline_but_read_does_not() {
        let now = Utc::now();
        let ttl = Duration::hours(1);
        let mut map = ExpiringMap::new();

        map.insert("a".to_string(), 1, now, ttl);
        // Reading near the deadline keeps nothing alive.
        assert_eq!(map.get("a", now + Duration::minutes(50)), Some(&1));
        assert_eq!(map.get("a", now + Duration::minutes(61)), None);

        map.insert("b".to_string(), 1, now, ttl);
        map.insert("b".to_string(), 2, now + Duration::minutes(50), ttl);
        assert_eq!(map.get("b", now + Duration::minutes(100)), Some(&2));
    }

    #[test]
    fn test_purge_removes_only_expired() {
        let now = Utc::now();
        let mut map = ExpiringMap::new();
        map.insert("old".to_string(), 1, now, Duration::minutes(10));
        map.insert("new".to_string(), 2, now, Duration::minutes(30));

        let later = now + Duration::minutes(20);
        assert_eq!(map.len(), 2);
        assert_eq!(map.live_len(later), 1);

        assert_eq!(map.purge_expired(later), 1);
        assert_eq!(map.len(), 1);
        let live: Vec<_> = map.iter_live(later).collect();
        assert_eq!(live, vec![("new", &2)]);
    }
}
