//! Keyed state: one [`PerKeyState`] per feed behind a [`StateStore`].

use super::expiring::{Expiring, ExpiringMap};
use crate::core::Granularity;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

/// Expiry durations applied to each state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Last value and last event time
    pub value: Duration,
    pub half_hour: Duration,
    pub hour: Duration,
    pub day: Duration,
    pub month: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            value: Duration::hours(36),
            half_hour: Duration::hours(36),
            hour: Duration::hours(36),
            day: Duration::hours(36),
            month: Duration::days(66),
        }
    }
}

impl TtlPolicy {
    pub fn for_granularity(&self, granularity: Granularity) -> Duration {
        match granularity {
            Granularity::HalfHour => self.half_hour,
            Granularity::Hour => self.hour,
            Granularity::Day => self.day,
            Granularity::Month => self.month,
        }
    }
}

/// Bucket sums, one independent map per granularity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSums {
    pub half_hour: ExpiringMap<Decimal>,
    pub hour: ExpiringMap<Decimal>,
    pub day: ExpiringMap<Decimal>,
    pub month: ExpiringMap<Decimal>,
}

impl WindowSums {
    pub fn get(&self, granularity: Granularity) -> &ExpiringMap<Decimal> {
        match granularity {
            Granularity::HalfHour => &self.half_hour,
            Granularity::Hour => &self.hour,
            Granularity::Day => &self.day,
            Granularity::Month => &self.month,
        }
    }

    pub fn get_mut(&mut self, granularity: Granularity) -> &mut ExpiringMap<Decimal> {
        match granularity {
            Granularity::HalfHour => &mut self.half_hour,
            Granularity::Hour => &mut self.hour,
            Granularity::Day => &mut self.day,
            Granularity::Month => &mut self.month,
        }
    }
}

/// Everything remembered about one feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerKeyState {
    pub last_value: Option<Expiring<Decimal>>,
    pub last_event_time: Option<Expiring<DateTime<Utc>>>,
    pub windows: WindowSums,
}

impl PerKeyState {
    /// Most recent raw value, if it has not expired.
    pub fn last_value(&self, now: DateTime<Utc>) -> Option<Decimal> {
        self.last_value.as_ref().and_then(|v| v.get(now)).copied()
    }

    /// Most recent accepted event time, if it has not expired.
    pub fn last_event_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.last_event_time
            .as_ref()
            .and_then(|t| t.get(now))
            .copied()
    }

    /// Live sum of one bucket.
    pub fn bucket_sum(
        &self,
        granularity: Granularity,
        bucket: &str,
        now: DateTime<Utc>,
    ) -> Option<Decimal> {
        self.windows.get(granularity).get(bucket, now).copied()
    }

    /// Drop every expired entry. Returns the number of buckets removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        if self.last_value.as_ref().is_some_and(|v| v.is_expired(now)) {
            self.last_value = None;
        }
        if self
            .last_event_time
            .as_ref()
            .is_some_and(|t| t.is_expired(now))
        {
            self.last_event_time = None;
        }
        Granularity::ALL
            .iter()
            .map(|g| self.windows.get_mut(*g).purge_expired(now))
            .sum()
    }

    /// True when nothing in this state is visible any more.
    pub fn is_vacant(&self, now: DateTime<Utc>) -> bool {
        self.last_value(now).is_none()
            && self.last_event_time(now).is_none()
            && Granularity::ALL
                .iter()
                .all(|g| self.windows.get(*g).live_len(now) == 0)
    }
}

/// Errors raised by a state backend.
#[derive(Debug, Clone)]
pub enum StateError {
    /// The state for a key cannot be reached (poisoned lock, backend down).
    Unavailable(String),
    Io(String),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Unavailable(e) => write!(f, "State unavailable: {e}"),
            StateError::Io(e) => write!(f, "State IO error: {e}"),
        }
    }
}

impl std::error::Error for StateError {}

/// Outcome of an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub buckets_removed: usize,
    pub feeds_removed: usize,
}

/// Backing storage for keyed state.
///
/// Implementations must run `with_state` closures for the same key one at a
/// time; closures for different keys may run concurrently. State for an
/// unknown key is created on first access.
pub trait StateStore: Send + Sync {
    /// Run `f` with exclusive access to the state of `key`.
    fn with_state<R, F>(&self, key: &str, f: F) -> Result<R, StateError>
    where
        F: FnOnce(&mut PerKeyState) -> R;

    /// A copy of the state of `key`, if any exists.
    fn get(&self, key: &str) -> Result<Option<PerKeyState>, StateError>;

    /// Remove expired entries and feeds with nothing left.
    fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StateError>;

    /// Number of feeds currently holding state.
    fn feed_count(&self) -> usize;
}

type Slot = Arc<Mutex<PerKeyState>>;

/// In-process state store with one lock per feed.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    feeds: RwLock<HashMap<String, Slot>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot, discarding anything expired at `now`.
    pub fn from_snapshot(snapshot: StateSnapshot, now: DateTime<Utc>) -> Self {
        let feeds = snapshot
            .feeds
            .into_iter()
            .filter_map(|(key, mut state)| {
                state.purge_expired(now);
                if state.is_vacant(now) {
                    None
                } else {
                    Some((key, Arc::new(Mutex::new(state))))
                }
            })
            .collect();

        Self {
            feeds: RwLock::new(feeds),
        }
    }

    /// Copy every feed's state into a serializable snapshot.
    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> Result<StateSnapshot, StateError> {
        let feeds = self
            .feeds
            .read()
            .map_err(|_| StateError::Unavailable("feed index lock poisoned".to_string()))?;

        let mut out = BTreeMap::new();
        for (key, slot) in feeds.iter() {
            let state = slot
                .lock()
                .map_err(|_| StateError::Unavailable(format!("state for feed {key} is poisoned")))?;
            out.insert(key.clone(), state.clone());
        }

        Ok(StateSnapshot {
            taken_at,
            feeds: out,
        })
    }

    fn slot(&self, key: &str) -> Result<Slot, StateError> {
        {
            let feeds = self
                .feeds
                .read()
                .map_err(|_| StateError::Unavailable("feed index lock poisoned".to_string()))?;
            if let Some(slot) = feeds.get(key) {
                return Ok(Arc::clone(slot));
            }
        }

        let mut feeds = self
            .feeds
            .write()
            .map_err(|_| StateError::Unavailable("feed index lock poisoned".to_string()))?;
        Ok(Arc::clone(feeds.entry(key.to_string()).or_default()))
    }
}

impl StateStore for InMemoryStateStore {
    fn with_state<R, F>(&self, key: &str, f: F) -> Result<R, StateError>
    where
        F: FnOnce(&mut PerKeyState) -> R,
    {
        let slot = self.slot(key)?;
        let mut state = slot
            .lock()
            .map_err(|_| StateError::Unavailable(format!("state for feed {key} is poisoned")))?;
        Ok(f(&mut state))
    }

    fn get(&self, key: &str) -> Result<Option<PerKeyState>, StateError> {
        let feeds = self
            .feeds
            .read()
            .map_err(|_| StateError::Unavailable("feed index lock poisoned".to_string()))?;
        match feeds.get(key) {
            Some(slot) => {
                let state = slot.lock().map_err(|_| {
                    StateError::Unavailable(format!("state for feed {key} is poisoned"))
                })?;
                Ok(Some(state.clone()))
            }
            None => Ok(None),
        }
    }

    fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StateError> {
        let mut feeds = self
            .feeds
            .write()
            .map_err(|_| StateError::Unavailable("feed index lock poisoned".to_string()))?;

        let mut report = SweepReport::default();
        let mut vacant = Vec::new();
        for (key, slot) in feeds.iter() {
            // A poisoned feed stays poisoned; it is reported on its next use.
            let Ok(mut state) = slot.lock() else {
                continue;
            };
            report.buckets_removed += state.purge_expired(now);
            // Someone outside the index holds this slot and may be about to write.
            if state.is_vacant(now) && Arc::strong_count(slot) == 1 {
                vacant.push(key.clone());
            }
        }

        for key in vacant {
            feeds.remove(&key);
            report.feeds_removed += 1;
        }

        Ok(report)
    }

    fn feed_count(&self) -> usize {
        self.feeds.read().map(|feeds| feeds.len()).unwrap_or(0)
    }
}

/// Serializable copy of every feed's state, deadlines included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub feeds: BTreeMap<String, PerKeyState>,
}

impl StateSnapshot {
    /// Write the snapshot as JSON.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Io(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| StateError::Io(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| StateError::Io(e.to_string()))
    }

    /// Read a snapshot written by [`StateSnapshot::save`].
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let content = std::fs::read_to_string(path).map_err(|e| StateError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| StateError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn test_state_created_lazily() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.feed_count(), 0);
        assert!(store.get("F1").unwrap().is_none());

        store.with_state("F1", |_| ()).unwrap();
        assert_eq!(store.feed_count(), 1);
        assert_eq!(store.get("F1").unwrap(), Some(PerKeyState::default()));
    }

    #[test]
    fn test_feeds_are_isolated() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        store
            .with_state("F1", |s| {
                s.last_value = Some(Expiring::new(dec(10), now, Duration::hours(1)))
            })
            .unwrap();

        let other = store.get("F2").unwrap();
        assert!(other.is_none());
        let f1 = store.get("F1").unwrap().unwrap();
        assert_eq!(f1.last_value(now), Some(dec(10)));
    }

    #[test]
    fn test_concurrent_updates_to_one_feed_are_serialized() {
        let store = Arc::new(InMemoryStateStore::new());
        let now = Utc::now();
        let ttl = Duration::hours(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .with_state("F1", |s| {
                                let map = s.windows.get_mut(Granularity::Hour);
                                let current = map.get("b", now).copied().unwrap_or_default();
                                map.insert("b".to_string(), current + Decimal::ONE, now, ttl);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = store.get("F1").unwrap().unwrap();
        assert_eq!(state.bucket_sum(Granularity::Hour, "b", now), Some(dec(800)));
    }

    #[test]
    fn test_sweep_drops_expired_buckets_and_vacant_feeds() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        store
            .with_state("short", |s| {
                s.windows
                    .half_hour
                    .insert("b".to_string(), dec(1), now, Duration::hours(1));
            })
            .unwrap();
        store
            .with_state("long", |s| {
                s.windows
                    .half_hour
                    .insert("b".to_string(), dec(1), now, Duration::hours(1));
                s.windows
                    .month
                    .insert("m".to_string(), dec(1), now, Duration::days(66));
            })
            .unwrap();

        let report = store.sweep(now + Duration::hours(2)).unwrap();
        assert_eq!(report.buckets_removed, 2);
        assert_eq!(report.feeds_removed, 1);
        assert_eq!(store.feed_count(), 1);
        assert!(store.get("short").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_roundtrip_discards_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc::now();

        let store = InMemoryStateStore::new();
        store
            .with_state("F1", |s| {
                s.last_value = Some(Expiring::new(dec(3), now, Duration::hours(36)));
                s.windows
                    .half_hour
                    .insert("gone".to_string(), dec(1), now, Duration::minutes(5));
                s.windows
                    .month
                    .insert("kept".to_string(), dec(2), now, Duration::days(66));
            })
            .unwrap();
        store.snapshot(now).unwrap().save(&path).unwrap();

        let later = now + Duration::hours(1);
        let restored = InMemoryStateStore::from_snapshot(StateSnapshot::load(&path).unwrap(), later);
        let state = restored.get("F1").unwrap().unwrap();
        assert_eq!(state.last_value(later), Some(dec(3)));
        assert!(state.windows.half_hour.is_empty());
        assert_eq!(state.bucket_sum(Granularity::Month, "kept", later), Some(dec(2)));
    }
}
