//! Processing counters.
//!
//! Counters are cumulative across runs when a persistence path is set: they
//! are loaded on creation and written back by [`ProcessingStats::save`].

use crate::core::{Outcome, OutputChannel, ProcessError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current run.
#[derive(Debug)]
pub struct ProcessingStats {
    /// Readings accepted and emitted
    accepted: AtomicU64,
    /// Readings dropped by the ordering guard
    dropped_out_of_order: AtomicU64,
    /// Readings rejected as malformed (undecodable, bad time, bad value)
    malformed: AtomicU64,
    /// Readings whose state could not be reached
    state_failures: AtomicU64,
    /// Accepted readings whose records could not be written
    sink_failures: AtomicU64,
    /// Window records emitted, per channel
    half_time: AtomicU64,
    hour_time: AtomicU64,
    day_time: AtomicU64,
    month_time: AtomicU64,
    /// Buckets removed by expiry sweeps
    buckets_expired: AtomicU64,
    /// Run start time
    run_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            dropped_out_of_order: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            state_failures: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            half_time: AtomicU64::new(0),
            hour_time: AtomicU64::new(0),
            day_time: AtomicU64::new(0),
            month_time: AtomicU64::new(0),
            buckets_expired: AtomicU64::new(0),
            run_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that continue from, and save back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("could not load previous statistics: {e}");
        }

        stats
    }

    /// Count the result of one `process` call.
    pub fn record_outcome(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Emitted(emission) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                for output in &emission.windows {
                    if let Some(counter) = self.channel_counter(output.channel) {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Outcome::Dropped(_) => {
                self.dropped_out_of_order.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count a failed `process` call.
    pub fn record_error(&self, error: &ProcessError) {
        match error {
            ProcessError::MalformedInput(_) => self.record_malformed(),
            ProcessError::StateUnavailable(_) => {
                self.state_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count an accepted reading whose emission the sink refused.
    ///
    /// Its records are not counted as emitted.
    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a reading rejected before it reached the processor.
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, buckets: u64) {
        self.buckets_expired.fetch_add(buckets, Ordering::Relaxed);
    }

    fn channel_counter(&self, channel: OutputChannel) -> Option<&AtomicU64> {
        match channel {
            OutputChannel::Raw => None,
            OutputChannel::HalfTime => Some(&self.half_time),
            OutputChannel::HourTime => Some(&self.hour_time),
            OutputChannel::DayTime => Some(&self.day_time),
            OutputChannel::MonthTime => Some(&self.month_time),
        }
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_out_of_order: self.dropped_out_of_order.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            state_failures: self.state_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            half_time: self.half_time.load(Ordering::Relaxed),
            hour_time: self.hour_time.load(Ordering::Relaxed),
            day_time: self.day_time.load(Ordering::Relaxed),
            month_time: self.month_time.load(Ordering::Relaxed),
            buckets_expired: self.buckets_expired.load(Ordering::Relaxed),
            run_start: self.run_start,
            run_duration_secs: (Utc::now() - self.run_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                accepted: stats.accepted,
                dropped_out_of_order: stats.dropped_out_of_order,
                malformed: stats.malformed,
                state_failures: stats.state_failures,
                sink_failures: stats.sink_failures,
                half_time: stats.half_time,
                hour_time: stats.hour_time,
                day_time: stats.day_time,
                month_time: stats.month_time,
                buckets_expired: stats.buckets_expired,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let persisted = PersistedStats::read(path)?;

                self.accepted.store(persisted.accepted, Ordering::Relaxed);
                self.dropped_out_of_order
                    .store(persisted.dropped_out_of_order, Ordering::Relaxed);
                self.malformed.store(persisted.malformed, Ordering::Relaxed);
                self.state_failures
                    .store(persisted.state_failures, Ordering::Relaxed);
                self.sink_failures
                    .store(persisted.sink_failures, Ordering::Relaxed);
                self.half_time.store(persisted.half_time, Ordering::Relaxed);
                self.hour_time.store(persisted.hour_time, Ordering::Relaxed);
                self.day_time.store(persisted.day_time, Ordering::Relaxed);
                self.month_time.store(persisted.month_time, Ordering::Relaxed);
                self.buckets_expired
                    .store(persisted.buckets_expired, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.accepted,
            &self.dropped_out_of_order,
            &self.malformed,
            &self.state_failures,
            &self.sink_failures,
            &self.half_time,
            &self.hour_time,
            &self.day_time,
            &self.month_time,
            &self.buckets_expired,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of processing statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub dropped_out_of_order: u64,
    pub malformed: u64,
    pub state_failures: u64,
    pub sink_failures: u64,
    pub half_time: u64,
    pub hour_time: u64,
    pub day_time: u64,
    pub month_time: u64,
    pub buckets_expired: u64,
    pub run_start: DateTime<Utc>,
    pub run_duration_secs: u64,
}

impl StatsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Processing Statistics:\n\
             - Readings accepted: {}\n\
             - Dropped out of order: {}\n\
             - Malformed readings: {}\n\
             - State failures: {}\n\
             - Sink failures: {}\n\
             \n\
             Window records:\n\
             - halfTime: {}\n\
             - hourTime: {}\n\
             - dayTime: {}\n\
             - monthTime: {}\n\
             \n\
             - Buckets expired: {}\n\
             - Run duration: {} seconds",
            self.accepted,
            self.dropped_out_of_order,
            self.malformed,
            self.state_failures,
            self.sink_failures,
            self.half_time,
            self.hour_time,
            self.day_time,
            self.month_time,
            self.buckets_expired,
            self.run_duration_secs
        )
    }
}

/// Stats format for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStats {
    pub accepted: u64,
    pub dropped_out_of_order: u64,
    pub malformed: u64,
    pub state_failures: u64,
    /// Missing in stats written before this counter existed
    #[serde(default)]
    pub sink_failures: u64,
    pub half_time: u64,
    pub hour_time: u64,
    pub day_time: u64,
    pub month_time: u64,
    pub buckets_expired: u64,
    pub last_updated: DateTime<Utc>,
}

impl PersistedStats {
    /// Read stats saved by a previous run.
    pub fn read(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

/// Thread-safe shared statistics.
pub type SharedStats = Arc<ProcessingStats>;

/// Create new shared statistics.
pub fn create_shared_stats() -> SharedStats {
    Arc::new(ProcessingStats::new())
}

/// Create new shared statistics with persistence.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(ProcessingStats::with_persistence(path))
}
