//! Running usage totals per window bucket.
//!
//! One [`WindowAccumulator`] exists per granularity. Each owns nothing but
//! its granularity and TTL; the bucket sums live in the feed's state so that
//! the store decides where they are kept.

use super::error::ProcessError;
use super::reading::WindowBounds;
use super::records::OutputChannel;
use crate::state::ExpiringMap;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Window sizes usage is aggregated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    HalfHour,
    Hour,
    Day,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::HalfHour,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
    ];

    /// Step label written into aggregated records.
    pub fn label(&self) -> &'static str {
        match self {
            Granularity::HalfHour => "30m",
            Granularity::Hour => "1h",
            Granularity::Day => "1d",
            Granularity::Month => "1mo",
        }
    }

    /// Output channel this granularity's records are routed to.
    pub fn channel(&self) -> OutputChannel {
        match self {
            Granularity::HalfHour => OutputChannel::HalfTime,
            Granularity::Hour => OutputChannel::HourTime,
            Granularity::Day => OutputChannel::DayTime,
            Granularity::Month => OutputChannel::MonthTime,
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.label() == s)
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A bucket update computed but not yet written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub granularity: Granularity,
    pub bucket: String,
    pub bounds: WindowBounds,
    /// Bucket sum after the delta is applied
    pub total: Decimal,
}

/// Accumulates deltas into one granularity's buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAccumulator {
    granularity: Granularity,
    ttl: Duration,
}

impl WindowAccumulator {
    pub fn new(granularity: Granularity, ttl: Duration) -> Self {
        Self { granularity, ttl }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Compute the new sum of the bucket for `bounds` without touching `sums`.
    ///
    /// A bucket that is absent (never seen, or expired) starts from zero, so
    /// its first sum is exactly `delta`.
    pub fn prepare(
        &self,
        sums: &ExpiringMap<Decimal>,
        bounds: &WindowBounds,
        delta: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PendingWrite, ProcessError> {
        let bucket = bounds.bucket_key();
        let current = sums.get(&bucket, now).copied().unwrap_or(Decimal::ZERO);
        let total = current.checked_add(delta).ok_or_else(|| {
            ProcessError::malformed(format!(
                "{} bucket {bucket} overflows adding {delta}",
                self.granularity
            ))
        })?;

        Ok(PendingWrite {
            granularity: self.granularity,
            bucket,
            bounds: *bounds,
            total,
        })
    }

    /// Store a prepared sum, restarting the bucket's TTL.
    ///
    /// Expired buckets of this granularity are purged on the way.
    pub fn commit(
        &self,
        sums: &mut ExpiringMap<Decimal>,
        pending: &PendingWrite,
        now: DateTime<Utc>,
    ) -> usize {
        let purged = sums.purge_expired(now);
        sums.insert(pending.bucket.clone(), pending.total, now, self.ttl);
        purged
    }

    /// Prepare and commit in one step.
    pub fn apply(
        &self,
        sums: &mut ExpiringMap<Decimal>,
        bounds: &WindowBounds,
        delta: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, ProcessError> {
        let pending = self.prepare(sums, bounds, delta, now)?;
        self.commit(sums, &pending, now);
        Ok(pending.total)
    }
}
