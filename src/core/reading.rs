//! Readings as they enter the core, with their precomputed window boundaries.

use super::error::ProcessError;
use super::window::Granularity;
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Default layout of reading timestamps.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout of window-end labels.
pub const BOUNDARY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout of each half of a bucket key. The offset tells apart the two
/// occurrences of a wall-clock window repeated by a DST fold.
pub const BUCKET_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// One window instance: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl WindowBounds {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self { start, end }
    }

    /// Key identifying this window inside one granularity's bucket map.
    pub fn bucket_key(&self) -> String {
        format!(
            "{}_{}",
            self.start.format(BUCKET_KEY_FORMAT),
            self.end.format(BUCKET_KEY_FORMAT)
        )
    }

    /// Formatted window end, in the boundary's own offset.
    pub fn end_label(&self) -> String {
        self.end.format(BOUNDARY_FORMAT).to_string()
    }

    pub fn start_epoch_secs(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_epoch_secs(&self) -> i64 {
        self.end.timestamp()
    }
}

/// Boundaries of the window containing a reading, for every granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSet {
    pub half_hour: WindowBounds,
    pub hour: WindowBounds,
    pub day: WindowBounds,
    pub month: WindowBounds,
}

impl WindowSet {
    pub fn for_granularity(&self, granularity: Granularity) -> &WindowBounds {
        match granularity {
            Granularity::HalfHour => &self.half_hour,
            Granularity::Hour => &self.hour,
            Granularity::Day => &self.day,
            Granularity::Month => &self.month,
        }
    }
}

/// A meter reading handed to the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Device/feed identifier; the state key
    pub feed_id: String,
    /// Reading code or channel on the device
    pub code: String,
    /// Cumulative meter value
    pub value: f64,
    /// Event timestamp as sent by the device
    pub time: String,
    /// Window boundaries computed upstream
    pub windows: WindowSet,
}

impl RawReading {
    /// Check required fields before anything touches state.
    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.feed_id.trim().is_empty() {
            return Err(ProcessError::malformed("feed id is empty"));
        }
        if self.time.trim().is_empty() {
            return Err(ProcessError::malformed(format!(
                "feed {}: timestamp is empty",
                self.feed_id
            )));
        }
        if !self.value.is_finite() {
            return Err(ProcessError::malformed(format!(
                "feed {}: value {} is not finite",
                self.feed_id, self.value
            )));
        }
        for granularity in Granularity::ALL {
            let bounds = self.windows.for_granularity(granularity);
            if bounds.start >= bounds.end {
                return Err(ProcessError::malformed(format!(
                    "feed {}: {} window ends before it starts",
                    self.feed_id,
                    granularity.label()
                )));
            }
        }
        Ok(())
    }

    /// Identifier shared by the raw record and its window records.
    pub fn record_id(&self) -> String {
        format!("{}_{}", self.feed_id, self.time)
    }
}

/// Parses reading timestamps.
///
/// RFC 3339 strings carry their own offset. Anything else is parsed with the
/// configured format as wall-clock time in the configured zone.
#[derive(Debug, Clone)]
pub struct EventTimeParser {
    format: String,
    tz: Tz,
}

impl Default for EventTimeParser {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_FORMAT.to_string(), Tz::UTC)
    }
}

impl EventTimeParser {
    pub fn new(format: String, tz: Tz) -> Self {
        Self { format, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Parse `raw` to an absolute instant, keeping its offset.
    pub fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, ProcessError> {
        let raw = raw.trim();
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Ok(instant);
        }

        let naive = NaiveDateTime::parse_from_str(raw, &self.format).map_err(|e| {
            ProcessError::malformed(format!(
                "timestamp {raw:?} does not match {:?}: {e}",
                self.format
            ))
        })?;
        self.localize(naive).ok_or_else(|| {
            ProcessError::malformed(format!(
                "timestamp {raw:?} does not exist in {}",
                self.tz.name()
            ))
        })
    }

    /// Parse `raw` and convert it to UTC.
    pub fn parse_utc(&self, raw: &str) -> Result<DateTime<Utc>, ProcessError> {
        self.parse(raw).map(|t| t.with_timezone(&Utc))
    }

    /// Attach the configured zone to a wall-clock time.
    ///
    /// Ambiguous times (a DST fold) resolve to the earlier instant. Times in
    /// a DST gap have no instant and yield `None`.
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => Some(t.fixed_offset()),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.fixed_offset()),
            LocalResult::None => None,
        }
    }
}
