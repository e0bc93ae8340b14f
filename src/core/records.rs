//! Records emitted for accepted readings and the channels they go to.

use super::reading::{RawReading, WindowBounds};
use super::window::Granularity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named output streams. Each granularity has its own; raw records go to `Raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputChannel {
    Raw,
    HalfTime,
    HourTime,
    DayTime,
    MonthTime,
}

impl OutputChannel {
    pub const WINDOWS: [OutputChannel; 4] = [
        OutputChannel::HalfTime,
        OutputChannel::HourTime,
        OutputChannel::DayTime,
        OutputChannel::MonthTime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OutputChannel::Raw => "raw",
            OutputChannel::HalfTime => "halfTime",
            OutputChannel::HourTime => "hourTime",
            OutputChannel::DayTime => "dayTime",
            OutputChannel::MonthTime => "monthTime",
        }
    }
}

impl std::fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An accepted reading, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventRecord {
    /// `{feed_id}_{time}`
    pub id: String,
    pub feed_id: String,
    pub code: String,
    pub value: f64,
    /// Event timestamp as received
    pub time: String,
    pub ingest_time: DateTime<Utc>,
    pub record_time: DateTime<Utc>,
}

impl RawEventRecord {
    pub fn from_reading(
        reading: &RawReading,
        ingest_time: DateTime<Utc>,
        record_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: reading.record_id(),
            feed_id: reading.feed_id.clone(),
            code: reading.code.clone(),
            value: reading.value,
            time: reading.time.clone(),
            ingest_time,
            record_time,
        }
    }
}

/// Running total of one window bucket after one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedWindowRecord {
    /// Same id as the raw record of the reading that produced it
    pub id: String,
    pub feed_id: String,
    /// Cumulative bucket sum including this reading's delta
    pub value: f64,
    /// Window start, epoch seconds
    pub start_time: i64,
    /// Window end, epoch seconds
    pub end_time: i64,
    /// Formatted window end
    pub time: String,
    /// Granularity label (`30m`, `1h`, `1d`, `1mo`)
    pub step: String,
    pub ingest_time: DateTime<Utc>,
    pub record_time: DateTime<Utc>,
}

impl AggregatedWindowRecord {
    pub fn new(
        raw: &RawEventRecord,
        granularity: Granularity,
        bounds: &WindowBounds,
        value: f64,
        record_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: raw.id.clone(),
            feed_id: raw.feed_id.clone(),
            value,
            start_time: bounds.start_epoch_secs(),
            end_time: bounds.end_epoch_secs(),
            time: bounds.end_label(),
            step: granularity.label().to_string(),
            ingest_time: raw.ingest_time,
            record_time,
        }
    }
}

/// A window record tagged with where it goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutput {
    pub granularity: Granularity,
    pub channel: OutputChannel,
    pub record: AggregatedWindowRecord,
}

/// Everything one accepted reading produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub raw: RawEventRecord,
    /// One entry per granularity, in [`Granularity::ALL`] order
    pub windows: Vec<WindowOutput>,
}

impl Emission {
    /// The output for one granularity.
    pub fn window(&self, granularity: Granularity) -> Option<&WindowOutput> {
        self.windows.iter().find(|w| w.granularity == granularity)
    }
}

/// A reading rejected for arriving before the feed's last accepted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfOrder {
    pub feed_id: String,
    pub last_event_time: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
}

/// Result of processing one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Emitted(Emission),
    Dropped(OutOfOrder),
}

impl Outcome {
    pub fn emission(&self) -> Option<&Emission> {
        match self {
            Outcome::Emitted(emission) => Some(emission),
            Outcome::Dropped(_) => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Outcome::Dropped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        let names: Vec<_> = OutputChannel::WINDOWS.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["halfTime", "hourTime", "dayTime", "monthTime"]);
        assert_eq!(
            serde_json::to_string(&OutputChannel::MonthTime).unwrap(),
            "\"monthTime\""
        );
    }

    #[test]
    fn test_window_channels_match_granularities() {
        let channels: Vec<_> = Granularity::ALL.iter().map(|g| g.channel()).collect();
        assert_eq!(channels, OutputChannel::WINDOWS.to_vec());
    }
}
