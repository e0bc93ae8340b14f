//! Wire types read from the input stream.

use serde::{Deserialize, Serialize};

/// A meter reading as it arrives, before window boundaries are attached.
///
/// Field names also accept the camelCase spelling used by device gateways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReading {
    #[serde(alias = "feedId")]
    pub feed_id: String,
    #[serde(default)]
    pub code: String,
    pub value: f64,
    pub time: String,
}

/// What the source produces for each non-empty input line.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Reading { line: usize, reading: InputReading },
    /// A line that could not be decoded; processing continues with the next one.
    Invalid { line: usize, error: String },
}
