//! Reading sources for the feed meter.
//!
//! Readings arrive as JSON lines from a file or stdin and are decoded on a
//! background thread into a bounded channel.

pub mod jsonl;
pub mod types;

// Re-export commonly used types
pub use jsonl::{ReadingSource, SourceError};
pub use types::{InputReading, SourceEvent};
