//! Core aggregation for the feed meter.
//!
//! This module contains:
//! - Reading types and timestamp parsing
//! - The ordering guard, delta calculator and window accumulators
//! - The processor that chains them per feed and builds the output records

pub mod delta;
pub mod error;
pub mod ordering;
pub mod processor;
pub mod reading;
pub mod records;
pub mod window;

// Re-export commonly used types
pub use delta::{compute_delta, to_decimal};
pub use error::ProcessError;
pub use ordering::{check_order, Verdict};
pub use processor::FeedProcessor;
pub use reading::{
    EventTimeParser, RawReading, WindowBounds, WindowSet, BOUNDARY_FORMAT, BUCKET_KEY_FORMAT,
    DEFAULT_TIMESTAMP_FORMAT,
};
pub use records::{
    AggregatedWindowRecord, Emission, OutOfOrder, Outcome, OutputChannel, RawEventRecord,
    WindowOutput,
};
pub use window::{Granularity, PendingWrite, WindowAccumulator};
