//! Feed Meter - per-feed usage aggregation over nested time windows.
//!
//! Readings from metering devices ("feeds") carry a cumulative value. This
//! library turns each reading into the usage since the previous one and keeps
//! a running total of that usage for the half-hour, hour, day and month window
//! the reading falls into.
//!
//! # Guarantees
//!
//! - **Ordered per feed**: a reading older than the feed's last accepted one is dropped
//! - **All or nothing**: a reading produces one raw record and four window records, or none
//! - **Exact deltas**: values are subtracted as decimals, never clamped
//! - **Bounded state**: every value and bucket expires on its own TTL
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Feed Meter                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────────────┐ │
//! │  │  Source  │──▶│ Resolver │──▶│         FeedProcessor         │ │
//! │  │ (jsonl)  │   │ (bounds) │   │ ordering ▶ delta ▶ 4 windows  │ │
//! │  └──────────┘   └──────────┘   └───────────────────────────────┘ │
//! │                                     │                 │          │
//! │                                     ▼                 ▼          │
//! │                              ┌────────────┐    ┌────────────┐    │
//! │                              │ StateStore │    │    Sink    │    │
//! │                              │  (TTL'd)   │    │ 5 channels │    │
//! │                              └────────────┘    └────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use feed_meter::{
//!     core::{EventTimeParser, FeedProcessor, Granularity},
//!     resolver::WindowResolver,
//!     source::InputReading,
//!     state::TtlPolicy,
//! };
//!
//! let resolver = WindowResolver::new(EventTimeParser::default());
//! let processor = FeedProcessor::in_memory(EventTimeParser::default(), TtlPolicy::default());
//!
//! for (time, value) in [("2024-03-01 00:00:00", 10.0), ("2024-03-01 00:05:00", 15.0)] {
//!     let reading = resolver
//!         .resolve(InputReading {
//!             feed_id: "F1".to_string(),
//!             code: "ep".to_string(),
//!             value,
//!             time: time.to_string(),
//!         })
//!         .unwrap();
//!     let outcome = processor.process(&reading).unwrap();
//!     let emission = outcome.emission().unwrap();
//!     println!("{:?}", emission.window(Granularity::HalfHour));
//! }
//! ```

pub mod config;
pub mod core;
pub mod resolver;
pub mod runtime;
pub mod sink;
pub mod source;
pub mod state;
pub mod stats;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, TtlConfig};
pub use crate::core::{
    AggregatedWindowRecord, Emission, FeedProcessor, Granularity, Outcome, OutputChannel,
    ProcessError, RawEventRecord, RawReading, WindowSet,
};
pub use resolver::{ResolveError, WindowResolver};
pub use runtime::{RuntimeError, WorkerPool};
pub use sink::{JsonLinesSink, MemorySink, RecordSink, SinkError};
pub use source::{InputReading, ReadingSource, SourceEvent};
pub use state::{InMemoryStateStore, StateSnapshot, StateStore, TtlPolicy};
pub use stats::{ProcessingStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
