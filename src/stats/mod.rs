//! Statistics about what the meter has processed.

pub mod counters;

// Re-export commonly used types
pub use counters::{
    create_shared_stats, create_shared_stats_with_persistence, PersistedStats, ProcessingStats,
    SharedStats, StatsSnapshot,
};
