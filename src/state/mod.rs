//! Per-feed state with field-level expiry.
//!
//! This module contains:
//! - Expiring values and maps that hide entries past their deadline
//! - The [`StateStore`] capability the processor depends on, with an in-memory backend
//! - Clocks supplying processing time for TTL decisions

pub mod clock;
pub mod expiring;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use expiring::{Expiring, ExpiringMap};
pub use store::{
    InMemoryStateStore, PerKeyState, StateError, StateSnapshot, StateStore, SweepReport,
    TtlPolicy, WindowSums,
};
