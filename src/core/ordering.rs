//! Per-feed event-time ordering.

use chrono::{DateTime, Utc};

/// Whether a reading may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Rejects readings older than the last accepted one for the same feed.
///
/// Equal timestamps pass. Only the offending reading is dropped; later
/// readings are judged against the stored time as usual.
pub fn check_order(last_event_time: Option<DateTime<Utc>>, event_time: DateTime<Utc>) -> Verdict {
    match last_event_time {
        Some(last) if event_time < last => Verdict::Reject,
        _ => Verdict::Accept,
    }
}
