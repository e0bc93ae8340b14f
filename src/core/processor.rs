//! The per-reading pipeline: ordering, delta, window fan-out.

use super::delta::{compute_delta, to_decimal, to_f64};
use super::error::ProcessError;
use super::ordering::{check_order, Verdict};
use super::reading::{EventTimeParser, RawReading};
use super::records::{
    AggregatedWindowRecord, Emission, OutOfOrder, Outcome, RawEventRecord, WindowOutput,
};
use super::window::{Granularity, PendingWrite, WindowAccumulator};
use crate::state::{
    Clock, Expiring, InMemoryStateStore, PerKeyState, StateStore, SystemClock, TtlPolicy,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// Turns readings into raw and windowed usage records.
///
/// `process` may be called from many threads at once. Readings of one feed
/// are serialized by the state store; the caller is responsible for handing
/// them over in arrival order.
pub struct FeedProcessor<S, C> {
    store: S,
    clock: C,
    parser: EventTimeParser,
    value_ttl: Duration,
    accumulators: [WindowAccumulator; 4],
}

impl FeedProcessor<InMemoryStateStore, SystemClock> {
    /// Processor backed by an in-memory store and the wall clock.
    pub fn in_memory(parser: EventTimeParser, ttl: TtlPolicy) -> Self {
        Self::new(InMemoryStateStore::new(), SystemClock, parser, ttl)
    }
}

impl<S: StateStore, C: Clock> FeedProcessor<S, C> {
    pub fn new(store: S, clock: C, parser: EventTimeParser, ttl: TtlPolicy) -> Self {
        let accumulators =
            Granularity::ALL.map(|g| WindowAccumulator::new(g, ttl.for_granularity(g)));
        Self {
            store,
            clock,
            parser,
            value_ttl: ttl.value,
            accumulators,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Process one reading.
    ///
    /// Returns every record the reading produces, or nothing at all: a
    /// malformed reading fails before the feed's state is touched, and an
    /// out-of-order reading is dropped without changing it.
    pub fn process(&self, reading: &RawReading) -> Result<Outcome, ProcessError> {
        reading.validate()?;
        let event_time = self.parser.parse_utc(&reading.time)?;
        let value = to_decimal(reading.value)?;
        let ingest_time = self.clock.now();

        let outcome = self.store.with_state(&reading.feed_id, |state| {
            self.apply(state, reading, event_time, value, ingest_time)
        })??;

        if let Outcome::Dropped(ref dropped) = outcome {
            tracing::info!(
                feed_id = %dropped.feed_id,
                time = %reading.time,
                last_event_time = %dropped.last_event_time,
                "dropping out-of-order reading"
            );
        }

        Ok(outcome)
    }

    fn apply(
        &self,
        state: &mut PerKeyState,
        reading: &RawReading,
        event_time: DateTime<Utc>,
        value: Decimal,
        ingest_time: DateTime<Utc>,
    ) -> Result<Outcome, ProcessError> {
        let now = self.clock.now();

        let last_event_time = state.last_event_time(now);
        if check_order(last_event_time, event_time) == Verdict::Reject {
            return Ok(Outcome::Dropped(OutOfOrder {
                feed_id: reading.feed_id.clone(),
                last_event_time: last_event_time.unwrap_or(event_time),
                event_time,
            }));
        }

        // Everything fallible happens before the first write.
        let delta = compute_delta(state.last_value(now), value)?;
        let pending = self
            .accumulators
            .iter()
            .map(|acc| {
                let bounds = reading.windows.for_granularity(acc.granularity());
                acc.prepare(state.windows.get(acc.granularity()), bounds, delta, now)
            })
            .collect::<Result<Vec<PendingWrite>, _>>()?;

        state.last_event_time = Some(Expiring::new(event_time, now, self.value_ttl));
        let raw = RawEventRecord::from_reading(reading, ingest_time, self.clock.now());
        state.last_value = Some(Expiring::new(value, now, self.value_ttl));

        let windows = self
            .accumulators
            .iter()
            .zip(pending)
            .map(|(acc, write)| {
                let purged = acc.commit(state.windows.get_mut(write.granularity), &write, now);
                if purged > 0 {
                    tracing::debug!(
                        feed_id = %reading.feed_id,
                        granularity = %write.granularity,
                        purged,
                        "purged expired buckets"
                    );
                }
                WindowOutput {
                    granularity: write.granularity,
                    channel: write.granularity.channel(),
                    record: AggregatedWindowRecord::new(
                        &raw,
                        write.granularity,
                        &write.bounds,
                        to_f64(write.total),
                        self.clock.now(),
                    ),
                }
            })
            .collect();

        Ok(Outcome::Emitted(Emission { raw, windows }))
    }
}
