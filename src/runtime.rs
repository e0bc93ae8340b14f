//! Worker threads driving the processor.
//!
//! Readings are routed to a worker by a hash of their feed id, so every
//! reading of one feed is processed by the same thread in arrival order while
//! different feeds proceed in parallel.

use crate::core::{FeedProcessor, Outcome, RawReading};
use crate::sink::RecordSink;
use crate::state::{Clock, StateStore, SweepReport};
use crate::stats::SharedStats;
use crossbeam_channel::{bounded, Sender};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Errors from the worker pool.
#[derive(Debug)]
pub enum RuntimeError {
    /// A worker's queue is closed, usually because the worker panicked.
    WorkerGone(usize),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::WorkerGone(idx) => write!(f, "Worker {idx} is no longer running"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Process one reading, write what it produced and count the result.
pub fn handle_reading<S, C>(
    processor: &FeedProcessor<S, C>,
    sink: &dyn RecordSink,
    stats: &SharedStats,
    reading: &RawReading,
) where
    S: StateStore,
    C: Clock,
{
    match processor.process(reading) {
        Ok(outcome) => {
            if let Outcome::Emitted(ref emission) = outcome {
                if let Err(e) = sink.emit(emission) {
                    // State has advanced; the records are lost downstream.
                    tracing::error!(feed_id = %reading.feed_id, time = %reading.time, "failed to write records: {e}");
                    stats.record_sink_failure();
                    return;
                }
            }
            stats.record_outcome(&outcome);
        }
        Err(e) => {
            tracing::warn!(feed_id = %reading.feed_id, time = %reading.time, "reading rejected: {e}");
            stats.record_error(&e);
        }
    }
}

/// Sweep expired state and count what was removed.
pub fn sweep_expired<S, C>(processor: &FeedProcessor<S, C>, stats: &SharedStats) -> SweepReport
where
    S: StateStore,
    C: Clock,
{
    match processor.store().sweep(processor.clock().now()) {
        Ok(report) => {
            if report.buckets_removed > 0 || report.feeds_removed > 0 {
                tracing::debug!(
                    buckets = report.buckets_removed,
                    feeds = report.feeds_removed,
                    "expired state swept"
                );
            }
            stats.record_expired(report.buckets_removed as u64);
            report
        }
        Err(e) => {
            tracing::warn!("expiry sweep failed: {e}");
            SweepReport::default()
        }
    }
}

/// Fixed set of threads, each owning a disjoint subset of feeds.
pub struct WorkerPool {
    senders: Vec<Sender<RawReading>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` threads, each with a queue of `capacity` readings.
    pub fn spawn<S, C>(
        workers: usize,
        capacity: usize,
        processor: Arc<FeedProcessor<S, C>>,
        sink: Arc<dyn RecordSink>,
        stats: SharedStats,
    ) -> Result<Self, std::io::Error>
    where
        S: StateStore + 'static,
        C: Clock + 'static,
    {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for idx in 0..workers {
            let (sender, receiver) = bounded::<RawReading>(capacity);
            let processor = Arc::clone(&processor);
            let sink = Arc::clone(&sink);
            let stats = Arc::clone(&stats);

            let handle = thread::Builder::new()
                .name(format!("feed-worker-{idx}"))
                .spawn(move || {
                    for reading in receiver {
                        handle_reading(&processor, sink.as_ref(), &stats, &reading);
                    }
                })?;

            senders.push(sender);
            handles.push(handle);
        }

        Ok(Self { senders, handles })
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// Worker responsible for `feed_id`.
    pub fn shard_for(&self, feed_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        feed_id.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue a reading on its feed's worker, blocking while the queue is full.
    pub fn dispatch(&self, reading: RawReading) -> Result<(), RuntimeError> {
        let idx = self.shard_for(&reading.feed_id);
        self.senders[idx]
            .send(reading)
            .map_err(|_| RuntimeError::WorkerGone(idx))
    }

    /// Close the queues and wait for every queued reading to be processed.
    pub fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("a feed worker panicked");
            }
        }
    }
}
