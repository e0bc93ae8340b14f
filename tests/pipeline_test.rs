//! End-to-end tests: resolver, processor, worker pool, sinks and saved state.

use chrono::{Duration, TimeZone, Utc};
use feed_meter::{
    core::{EventTimeParser, FeedProcessor, Granularity, OutputChannel, RawReading},
    resolver::WindowResolver,
    runtime::{handle_reading, sweep_expired, WorkerPool},
    sink::{JsonLinesSink, MemorySink, RecordSink},
    source::{InputReading, ReadingSource, SourceEvent},
    state::{Clock, InMemoryStateStore, ManualClock, StateSnapshot, StateStore, TtlPolicy},
    stats::create_shared_stats,
};
use std::io::Cursor;
use std::sync::Arc;

type TestProcessor = FeedProcessor<InMemoryStateStore, ManualClock>;

fn start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn setup() -> (TestProcessor, ManualClock, WindowResolver) {
    let clock = ManualClock::new(start());
    let processor = FeedProcessor::new(
        InMemoryStateStore::new(),
        clock.clone(),
        EventTimeParser::default(),
        TtlPolicy::default(),
    );
    (processor, clock, WindowResolver::default())
}

fn resolve(resolver: &WindowResolver, feed: &str, time: &str, value: f64) -> RawReading {
    resolver
        .resolve(InputReading {
            feed_id: feed.to_string(),
            code: "ep".to_string(),
            value,
            time: time.to_string(),
        })
        .unwrap()
}

#[test]
fn test_half_hour_usage_reaches_every_channel() {
    let (processor, _, resolver) = setup();
    let sink = MemorySink::new();
    let stats = create_shared_stats();

    for (time, value) in [
        ("2024-03-01 00:00:00", 10.0),
        ("2024-03-01 00:05:00", 15.0),
        ("2024-03-01 00:35:00", 20.0),
    ] {
        let reading = resolve(&resolver, "F1", time, value);
        handle_reading(&processor, &sink, &stats, &reading);
    }

    assert_eq!(sink.raw_records().len(), 3);
    assert_eq!(sink.window_count(), 12);

    let half: Vec<f64> = sink
        .channel(OutputChannel::HalfTime)
        .iter()
        .map(|r| r.value)
        .collect();
    assert_eq!(half, vec![0.0, 5.0, 5.0]);

    let hour = sink.channel(OutputChannel::HourTime);
    assert_eq!(hour.last().unwrap().value, 10.0);
    assert_eq!(hour.last().unwrap().time, "2024-03-01 01:00:00");

    let day = sink.channel(OutputChannel::DayTime);
    assert_eq!(day.last().unwrap().time, "2024-03-02 00:00:00");
    assert_eq!(day.last().unwrap().step, "1d");

    let month = sink.channel(OutputChannel::MonthTime);
    assert_eq!(month.last().unwrap().time, "2024-04-01 00:00:00");
    assert_eq!(month.last().unwrap().value, 10.0);

    let snapshot = stats.stats();
    assert_eq!(snapshot.accepted, 3);
    assert_eq!(snapshot.half_time, 3);
    assert_eq!(snapshot.month_time, 3);
}

#[test]
fn test_late_reading_is_dropped_without_output() {
    let (processor, _, resolver) = setup();
    let sink = MemorySink::new();
    let stats = create_shared_stats();

    handle_reading(
        &processor,
        &sink,
        &stats,
        &resolve(&resolver, "F1", "2024-03-01 00:10:00", 10.0),
    );
    handle_reading(
        &processor,
        &sink,
        &stats,
        &resolve(&resolver, "F1", "2024-03-01 00:05:00", 50.0),
    );
    handle_reading(
        &processor,
        &sink,
        &stats,
        &resolve(&resolver, "F1", "2024-03-01 00:15:00", 12.0),
    );

    assert_eq!(sink.raw_records().len(), 2);
    let half = sink.channel(OutputChannel::HalfTime);
    assert_eq!(half.last().unwrap().value, 2.0);

    let snapshot = stats.stats();
    assert_eq!(snapshot.accepted, 2);
    assert_eq!(snapshot.dropped_out_of_order, 1);
}

#[test]
fn test_unparseable_time_is_counted_as_malformed() {
    let (processor, _, resolver) = setup();
    let sink = MemorySink::new();
    let stats = create_shared_stats();

    let mut reading = resolve(&resolver, "F1", "2024-03-01 00:00:00", 10.0);
    reading.time = "yesterday".to_string();
    handle_reading(&processor, &sink, &stats, &reading);

    assert!(sink.raw_records().is_empty());
    assert_eq!(stats.stats().malformed, 1);
    assert!(processor.store().get("F1").unwrap().is_none());
}

#[test]
fn test_worker_pool_keeps_each_feed_in_order() {
    let (processor, _, resolver) = setup();
    let processor = Arc::new(processor);
    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn RecordSink> = memory.clone();
    let stats = create_shared_stats();

    let pool = WorkerPool::spawn(4, 16, Arc::clone(&processor), sink, Arc::clone(&stats)).unwrap();

    let feeds: Vec<String> = (0..12).map(|i| format!("feed-{i}")).collect();
    for minute in 0..25u32 {
        for feed in &feeds {
            let time = format!("2024-03-01 00:{minute:02}:00");
            pool.dispatch(resolve(&resolver, feed, &time, f64::from(minute) * 2.0))
                .unwrap();
        }
    }
    pool.shutdown();

    assert_eq!(stats.stats().accepted, 12 * 25);
    assert_eq!(stats.stats().dropped_out_of_order, 0);
    assert_eq!(memory.raw_records().len(), 12 * 25);

    let month = memory.channel(OutputChannel::MonthTime);
    for feed in &feeds {
        let values: Vec<f64> = month
            .iter()
            .filter(|r| &r.feed_id == feed)
            .map(|r| r.value)
            .collect();
        assert_eq!(values.len(), 25);
        assert!(values.windows(2).all(|w| w[1] - w[0] == 2.0));
        assert_eq!(*values.last().unwrap(), 48.0);
    }
}

#[test]
fn test_sweep_expires_windows_on_their_own_ttl() {
    let (processor, clock, resolver) = setup();
    let sink = MemorySink::new();
    let stats = create_shared_stats();

    handle_reading(
        &processor,
        &sink,
        &stats,
        &resolve(&resolver, "F1", "2024-03-01 00:00:00", 10.0),
    );

    clock.advance(Duration::hours(37));
    let report = sweep_expired(&processor, &stats);
    assert_eq!(report.buckets_removed, 3);
    assert_eq!(report.feeds_removed, 0);

    let state = processor.store().get("F1").unwrap().unwrap();
    let now = clock.now();
    assert!(state.last_value(now).is_none());
    assert_eq!(state.windows.get(Granularity::Month).live_len(now), 1);

    clock.advance(Duration::days(66));
    let report = sweep_expired(&processor, &stats);
    assert_eq!(report.buckets_removed, 1);
    assert_eq!(report.feeds_removed, 1);
    assert_eq!(processor.store().feed_count(), 0);
    assert_eq!(stats.stats().buckets_expired, 4);
}

#[test]
fn test_saved_state_continues_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let resolver = WindowResolver::default();

    {
        let (processor, _, _) = setup();
        processor
            .process(&resolve(&resolver, "F1", "2024-03-01 00:00:00", 10.0))
            .unwrap();
        processor
            .process(&resolve(&resolver, "F1", "2024-03-01 00:05:00", 15.0))
            .unwrap();
        processor.store().snapshot(start()).unwrap().save(&path).unwrap();
    }

    let snapshot = StateSnapshot::load(&path).unwrap();
    let clock = ManualClock::new(start() + Duration::minutes(10));
    let store = InMemoryStateStore::from_snapshot(snapshot, start() + Duration::minutes(10));
    let processor = FeedProcessor::new(
        store,
        clock,
        EventTimeParser::default(),
        TtlPolicy::default(),
    );

    let outcome = processor
        .process(&resolve(&resolver, "F1", "2024-03-01 00:10:00", 18.0))
        .unwrap();
    let emission = outcome.emission().unwrap();
    assert_eq!(emission.window(Granularity::HalfHour).unwrap().record.value, 8.0);

    let late = processor
        .process(&resolve(&resolver, "F1", "2024-03-01 00:01:00", 99.0))
        .unwrap();
    assert!(late.is_dropped());
}

#[test]
fn test_source_to_files() {
    let dir = tempfile::tempdir().unwrap();
    let (processor, _, resolver) = setup();
    let sink = JsonLinesSink::create(dir.path()).unwrap();
    let stats = create_shared_stats();

    let input = concat!(
        r#"{"feedId":"F1","code":"ep","value":1.5,"time":"2024-03-01 00:00:00"}"#,
        "\n",
        "{broken\n",
        r#"{"feedId":"F1","code":"ep","value":4.0,"time":"2024-03-01 00:20:00"}"#,
        "\n"
    );
    let source = ReadingSource::spawn(Cursor::new(input.to_string()), 8);
    for event in source.receiver().iter() {
        match event {
            SourceEvent::Reading { reading, .. } => {
                let reading = resolver.resolve(reading).unwrap();
                handle_reading(&processor, &sink, &stats, &reading);
            }
            SourceEvent::Invalid { .. } => stats.record_malformed(),
        }
    }
    source.join();
    sink.flush().unwrap();

    let raw = std::fs::read_to_string(dir.path().join("raw.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), 2);

    let half = std::fs::read_to_string(dir.path().join("halfTime.jsonl")).unwrap();
    let last: serde_json::Value = serde_json::from_str(half.lines().last().unwrap()).unwrap();
    assert_eq!(last["value"], 2.5);
    assert_eq!(last["step"], "30m");
    assert_eq!(last["time"], "2024-03-01 00:30:00");

    assert_eq!(stats.stats().malformed, 1);
}
