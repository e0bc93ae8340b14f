//! Output sinks for emitted records.
//!
//! Sinks are append-only and shared between worker threads. Which store a
//! channel ends up in is decided downstream; this crate writes one JSON
//! lines file per channel or keeps records in memory.

use crate::core::{AggregatedWindowRecord, Emission, OutputChannel, RawEventRecord};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Errors writing records.
#[derive(Debug)]
pub enum SinkError {
    Io(String),
    Serialize(String),
    Poisoned(OutputChannel),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {e}"),
            SinkError::Serialize(e) => write!(f, "Serialize error: {e}"),
            SinkError::Poisoned(channel) => write!(f, "Writer for {channel} is poisoned"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Destination for emitted records.
pub trait RecordSink: Send + Sync {
    fn write_raw(&self, record: &RawEventRecord) -> Result<(), SinkError>;

    fn write_window(
        &self,
        channel: OutputChannel,
        record: &AggregatedWindowRecord,
    ) -> Result<(), SinkError>;

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Write everything one reading produced.
    fn emit(&self, emission: &Emission) -> Result<(), SinkError> {
        self.write_raw(&emission.raw)?;
        for output in &emission.windows {
            self.write_window(output.channel, &output.record)?;
        }
        Ok(())
    }
}

/// One JSON lines file per channel, appended to.
pub struct JsonLinesSink {
    dir: PathBuf,
    raw: Mutex<BufWriter<File>>,
    half_time: Mutex<BufWriter<File>>,
    hour_time: Mutex<BufWriter<File>>,
    day_time: Mutex<BufWriter<File>>,
    month_time: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open (or create) the channel files under `dir`.
    pub fn create(dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir).map_err(|e| SinkError::Io(e.to_string()))?;
        let open = |channel: OutputChannel| -> Result<Mutex<BufWriter<File>>, SinkError> {
            let path = Self::channel_path(dir, channel);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| SinkError::Io(format!("{}: {e}", path.display())))?;
            Ok(Mutex::new(BufWriter::new(file)))
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            raw: open(OutputChannel::Raw)?,
            half_time: open(OutputChannel::HalfTime)?,
            hour_time: open(OutputChannel::HourTime)?,
            day_time: open(OutputChannel::DayTime)?,
            month_time: open(OutputChannel::MonthTime)?,
        })
    }

    /// File a channel is written to.
    pub fn channel_path(dir: &Path, channel: OutputChannel) -> PathBuf {
        dir.join(format!("{}.jsonl", channel.name()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn writer(&self, channel: OutputChannel) -> &Mutex<BufWriter<File>> {
        match channel {
            OutputChannel::Raw => &self.raw,
            OutputChannel::HalfTime => &self.half_time,
            OutputChannel::HourTime => &self.hour_time,
            OutputChannel::DayTime => &self.day_time,
            OutputChannel::MonthTime => &self.month_time,
        }
    }

    fn append<T: Serialize>(&self, channel: OutputChannel, record: &T) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| SinkError::Serialize(e.to_string()))?;
        line.push('\n');

        let mut writer = self
            .writer(channel)
            .lock()
            .map_err(|_| SinkError::Poisoned(channel))?;
        writer
            .write_all(line.as_bytes())
            .map_err(|e| SinkError::Io(e.to_string()))
    }
}

impl RecordSink for JsonLinesSink {
    fn write_raw(&self, record: &RawEventRecord) -> Result<(), SinkError> {
        self.append(OutputChannel::Raw, record)
    }

    fn write_window(
        &self,
        channel: OutputChannel,
        record: &AggregatedWindowRecord,
    ) -> Result<(), SinkError> {
        self.append(channel, record)
    }

    fn flush(&self) -> Result<(), SinkError> {
        let channels = std::iter::once(OutputChannel::Raw).chain(OutputChannel::WINDOWS);
        for channel in channels {
            self.writer(channel)
                .lock()
                .map_err(|_| SinkError::Poisoned(channel))?
                .flush()
                .map_err(|e| SinkError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

/// Keeps records in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    raw: Mutex<Vec<RawEventRecord>>,
    windows: Mutex<Vec<(OutputChannel, AggregatedWindowRecord)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_records(&self) -> Vec<RawEventRecord> {
        self.raw.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Records written to one window channel.
    pub fn channel(&self, channel: OutputChannel) -> Vec<AggregatedWindowRecord> {
        self.windows
            .lock()
            .map(|w| {
                w.iter()
                    .filter(|(c, _)| *c == channel)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

impl RecordSink for MemorySink {
    fn write_raw(&self, record: &RawEventRecord) -> Result<(), SinkError> {
        self.raw
            .lock()
            .map_err(|_| SinkError::Poisoned(OutputChannel::Raw))?
            .push(record.clone());
        Ok(())
    }

    fn write_window(
        &self,
        channel: OutputChannel,
        record: &AggregatedWindowRecord,
    ) -> Result<(), SinkError> {
        self.windows
            .lock()
            .map_err(|_| SinkError::Poisoned(channel))?
            .push((channel, record.clone()));
        Ok(())
    }
}
