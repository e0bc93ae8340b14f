//! JSON lines reader running on its own thread.

use super::types::{InputReading, SourceEvent};
use crossbeam_channel::{bounded, Receiver};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Errors opening a reading source.
#[derive(Debug)]
pub enum SourceError {
    Io(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Streams [`SourceEvent`]s decoded from JSON lines.
///
/// The channel closes once the input is exhausted, the source is stopped, or
/// the input fails to read.
pub struct ReadingSource {
    receiver: Receiver<SourceEvent>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReadingSource {
    /// Start reading lines from `reader`.
    pub fn spawn<R>(reader: R, capacity: usize) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (sender, receiver) = bounded(capacity);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::spawn(move || {
            for (idx, line) in reader.lines().enumerate() {
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                let line_no = idx + 1;
                let event = match line {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => match serde_json::from_str::<InputReading>(&line) {
                        Ok(reading) => SourceEvent::Reading {
                            line: line_no,
                            reading,
                        },
                        Err(e) => SourceEvent::Invalid {
                            line: line_no,
                            error: e.to_string(),
                        },
                    },
                    Err(e) => {
                        let _ = sender.send(SourceEvent::Invalid {
                            line: line_no,
                            error: e.to_string(),
                        });
                        break;
                    }
                };
                if sender.send(event).is_err() {
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        Self {
            receiver,
            running,
            handle: Some(handle),
        }
    }

    /// Read from a file.
    pub fn from_path(path: &Path, capacity: usize) -> Result<Self, SourceError> {
        let file = File::open(path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?;
        Ok(Self::spawn(BufReader::new(file), capacity))
    }

    /// Read from standard input.
    pub fn stdin(capacity: usize) -> Self {
        Self::spawn(BufReader::new(std::io::stdin()), capacity)
    }

    /// Get the receiver for decoded events.
    pub fn receiver(&self) -> &Receiver<SourceEvent> {
        &self.receiver
    }

    /// Check if the reader thread is still producing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the reader thread to stop after its current line.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the reader thread to finish.
    ///
    /// A reader blocked on an idle stdin only returns once input arrives or closes.
    pub fn join(mut self) {
        self.stop();
        // Unblock a sender waiting on a full channel.
        while self.receiver.try_recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_lines_and_reports_invalid_ones() {
        let input = concat!(
            r#"{"feed_id":"F1","code":"ep","value":1.0,"time":"2024-03-01 00:00:00"}"#,
            "\n\n",
            "not json\n",
            r#"{"feedId":"F2","value":2.0,"time":"2024-03-01 00:05:00"}"#,
            "\n"
        );
        let source = ReadingSource::spawn(Cursor::new(input.to_string()), 16);
        let events: Vec<_> = source.receiver().iter().collect();
        // The flag drops before the channel closes.
        assert!(!source.is_running());

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SourceEvent::Reading { line: 1, reading } if reading.feed_id == "F1"));
        assert!(matches!(&events[1], SourceEvent::Invalid { line: 3, .. }));
        assert!(matches!(&events[2], SourceEvent::Reading { line: 4, reading } if reading.code.is_empty()));

        source.join();
    }

    #[test]
    fn test_missing_file() {
        let result = ReadingSource::from_path(Path::new("/nonexistent/readings.jsonl"), 4);
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
