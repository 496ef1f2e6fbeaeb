//! Event persistence sinks

use super::types::TradingEvent;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Event sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for batches of trading events
pub trait EventSink: Send {
    fn write(&mut self, events: &[TradingEvent]) -> Result<(), SinkError>;
}

/// Buffers events and writes them to the inner sink in batches.
///
/// Flushes every `flush_every` events, on [`BufferedSink::flush`], and on drop.
pub struct BufferedSink<S: EventSink> {
    sink: S,
    buffer: Vec<TradingEvent>,
    flush_every: usize,
}

impl<S: EventSink> BufferedSink<S> {
    pub fn new(sink: S, flush_every: usize) -> Self {
        let flush_every = flush_every.max(1);
        Self {
            sink,
            buffer: Vec::with_capacity(flush_every),
            flush_every,
        }
    }

    /// Buffer one event, flushing when the batch is full
    pub fn record(&mut self, event: TradingEvent) -> Result<(), SinkError> {
        self.buffer.push(event);
        if self.buffer.len() >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sink.write(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Events waiting for the next flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn inner(&self) -> &S {
        &self.sink
    }
}

impl<S: EventSink> Drop for BufferedSink<S> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, dropped = self.buffer.len(), "Failed to flush events on shutdown");
        }
    }
}

/// One JSON object per line
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Create or truncate the file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn write(&mut self, events: &[TradingEvent]) -> Result<(), SinkError> {
        for event in events {
            serde_json::to_writer(&mut self.writer, event)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TradingEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn events(&self) -> Vec<TradingEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemorySink {
    fn write(&mut self, events: &[TradingEvent]) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use chrono::Utc;
    use serde_json::json;
    use std::io::BufRead;

    fn event(seq: u64) -> TradingEvent {
        TradingEvent {
            run_id: "run".to_string(),
            seq,
            event_type: EventType::AgentDebug,
            timestamp: Utc::now(),
            payload: json!({"n": seq}),
        }
    }

    #[test]
    fn test_buffered_sink_flushes_in_batches() {
        let memory = MemorySink::new();
        let mut sink = BufferedSink::new(memory.clone(), 3);

        sink.record(event(1)).unwrap();
        sink.record(event(2)).unwrap();
        assert!(memory.events().is_empty());
        assert_eq!(sink.pending(), 2);

        sink.record(event(3)).unwrap();
        assert_eq!(memory.events().len(), 3);
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_buffered_sink_flushes_on_drop() {
        let memory = MemorySink::new();
        {
            let mut sink = BufferedSink::new(memory.clone(), 100);
            sink.record(event(1)).unwrap();
        }
        assert_eq!(memory.events().len(), 1);
    }

    #[test]
    fn test_json_lines_sink() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut sink = JsonLinesSink::create(file.path()).unwrap();
            sink.write(&[event(1), event(2)]).unwrap();
        }

        let reader = std::io::BufReader::new(File::open(file.path()).unwrap());
        let lines: Vec<String> = reader.lines().map(Result::unwrap).collect();
        assert_eq!(lines.len(), 2);
        let decoded: TradingEvent = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(decoded.seq, 2);
        assert!(lines[0].contains("\"type\":\"agent:debug\""));
    }
}
