//! Progress sinks.

use anyhow::Context;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use vaultpack_package_schema::{Outcome, ProgressEvent, ProgressLog};

/// Receives progress events synchronously as decisions are applied.
///
/// Errors are logged by the caller and never affect the import.
pub trait ProgressSink {
    fn on_event(&mut self, event: &ProgressEvent) -> anyhow::Result<()>;
}

/// Renders events to the log: `"{action} {path}"`, or `"E {path} {detail}"`
/// for errors.
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_event(&mut self, event: &ProgressEvent) -> anyhow::Result<()> {
        match &event.outcome {
            Outcome::Success => info!("{} {}", event.action, event.path),
            Outcome::Skipped { reason } => info!("{} {} ({})", event.action, event.path, reason),
            Outcome::Error { detail } => warn!("E {} {}", event.path, detail),
        }
        Ok(())
    }
}

/// Keeps every event. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for CollectingSink {
    fn on_event(&mut self, event: &ProgressEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("Collecting sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressSink for JsonlSink<W> {
    fn on_event(&mut self, event: &ProgressEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(event).context("Failed to serialize progress event")?;
        writeln!(self.writer, "{}", line).context("Failed to write progress event")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Fans events out to several sinks. Every sink sees every event; the
/// first failure is returned.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn ProgressSink + Send>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ProgressSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for MultiSink {
    fn on_event(&mut self, event: &ProgressEvent) -> anyhow::Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_event(event) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The run's progress log plus the caller's sinks.
pub(crate) struct ProgressReporter {
    log: ProgressLog,
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub(crate) fn new() -> Self {
        Self {
            log: ProgressLog::new(),
            sinks: Vec::new(),
        }
    }

    pub(crate) fn add_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    /// Start a fresh log; sinks are kept.
    pub(crate) fn reset(&mut self) {
        self.log = ProgressLog::new();
    }

    pub(crate) fn emit(&mut self, event: ProgressEvent) {
        let stored = self.log.add(event);
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_event(stored) {
                warn!("Progress sink failed on {}: {:#}", stored.path, e);
            }
        }
    }

    pub(crate) fn log(&self) -> &ProgressLog {
        &self.log
    }
}
