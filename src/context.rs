// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-operation context.
//!
//! A [`Context`] carries the trace id of one request or expire event, an
//! optional [`Monitor`] timing every round trip made on its behalf, and the
//! [`TraceSink`] that records failures against the trace id.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::metrics;

/// Destination for trace messages.
pub trait TraceSink: Send + Sync {
    fn record(&self, trace_id: &str, message: &str);
}

/// Default sink: a structured `warn!` log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, trace_id: &str, message: &str) {
        warn!(trace_id = %trace_id, "{}", message);
    }
}

/// Sink keeping every message in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    pub fn messages_for(&self, trace_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(id, _)| id == trace_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

impl TraceSink for RecordingSink {
    fn record(&self, trace_id: &str, message: &str) {
        self.messages
            .lock()
            .push((trace_id.to_string(), message.to_string()));
    }
}

/// One finished stopwatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub kind: &'static str,
    pub action: String,
    pub elapsed: Duration,
}

/// Collects stopwatch readings for one context.
#[derive(Debug, Default)]
pub struct Monitor {
    readings: Mutex<Vec<Reading>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }

    fn push(&self, reading: Reading) {
        self.readings.lock().push(reading);
    }
}

/// Running stopwatch; the reading is taken on [`Stopwatch::stop`] or drop.
pub struct Stopwatch<'a> {
    monitor: Option<&'a Monitor>,
    kind: &'static str,
    action: String,
    start: Instant,
    stopped: bool,
}

impl Stopwatch<'_> {
    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.stopped {
            self.stopped = true;
            if let Some(monitor) = self.monitor {
                monitor.push(Reading {
                    kind: self.kind,
                    action: std::mem::take(&mut self.action),
                    elapsed,
                });
            }
        }
        elapsed
    }
}

impl Drop for Stopwatch<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

pub struct Context {
    trace_id: String,
    monitor: Option<Monitor>,
    sink: Arc<dyn TraceSink>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("trace_id", &self.trace_id)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Fresh context with a random trace id and the logging sink.
    pub fn new() -> Self {
        Self::with_trace_id(new_trace_id())
    }

    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            monitor: None,
            sink: Arc::new(TracingSink),
        }
    }

    #[must_use]
    pub fn with_monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled.then(Monitor::new);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }

    /// Start timing a round trip. A no-op guard when monitoring is off.
    pub fn start_stopwatch(&self, kind: &'static str, action: impl Into<String>) -> Stopwatch<'_> {
        Stopwatch {
            monitor: self.monitor.as_ref(),
            kind,
            action: action.into(),
            start: Instant::now(),
            stopped: false,
        }
    }

    pub fn log_trace_message(&self, message: impl AsRef<str>) {
        self.sink.record(&self.trace_id, message.as_ref());
    }

    /// Flush stopwatch readings into metrics.
    pub fn close(self) -> Vec<Reading> {
        let readings = self
            .monitor
            .map(|m| m.readings.into_inner())
            .unwrap_or_default();
        for reading in &readings {
            metrics::record_stopwatch(reading.kind, &reading.action, reading.elapsed);
        }
        readings
    }
}

/// Compact random trace id.
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_is_compact_and_unique() {
        let a = Context::new();
        let b = Context::new();
        assert_eq!(a.trace_id().len(), 32);
        assert!(!a.trace_id().contains('-'));
        assert_ne!(a.trace_id(), b.trace_id());
    }

    #[test]
    fn test_stopwatch_without_monitor_records_nothing() {
        let ctx = Context::new();
        {
            let _sw = ctx.start_stopwatch("redis", "find");
        }
        assert!(ctx.monitor().is_none());
        assert!(ctx.close().is_empty());
    }

    #[test]
    fn test_stopwatch_stop_and_drop_record_once() {
        let ctx = Context::new().with_monitor(true);
        let sw = ctx.start_stopwatch("redis", "find");
        sw.stop();
        {
            let _sw = ctx.start_stopwatch("dbase", "save");
        }
        let readings = ctx.close();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].kind, "redis");
        assert_eq!(readings[0].action, "find");
        assert_eq!(readings[1].kind, "dbase");
    }

    #[test]
    fn test_log_trace_message_goes_to_sink() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = Context::with_trace_id("t1").with_sink(sink.clone());
        ctx.log_trace_message("write back failed");
        assert_eq!(sink.messages_for("t1"), vec!["write back failed".to_string()]);
        assert!(sink.messages_for("other").is_empty());
    }
}
