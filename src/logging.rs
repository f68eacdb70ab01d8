//! Structured logger handed through transaction options and facades.
//!
//! A [`Logger`] accumulates key/value fields and forwards records to a
//! [`LogSink`]. The default sink emits `tracing` events; [`Logger::discard`]
//! drops everything, which keeps internal introspection calls quiet.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::Level;

use crate::context::Context;

/// A single emitted log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub trait LogSink: Send + Sync {
    fn emit(&self, record: LogRecord);
}

/// Keys logged by the crate itself; each one becomes a named `tracing` field.
const KNOWN_FIELDS: [&str; 8] = [
    "type",
    "query",
    "args",
    "duration",
    "error",
    "attempt",
    "sleep_interval",
    "request_id",
];

/// Forwards records to the `tracing` dispatcher under the `stowdb` target.
///
/// Known keys are emitted as event fields of the same name. Any other
/// fields are rendered together into a single `fields` value.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        let extra: Vec<(String, String)> = record
            .fields
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .cloned()
            .collect();
        let extra = (!extra.is_empty()).then(|| render_fields(&extra));

        let kind = record.field("type");
        let query = record.field("query");
        let args = record.field("args");
        let duration = record.field("duration");
        let error = record.field("error");
        let attempt = record.field("attempt");
        let sleep_interval = record.field("sleep_interval");
        let request_id = record.field("request_id");

        macro_rules! structured_event {
            ($level:expr) => {
                tracing::event!(
                    target: "stowdb",
                    $level,
                    "type" = kind,
                    query = query,
                    args = args,
                    duration = duration,
                    error = error,
                    attempt = attempt,
                    sleep_interval = sleep_interval,
                    request_id = request_id,
                    fields = extra.as_deref(),
                    "{}",
                    record.message
                )
            };
        }

        match record.level {
            Level::ERROR => structured_event!(Level::ERROR),
            Level::WARN => structured_event!(Level::WARN),
            Level::INFO => structured_event!(Level::INFO),
            Level::DEBUG => structured_event!(Level::DEBUG),
            _ => structured_event!(Level::TRACE),
        }
    }
}

/// Keeps every record in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

#[derive(Clone)]
pub struct Logger {
    sink: Option<Arc<dyn LogSink>>,
    fields: Vec<(String, String)>,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink: Some(sink),
            fields: Vec::new(),
        }
    }

    /// Logger writing to a shared [`MemorySink`].
    pub fn memory(sink: &MemorySink) -> Self {
        Self::new(Arc::new(sink.clone()))
    }

    /// Logger that drops every record.
    pub fn discard() -> Self {
        Self {
            sink: None,
            fields: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn with_field(&self, key: &str, value: impl fmt::Display) -> Self {
        let mut logger = self.clone();
        if logger.sink.is_some() {
            logger.fields.push((key.to_string(), value.to_string()));
        }
        logger
    }

    /// Derives a logger carrying the values bound to `ctx`.
    pub fn with_context(&self, ctx: &Context) -> Self {
        let mut logger = self.clone();
        if logger.sink.is_some() {
            logger.fields.extend(ctx.values().iter().cloned());
        }
        logger
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    fn log(&self, level: Level, message: &str) {
        if let Some(sink) = &self.sink {
            sink.emit(LogRecord {
                level,
                message: message.to_string(),
                fields: self.fields.clone(),
            });
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("enabled", &self.is_enabled())
            .field("fields", &self.fields)
            .finish()
    }
}

fn render_fields(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value:?}"))
        .collect::<Vec<_>>()
        .join(" ")
}
