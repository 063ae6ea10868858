//! Tracing layer that appends every event to a log file.
//!
//! Lines look like `[2026-01-02T03:04:05.678+01:00] INFO target: message, key = value`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Flattens an event's fields into one line, message first.
#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl MessageVisitor {
    fn push(&mut self, name: &str, value: String) {
        if name == "message" {
            if self.message.is_empty() {
                self.message = value;
            } else {
                self.message = format!("{value}, {}", self.message);
            }
        } else if self.message.is_empty() {
            self.message = format!("{name} = {value}");
        } else {
            self.message.push_str(&format!(", {name} = {value}"));
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field.name(), value.to_string());
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// A tracing layer that writes log events to a file.
/// Writes full ISO 8601 timestamps for complete log history.
pub struct FileLogLayer {
    writer: Arc<Mutex<File>>,
}

impl FileLogLayer {
    /// Append to `path`, creating it and its parent directories if needed.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(file)),
        })
    }
}

impl<S: Subscriber> Layer<S> for FileLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let target = meta.target();
        let message = if visitor.message.is_empty() {
            target.to_string()
        } else {
            format!("{}: {}", target, visitor.message)
        };

        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
        let log_line = format!("[{}] {} {}\n", timestamp, level_str(*meta.level()), message);

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.write_all(log_line.as_bytes());
            let _ = writer.flush();
        }
    }
}
