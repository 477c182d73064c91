//! Append-only structured JSON-lines logging with a graceful degradation
//! chain: primary file sink → stderr-with-prefix → silent discard. A logging
//! failure must never abort a request or crash the process. See §10.3.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::core::config::Config;

/// Severity of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Routine lifecycle events: startup, shutdown, reload, config resolution.
    Info,
    /// Recoverable degradation: unit-fallback heuristic engaged, subprocess restarted.
    Warn,
    /// A fault was surfaced to a caller: `PredictorFault`, `SubprocessFailure`.
    Error,
}

enum Sink {
    File(File),
    Stderr,
    Discard,
}

struct Writer {
    sink: Mutex<Sink>,
}

impl Writer {
    fn from_config(config: &Config) -> Self {
        let sink = match config.log_format.as_str() {
            "none" => Sink::Discard,
            "stderr" => Sink::Stderr,
            _ => open_primary(&config.log_path).unwrap_or(Sink::Stderr),
        };
        Self {
            sink: Mutex::new(sink),
        }
    }

    fn write_line(&self, line: &str) {
        let mut sink = self.sink.lock();
        let demoted = match &mut *sink {
            Sink::File(file) => {
                if writeln!(file, "{line}").is_err() {
                    eprintln!("[log-sink-degraded] {line}");
                    true
                } else {
                    false
                }
            }
            Sink::Stderr => {
                eprintln!("{line}");
                false
            }
            Sink::Discard => false,
        };
        if demoted {
            *sink = Sink::Stderr;
        }
    }
}

fn open_primary(path: &std::path::Path) -> Option<Sink> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
        .map(Sink::File)
}

static WRITER: OnceLock<Writer> = OnceLock::new();

/// Initialize the global log sink from `config`. Subsequent calls are no-ops —
/// the first caller (the supervisor, at startup) wins. Tests that need an
/// isolated sink should call [`log_event`] indirectly through a fresh process
/// or simply tolerate stderr fallback, since `OnceLock` cannot be re-armed.
pub fn init(config: &Config) {
    let _ = WRITER.set(Writer::from_config(config));
}

fn writer() -> &'static Writer {
    WRITER.get_or_init(|| Writer {
        sink: Mutex::new(Sink::Stderr),
    })
}

#[derive(Serialize)]
struct LogLine<'a> {
    #[serde(rename = "ts")]
    timestamp: chrono::DateTime<chrono::Utc>,
    level: Level,
    event: &'a str,
    #[serde(flatten)]
    fields: Value,
}

/// Emit a single structured log event. Never panics or propagates an error —
/// sink failures silently demote to the next tier in the degradation chain.
pub fn log_event(level: Level, event: &str, fields: Value) {
    let line = LogLine {
        timestamp: chrono::Utc::now(),
        level,
        event,
        fields,
    };
    match serde_json::to_string(&line) {
        Ok(json) => writer().write_line(&json),
        Err(_) => eprintln!("[log-serialize-failed] event={event}"),
    }
}

/// Convenience wrapper for [`Level::Info`].
pub fn log_info(event: &str, fields: Value) {
    log_event(Level::Info, event, fields);
}

/// Convenience wrapper for [`Level::Warn`].
pub fn log_warn(event: &str, fields: Value) {
    log_event(Level::Warn, event, fields);
}

/// Convenience wrapper for [`Level::Error`].
pub fn log_error(event: &str, fields: Value) {
    log_event(Level::Error, event, fields);
}
