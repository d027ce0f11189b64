//! Load progress reporting.
//!
//! Reports observable progress during `bookshelf load` so users can see which
//! files are being ingested and how far along a large file is. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::time::{Duration, Instant};

/// A single progress event for a directory load.
#[derive(Clone, Debug)]
pub enum LoadProgressEvent {
    /// Walking the input directory (no total yet).
    Discovering { root: String },
    /// Rows committed so far for one file.
    Rows { file: String, n: u64, total: u64 },
    /// A file finished (ingested, skipped or failed); `n` files done of `total`.
    FileDone {
        file: String,
        outcome: &'static str,
        n: u64,
        total: u64,
    },
}

/// Reports load progress. Shared by all ingestion workers.
pub trait LoadProgressReporter: Send + Sync {
    fn report(&self, event: LoadProgressEvent);
}

/// Human-friendly progress on stderr: "load books.xlsx  rows  5,000 / 12,345".
pub struct StderrProgress;

impl LoadProgressReporter for StderrProgress {
    fn report(&self, event: LoadProgressEvent) {
        let line = match &event {
            LoadProgressEvent::Discovering { root } => {
                format!("load {}  discovering...\n", root)
            }
            LoadProgressEvent::Rows { file, n, total } => {
                let pct = if *total > 0 {
                    (*n as f64 / *total as f64) * 100.0
                } else {
                    100.0
                };
                format!(
                    "load {}  rows  {} / {} ({:.1}%)\n",
                    file,
                    format_number(*n),
                    format_number(*total),
                    pct
                )
            }
            LoadProgressEvent::FileDone {
                file,
                outcome,
                n,
                total,
            } => format!(
                "load {}  {}  [{} / {} files]\n",
                file,
                outcome,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl LoadProgressReporter for JsonProgress {
    fn report(&self, event: LoadProgressEvent) {
        let obj = match &event {
            LoadProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root
            }),
            LoadProgressEvent::Rows { file, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "rows",
                "file": file,
                "n": n,
                "total": total
            }),
            LoadProgressEvent::FileDone {
                file,
                outcome,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "file_done",
                "file": file,
                "outcome": outcome,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl LoadProgressReporter for NoProgress {
    fn report(&self, _event: LoadProgressEvent) {}
}

/// Lets an event through at most once per interval.
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when the interval has elapsed since the last accepted tick. The
    /// first call is always accepted.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn LoadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn throttle_accepts_first_then_waits() {
        let mut t = Throttle::new(Duration::from_secs(3600));
        assert!(t.ready());
        assert!(!t.ready());

        let mut eager = Throttle::new(Duration::ZERO);
        assert!(eager.ready());
        assert!(eager.ready());
    }
}
