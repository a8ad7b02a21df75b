//! Live sensor access.
//!
//! A provider is asked for access once per entry into live mode. The answer
//! is a value, never a panic: granted (with a running source), denied, or
//! unavailable.

use crate::drive_log::{DriveLogReader, LogRecord};
use crate::error::PipelineError;
use crate::mode::{SampleSource, SourceContext};
use crate::types::*;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::PathBuf;
use std::time::Duration;

pub enum Access {
    Granted(Box<dyn SampleSource>),
    Denied(String),
    Unavailable(String),
}

impl std::fmt::Debug for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Granted(s) => write!(f, "Granted({})", s.name()),
            Access::Denied(m) => write!(f, "Denied({})", m),
            Access::Unavailable(m) => write!(f, "Unavailable({})", m),
        }
    }
}

pub trait SensorProvider: Send {
    fn describe(&self) -> String;
    fn request_access(&mut self) -> Access;
}

// ─── No sensors ─────────────────────────────────────────────────────────────

/// For hosts with no live speed source at all.
pub struct UnavailableProvider {
    reason: String,
}

impl UnavailableProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl SensorProvider for UnavailableProvider {
    fn describe(&self) -> String {
        "no sensors".into()
    }

    fn request_access(&mut self) -> Access {
        Access::Unavailable(self.reason.clone())
    }
}

// ─── Drive-log replay ───────────────────────────────────────────────────────

/// Replays a recorded drive log as if it were a live GPS receiver.
pub struct ReplayProvider {
    path: PathBuf,
}

impl ReplayProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SensorProvider for ReplayProvider {
    fn describe(&self) -> String {
        format!("drive log {:?}", self.path)
    }

    fn request_access(&mut self) -> Access {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Access::Denied(format!("cannot read {:?}: {}", self.path, e))
            }
            Err(e) => return Access::Unavailable(format!("{:?}: {}", self.path, e)),
        };
        match DriveLogReader::open(BufReader::new(file)) {
            Ok(reader) => {
                info!(
                    "Replaying {:?} (recorded at {} Hz)",
                    self.path, reader.header.rate_hz
                );
                Access::Granted(Box::new(ReplaySource::new(reader)))
            }
            Err(e) => Access::Unavailable(format!("{:?}: {}", self.path, e)),
        }
    }
}

/// Streams drive-log records at their recorded pace, re-stamped onto the
/// session clock. Reports the sensor lost once the log runs out.
pub struct ReplaySource<R: BufRead + Send> {
    reader: DriveLogReader<R>,
}

impl<R: BufRead + Send> ReplaySource<R> {
    pub fn new(reader: DriveLogReader<R>) -> Self {
        Self { reader }
    }
}

impl<R: BufRead + Send> SampleSource for ReplaySource<R> {
    fn name(&self) -> &str {
        "replay"
    }

    fn run(&mut self, ctx: SourceContext) {
        let base_us = ctx.now_us();
        let mut first_t: Option<u64> = None;
        let mut count = 0u64;

        while let Some(result) = self.reader.next_record() {
            let record: LogRecord = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("Replay: skipping line: {}", e);
                    continue;
                }
            };
            let origin = *first_t.get_or_insert(record.t());
            let due_us = base_us + record.t().saturating_sub(origin);
            let now = ctx.now_us();
            if due_us > now && !ctx.wait(Duration::from_micros(due_us - now)) {
                return;
            }
            if !ctx.send(record.to_payload(ctx.now_us())) {
                return;
            }
            count += 1;
        }

        debug!("Replay finished after {} records", count);
        ctx.send(SourcePayload::Lost(PipelineError::SensorUnavailable(
            "drive log ended".into(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_log_is_unavailable() {
        let mut p = ReplayProvider::new("/nonexistent/drive.jsonl");
        assert!(matches!(p.request_access(), Access::Unavailable(_)));
    }

    #[test]
    fn test_bad_header_is_unavailable() {
        let path = std::env::temp_dir().join(format!("drive-groove-bad-{}.jsonl", std::process::id()));
        std::fs::write(&path, "{\"format\":\"other\"}\n").unwrap();
        let mut p = ReplayProvider::new(&path);
        let access = p.request_access();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(access, Access::Unavailable(m) if m.contains("unknown format")));
    }

    #[test]
    fn test_valid_log_is_granted() {
        let path = std::env::temp_dir().join(format!("drive-groove-ok-{}.jsonl", std::process::id()));
        std::fs::write(&path, "{\"format\":\"drive-groove\",\"rate_hz\":1}\n{\"t\":0,\"v\":30}\n").unwrap();
        let mut p = ReplayProvider::new(&path);
        let access = p.request_access();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(access, Access::Granted(_)), "{:?}", access);
    }

    #[test]
    fn test_unavailable_provider() {
        let mut p = UnavailableProvider::new("no gps");
        assert!(matches!(p.request_access(), Access::Unavailable(m) if m == "no gps"));
    }
}
