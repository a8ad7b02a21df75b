//! JSONL drive-log reader: recorded sensor sessions for replay.
//!
//! First line is a header (`{"format":"drive-groove","rate_hz":N}`), then
//! one record per line, either a speed reading or a GPS fix:
//!
//! ```text
//! {"t":1000000,"v":42.5}
//! {"t":2000000,"lat":48.8566,"lon":2.3522,"sp":11.8,"acc":5.0}
//! ```
//!
//! Works with any `BufRead`: files, in-memory buffers, stdin.

use crate::types::{GpsFix, RawReading, SourcePayload};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

pub const FORMAT: &str = "drive-groove";

#[derive(Debug)]
pub struct DriveLogHeader {
    pub format: String,
    pub rate_hz: u32,
}

/// One recorded line. `t` is microseconds since the start of recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogRecord {
    Fix {
        t: u64,
        lat: f64,
        lon: f64,
        /// m/s
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sp: Option<f64>,
        #[serde(default)]
        acc: f64,
    },
    Reading {
        t: u64,
        /// km/h; absent when the sensor had no speed
        #[serde(default)]
        v: Option<f64>,
    },
}

impl LogRecord {
    pub fn t(&self) -> u64 {
        match self {
            LogRecord::Fix { t, .. } | LogRecord::Reading { t, .. } => *t,
        }
    }

    /// Re-stamp the record onto the live session clock.
    pub fn to_payload(&self, timestamp_us: u64) -> SourcePayload {
        match *self {
            LogRecord::Fix { lat, lon, sp, acc, .. } => SourcePayload::Fix(GpsFix {
                timestamp_us,
                latitude: lat,
                longitude: lon,
                speed_mps: sp,
                accuracy_m: acc,
            }),
            LogRecord::Reading { v, .. } => {
                SourcePayload::Reading(RawReading::sensor(timestamp_us, v))
            }
        }
    }
}

/// Line-by-line drive-log reader.
pub struct DriveLogReader<R: BufRead> {
    reader: R,
    pub header: DriveLogHeader,
    line_buf: String,
}

impl<R: BufRead> DriveLogReader<R> {
    /// Read and validate the header line.
    pub fn open(mut reader: R) -> Result<Self, String> {
        let mut first_line = String::new();
        reader
            .read_line(&mut first_line)
            .map_err(|e| format!("read header: {}", e))?;

        let first_line = first_line.trim();
        if first_line.is_empty() {
            return Err("empty file".into());
        }

        let raw: serde_json::Value =
            serde_json::from_str(first_line).map_err(|e| format!("parse header: {}", e))?;

        let format = raw["format"]
            .as_str()
            .ok_or("missing \"format\" field")?
            .to_string();
        if format != FORMAT {
            return Err(format!("unknown format: {}", format));
        }
        let rate_hz = raw["rate_hz"].as_u64().unwrap_or(1) as u32;

        Ok(Self {
            reader,
            header: DriveLogHeader { format, rate_hz },
            line_buf: String::new(),
        })
    }

    /// Next record. `None` at EOF, `Err` for an unparseable line.
    pub fn next_record(&mut self) -> Option<Result<LogRecord, String>> {
        loop {
            self.line_buf.clear();
            match self.reader.read_line(&mut self.line_buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = self.line_buf.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(
                        serde_json::from_str::<LogRecord>(trimmed)
                            .map_err(|e| format!("parse record: {}", e)),
                    );
                }
                Err(e) => return Some(Err(format!("read line: {}", e))),
            }
        }
    }

    /// All remaining records, skipping malformed lines.
    pub fn read_all(mut self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        while let Some(result) = self.next_record() {
            if let Ok(r) = result {
                records.push(r);
            }
        }
        records
    }
}
