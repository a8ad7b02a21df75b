use crate::config::PipelineConfig;
use crate::types::*;
use crossbeam_channel::Receiver;
use log::{error, info};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Records every pipeline event of a session as JSONL, plus a manifest
/// (library, config) up front and per-kind counts at the end.
///
/// ```text
/// sessions/session_<unix>/
///   manifest.json
///   events.jsonl     {"t_us":…, "event":"behavior_changed", "data":{…}}
///   stats.json
/// ```
pub struct DataLogger {
    rx: Receiver<PipelineEvent>,
    clock: SessionClock,
    session_dir: PathBuf,
}

impl DataLogger {
    /// Create the session directory and write the manifest.
    pub fn new(
        rx: Receiver<PipelineEvent>,
        clock: SessionClock,
        output_dir: &Path,
        config: &PipelineConfig,
        tracks: &[Track],
    ) -> io::Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let session_dir = output_dir.join(format!("session_{}", timestamp));
        fs::create_dir_all(&session_dir)?;

        let manifest = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "system": "drive-groove",
            "config": config,
            "tracks": tracks,
        });
        let text = serde_json::to_string_pretty(&manifest).map_err(io::Error::other)?;
        fs::write(session_dir.join("manifest.json"), text)?;

        Ok(Self {
            rx,
            clock,
            session_dir,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Run the logger until the event channel closes. Blocks the calling thread.
    pub fn run(&self) {
        info!("Data logger → {:?}", self.session_dir);

        let events_path = self.session_dir.join("events.jsonl");
        let mut writer = match File::create(&events_path) {
            Ok(f) => BufWriter::new(f),
            Err(e) => {
                error!("Failed to create {:?}: {}", events_path, e);
                return;
            }
        };

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut total: u64 = 0;

        for event in self.rx.iter() {
            let mut line = match serde_json::to_value(&event) {
                Ok(v) => v,
                Err(e) => {
                    error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            line["t_us"] = json!(self.clock.now_us());
            if let Some(kind) = line["event"].as_str() {
                *counts.entry(kind.to_string()).or_default() += 1;
            }
            let _ = writeln!(writer, "{}", line);

            total += 1;
            if total % 100 == 0 {
                let _ = writer.flush();
                info!("Logged {} events", total);
            }
        }
        let _ = writer.flush();

        let stats = json!({
            "total_events": total,
            "duration_s": us_to_secs(self.clock.now_us()),
            "by_kind": counts,
        });
        let written = serde_json::to_string_pretty(&stats)
            .map_err(io::Error::other)
            .and_then(|text| fs::write(self.session_dir.join("stats.json"), text));
        if let Err(e) = written {
            error!("Failed to write stats: {}", e);
        }

        info!("Session saved: {} events → {:?}", total, self.session_dir);
    }
}
