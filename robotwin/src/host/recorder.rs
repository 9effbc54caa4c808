//! Append-only telemetry recording.
//!
//! A recording directory holds `frames.jsonl`, one [`TelemetryFrame`] per
//! line, and `events.jsonl`, a session header followed by one entry per
//! diagnostic message.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::host::orchestrator::TelemetrySink;
use crate::telemetry::TelemetryFrame;

pub const FRAMES_FILE: &str = "frames.jsonl";
pub const EVENTS_FILE: &str = "events.jsonl";

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_index: Option<u64>,
    pub message: String,
}

pub struct SimulationRecorder {
    dir: PathBuf,
    session_id: Uuid,
    frames: BufWriter<File>,
    events: BufWriter<File>,
    frame_count: u64,
}

impl SimulationRecorder {
    /// Create `dir` if needed and start a new session there. Existing
    /// recordings in the directory are replaced.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create recording directory: {:?}", dir))?;
        let frames = File::create(dir.join(FRAMES_FILE))
            .with_context(|| format!("Failed to create {:?}", dir.join(FRAMES_FILE)))?;
        let events = File::create(dir.join(EVENTS_FILE))
            .with_context(|| format!("Failed to create {:?}", dir.join(EVENTS_FILE)))?;

        let mut recorder = Self {
            dir,
            session_id: Uuid::new_v4(),
            frames: BufWriter::new(frames),
            events: BufWriter::new(events),
            frame_count: 0,
        };
        recorder.write_event("session_start", None, "recording started")?;
        info!(session = %recorder.session_id, dir = ?recorder.dir, "recording telemetry");
        Ok(recorder)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn record_frame(&mut self, frame: &TelemetryFrame) -> Result<()> {
        serde_json::to_writer(&mut self.frames, frame).context("Failed to serialize frame")?;
        self.frames.write_all(b"\n")?;
        self.frame_count += 1;
        for message in &frame.validation_messages {
            self.write_event("diagnostic", Some(frame.tick_index), message)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.frames.flush().context("Failed to flush frames")?;
        self.events.flush().context("Failed to flush events")?;
        Ok(())
    }

    /// Write the closing event and flush both files.
    pub fn finish(mut self) -> Result<()> {
        let summary = format!("recorded {} frames", self.frame_count);
        self.write_event("session_end", None, &summary)?;
        self.flush()?;
        debug!(session = %self.session_id, frames = self.frame_count, "recording closed");
        Ok(())
    }

    fn write_event(&mut self, kind: &str, tick_index: Option<u64>, message: &str) -> Result<()> {
        let entry = EventEntry {
            timestamp: Utc::now(),
            session_id: self.session_id,
            kind: kind.to_string(),
            tick_index,
            message: message.to_string(),
        };
        serde_json::to_writer(&mut self.events, &entry).context("Failed to serialize event")?;
        self.events.write_all(b"\n")?;
        Ok(())
    }
}

impl TelemetrySink for SimulationRecorder {
    fn publish(&mut self, frame: &TelemetryFrame) -> Result<()> {
        self.record_frame(frame)
    }
}

/// Read back every frame of a recording directory.
pub fn read_frames(dir: impl AsRef<Path>) -> Result<Vec<TelemetryFrame>> {
    let path = dir.as_ref().join(FRAMES_FILE);
    let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid frame on line {}", i + 1))
        })
        .collect()
}

pub fn read_events(dir: impl AsRef<Path>) -> Result<Vec<EventEntry>> {
    let path = dir.as_ref().join(EVENTS_FILE);
    let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("Invalid event line"))
        .collect()
}
