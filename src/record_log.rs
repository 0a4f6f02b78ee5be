// src/record_log.rs
//
// Append-only CSV analytics log. The header goes in exactly once, when the
// file is first created; reopening an existing log appends rows only. Every
// row is flushed immediately so a crash mid-session loses at most nothing.

use crate::types::AnalyticsRecord;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const CSV_HEADER: &str = "Timestamp,FrameID,ShotID,Phase,ElbowAngle(deg),KneeAngle(deg),BatSpeed(km/h),BallSpeed(km/h),ArmSpeed(km/h),CoachingFeedback";

pub struct RecordLog {
    writer: BufWriter<File>,
    path: PathBuf,
    rows_written: u64,
}

impl RecordLog {
    pub fn open(path: &Path) -> Result<Self> {
        let is_new = !path.exists();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open record log {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        if is_new {
            writeln!(writer, "{}", CSV_HEADER)?;
            writer.flush()?;
            info!("📄 Record log created: {}", path.display());
        } else {
            info!("📄 Record log appending to: {}", path.display());
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            rows_written: 0,
        })
    }

    /// Append one row and flush it. Feedback text is quoted so rule messages
    /// containing commas cannot shift columns.
    pub fn append(&mut self, rec: &AnalyticsRecord) -> Result<()> {
        writeln!(
            self.writer,
            "{:.2},{},{},{},{},{},{:.2},{:.2},{:.2},\"{}\"",
            rec.timestamp_s,
            rec.frame_id,
            rec.shot_id,
            rec.phase,
            rec.elbow_deg,
            rec.knee_deg,
            rec.bat_kmh,
            rec.ball_kmh,
            rec.arm_kmh,
            rec.feedback.replace('"', "\"\""),
        )
        .with_context(|| format!("failed to write record to {}", self.path.display()))?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ============================================================================
// SHOT EVENT LOG (JSONL)
// ============================================================================

/// One line per completed shot, for post-session tooling. Wall-clock
/// `completed_at` is informational only; replay determinism is carried by
/// the CSV, not by this file.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShotEvent {
    pub shot_id: u64,
    pub start_frame: u64,
    pub end_frame: u64,
    pub frames: usize,
    pub highlight: Option<String>,
    pub peak_bat_kmh: f64,
    pub peak_ball_kmh: f64,
    pub completed_at: String,
}

pub struct ShotEventLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl ShotEventLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open shot event log {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn append(&mut self, event: &ShotEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(self.writer, "{}", line)
            .with_context(|| format!("failed to write shot event to {}", self.path.display()))?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(frame_id: u64) -> AnalyticsRecord {
        AnalyticsRecord {
            timestamp_s: frame_id as f64 / 30.0,
            frame_id,
            shot_id: 1,
            phase: "Downswing",
            elbow_deg: 130,
            knee_deg: 150,
            bat_kmh: 42.5,
            ball_kmh: 80.0,
            arm_kmh: 25.5,
            feedback: "Good control – keep consistency".to_string(),
        }
    }

    #[test]
    fn header_written_once_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");

        {
            let mut log = RecordLog::open(&path).unwrap();
            log.append(&record(0)).unwrap();
            log.append(&record(1)).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("0.00,0,1,Downswing,130,150,42.50,80.00,25.50,"));
    }

    #[test]
    fn reopening_appends_without_duplicate_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");

        {
            let mut log = RecordLog::open(&path).unwrap();
            log.append(&record(0)).unwrap();
        }
        {
            let mut log = RecordLog::open(&path).unwrap();
            log.append(&record(1)).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let headers = contents
            .lines()
            .filter(|l| l.starts_with("Timestamp,"))
            .count();
        assert_eq!(headers, 1);
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn rows_are_gap_free_in_frame_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = RecordLog::open(&path).unwrap();
        for i in 0..10 {
            log.append(&record(i)).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<u64> = contents
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(1).unwrap().parse().unwrap())
            .collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn shot_events_append_one_json_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots.jsonl");
        let mut log = ShotEventLog::open(&path).unwrap();
        for id in 1..=3u64 {
            log.append(&ShotEvent {
                shot_id: id,
                start_frame: id * 10,
                end_frame: id * 10 + 8,
                frames: 9,
                highlight: None,
                peak_bat_kmh: 75.0,
                peak_ball_kmh: 110.0,
                completed_at: "2026-08-27T10:00:00+00:00".to_string(),
            })
            .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(parsed["shot_id"], 3);
        assert_eq!(parsed["frames"], 9);
    }

    #[test]
    fn nested_output_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/log.csv");
        let mut log = RecordLog::open(&path).unwrap();
        log.append(&record(0)).unwrap();
        assert!(path.exists());
    }
}
