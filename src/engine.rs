// src/engine.rs
//
// Per-frame pipeline orchestrator: detector → biomechanics → segmenter →
// speed → coach, then the sinks. Strictly sequential, one frame at a time,
// with a monotonically increasing frame id. Sink failures (disk full, codec
// trouble) are logged and survived; the frame still produces metrics and
// the record log stays gap-free.

use crate::analysis::{BiomechanicsExtractor, Coach, ShotSegmenter, SpeedEstimator, SwingMetrics};
use crate::detector::PoseDetector;
use crate::highlights::HighlightWriter;
use crate::record_log::{RecordLog, ShotEvent, ShotEventLog};
use crate::types::{AnalyticsRecord, Config, FrameMetrics};
use anyhow::Result;
use opencv::core::Mat;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub shots_completed: u64,
    pub highlights_written: u64,
    pub errors_recovered: u64,
}

pub struct AnalysisEngine<D: PoseDetector> {
    detector: D,
    extractor: BiomechanicsExtractor,
    segmenter: ShotSegmenter,
    speed: SpeedEstimator,
    coach: Coach,
    highlights: HighlightWriter,
    records: RecordLog,
    shot_events: ShotEventLog,
    fps: f64,
    frame_id: u64,
    shot_start_frame: u64,
    peak_bat_kmh: f64,
    peak_ball_kmh: f64,
    stats: SessionStats,
}

impl<D: PoseDetector> AnalysisEngine<D> {
    pub fn new(detector: D, cfg: &Config, fps: f64) -> Result<Self> {
        let out_dir = Path::new(&cfg.video.output_dir);
        Ok(Self {
            detector,
            extractor: BiomechanicsExtractor::new(&cfg.analysis),
            segmenter: ShotSegmenter::new(cfg.phases.clone(), &cfg.segmenter),
            speed: SpeedEstimator::new(&cfg.analysis, fps),
            coach: Coach::new(cfg.coach.clone()),
            highlights: HighlightWriter::new(out_dir, &cfg.video.subject, &cfg.highlights),
            records: RecordLog::open(&out_dir.join(&cfg.records.csv_path))?,
            shot_events: ShotEventLog::open(&out_dir.join("shot_events.jsonl"))?,
            fps,
            frame_id: 0,
            shot_start_frame: 0,
            peak_bat_kmh: 0.0,
            peak_ball_kmh: 0.0,
            stats: SessionStats::default(),
        })
    }

    /// Run the full pipeline over one frame. Returns the metrics plus the
    /// annotated frame for display. An Err here means the frame could not
    /// be analyzed at all; the caller should follow up with
    /// `record_failure` so the log keeps one row per frame.
    pub fn process_frame(&mut self, frame: &Mat) -> Result<(FrameMetrics, Mat)> {
        let frame_id = self.frame_id;

        let detections = self.detector.detect(frame)?;
        let bio = self.extractor.extract(frame, &detections)?;
        let update = self.segmenter.update(bio.elbow, &bio.annotated);

        if update.started {
            self.shot_start_frame = frame_id;
            self.peak_bat_kmh = 0.0;
            self.peak_ball_kmh = 0.0;
        }

        let speeds = self.speed.update(bio.wrist, &bio.gray)?;
        self.peak_bat_kmh = self.peak_bat_kmh.max(speeds.bat_kmh);
        self.peak_ball_kmh = self.peak_ball_kmh.max(speeds.ball_kmh);

        let feedback = self
            .coach
            .advise(&SwingMetrics::new(&speeds, bio.elbow, bio.knee));

        let mut highlight_path = None;
        if update.ended {
            self.stats.shots_completed += 1;
            let frames = update.frames.as_deref().unwrap_or(&[]);
            highlight_path = match self.highlights.write_clip(update.shot_id, frames, self.fps) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Highlight for shot {} failed: {:#}", update.shot_id, e);
                    None
                }
            };
            if highlight_path.is_some() {
                self.stats.highlights_written += 1;
            }

            let event = ShotEvent {
                shot_id: update.shot_id,
                start_frame: self.shot_start_frame,
                end_frame: frame_id,
                frames: frames.len(),
                highlight: highlight_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                peak_bat_kmh: self.peak_bat_kmh,
                peak_ball_kmh: self.peak_ball_kmh,
                completed_at: chrono::Local::now().to_rfc3339(),
            };
            if let Err(e) = self.shot_events.append(&event) {
                warn!("Shot event for shot {} not recorded: {:#}", update.shot_id, e);
            }
        }

        self.write_record(&AnalyticsRecord {
            timestamp_s: frame_id as f64 / self.fps,
            frame_id,
            shot_id: update.shot_id,
            phase: update.phase.as_str(),
            elbow_deg: bio.elbow,
            knee_deg: bio.knee,
            bat_kmh: speeds.bat_kmh,
            ball_kmh: speeds.ball_kmh,
            arm_kmh: speeds.arm_kmh,
            feedback: feedback.to_string(),
        });

        let metrics = FrameMetrics {
            frame_id,
            shot_id: update.shot_id,
            phase: update.phase.as_str(),
            track_label: match bio.track_id {
                Some(id) => format!("ID {}", id),
                None => "Searching...".to_string(),
            },
            weight_label: bio.weight.label(),
            speeds,
            elbow_deg: bio.elbow,
            knee_deg: bio.knee,
            feedback: feedback.to_string(),
            highlight_path,
        };

        self.frame_id += 1;
        self.stats.frames_processed += 1;
        Ok((metrics, bio.annotated))
    }

    /// Substitute a safe default for a frame whose processing failed and
    /// keep the record log gap-free. Uses the same frame id the failed
    /// `process_frame` call would have committed.
    pub fn record_failure(&mut self) -> FrameMetrics {
        let frame_id = self.frame_id;
        let metrics = FrameMetrics::fallback(frame_id);

        self.write_record(&AnalyticsRecord {
            timestamp_s: frame_id as f64 / self.fps,
            frame_id,
            shot_id: metrics.shot_id,
            phase: metrics.phase,
            elbow_deg: 0,
            knee_deg: 0,
            bat_kmh: 0.0,
            ball_kmh: 0.0,
            arm_kmh: 0.0,
            feedback: metrics.feedback.clone(),
        });

        self.frame_id += 1;
        self.stats.frames_processed += 1;
        self.stats.errors_recovered += 1;
        metrics
    }

    fn write_record(&mut self, rec: &AnalyticsRecord) {
        if let Err(e) = self.records.append(rec) {
            warn!("Record for frame {} not written: {:#}", rec.frame_id, e);
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn log_summary(&self) {
        let s = &self.stats;
        info!(
            "📊 Session: {} frames, {} shots, {} highlights, {} recovered errors",
            s.frames_processed, s.shots_completed, s.highlights_written, s.errors_recovered
        );
    }
}
