// src/main.rs

mod analysis;
mod config;
mod detector;
mod engine;
mod highlights;
mod record_log;
mod types;
mod worker;

use anyhow::Result;
use detector::YoloPoseDetector;
use engine::SessionStats;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;
use walkdir::WalkDir;
use worker::WorkerEvent;

const CONFIG_PATH: &str = "config.yaml";
const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

fn main() -> Result<()> {
    let cfg = Config::load_or_default(CONFIG_PATH)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter)),
        )
        .init();

    info!("🏏 Cricket batting analytics");
    info!(
        "Input: {} | Output: {} | Subject: {}",
        cfg.video.input_dir, cfg.video.output_dir, cfg.video.subject
    );

    let videos = discover_videos(&cfg.video.input_dir);
    if videos.is_empty() {
        warn!("No videos found under {}", cfg.video.input_dir);
        return Ok(());
    }
    info!("Found {} video(s)", videos.len());

    let mut totals = SessionStats::default();
    for video in videos {
        match process_video(&video, &cfg) {
            Ok(stats) => {
                totals.frames_processed += stats.frames_processed;
                totals.shots_completed += stats.shots_completed;
                totals.highlights_written += stats.highlights_written;
                totals.errors_recovered += stats.errors_recovered;
            }
            Err(e) => warn!("Skipping {}: {:#}", video.display(), e),
        }
    }

    info!("═══════════════════════════════════════════");
    info!(
        "✅ Done: {} frames, {} shots, {} highlights, {} recovered errors",
        totals.frames_processed,
        totals.shots_completed,
        totals.highlights_written,
        totals.errors_recovered
    );
    Ok(())
}

fn process_video(video: &PathBuf, cfg: &Config) -> Result<SessionStats> {
    let detector = YoloPoseDetector::new(&cfg.detector)?;
    let (handle, rx) = worker::spawn(video.clone(), cfg.clone(), detector);

    for event in rx {
        match event {
            WorkerEvent::Frame { metrics, .. } => {
                if metrics.frame_id % 100 == 0 {
                    debug!(
                        "Frame {}: shot {} {} | bat {:.1} km/h | {}",
                        metrics.frame_id,
                        metrics.shot_id,
                        metrics.phase,
                        metrics.speeds.bat_kmh,
                        metrics.feedback
                    );
                }
                if let Some(path) = &metrics.highlight_path {
                    info!("Highlight ready: {}", path.display());
                }
            }
            WorkerEvent::Error { message, metrics } => {
                warn!("Frame {} recovered: {}", metrics.frame_id, message);
            }
            WorkerEvent::Finished { stats } => {
                info!(
                    "Finished {}: {} frames, {} shots",
                    video.display(),
                    stats.frames_processed,
                    stats.shots_completed
                );
            }
        }
    }

    handle.join()
}

fn discover_videos(input_dir: &str) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    videos.sort();
    videos
}
