// src/highlights.rs
//
// Highlight clip writer. One mp4 per qualifying completed shot, named by
// shot id under a per-subject directory, encoded in buffer order at the
// session frame rate. Sequences below the minimum length are noise from
// phase flicker and produce no artifact at all.

use crate::types::HighlightConfig;
use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::VideoWriter,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct HighlightWriter {
    out_dir: PathBuf,
    min_shot_frames: usize,
    clips_written: u64,
}

impl HighlightWriter {
    /// `subject` names the per-subject subdirectory, e.g.
    /// `<output>/highlights/batsman/shot_3.mp4`.
    pub fn new(output_dir: &Path, subject: &str, cfg: &HighlightConfig) -> Self {
        Self {
            out_dir: output_dir.join("highlights").join(subject),
            min_shot_frames: cfg.min_shot_frames,
            clips_written: 0,
        }
    }

    /// Encode one completed shot. Returns the clip path, or None when the
    /// sequence is too short to bother with.
    pub fn write_clip(&mut self, shot_id: u64, frames: &[Mat], fps: f64) -> Result<Option<PathBuf>> {
        if frames.len() < self.min_shot_frames {
            warn!(
                "Shot {} too short for a highlight ({} < {} frames)",
                shot_id,
                frames.len(),
                self.min_shot_frames
            );
            return Ok(None);
        }

        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.clip_path(shot_id);

        let first = &frames[0];
        let size = Size::new(first.cols(), first.rows());
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let mut writer = VideoWriter::new(
            path.to_str()
                .context("highlight path is not valid UTF-8")?,
            fourcc,
            fps,
            size,
            true,
        )?;
        if !writer.is_opened()? {
            anyhow::bail!("could not open highlight writer for {}", path.display());
        }

        for frame in frames {
            writer.write(frame)?;
        }
        writer.release()?;

        self.clips_written += 1;
        info!(
            "🎬 Highlight saved: {} ({} frames)",
            path.display(),
            frames.len()
        );
        Ok(Some(path))
    }

    pub fn clip_path(&self, shot_id: u64) -> PathBuf {
        self.out_dir.join(format!("shot_{}.mp4", shot_id))
    }

    pub fn clips_written(&self) -> u64 {
        self.clips_written
    }
}
