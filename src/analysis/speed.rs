// src/analysis/speed.rs
//
// Bat, ball and arm speed estimation.
//
// Bat speed comes from wrist pixel displacement between consecutive frames,
// converted through the meters-per-pixel calibration and smoothed with an
// EMA. Ball speed comes from frame differencing on the grayscale stream:
// the largest motion blob within a plausible area band is taken as the
// ball, its center tracked like the wrist, and the samples averaged over a
// short rolling window. Arm speed is a derived fraction of bat speed.

use crate::types::{AnalysisConfig, SpeedReport};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point, Vector},
    imgproc,
    prelude::*,
};
use std::collections::VecDeque;

const DIFF_THRESHOLD: f64 = 25.0;
const MEDIAN_BLUR_KSIZE: i32 = 5;
const ARM_FRACTION: f64 = 0.6;

pub struct SpeedEstimator {
    meters_per_pixel: f64,
    fps: f64,
    alpha: f64,
    cap_kmh: f64,
    area_min: f64,
    area_max: f64,
    window_len: usize,

    prev_wrist: Option<(f32, f32)>,
    bat_ema: Option<f64>,

    prev_gray: Option<Mat>,
    prev_ball: Option<(f32, f32)>,
    ball_window: VecDeque<f64>,
}

impl SpeedEstimator {
    pub fn new(cfg: &AnalysisConfig, fps: f64) -> Self {
        Self {
            meters_per_pixel: cfg.meters_per_pixel,
            fps,
            alpha: cfg.bat_ema_alpha,
            cap_kmh: cfg.speed_cap_kmh,
            area_min: cfg.ball_area_min,
            area_max: cfg.ball_area_max,
            window_len: cfg.ball_window.max(1),
            prev_wrist: None,
            bat_ema: None,
            prev_gray: None,
            prev_ball: None,
            ball_window: VecDeque::with_capacity(cfg.ball_window.max(1)),
        }
    }

    /// One frame's worth of speed estimates.
    pub fn update(&mut self, wrist: Option<(f32, f32)>, gray: &Mat) -> Result<SpeedReport> {
        let bat_kmh = self.update_bat(wrist);
        let center = self.motion_blob(gray)?;
        let ball_kmh = self.track_ball_center(center);
        Ok(SpeedReport {
            bat_kmh,
            ball_kmh,
            arm_kmh: round2(bat_kmh * ARM_FRACTION),
        })
    }

    /// Bat speed from the wrist track. A frame with no displacement sample
    /// (wrist lost, or the first wrist after a dropout) reports 0; the EMA
    /// itself survives, so smoothing resumes from the old average once two
    /// consecutive wrist positions are seen again.
    pub fn update_bat(&mut self, wrist: Option<(f32, f32)>) -> f64 {
        let Some(w) = wrist else {
            self.prev_wrist = None;
            return 0.0;
        };
        let Some(p) = self.prev_wrist else {
            self.prev_wrist = Some(w);
            return 0.0;
        };

        let raw = self.pixels_to_kmh(dist(p, w));
        self.bat_ema = Some(match self.bat_ema {
            Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
            None => raw,
        });
        self.prev_wrist = Some(w);
        self.smoothed_bat()
    }

    /// Ball speed from a detected blob center, windowed over the last few
    /// samples. Tracked the same way as the wrist: a miss reports 0 and
    /// restarts displacement tracking, and the seed frame after a miss also
    /// reports 0. The window is left untouched across misses, so the average
    /// recovers as soon as a new displacement sample lands.
    pub fn track_ball_center(&mut self, center: Option<(f32, f32)>) -> f64 {
        let Some(c) = center else {
            self.prev_ball = None;
            return 0.0;
        };
        let Some(p) = self.prev_ball else {
            self.prev_ball = Some(c);
            return 0.0;
        };

        let raw = self.pixels_to_kmh(dist(p, c));
        if self.ball_window.len() == self.window_len {
            self.ball_window.pop_front();
        }
        self.ball_window.push_back(raw);
        self.prev_ball = Some(c);

        if self.ball_window.is_empty() {
            return 0.0;
        }
        let mean = self.ball_window.iter().sum::<f64>() / self.ball_window.len() as f64;
        round2(mean.min(self.cap_kmh))
    }

    /// Frame-differencing ball candidate: absdiff against the previous
    /// gray frame, threshold, despeckle, then the largest external contour
    /// gated by the plausible-area band. The very first frame has nothing
    /// to diff against and yields no candidate.
    fn motion_blob(&mut self, gray: &Mat) -> Result<Option<(f32, f32)>> {
        let prev = match self.prev_gray.take() {
            Some(p) => p,
            None => {
                self.prev_gray = Some(gray.try_clone()?);
                return Ok(None);
            }
        };

        let mut diff = Mat::default();
        core::absdiff(&prev, gray, &mut diff)?;
        let mut thresh = Mat::default();
        imgproc::threshold(&diff, &mut thresh, DIFF_THRESHOLD, 255.0, imgproc::THRESH_BINARY)?;
        let mut cleaned = Mat::default();
        imgproc::median_blur(&thresh, &mut cleaned, MEDIAN_BLUR_KSIZE)?;

        let mut contours: Vector<Vector<Point>> = Vector::new();
        imgproc::find_contours(
            &cleaned,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        self.prev_gray = Some(gray.try_clone()?);

        // Largest blob overall, then the area gate. A dominant non-ball
        // mover (the batsman) disqualifies the frame rather than letting a
        // smaller spurious blob stand in for the ball.
        let mut largest: Option<(f64, Vector<Point>)> = None;
        for contour in contours.iter() {
            let area = imgproc::contour_area(&contour, false)?;
            if largest.as_ref().map_or(true, |(a, _)| area > *a) {
                largest = Some((area, contour));
            }
        }

        match largest {
            Some((area, contour)) if area >= self.area_min && area <= self.area_max => {
                let r = imgproc::bounding_rect(&contour)?;
                Ok(Some((
                    r.x as f32 + r.width as f32 / 2.0,
                    r.y as f32 + r.height as f32 / 2.0,
                )))
            }
            _ => Ok(None),
        }
    }

    fn pixels_to_kmh(&self, px: f64) -> f64 {
        px * self.meters_per_pixel * self.fps * 3.6
    }

    fn smoothed_bat(&self) -> f64 {
        round2(self.bat_ema.unwrap_or(0.0).min(self.cap_kmh))
    }
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f64 {
    let dx = (b.0 - a.0) as f64;
    let dy = (b.1 - a.1) as f64;
    (dx * dx + dy * dy).sqrt()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
