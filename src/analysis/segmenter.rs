// src/analysis/segmenter.rs
//
// Shot-phase state machine + bounded frame ring buffer.
//
// The phase is a pure function of the instantaneous elbow angle; there is
// no debounce, so a noisy elbow reading can flicker phases and cut a shot
// short. That responsiveness is intentional for live coaching.

use crate::types::{Phase, PhaseConfig, SegmenterConfig, ShotUpdate};
use opencv::{core::Mat, prelude::*};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub struct ShotSegmenter {
    phase_cfg: PhaseConfig,
    buffer_capacity: usize,
    buffer: VecDeque<Mat>,
    active: bool,
    /// Last allocated shot id; reported while idle so consumers keep a
    /// stable reference to the most recent shot.
    shot_id: u64,
}

impl ShotSegmenter {
    pub fn new(phase_cfg: PhaseConfig, cfg: &SegmenterConfig) -> Self {
        Self {
            phase_cfg,
            buffer_capacity: cfg.buffer_capacity.max(1),
            buffer: VecDeque::with_capacity(cfg.buffer_capacity.max(1)),
            active: false,
            shot_id: 0,
        }
    }

    /// Advance the state machine by one frame. `annotated` is buffered
    /// (cloned) on every active frame, including the one that starts the
    /// shot; the ending frame returns the whole sequence and clears state.
    pub fn update(&mut self, elbow_deg: i32, annotated: &Mat) -> ShotUpdate {
        let phase = Phase::from_elbow(elbow_deg, &self.phase_cfg);
        let mut started = false;
        let mut ended = false;
        let mut frames = None;

        if phase == Phase::Backlift && !self.active {
            self.shot_id += 1;
            self.active = true;
            self.buffer.clear();
            started = true;
            info!("🏏 Shot {} started (elbow {}°)", self.shot_id, elbow_deg);
        }

        if self.active {
            match annotated.try_clone() {
                Ok(copy) => {
                    if self.buffer.len() == self.buffer_capacity {
                        self.buffer.pop_front();
                    }
                    self.buffer.push_back(copy);
                }
                // a shorter highlight beats one with a blank frame in it
                Err(e) => warn!("Shot {}: could not buffer frame: {}", self.shot_id, e),
            }
        }

        if phase == Phase::FollowThrough && self.active {
            self.active = false;
            ended = true;
            let seq: Vec<Mat> = self.buffer.drain(..).collect();
            debug!("Shot {} ended with {} buffered frames", self.shot_id, seq.len());
            frames = Some(seq);
        }

        ShotUpdate {
            shot_id: self.shot_id,
            phase,
            started,
            ended,
            frames,
        }
    }

    pub fn shot_in_progress(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmenterConfig;

    fn segmenter(capacity: usize) -> ShotSegmenter {
        ShotSegmenter::new(
            PhaseConfig::default(),
            &SegmenterConfig {
                buffer_capacity: capacity,
            },
        )
    }

    fn frame() -> Mat {
        Mat::default()
    }

    #[test]
    fn phase_thresholds() {
        let cfg = PhaseConfig::default();
        assert_eq!(Phase::from_elbow(151, &cfg), Phase::Backlift);
        assert_eq!(Phase::from_elbow(150, &cfg), Phase::Downswing);
        assert_eq!(Phase::from_elbow(121, &cfg), Phase::Downswing);
        assert_eq!(Phase::from_elbow(120, &cfg), Phase::Contact);
        assert_eq!(Phase::from_elbow(91, &cfg), Phase::Contact);
        assert_eq!(Phase::from_elbow(90, &cfg), Phase::FollowThrough);
        assert_eq!(Phase::from_elbow(0, &cfg), Phase::FollowThrough);
    }

    #[test]
    fn idle_reports_zero_before_any_shot() {
        let mut s = segmenter(10);
        let u = s.update(100, &frame());
        assert_eq!(u.shot_id, 0);
        assert!(!u.started && !u.ended);
        assert!(u.frames.is_none());
    }

    #[test]
    fn full_shot_lifecycle() {
        let mut s = segmenter(10);

        let u = s.update(160, &frame());
        assert!(u.started);
        assert_eq!(u.shot_id, 1);
        assert!(s.shot_in_progress());

        // mid-shot frames buffer without events
        let u = s.update(130, &frame());
        assert!(!u.started && !u.ended);
        assert_eq!(u.phase, Phase::Downswing);
        s.update(100, &frame());

        // follow-through ends the shot and releases the whole sequence,
        // ending frame included
        let u = s.update(60, &frame());
        assert!(u.ended);
        assert_eq!(u.shot_id, 1);
        assert_eq!(u.frames.as_ref().map(Vec::len), Some(4));
        assert!(!s.shot_in_progress());

        // the sequence is gone after the ending frame
        let u = s.update(100, &frame());
        assert!(u.frames.is_none());
        assert_eq!(u.shot_id, 1);
    }

    #[test]
    fn backlift_during_active_shot_does_not_restart() {
        let mut s = segmenter(10);
        assert!(s.update(160, &frame()).started);
        let u = s.update(170, &frame());
        assert!(!u.started);
        assert_eq!(u.shot_id, 1);
    }

    #[test]
    fn shot_ids_increase_monotonically() {
        let mut s = segmenter(10);
        s.update(160, &frame());
        s.update(60, &frame());
        let u = s.update(160, &frame());
        assert!(u.started);
        assert_eq!(u.shot_id, 2);
        let u = s.update(60, &frame());
        assert!(u.ended);
        assert_eq!(u.shot_id, 2);
    }

    #[test]
    fn ring_buffer_evicts_oldest_beyond_capacity() {
        let mut s = segmenter(3);
        s.update(160, &frame());
        for _ in 0..5 {
            s.update(130, &frame());
        }
        let u = s.update(60, &frame());
        // 7 active frames seen, capacity 3 kept
        assert_eq!(u.frames.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn new_shot_starts_from_an_empty_buffer() {
        let mut s = segmenter(10);
        s.update(160, &frame());
        s.update(130, &frame());
        s.update(60, &frame());

        s.update(160, &frame());
        let u = s.update(60, &frame());
        // only the second shot's two frames, nothing from the first
        assert_eq!(u.frames.as_ref().map(Vec::len), Some(2));
    }
}
