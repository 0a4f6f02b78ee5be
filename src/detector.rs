// src/detector.rs

use crate::types::{joints, DetectorConfig, PoseDetection};
use anyhow::{Context, Result};
use opencv::{core::Mat, prelude::*};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const POSE_INPUT_SIZE: usize = 640;
const POSE_PREDICTIONS: usize = 8400;
// Per prediction: cx, cy, w, h, person confidence, 17 × (x, y, confidence)
const POSE_ATTRS: usize = 5 + joints::COUNT * 3;
const KPT_CONF_THRESHOLD: f32 = 0.5;
const TRACK_MATCH_IOU: f32 = 0.3;

/// Detector seam: anything that turns a frame into tracked pose detections.
/// The production implementation runs ONNX inference; tests drive the
/// pipeline with scripted detections instead.
pub trait PoseDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<PoseDetection>>;
}

/// One person candidate before track assignment.
#[derive(Debug, Clone)]
struct RawPose {
    bbox: [f32; 4],
    confidence: f32,
    keypoints: Vec<[f32; 2]>,
}

pub struct YoloPoseDetector {
    session: Session,
    tracker: TrackAssigner,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
}

impl YoloPoseDetector {
    pub fn new(cfg: &DetectorConfig) -> Result<Self> {
        info!("Loading pose model: {}", cfg.model_path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(cfg.num_threads)?
            .commit_from_file(&cfg.model_path)?;

        info!("✓ Pose detector initialized");
        Ok(Self {
            session,
            tracker: TrackAssigner::new(cfg.max_track_misses),
            confidence_threshold: cfg.confidence_threshold,
            nms_iou_threshold: cfg.nms_iou_threshold,
        })
    }

    fn detect_frame(&mut self, frame: &Mat) -> Result<Vec<PoseDetection>> {
        let width = frame.cols() as usize;
        let height = frame.rows() as usize;
        let pixels = frame
            .data_bytes()
            .context("pose detector needs a continuous BGR frame")?;

        // 1. Preprocess (letterbox + normalize)
        let (input, scale, pad_x, pad_y) = preprocess(pixels, width, height);

        // 2. Run inference
        let output = self.infer(&input)?;

        // 3. Postprocess (parse poses + NMS)
        let poses = self.postprocess(&output, scale, pad_x, pad_y);

        // 4. Persist track ids across frames
        let detections = self.tracker.assign(poses);

        debug!("Detected {} tracked subjects", detections.len());
        Ok(detections)
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, POSE_INPUT_SIZE, POSE_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }

    fn postprocess(&self, output: &[f32], scale: f32, pad_x: f32, pad_y: f32) -> Vec<RawPose> {
        let mut poses = Vec::new();
        let at = |attr: usize, i: usize| output[POSE_PREDICTIONS * attr + i];

        for i in 0..POSE_PREDICTIONS {
            let confidence = at(4, i);
            if confidence < self.confidence_threshold {
                continue;
            }

            let cx = at(0, i);
            let cy = at(1, i);
            let w = at(2, i);
            let h = at(3, i);

            // Center format to corners, then reverse the letterbox
            let x1 = (cx - w / 2.0 - pad_x) / scale;
            let y1 = (cy - h / 2.0 - pad_y) / scale;
            let x2 = (cx + w / 2.0 - pad_x) / scale;
            let y2 = (cy + h / 2.0 - pad_y) / scale;

            let mut keypoints = Vec::with_capacity(joints::COUNT);
            for k in 0..joints::COUNT {
                let kx = at(5 + k * 3, i);
                let ky = at(5 + k * 3 + 1, i);
                let kc = at(5 + k * 3 + 2, i);
                if kc < KPT_CONF_THRESHOLD {
                    // downstream treats the origin as "joint not seen"
                    keypoints.push([0.0, 0.0]);
                } else {
                    keypoints.push([(kx - pad_x) / scale, (ky - pad_y) / scale]);
                }
            }

            poses.push(RawPose {
                bbox: [x1, y1, x2, y2],
                confidence,
                keypoints,
            });
        }

        debug_assert_eq!(output.len(), POSE_PREDICTIONS * POSE_ATTRS);
        nms(poses, self.nms_iou_threshold)
    }
}

impl PoseDetector for YoloPoseDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<PoseDetection>> {
        self.detect_frame(frame)
    }
}

fn preprocess(src: &[u8], src_w: usize, src_h: usize) -> (Vec<f32>, f32, f32, f32) {
    let target_size = POSE_INPUT_SIZE;

    // Scale to fit inside the square input while keeping the aspect ratio
    let scale = (target_size as f32 / src_w as f32).min(target_size as f32 / src_h as f32);
    let scaled_w = (src_w as f32 * scale) as usize;
    let scaled_h = (src_h as f32 * scale) as usize;

    // Padding to center the image
    let pad_x = (target_size - scaled_w) as f32 / 2.0;
    let pad_y = (target_size - scaled_h) as f32 / 2.0;

    let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

    // Padded canvas, gray background
    let mut canvas = vec![114u8; target_size * target_size * 3];
    for y in 0..scaled_h {
        for x in 0..scaled_w {
            let src_idx = (y * scaled_w + x) * 3;
            let dst_x = x + pad_x as usize;
            let dst_y = y + pad_y as usize;
            let dst_idx = (dst_y * target_size + dst_x) * 3;
            canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
        }
    }

    // Normalize [0, 255] -> [0, 1], HWC -> CHW, BGR -> RGB
    let mut input = vec![0.0f32; 3 * target_size * target_size];
    for c in 0..3 {
        for h in 0..target_size {
            for w in 0..target_size {
                let hwc_idx = (h * target_size + w) * 3 + (2 - c);
                let chw_idx = c * target_size * target_size + h * target_size + w;
                input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
            }
        }
    }

    (input, scale, pad_x, pad_y)
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

fn nms(mut poses: Vec<RawPose>, iou_threshold: f32) -> Vec<RawPose> {
    if poses.is_empty() {
        return poses;
    }

    poses.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while !poses.is_empty() {
        let current = poses.remove(0);
        poses.retain(|p| calculate_iou(&current.bbox, &p.bbox) < iou_threshold);
        keep.push(current);
    }
    keep
}

fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

// ============================================================================
// TRACK ASSIGNMENT
// ============================================================================

struct Track {
    id: i64,
    bbox: [f32; 4],
    misses: u32,
}

/// Greedy IoU matcher that keeps subject ids stable across frames. A track
/// survives `max_misses` unmatched frames before its id is retired; a
/// detection no track claims starts a new id.
pub struct TrackAssigner {
    tracks: Vec<Track>,
    next_id: i64,
    max_misses: u32,
}

impl TrackAssigner {
    pub fn new(max_misses: u32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_misses,
        }
    }

    fn assign(&mut self, poses: Vec<RawPose>) -> Vec<PoseDetection> {
        let mut claimed = vec![false; self.tracks.len()];
        let mut out = Vec::with_capacity(poses.len());

        for pose in poses {
            let mut best: Option<(usize, f32)> = None;
            for (t, track) in self.tracks.iter().enumerate() {
                if claimed[t] {
                    continue;
                }
                let iou = calculate_iou(&track.bbox, &pose.bbox);
                if iou >= TRACK_MATCH_IOU && best.map_or(true, |(_, b)| iou > b) {
                    best = Some((t, iou));
                }
            }

            let id = match best {
                Some((t, _)) => {
                    claimed[t] = true;
                    self.tracks[t].bbox = pose.bbox;
                    self.tracks[t].misses = 0;
                    self.tracks[t].id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        bbox: pose.bbox,
                        misses: 0,
                    });
                    claimed.push(true);
                    id
                }
            };

            out.push(PoseDetection {
                bbox: pose.bbox,
                track_id: id,
                confidence: pose.confidence,
                keypoints: pose.keypoints,
            });
        }

        // Age out tracks nobody claimed this frame
        let max_misses = self.max_misses;
        for (t, track) in self.tracks.iter_mut().enumerate() {
            if !claimed.get(t).copied().unwrap_or(false) {
                track.misses += 1;
            }
        }
        self.tracks.retain(|t| t.misses <= max_misses);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(bbox: [f32; 4]) -> RawPose {
        RawPose {
            bbox,
            confidence: 0.9,
            keypoints: vec![[0.0, 0.0]; joints::COUNT],
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((calculate_iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(calculate_iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence() {
        let mut a = pose([0.0, 0.0, 100.0, 100.0]);
        a.confidence = 0.9;
        let mut b = pose([5.0, 5.0, 105.0, 105.0]);
        b.confidence = 0.6;
        let c = pose([300.0, 300.0, 400.0, 400.0]);

        let kept = nms(vec![a, b, c], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn track_ids_persist_across_overlapping_frames() {
        let mut tracker = TrackAssigner::new(5);
        let first = tracker.assign(vec![pose([0.0, 0.0, 100.0, 100.0])]);
        assert_eq!(first[0].track_id, 1);

        // slight movement keeps the same id
        let second = tracker.assign(vec![pose([5.0, 5.0, 105.0, 105.0])]);
        assert_eq!(second[0].track_id, 1);

        // a disjoint newcomer gets a fresh id
        let third = tracker.assign(vec![
            pose([10.0, 10.0, 110.0, 110.0]),
            pose([500.0, 500.0, 600.0, 600.0]),
        ]);
        assert_eq!(third[0].track_id, 1);
        assert_eq!(third[1].track_id, 2);
    }

    #[test]
    fn track_survives_short_dropout_within_miss_budget() {
        let mut tracker = TrackAssigner::new(2);
        tracker.assign(vec![pose([0.0, 0.0, 100.0, 100.0])]);
        tracker.assign(vec![]);
        tracker.assign(vec![]);
        let back = tracker.assign(vec![pose([0.0, 0.0, 100.0, 100.0])]);
        assert_eq!(back[0].track_id, 1);
    }

    #[test]
    fn track_retired_after_miss_budget_exhausted() {
        let mut tracker = TrackAssigner::new(1);
        tracker.assign(vec![pose([0.0, 0.0, 100.0, 100.0])]);
        tracker.assign(vec![]);
        tracker.assign(vec![]);
        let back = tracker.assign(vec![pose([0.0, 0.0, 100.0, 100.0])]);
        // old id is gone, never reused
        assert_eq!(back[0].track_id, 2);
    }
}
