// src/analysis/biomechanics.rs
//
// Target selection + biomechanics extraction.
//
// Selects the subject of interest among the frame's tracked detections
// (pinned track id, or largest box as the batsman heuristic), computes
// joint angles and the weight-transfer descriptor, and annotates every
// detection onto a frame copy for downstream display (pinned target in
// green, everyone else orange). Transient pose
// faults (subject not visible, occluded joints) degrade to a "searching"
// fallback frame — the per-frame stream never stops here.

use crate::types::{joints, AnalysisConfig, BiomechanicsFrame, PoseDetection, WeightTransfer};
use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

const COLOR_TARGET: (f64, f64, f64) = (0.0, 255.0, 0.0); // green, BGR
const COLOR_OTHER: (f64, f64, f64) = (0.0, 165.0, 255.0); // orange, BGR

pub struct BiomechanicsExtractor {
    target_id: Option<i64>,
    min_ankle_span_px: f32,
}

impl BiomechanicsExtractor {
    pub fn new(cfg: &AnalysisConfig) -> Self {
        Self {
            target_id: cfg.target_track_id,
            min_ankle_span_px: cfg.min_ankle_span_px,
        }
    }

    /// Process one frame's detections. Errors here are frame-level opencv
    /// failures only; pose-level problems always degrade to the fallback.
    pub fn extract(&self, frame: &Mat, detections: &[PoseDetection]) -> Result<BiomechanicsFrame> {
        let mut annotated = frame.try_clone()?;
        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

        let selected = select_target(detections, self.target_id);

        // Label everyone so an operator can pick a track id by eye. Only an
        // explicitly pinned id earns the target color; an auto-selected
        // subject stays orange like everyone else.
        for det in detections {
            let is_pinned = self.target_id == Some(det.track_id);
            draw_subject(&mut annotated, det, is_pinned)?;
        }

        let mut out = BiomechanicsFrame {
            elbow: 0,
            knee: 0,
            weight: WeightTransfer::Neutral,
            wrist: None,
            elbow_pt: None,
            track_id: None,
            annotated,
            gray,
        };

        if let Some(det) = selected {
            if let Some(m) = subject_metrics(&det.keypoints, self.min_ankle_span_px) {
                out.elbow = m.elbow;
                out.knee = m.knee;
                out.weight = m.weight;
                out.wrist = Some(m.wrist);
                out.elbow_pt = Some(m.elbow_pt);
                out.track_id = Some(det.track_id);
            }
        }

        Ok(out)
    }
}

/// Selection policy: exact match when a target id is pinned, otherwise the
/// largest bounding box (the batsman is the largest tracked figure).
/// Re-runs fresh every frame — an auto-pick does not pin future frames.
pub fn select_target(
    detections: &[PoseDetection],
    target_id: Option<i64>,
) -> Option<&PoseDetection> {
    match target_id {
        Some(id) => detections.iter().find(|d| d.track_id == id),
        None => detections.iter().max_by(|a, b| {
            a.bbox_area()
                .partial_cmp(&b.bbox_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
    }
}

/// Angle at `b` between rays b→a and b→c, in integer degrees within [0, 180].
/// The cosine is clamped before acos so floating-point drift never produces
/// a domain error; a zero-length limb vector yields 0 instead of NaN.
pub fn joint_angle(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> i32 {
    let ba = (a.0 - b.0, a.1 - b.1);
    let bc = (c.0 - b.0, c.1 - b.1);
    let norm_ba = (ba.0 * ba.0 + ba.1 * ba.1).sqrt();
    let norm_bc = (bc.0 * bc.0 + bc.1 * bc.1).sqrt();
    let denom = norm_ba * norm_bc;
    if denom <= f32::EPSILON {
        return 0;
    }
    let cos = ((ba.0 * bc.0 + ba.1 * bc.1) / denom).clamp(-1.0, 1.0);
    (cos.acos().to_degrees().round() as i32).clamp(0, 180)
}

/// Weight distribution from hip-center x relative to the ankle span.
/// A span narrower than `min_span_px` (subject far away or occluded) reports
/// Balanced rather than dividing by a near-zero width.
pub fn weight_transfer(kpts: &[[f32; 2]], min_span_px: f32) -> WeightTransfer {
    let (l_hip, r_hip, l_ankle, r_ankle) = match (
        kpt(kpts, joints::L_HIP),
        kpt(kpts, joints::R_HIP),
        kpt(kpts, joints::L_ANKLE),
        kpt(kpts, joints::R_ANKLE),
    ) {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => return WeightTransfer::Neutral,
    };

    let hip_center_x = (l_hip.0 + r_hip.0) / 2.0;
    let span = (l_ankle.0 - r_ankle.0).abs();
    if span < min_span_px {
        return WeightTransfer::Balanced;
    }

    let min_x = l_ankle.0.min(r_ankle.0);
    let max_x = l_ankle.0.max(r_ankle.0);
    let ratio = ((hip_center_x - min_x) / (max_x - min_x)).clamp(0.0, 1.0);

    if ratio > 0.6 {
        WeightTransfer::Front((ratio * 100.0) as u8)
    } else if ratio < 0.4 {
        WeightTransfer::Back(((1.0 - ratio) * 100.0) as u8)
    } else {
        WeightTransfer::Balanced
    }
}

struct SubjectMetrics {
    elbow: i32,
    knee: i32,
    weight: WeightTransfer,
    wrist: (f32, f32),
    elbow_pt: (f32, f32),
}

/// None when any joint needed for the angles is missing — the caller then
/// reports the same fallback as "no target found".
fn subject_metrics(kpts: &[[f32; 2]], min_span_px: f32) -> Option<SubjectMetrics> {
    let shoulder = kpt(kpts, joints::R_SHOULDER)?;
    let elbow_pt = kpt(kpts, joints::R_ELBOW)?;
    let wrist = kpt(kpts, joints::R_WRIST)?;
    let hip = kpt(kpts, joints::R_HIP)?;
    let knee_pt = kpt(kpts, joints::R_KNEE)?;
    let ankle = kpt(kpts, joints::R_ANKLE)?;

    Some(SubjectMetrics {
        elbow: joint_angle(shoulder, elbow_pt, wrist),
        knee: joint_angle(hip, knee_pt, ankle),
        weight: weight_transfer(kpts, min_span_px),
        wrist,
        elbow_pt,
    })
}

/// A joint the model could not see comes back at the origin.
fn kpt(kpts: &[[f32; 2]], idx: usize) -> Option<(f32, f32)> {
    let p = kpts.get(idx)?;
    if p[0] == 0.0 && p[1] == 0.0 {
        return None;
    }
    Some((p[0], p[1]))
}

fn draw_subject(annotated: &mut Mat, det: &PoseDetection, is_target: bool) -> Result<()> {
    let (b, g, r) = if is_target { COLOR_TARGET } else { COLOR_OTHER };
    let color = core::Scalar::new(b, g, r, 0.0);

    let x1 = det.bbox[0] as i32;
    let y1 = det.bbox[1] as i32;
    let x2 = det.bbox[2] as i32;
    let y2 = det.bbox[3] as i32;

    imgproc::rectangle(
        annotated,
        core::Rect::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0)),
        color,
        2,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        annotated,
        &format!("ID: {}", det.track_id),
        core::Point::new(x1, y1 - 10),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.7,
        color,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(track_id: i64, bbox: [f32; 4]) -> PoseDetection {
        PoseDetection {
            bbox,
            track_id,
            confidence: 0.9,
            keypoints: vec![[0.0, 0.0]; joints::COUNT],
        }
    }

    #[test]
    fn joint_angle_straight_and_right() {
        assert_eq!(joint_angle((0.0, 0.0), (1.0, 0.0), (2.0, 0.0)), 180);
        assert_eq!(joint_angle((0.0, 0.0), (1.0, 0.0), (1.0, 1.0)), 90);
    }

    #[test]
    fn joint_angle_symmetric_under_endpoint_swap() {
        let a = (3.0, 7.0);
        let b = (1.0, 2.0);
        let c = (-4.0, 5.0);
        assert_eq!(joint_angle(a, b, c), joint_angle(c, b, a));
    }

    #[test]
    fn joint_angle_degenerate_is_finite() {
        // zero-length limb vector: vertex coincides with an endpoint
        assert_eq!(joint_angle((1.0, 1.0), (1.0, 1.0), (5.0, 5.0)), 0);
        assert_eq!(joint_angle((0.0, 0.0), (0.0, 0.0), (0.0, 0.0)), 0);
    }

    fn kpts_with_stance(hip_center_x: f32, back_x: f32, front_x: f32) -> Vec<[f32; 2]> {
        let mut k = vec![[0.0, 0.0]; joints::COUNT];
        k[joints::L_HIP] = [hip_center_x, 100.0];
        k[joints::R_HIP] = [hip_center_x, 100.0];
        k[joints::L_ANKLE] = [back_x, 200.0];
        k[joints::R_ANKLE] = [front_x, 200.0];
        k
    }

    #[test]
    fn weight_transfer_maps_ratio_to_descriptor() {
        // hips at 50% of the span
        let k = kpts_with_stance(150.0, 100.0, 200.0);
        assert_eq!(weight_transfer(&k, 10.0), WeightTransfer::Balanced);

        // hips at 80% → front foot
        let k = kpts_with_stance(180.0, 100.0, 200.0);
        assert_eq!(weight_transfer(&k, 10.0), WeightTransfer::Front(80));

        // hips at 20% → back foot, complement percentage
        let k = kpts_with_stance(120.0, 100.0, 200.0);
        assert_eq!(weight_transfer(&k, 10.0), WeightTransfer::Back(80));
    }

    #[test]
    fn weight_transfer_narrow_span_is_balanced() {
        let k = kpts_with_stance(103.0, 100.0, 105.0);
        assert_eq!(weight_transfer(&k, 10.0), WeightTransfer::Balanced);
    }

    #[test]
    fn weight_transfer_missing_joints_is_neutral() {
        let k = vec![[0.0, 0.0]; joints::COUNT];
        assert_eq!(weight_transfer(&k, 10.0), WeightTransfer::Neutral);
    }

    #[test]
    fn weight_transfer_hip_outside_span_is_clamped() {
        let k = kpts_with_stance(300.0, 100.0, 200.0);
        assert_eq!(weight_transfer(&k, 10.0), WeightTransfer::Front(100));
    }

    #[test]
    fn select_target_prefers_largest_box_when_unpinned() {
        let dets = vec![
            det(1, [0.0, 0.0, 10.0, 10.0]),
            det(2, [0.0, 0.0, 100.0, 100.0]),
            det(3, [0.0, 0.0, 50.0, 50.0]),
        ];
        assert_eq!(select_target(&dets, None).unwrap().track_id, 2);
    }

    #[test]
    fn select_target_pinned_id_is_exact_match_only() {
        let dets = vec![
            det(1, [0.0, 0.0, 10.0, 10.0]),
            det(2, [0.0, 0.0, 100.0, 100.0]),
        ];
        assert_eq!(select_target(&dets, Some(1)).unwrap().track_id, 1);
        // pinned id absent this frame: searching, not the largest box
        assert!(select_target(&dets, Some(9)).is_none());
    }

    #[test]
    fn select_target_empty_frame_is_none() {
        assert!(select_target(&[], None).is_none());
    }

    fn box_border_color(extractor: &BiomechanicsExtractor) -> (u8, u8, u8) {
        let frame =
            Mat::new_rows_cols_with_default(64, 64, core::CV_8UC3, core::Scalar::all(0.0))
                .unwrap();
        let out = extractor
            .extract(&frame, &[det(1, [10.0, 10.0, 50.0, 50.0])])
            .unwrap();
        let px: &core::Vec3b = out.annotated.at_2d(10, 10).unwrap();
        (px[0], px[1], px[2])
    }

    #[test]
    fn auto_selected_subject_is_drawn_like_everyone_else() {
        let ex = BiomechanicsExtractor::new(&AnalysisConfig::default());
        // largest-box auto-pick: orange, not the pinned-target green
        assert_eq!(box_border_color(&ex), (0, 165, 255));
    }

    #[test]
    fn pinned_target_is_drawn_in_target_color() {
        let mut cfg = AnalysisConfig::default();
        cfg.target_track_id = Some(1);
        let ex = BiomechanicsExtractor::new(&cfg);
        assert_eq!(box_border_color(&ex), (0, 255, 0));
    }
}
