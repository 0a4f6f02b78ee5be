use opencv::core::Mat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub detector: DetectorConfig,
    pub analysis: AnalysisConfig,
    pub phases: PhaseConfig,
    pub segmenter: SegmenterConfig,
    pub highlights: HighlightConfig,
    pub coach: CoachConfig,
    pub records: RecordConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub target_fps: u32,
    /// Subject name used for the per-subject highlight directory.
    pub subject: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            input_dir: "videos".to_string(),
            output_dir: "output".to_string(),
            target_fps: 30,
            subject: "batsman".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: String,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    /// Frames a track may go unmatched before its id is retired.
    pub max_track_misses: u32,
    pub num_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n-pose.onnx".to_string(),
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.45,
            max_track_misses: 30,
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Fixed track id to analyze. None = pick the largest subject each frame.
    pub target_track_id: Option<i64>,
    pub meters_per_pixel: f64,
    pub bat_ema_alpha: f64,
    pub speed_cap_kmh: f64,
    pub ball_window: usize,
    pub ball_area_min: f64,
    pub ball_area_max: f64,
    pub min_ankle_span_px: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_track_id: None,
            meters_per_pixel: 0.0025,
            bat_ema_alpha: 0.3,
            speed_cap_kmh: 160.0,
            ball_window: 5,
            ball_area_min: 5.0,
            ball_area_max: 300.0,
            min_ankle_span_px: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub backlift_min_deg: i32,
    pub downswing_min_deg: i32,
    pub contact_min_deg: i32,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            backlift_min_deg: 150,
            downswing_min_deg: 120,
            contact_min_deg: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub buffer_capacity: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub min_shot_frames: usize,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self { min_shot_frames: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub min_bat_speed_kmh: f64,
    pub min_elbow_angle_deg: i32,
    pub min_knee_angle_deg: i32,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            min_bat_speed_kmh: 60.0,
            min_elbow_angle_deg: 120,
            min_knee_angle_deg: 140,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub csv_path: String,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            csv_path: "cricket_analysis.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "cricket_analytics=info,ort=warn".to_string(),
        }
    }
}

// ============================================================================
// DETECTOR OUTPUT
// ============================================================================

/// COCO-17 keypoint indices used by the biomechanics extractor.
pub mod joints {
    pub const R_SHOULDER: usize = 6;
    pub const R_ELBOW: usize = 8;
    pub const R_WRIST: usize = 10;
    pub const L_HIP: usize = 11;
    pub const R_HIP: usize = 12;
    pub const R_KNEE: usize = 14;
    pub const L_ANKLE: usize = 15;
    pub const R_ANKLE: usize = 16;
    pub const COUNT: usize = 17;
}

/// One tracked subject on one frame, as produced by the pose detector.
#[derive(Debug, Clone)]
pub struct PoseDetection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in source image coordinates
    pub track_id: i64,
    pub confidence: f32,
    /// COCO-17 joint layout; a joint at (0, 0) is treated as not detected.
    pub keypoints: Vec<[f32; 2]>,
}

impl PoseDetection {
    pub fn bbox_area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

// ============================================================================
// PIPELINE PAYLOADS
// ============================================================================

/// Categorical weight-distribution descriptor derived from hip/ankle geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightTransfer {
    Balanced,
    Front(u8),
    Back(u8),
    /// Reported when the geometry could not be computed at all.
    Neutral,
}

impl WeightTransfer {
    pub fn label(&self) -> String {
        match self {
            Self::Balanced => "Balanced".to_string(),
            Self::Front(pct) => format!("{}% Front", pct),
            Self::Back(pct) => format!("{}% Back", pct),
            Self::Neutral => "Neutral".to_string(),
        }
    }
}

/// Per-frame output of the biomechanics extractor.
pub struct BiomechanicsFrame {
    /// Degrees in [0, 180]; 0 when the subject or joints are not visible.
    pub elbow: i32,
    pub knee: i32,
    pub weight: WeightTransfer,
    pub wrist: Option<(f32, f32)>,
    pub elbow_pt: Option<(f32, f32)>,
    /// None while searching for the subject.
    pub track_id: Option<i64>,
    /// Frame copy with id labels and boxes drawn for every detection.
    pub annotated: Mat,
    /// Grayscale copy of the source frame for motion analysis.
    pub gray: Mat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Backlift,
    Downswing,
    Contact,
    FollowThrough,
}

impl Phase {
    pub fn from_elbow(elbow_deg: i32, cfg: &PhaseConfig) -> Self {
        if elbow_deg > cfg.backlift_min_deg {
            Self::Backlift
        } else if elbow_deg > cfg.downswing_min_deg {
            Self::Downswing
        } else if elbow_deg > cfg.contact_min_deg {
            Self::Contact
        } else {
            Self::FollowThrough
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlift => "Backlift",
            Self::Downswing => "Downswing",
            Self::Contact => "Contact",
            Self::FollowThrough => "FollowThrough",
        }
    }
}

/// Segmenter output for one frame. `frames` is populated only on the exact
/// frame a shot ends and is not recoverable afterwards.
pub struct ShotUpdate {
    pub shot_id: u64,
    pub phase: Phase,
    pub started: bool,
    pub ended: bool,
    pub frames: Option<Vec<Mat>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedReport {
    pub bat_kmh: f64,
    pub ball_kmh: f64,
    pub arm_kmh: f64,
}

/// One immutable analytics row, written exactly once per processed frame.
#[derive(Debug, Clone)]
pub struct AnalyticsRecord {
    /// Deterministic media time in seconds (frame_id / fps), 2 decimals.
    pub timestamp_s: f64,
    pub frame_id: u64,
    pub shot_id: u64,
    pub phase: &'static str,
    pub elbow_deg: i32,
    pub knee_deg: i32,
    pub bat_kmh: f64,
    pub ball_kmh: f64,
    pub arm_kmh: f64,
    pub feedback: String,
}

/// Per-frame metrics pushed to the worker's consumer (the original UI feed).
#[derive(Debug, Clone)]
pub struct FrameMetrics {
    pub frame_id: u64,
    pub shot_id: u64,
    pub phase: &'static str,
    pub track_label: String,
    pub weight_label: String,
    pub speeds: SpeedReport,
    pub elbow_deg: i32,
    pub knee_deg: i32,
    pub feedback: String,
    pub highlight_path: Option<std::path::PathBuf>,
}

impl FrameMetrics {
    /// Safe default substituted when a frame's processing fails.
    pub fn fallback(frame_id: u64) -> Self {
        Self {
            frame_id,
            shot_id: 0,
            phase: "FollowThrough",
            track_label: "N/A".to_string(),
            weight_label: "Neutral".to_string(),
            speeds: SpeedReport::default(),
            elbow_deg: 0,
            knee_deg: 0,
            feedback: "Processing error".to_string(),
            highlight_path: None,
        }
    }
}
