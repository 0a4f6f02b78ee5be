pub mod biomechanics;
pub mod coach;
pub mod segmenter;
pub mod speed;

pub use biomechanics::BiomechanicsExtractor;
pub use coach::{Coach, SwingMetrics};
pub use segmenter::ShotSegmenter;
pub use speed::SpeedEstimator;
