// src/analysis/coach.rs
//
// Rule-based coaching feedback. One ordered table of (predicate, message)
// pairs evaluated top to bottom, first match wins, so corrective cues
// always outrank praise. Zero-valued inputs mean "not measured this frame"
// and skip their rule instead of triggering a false correction.

use crate::types::{CoachConfig, SpeedReport};

// ============================================================================
// THRESHOLDS FOR THE POSITIVE RULE
// ============================================================================
const GOOD_BAT_KMH: f64 = 80.0;
const GOOD_ELBOW_DEG: i32 = 140;
const GOOD_KNEE_DEG: i32 = 150;

const ARM_LAG_FRACTION: f64 = 0.6;
const BALL_LAG_FRACTION: f64 = 0.7;

/// Snapshot of a single frame's swing metrics, as the coach sees them.
#[derive(Debug, Clone, Copy)]
pub struct SwingMetrics {
    pub bat_kmh: f64,
    pub ball_kmh: f64,
    pub arm_kmh: f64,
    pub elbow_deg: i32,
    pub knee_deg: i32,
}

impl SwingMetrics {
    pub fn new(speeds: &SpeedReport, elbow_deg: i32, knee_deg: i32) -> Self {
        Self {
            bat_kmh: speeds.bat_kmh,
            ball_kmh: speeds.ball_kmh,
            arm_kmh: speeds.arm_kmh,
            elbow_deg,
            knee_deg,
        }
    }
}

struct Rule {
    message: &'static str,
    matches: fn(&SwingMetrics, &CoachConfig) -> bool,
}

// Order is the priority order. The final entry is the unconditional
// fallback, so advise() always has a message to return.
const RULES: &[Rule] = &[
    Rule {
        message: "Increase bat swing speed for better power",
        matches: |m, cfg| m.bat_kmh > 0.0 && m.bat_kmh < cfg.min_bat_speed_kmh,
    },
    Rule {
        message: "Start downswing earlier – elbow collapsing",
        matches: |m, cfg| m.elbow_deg > 0 && m.elbow_deg < cfg.min_elbow_angle_deg,
    },
    Rule {
        message: "Bend front knee more for balance",
        matches: |m, cfg| m.knee_deg > 0 && m.knee_deg < cfg.min_knee_angle_deg,
    },
    Rule {
        message: "Accelerate forearm more through contact",
        matches: |m, _| {
            m.arm_kmh > 0.0 && m.bat_kmh > 0.0 && m.arm_kmh < m.bat_kmh * ARM_LAG_FRACTION
        },
    },
    Rule {
        message: "Late contact – meet the ball earlier",
        matches: |m, _| {
            m.ball_kmh > 0.0 && m.bat_kmh > 0.0 && m.ball_kmh < m.bat_kmh * BALL_LAG_FRACTION
        },
    },
    Rule {
        message: "Excellent shot mechanics 👍",
        matches: |m, _| {
            m.bat_kmh >= GOOD_BAT_KMH && m.elbow_deg >= GOOD_ELBOW_DEG && m.knee_deg >= GOOD_KNEE_DEG
        },
    },
    Rule {
        message: "Good control – keep consistency",
        matches: |_, _| true,
    },
];

pub struct Coach {
    cfg: CoachConfig,
}

impl Coach {
    pub fn new(cfg: CoachConfig) -> Self {
        Self { cfg }
    }

    /// Stateless per-frame advice. Same metrics in, same message out.
    pub fn advise(&self, metrics: &SwingMetrics) -> &'static str {
        RULES
            .iter()
            .find(|r| (r.matches)(metrics, &self.cfg))
            .map(|r| r.message)
            .unwrap_or("Good control – keep consistency")
    }
}
