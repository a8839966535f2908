//! Autoscaler policy: a stateless mapping from `(r, N, α, β, λ)` to a
//! [`ScalingRecommendation`], refusing to scale into the retrograde region
//! of the USL curve.
//!
//! Grounded on the teacher's `classify.rs` band-table dispatch — a pure
//! function over a small ordered set of numeric ranges, no internal state.

use crate::usl::peak_capacity;
use serde::{Deserialize, Serialize};

/// Inputs to [`recommend`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoscalerMetrics {
    pub r: f64,
    pub current_n: u32,
    pub alpha: f64,
    pub beta: f64,
    /// Target r the autoscaler scales towards; defaults to 2.0.
    pub target_r: f64,
}

impl AutoscalerMetrics {
    pub fn new(r: f64, current_n: u32, alpha: f64, beta: f64) -> Self {
        Self {
            r,
            current_n,
            alpha,
            beta,
            target_r: 2.0,
        }
    }

    pub fn with_target_r(mut self, target_r: f64) -> Self {
        self.target_r = target_r;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    EmergencyStop,
    ShedLoad,
    ScaleUp,
    Maintain,
    ScaleDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// The Autoscaler's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRecommendation {
    pub decision: Decision,
    pub target_n: u32,
    pub reason: String,
    /// `peak_n = None` means the model has no finite peak (`β ≤ 0`).
    pub peak_n: Option<f64>,
    pub in_retrograde: bool,
    /// Percent of fleet shed, only meaningful for `ScaleDown`.
    pub cost_savings_percent: f64,
    pub risk_level: RiskLevel,
}

/// `recommend(metrics) → ScalingRecommendation`. Never fails: every finite
/// input produces a well-formed recommendation.
pub fn recommend(m: AutoscalerMetrics) -> ScalingRecommendation {
    let n_peak = peak_capacity(m.alpha, m.beta);
    let in_retrograde = (m.current_n as f64) >= n_peak;
    let peak_n = if n_peak.is_finite() { Some(n_peak) } else { None };

    if m.r >= 4.0 {
        return ScalingRecommendation {
            decision: Decision::EmergencyStop,
            target_n: m.current_n,
            reason: format!("r={:.2} at or above emergency threshold 4.00", m.r),
            peak_n,
            in_retrograde,
            cost_savings_percent: 0.0,
            risk_level: RiskLevel::Critical,
        };
    }

    if (3.0..4.0).contains(&m.r) {
        let target_n = if in_retrograde {
            (0.8 * n_peak).floor() as u32
        } else {
            m.current_n
        };
        return ScalingRecommendation {
            decision: Decision::ShedLoad,
            target_n,
            reason: format!(
                "r={:.2} in saturation band, retrograde={}",
                m.r, in_retrograde
            ),
            peak_n,
            in_retrograde,
            cost_savings_percent: 0.0,
            risk_level: RiskLevel::High,
        };
    }

    if (2.5..3.0).contains(&m.r) {
        if in_retrograde {
            return ScalingRecommendation {
                decision: Decision::ShedLoad,
                target_n: m.current_n,
                reason: format!("r={:.2} in stress band but N >= N_peak", m.r),
                peak_n,
                in_retrograde,
                cost_savings_percent: 0.0,
                risk_level: RiskLevel::Medium,
            };
        }
        let desired = ((m.current_n as f64) * m.r / m.target_r).ceil();
        let cap = (0.8 * n_peak).floor();
        let target_n = desired.min(cap).max(0.0) as u32;
        return ScalingRecommendation {
            decision: Decision::ScaleUp,
            target_n,
            reason: format!(
                "r={:.2} in stress band with headroom, desired={desired}, 0.8*N_peak cap={cap}",
                m.r
            ),
            peak_n,
            in_retrograde,
            cost_savings_percent: 0.0,
            risk_level: RiskLevel::Medium,
        };
    }

    if (1.5..2.5).contains(&m.r) {
        return ScalingRecommendation {
            decision: Decision::Maintain,
            target_n: m.current_n,
            reason: format!("r={:.2} within the stable band", m.r),
            peak_n,
            in_retrograde,
            cost_savings_percent: 0.0,
            risk_level: RiskLevel::Low,
        };
    }

    // r < 1.5
    let target_n = (((m.current_n as f64) * m.r / m.target_r).floor() as u32).max(1);
    let cost_savings_percent = if m.current_n == 0 {
        0.0
    } else {
        ((m.current_n - target_n) as f64 / m.current_n as f64) * 100.0
    };
    ScalingRecommendation {
        decision: Decision::ScaleDown,
        target_n,
        reason: format!("r={:.2} below the stable band, fleet is over-provisioned", m.r),
        peak_n,
        in_retrograde,
        cost_savings_percent,
        risk_level: RiskLevel::Low,
    }
}

/// Convenience alias matching the language-agnostic interface name.
pub fn should_scale(m: AutoscalerMetrics) -> ScalingRecommendation {
    recommend(m)
}
