//! Governor: a hysteretic state machine mapping `(r, Δr/Δt, deployment
//! deltas)` to an [`Action`].
//!
//! Grounded on the teacher's `adaptive_engine::control_safety::ControlSafety`
//! SafeMode latch — a sticky-on state entered on a trigger and cleared only
//! by an explicit timer/condition, never by a single good reading.

use crate::constants::*;
use crate::deploy::{self, DeployCheck};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Upper bound on the Governor's coupling history, oldest-discard.
const HISTORY_CAP: usize = 4096;

/// The input bundle to the Governor. `estimated_coupling` is derived by the
/// Governor during [`Governor::evaluate`] — callers should leave it `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemIntegrityMetrics {
    pub immutable_ops_verified: u64,
    pub mutable_shared_state: u64,
    pub supervised_processes: u64,
    pub unsupervised_processes: u64,
    /// ΔComplexity/ΔCore of a hypothetical change.
    pub scaling_ratio: f64,
    /// Raw deployment delta; zero means "no deployment event".
    pub delta_critical_core: f64,
    /// Raw deployment delta; zero means "no deployment event".
    pub delta_complexity: f64,
    /// Filled by the Governor, not by the caller.
    pub estimated_coupling: Option<f64>,
}

/// The Governor's output. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub reason: String,
    pub mitigation: Option<String>,
    pub snapshot_metrics: SystemIntegrityMetrics,
    /// Time of evaluation, relative to the owning Governor's construction
    /// (the host's monotonic clock has no fixed epoch of its own).
    pub timestamp: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Stable,
    Warning,
    Pacing,
    Throttle,
    /// Transient — applies to exactly one evaluation.
    BlockDeploy,
    /// Terminal hint; the Governor never resets its own state on this.
    Restart,
}

/// The Governor's private mutable state.
struct RDynamics {
    current_r: f64,
    previous_r: f64,
    last_eval_at: Option<Instant>,
    history: VecDeque<f64>,
    in_throttle_mode: bool,
    throttle_entered_at: Option<Instant>,
}

struct GovernorState {
    dynamics: RDynamics,
    warnings: u64,
    throttles: u64,
    blocked_deploys: u64,
    recovery_events: u64,
}

/// A per-replica admission-control governor. Created once per protected
/// service; mutates only its own `RDynamics`; safe for sequential callers
/// per instance (evaluations serialize on an internal mutex).
pub struct Governor {
    initial_r: f64,
    created_at: Instant,
    state: Mutex<GovernorState>,
}

/// Snapshot of the Governor's counters, for the monitoring surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GovernorStatistics {
    pub current_r: f64,
    pub initial_r: f64,
    pub in_saturation: bool,
    pub warnings: u64,
    pub throttles: u64,
    pub blocked_deploys: u64,
    pub recovery_events: u64,
    pub history_len: usize,
}

impl Governor {
    pub fn new(initial_r: f64) -> Self {
        Self {
            initial_r,
            created_at: Instant::now(),
            state: Mutex::new(GovernorState {
                dynamics: RDynamics {
                    current_r: initial_r,
                    previous_r: initial_r,
                    last_eval_at: None,
                    history: VecDeque::with_capacity(64),
                    in_throttle_mode: false,
                    throttle_entered_at: None,
                },
                warnings: 0,
                throttles: 0,
                blocked_deploys: 0,
                recovery_events: 0,
            }),
        }
    }

    /// Evaluate one observable event, using the host's wall clock as the
    /// monotonic time source.
    #[tracing::instrument(skip(self, metrics))]
    pub fn evaluate(&self, metrics: SystemIntegrityMetrics) -> Action {
        self.evaluate_at(metrics, Instant::now())
    }

    /// Evaluate with an explicit monotonic timestamp — the entry point used
    /// by tests and by hosts that already have a monotonic clock reading
    /// for the event.
    pub fn evaluate_at(&self, metrics: SystemIntegrityMetrics, now: Instant) -> Action {
        let mut state = self.state.lock();

        // 1. Deployment gate.
        if metrics.delta_critical_core > 0.0 || metrics.delta_complexity > 0.0 {
            if let DeployCheck::Violation { ratio, limit } =
                deploy::check(metrics.delta_complexity, metrics.delta_critical_core)
            {
                state.blocked_deploys += 1;
                let reason = if ratio.is_infinite() {
                    format!(
                        "pure debt: ΔCore=0 with ΔComplexity={:.2} — ratio is undefined (∞) > δ={:.2}",
                        metrics.delta_complexity, limit
                    )
                } else {
                    format!(
                        "ΔComplexity/ΔCore ratio {:.2} exceeds δ={:.2}",
                        ratio, limit
                    )
                };
                tracing::warn!(ratio, "deployment blocked");
                return Action {
                    action_type: ActionType::BlockDeploy,
                    reason,
                    mitigation: Some("reject the deployment pipeline change".to_string()),
                    snapshot_metrics: metrics,
                    timestamp: now.duration_since(self.created_at),
                };
            }
        }

        // 2. Runtime r-evaluation.
        let r = calculate_system_dna(&metrics);
        state.dynamics.previous_r = state.dynamics.current_r;
        state.dynamics.current_r = r;
        if state.dynamics.history.len() >= HISTORY_CAP {
            state.dynamics.history.pop_front();
        }
        state.dynamics.history.push_back(r);
        let _velocity = match state.dynamics.last_eval_at {
            Some(prev) => {
                let dt = now.duration_since(prev).as_secs_f64();
                if dt > 0.0 {
                    (r - state.dynamics.previous_r) / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        state.dynamics.last_eval_at = Some(now);

        let mut snapshot = metrics;
        snapshot.estimated_coupling = Some(r);

        // 3. Hysteretic throttle exit.
        if state.dynamics.in_throttle_mode {
            let entered = state.dynamics.throttle_entered_at.unwrap_or(now);
            let dwell = now.duration_since(entered).as_secs_f64();
            if dwell >= MIN_THROTTLE_DWELL_SECS && r < R_EXIT {
                state.dynamics.in_throttle_mode = false;
                state.dynamics.throttle_entered_at = None;
                // Fall through to zone selection below.
            } else {
                state.throttles += 1;
                tracing::debug!(r, dwell, "sticky throttle");
                return Action {
                    action_type: ActionType::Throttle,
                    reason: format!(
                        "r={:.2} hysteretic throttle held (dwell {:.1}s)",
                        r, dwell
                    ),
                    mitigation: Some("shed 50-70% of incoming load".to_string()),
                    snapshot_metrics: snapshot,
                    timestamp: now.duration_since(self.created_at),
                };
            }
        }

        // 4. Zone selection.
        let history_len = state.dynamics.history.len();
        let action = if r >= R_SAT {
            state.dynamics.in_throttle_mode = true;
            state.dynamics.throttle_entered_at = Some(now);
            state.throttles += 1;
            Action {
                action_type: ActionType::Throttle,
                reason: format!("r={:.2} at or above saturation threshold {:.2}", r, R_SAT),
                mitigation: Some("shed 50-70% of incoming load".to_string()),
                snapshot_metrics: snapshot,
                timestamp: now.duration_since(self.created_at),
            }
        } else if r >= R_DANGER {
            Action {
                action_type: ActionType::Pacing,
                reason: format!("r={:.2} at or above danger threshold {:.2}", r, R_DANGER),
                mitigation: Some("shed ~20% of incoming load".to_string()),
                snapshot_metrics: snapshot,
                timestamp: now.duration_since(self.created_at),
            }
        } else if r >= R_WARN {
            state.warnings += 1;
            Action {
                action_type: ActionType::Warning,
                reason: format!("r={:.2} at or above warning threshold {:.2}", r, R_WARN),
                mitigation: None,
                snapshot_metrics: snapshot,
                timestamp: now.duration_since(self.created_at),
            }
        } else {
            Action {
                action_type: ActionType::Stable,
                reason: format!("r={:.2} within stable range", r),
                mitigation: None,
                snapshot_metrics: snapshot,
                timestamp: now.duration_since(self.created_at),
            }
        };
        tracing::debug!(r, history_len, action = ?action.action_type, "zone selected");
        action
    }

    /// Snapshot of the Governor's counters.
    pub fn statistics(&self) -> GovernorStatistics {
        let state = self.state.lock();
        GovernorStatistics {
            current_r: state.dynamics.current_r,
            initial_r: self.initial_r,
            in_saturation: state.dynamics.current_r >= R_SAT,
            warnings: state.warnings,
            throttles: state.throttles,
            blocked_deploys: state.blocked_deploys,
            recovery_events: state.recovery_events,
            history_len: state.dynamics.history.len(),
        }
    }

    /// Repeatedly apply a correction pulse until `r < r_sat` or the
    /// iteration cap is reached. Returns `true` iff `r` fell below `r_sat`
    /// within the cap.
    pub fn apply_recovery(&self, metrics: SystemIntegrityMetrics) -> bool {
        let mut state = self.state.lock();
        let mut r = state.dynamics.current_r;
        let isolation_ratio = metrics.mutable_shared_state as f64
            / metrics.immutable_ops_verified.max(1) as f64;

        let mut iterations = 0u32;
        while r >= R_SAT && iterations < RECOVERY_ITERATION_CAP {
            let depth = r - R_SAT;
            let desired_pulse = depth * (1.0 / (1.0 + isolation_ratio)) * 0.5;
            let pulse = desired_pulse.min(INV_DELTA);
            r = (r - pulse).max(1.0);
            iterations += 1;
        }

        state.dynamics.current_r = r;
        state.recovery_events += 1;
        let recovered = r < R_SAT;
        tracing::debug!(iterations, r, recovered, "recovery loop");
        recovered
    }

    /// Build a `Restart` action for a host that is escalating after
    /// [`Governor::apply_recovery`] returned `false`. The Governor does not
    /// reset any state as a side effect of this call.
    pub fn restart_hint(&self, metrics: SystemIntegrityMetrics) -> Action {
        let state = self.state.lock();
        let r = state.dynamics.current_r;
        Action {
            action_type: ActionType::Restart,
            reason: format!("recovery exhausted with r={:.2} >= r_sat={:.2}", r, R_SAT),
            mitigation: Some("restart the process".to_string()),
            snapshot_metrics: metrics,
            timestamp: Instant::now().duration_since(self.created_at),
        }
    }
}

/// The canonical r-model. Implementations must reproduce this bit-compatibly
/// — tests pin specific zone transitions to it.
pub fn calculate_system_dna(m: &SystemIntegrityMetrics) -> f64 {
    let isolation_penalty =
        m.mutable_shared_state as f64 / m.immutable_ops_verified.max(1) as f64;
    let supervision_penalty =
        m.unsupervised_processes as f64 / m.supervised_processes.max(1) as f64;
    let scaling_penalty = m.scaling_ratio / INV_DELTA;
    1.0 + isolation_penalty + supervision_penalty + scaling_penalty
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(
        immutable: u64,
        mutable: u64,
        supervised: u64,
        unsupervised: u64,
        scaling_ratio: f64,
    ) -> SystemIntegrityMetrics {
        SystemIntegrityMetrics {
            immutable_ops_verified: immutable,
            mutable_shared_state: mutable,
            supervised_processes: supervised,
            unsupervised_processes: unsupervised,
            scaling_ratio,
            delta_critical_core: 0.0,
            delta_complexity: 0.0,
            estimated_coupling: None,
        }
    }

    #[test]
    fn s1_valid_scaling_is_stable() {
        let gov = Governor::new(1.5);
        let m = metrics(100, 0, 50, 0, 0.20);
        let action = gov.evaluate(m);
        assert_eq!(action.action_type, ActionType::Stable);
        assert_eq!(gov.statistics().warnings, 0);
    }

    #[test]
    fn s2_deploy_rejected_on_ratio() {
        let gov = Governor::new(1.5);
        let mut m = metrics(100, 0, 50, 0, 0.0);
        m.delta_critical_core = 50.0;
        m.delta_complexity = 470.0;
        let action = gov.evaluate(m);
        assert_eq!(action.action_type, ActionType::BlockDeploy);
        assert!(action.reason.contains("9.40"));
        assert!(action.reason.contains("4.67"));
    }

    #[test]
    fn s3_deploy_rejected_on_pure_debt() {
        let gov = Governor::new(1.5);
        let mut m = metrics(100, 0, 50, 0, 0.0);
        m.delta_critical_core = 0.0;
        m.delta_complexity = 100.0;
        let action = gov.evaluate(m);
        assert_eq!(action.action_type, ActionType::BlockDeploy);
        assert!(action.reason.contains('∞') || action.reason.to_lowercase().contains("undefined"));
    }

    #[test]
    fn s4_hysteresis_sticky_throttle_then_exit() {
        let gov = Governor::new(2.0);
        let t0 = Instant::now();

        // scaling_ratio=0.45 -> r ~= 3.10 -> enters throttle.
        let m_high = metrics(1, 0, 1, 0, 0.45);
        let r_high = calculate_system_dna(&m_high);
        assert!(r_high >= R_SAT, "expected saturating r, got {r_high}");
        let a1 = gov.evaluate_at(m_high, t0);
        assert_eq!(a1.action_type, ActionType::Throttle);

        // scaling_ratio=0.35 -> r ~= 2.63 (still above r_exit) within 60s -> still Throttle.
        let m_mid = metrics(1, 0, 1, 0, 0.35);
        let r_mid = calculate_system_dna(&m_mid);
        assert!((R_EXIT..R_SAT).contains(&r_mid), "r_mid={r_mid}");
        let a2 = gov.evaluate_at(m_mid, t0 + Duration::from_secs(30));
        assert_eq!(a2.action_type, ActionType::Throttle);

        // scaling_ratio=0.15 -> r ~= 1.70 (< r_exit). After 60s -> clears.
        let m_low = metrics(1, 0, 1, 0, 0.15);
        let r_low = calculate_system_dna(&m_low);
        assert!(r_low < R_EXIT, "r_low={r_low}");
        let a3 = gov.evaluate_at(m_low, t0 + Duration::from_secs(61));
        assert_ne!(a3.action_type, ActionType::Throttle);
    }

    #[test]
    fn throttle_does_not_clear_before_dwell_even_if_r_drops() {
        let gov = Governor::new(2.0);
        let t0 = Instant::now();
        let m_high = metrics(1, 0, 1, 0, 0.45);
        let a1 = gov.evaluate_at(m_high, t0);
        assert_eq!(a1.action_type, ActionType::Throttle);

        // r drops below r_exit but dwell hasn't elapsed -> still Throttle.
        let m_low = metrics(1, 0, 1, 0, 0.0);
        let a2 = gov.evaluate_at(m_low, t0 + Duration::from_secs(5));
        assert_eq!(a2.action_type, ActionType::Throttle);
    }

    #[test]
    fn calculate_system_dna_is_monotone_in_each_penalty() {
        let base = metrics(100, 10, 50, 5, 0.1);
        let r_base = calculate_system_dna(&base);

        let mut more_mutable = base;
        more_mutable.mutable_shared_state += 10;
        assert!(calculate_system_dna(&more_mutable) >= r_base);

        let mut more_unsupervised = base;
        more_unsupervised.unsupervised_processes += 10;
        assert!(calculate_system_dna(&more_unsupervised) >= r_base);

        let mut more_scaling = base;
        more_scaling.scaling_ratio += 0.5;
        assert!(calculate_system_dna(&more_scaling) >= r_base);
    }

    #[test]
    fn zero_denominators_never_panic() {
        let m = metrics(0, 5, 0, 5, 1.0);
        let r = calculate_system_dna(&m);
        assert!(r.is_finite());
    }

    #[test]
    fn recovery_loop_always_exhausts_cap_but_makes_progress() {
        // pulse = min(depth * 0.5/(1+isolation_ratio), 1/delta) is strictly
        // less than depth for every finite isolation_ratio >= 0 (the factor
        // 0.5/(1+iso) <= 0.5 < 1, and the 1/delta cap only applies when
        // depth > 2/delta * (1+iso), which is itself > 1/delta). So
        // r_new = r - pulse stays strictly above r_sat on every iteration:
        // the loop always exhausts its cap, never crosses r_sat on its own,
        // and escalation to restart is the ordinary terminal path, not a
        // rare exception.
        let gov = Governor::new(1.5);
        let m = metrics(10, 50, 1, 1, 0.0);
        let _ = gov.evaluate(m);
        let before = gov.statistics().current_r;
        assert!(before >= R_SAT);

        let recovered = gov.apply_recovery(m);
        assert!(!recovered);
        let after = gov.statistics().current_r;
        assert!(after < before, "recovery pulse made no progress");
        assert!(after >= R_SAT);
        assert_eq!(gov.statistics().recovery_events, 1);

        let hint = gov.restart_hint(m);
        assert_eq!(hint.action_type, ActionType::Restart);
    }
}
