//! Deployment constraint checker: a pure predicate gating ΔComplexity/ΔCore
//! growth against the Feigenbaum ratio bound.

use crate::constants::DELTA;

/// Result of [`check`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeployCheck {
    Ok,
    /// `delta_complexity / delta_core > limit` (or core delta is zero with
    /// nonzero complexity delta, i.e. an undefined/infinite ratio).
    Violation { ratio: f64, limit: f64 },
}

/// `check(ΔComplexity, ΔCore) → Ok | Violation(ratio, limit)`, `limit = δ`.
///
/// `delta_core == 0.0 && delta_complexity > 0.0` is "pure debt" — reported
/// as a violation with `ratio = f64::INFINITY`.
pub fn check(delta_complexity: f64, delta_core: f64) -> DeployCheck {
    if delta_core == 0.0 && delta_complexity > 0.0 {
        return DeployCheck::Violation {
            ratio: f64::INFINITY,
            limit: DELTA,
        };
    }
    if delta_core == 0.0 {
        return DeployCheck::Ok;
    }
    let ratio = delta_complexity / delta_core;
    if ratio > DELTA {
        DeployCheck::Violation { ratio, limit: DELTA }
    } else {
        DeployCheck::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_debt_is_a_violation() {
        let result = check(100.0, 0.0);
        assert!(matches!(
            result,
            DeployCheck::Violation { ratio, .. } if ratio.is_infinite()
        ));
    }

    #[test]
    fn ratio_within_bound_is_ok() {
        assert_eq!(check(20.0, 50.0), DeployCheck::Ok);
    }

    #[test]
    fn ratio_exceeding_bound_is_violation() {
        let result = check(470.0, 50.0);
        match result {
            DeployCheck::Violation { ratio, limit } => {
                assert!((ratio - 9.4).abs() < 1e-9);
                assert!((limit - DELTA).abs() < 1e-9);
            }
            DeployCheck::Ok => panic!("expected violation"),
        }
    }

    #[test]
    fn no_deployment_event_is_ok() {
        assert_eq!(check(0.0, 0.0), DeployCheck::Ok);
    }
}
