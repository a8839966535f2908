//! Universal Scalability Law (USL) fitter.
//!
//! Regresses `(N, C(N))` samples to `(λ, α, β, R²)` via a linearized
//! least-squares fit solved by Cramer's rule, with a 2-parameter fallback
//! when linearization yields a negative `β` (a noise artifact, never a
//! real superlinear-scaling signal).

use crate::error::FitError;
use serde::{Deserialize, Serialize};

/// A single concurrency/throughput measurement. Immutable after
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UslSample {
    /// Concurrency level (positive integer, stored as `f64` for arithmetic).
    pub n: u32,
    /// Measured throughput in ops/sec. Must be > 0 to be used; non-positive
    /// values are silently skipped by [`fit_usl`].
    pub throughput: f64,
}

impl UslSample {
    pub fn new(n: u32, throughput: f64) -> Self {
        Self { n, throughput }
    }
}

/// Fitted USL coefficients. `beta >= 0` is an invariant maintained by
/// [`fit_usl`] — a negative linearized `β` is clamped to zero by refitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UslCoefficients {
    /// Throughput at N=1 for an exact fit.
    pub lambda: f64,
    /// Contention coefficient.
    pub alpha: f64,
    /// Coherency (crosstalk) coefficient. Always >= 0.
    pub beta: f64,
    /// Coefficient of determination against the (non-linearized) USL curve.
    pub r_squared: f64,
}

impl UslCoefficients {
    /// `PredictThroughput(N) = λN / (1 + α(N−1) + βN(N−1))`.
    pub fn predict(&self, n: f64) -> f64 {
        let denom = 1.0 + self.alpha * (n - 1.0) + self.beta * n * (n - 1.0);
        self.lambda * n / denom
    }

    /// `Efficiency(N) = PredictThroughput(N) / (λN)`, in `[0, 1]` for
    /// well-behaved coefficients.
    pub fn efficiency(&self, n: f64) -> f64 {
        self.predict(n) / (self.lambda * n)
    }

    /// Concurrency at which throughput peaks, or `+∞` if the model never
    /// turns over.
    pub fn peak_capacity(&self) -> f64 {
        peak_capacity(self.alpha, self.beta)
    }

    /// True once `N` is at or beyond the peak and the model predicts
    /// retrograde (throughput-decreasing) scaling.
    pub fn is_retrograde(&self, n: f64) -> bool {
        is_retrograde(n, self.alpha, self.beta)
    }
}

/// `N_peak = √((1−α)/β)`; `+∞` if `β <= 0`; `0` if `α >= 1`.
pub fn peak_capacity(alpha: f64, beta: f64) -> f64 {
    if beta <= 0.0 {
        f64::INFINITY
    } else if alpha >= 1.0 {
        0.0
    } else {
        ((1.0 - alpha) / beta).sqrt()
    }
}

/// `IsRetrograde(N, α, β) ≡ β > 0 ∧ N ≥ PeakCapacity(α, β)`.
pub fn is_retrograde(n: f64, alpha: f64, beta: f64) -> bool {
    beta > 0.0 && n >= peak_capacity(alpha, beta)
}

/// Solve `M x = v` for a 3x3 system via Cramer's rule. Returns `None` if
/// `|det(M)| < 1e-10`.
fn solve_3x3(m: [[f64; 3]; 3], v: [f64; 3]) -> Option<[f64; 3]> {
    let det = det3(m);
    if det.abs() < 1e-10 {
        return None;
    }
    let mut x = [0.0; 3];
    for col in 0..3 {
        let mut replaced = m;
        for row in 0..3 {
            replaced[row][col] = v[row];
        }
        x[col] = det3(replaced) / det;
    }
    Some(x)
}

fn det3(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Solve a 2x2 system via Cramer's rule. Returns `None` if the determinant
/// is (numerically) zero.
fn solve_2x2(m: [[f64; 2]; 2], v: [f64; 2]) -> Option<[f64; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < 1e-10 {
        return None;
    }
    let x0 = (v[0] * m[1][1] - m[0][1] * v[1]) / det;
    let x1 = (m[0][0] * v[1] - v[0] * m[1][0]) / det;
    Some([x0, x1])
}

/// `R²` against the original (non-linearized) data.
fn r_squared(samples: &[UslSample], coeffs_lambda: f64, alpha: f64, beta: f64) -> f64 {
    let n = samples.len() as f64;
    let mean_c = samples.iter().map(|s| s.throughput).sum::<f64>() / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for s in samples {
        let predicted = {
            let nn = s.n as f64;
            let denom = 1.0 + alpha * (nn - 1.0) + beta * nn * (nn - 1.0);
            coeffs_lambda * nn / denom
        };
        ss_res += (s.throughput - predicted).powi(2);
        ss_tot += (s.throughput - mean_c).powi(2);
    }
    if ss_tot == 0.0 {
        if ss_res < 1e-12 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Fit `(λ, α, β, R²)` from `>= 3` valid `(N, C)` samples.
///
/// Malformed samples (`throughput <= 0`) are silently skipped. If fewer
/// than 3 samples remain, returns [`FitError::InsufficientSamples`]. If the
/// linearized normal equations are numerically singular, returns the
/// degenerate sentinel fit `(λ=C₁, α=0.01, β=0, R²=0)` rather than erroring.
pub fn fit_usl(samples: &[UslSample]) -> Result<UslCoefficients, FitError> {
    let valid: Vec<UslSample> = samples.iter().copied().filter(|s| s.throughput > 0.0).collect();
    if valid.len() < 3 {
        return Err(FitError::InsufficientSamples { got: valid.len() });
    }

    // Linearized model: Y_i = N_i/C_i = b0 + b1*(N_i-1) + b2*N_i*(N_i-1)
    let mut m = [[0.0; 3]; 3];
    let mut v = [0.0; 3];
    for s in &valid {
        let n = s.n as f64;
        let y = n / s.throughput;
        let x = [1.0, n - 1.0, n * (n - 1.0)];
        for row in 0..3 {
            v[row] += x[row] * y;
            for col in 0..3 {
                m[row][col] += x[row] * x[col];
            }
        }
    }

    let Some([b0, b1, b2]) = solve_3x3(m, v) else {
        return Ok(UslCoefficients {
            lambda: valid[0].throughput,
            alpha: 0.01,
            beta: 0.0,
            r_squared: 0.0,
        });
    };

    let (lambda, alpha, beta) = if b2 < 0.0 && b1 / b0 > 0.0 {
        // Linearization artifact: refit with beta forced to zero.
        let mut m2 = [[0.0; 2]; 2];
        let mut v2 = [0.0; 2];
        for s in &valid {
            let n = s.n as f64;
            let y = n / s.throughput;
            let x = [1.0, n - 1.0];
            for row in 0..2 {
                v2[row] += x[row] * y;
                for col in 0..2 {
                    m2[row][col] += x[row] * x[col];
                }
            }
        }
        match solve_2x2(m2, v2) {
            Some([c0, c1]) => (1.0 / c0, c1 / c0, 0.0),
            None => (1.0 / b0, b1 / b0, 0.0),
        }
    } else {
        (1.0 / b0, b1 / b0, b2 / b0)
    };

    let r2 = r_squared(&valid, lambda, alpha, beta);
    Ok(UslCoefficients {
        lambda,
        alpha,
        beta,
        r_squared: r2,
    })
}
