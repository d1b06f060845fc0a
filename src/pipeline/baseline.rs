/// Asymmetric least-squares baseline estimation
///
/// Iteratively reweighted penalized smoothing: with a second-order
/// difference operator D and weights W, repeatedly solve
///
/// ```text
/// (W + λ·DᵀD) z = W y
/// ```
///
/// and reweight `w[i] = p` where the signal lies above the estimate (peak
/// candidates) and `1 - p` elsewhere. The system matrix is symmetric,
/// positive definite and pentadiagonal, so it is factored as LDLᵀ in O(n).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::segment::CorrectedSignal;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("need at least 3 samples for a second-order penalty, got {0}")]
    TooShort(usize),
    #[error("system is singular or ill-conditioned at row {row} (pivot {pivot:e})")]
    Singular { row: usize, pivot: f64 },
    #[error("signal contains non-finite values")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineParams {
    /// Smoothness penalty λ
    pub lambda: f64,
    /// Asymmetry p: weight of samples above the current estimate
    pub asymmetry: f64,
    pub max_iter: usize,
}

impl Default for BaselineParams {
    fn default() -> Self {
        Self {
            lambda: 1e9,
            asymmetry: 0.05,
            max_iter: 3,
        }
    }
}

/// Estimate and remove the baseline of `y`.
///
/// A negative-mean signal is sign-flipped before estimation; the result
/// stays in the flipped orientation (see `CorrectedSignal::restored`).
/// An empty signal yields an empty result.
pub fn correct_baseline(y: &[f64], params: &BaselineParams) -> Result<CorrectedSignal, SolverError> {
    let n = y.len();
    if n == 0 {
        return Ok(CorrectedSignal {
            corrected: Vec::new(),
            baseline: Vec::new(),
            flipped: false,
        });
    }
    if n < 3 {
        return Err(SolverError::TooShort(n));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::NonFinite);
    }

    let mean = y.iter().sum::<f64>() / n as f64;
    let flipped = mean < 0.0;
    let y: Vec<f64> = if flipped {
        y.iter().map(|v| -v).collect()
    } else {
        y.to_vec()
    };

    let penalty = PentaBand::second_difference_gram(n, params.lambda);
    let p = params.asymmetry;
    let mut w = vec![1.0; n];
    let mut z = solve_weighted(&penalty, &w, &y)?;

    for _ in 1..params.max_iter {
        for ((wi, yi), zi) in w.iter_mut().zip(&y).zip(&z) {
            *wi = if yi > zi { p } else { 1.0 - p };
        }
        z = solve_weighted(&penalty, &w, &y)?;
    }

    let corrected = y.iter().zip(&z).map(|(yi, zi)| yi - zi).collect();
    Ok(CorrectedSignal {
        corrected,
        baseline: z,
        flipped,
    })
}

/// Solve (W + penalty) z = W y
fn solve_weighted(penalty: &PentaBand, w: &[f64], y: &[f64]) -> Result<Vec<f64>, SolverError> {
    let mut system = penalty.clone();
    for (d, wi) in system.d0.iter_mut().zip(w) {
        *d += wi;
    }
    let rhs: Vec<f64> = w.iter().zip(y).map(|(wi, yi)| wi * yi).collect();
    system.solve(&rhs)
}

/// Symmetric pentadiagonal matrix: main diagonal and the first two
/// super-diagonals (`d1[i] = A[i][i+1]`, `d2[i] = A[i][i+2]`).
#[derive(Debug, Clone)]
struct PentaBand {
    d0: Vec<f64>,
    d1: Vec<f64>,
    d2: Vec<f64>,
}

impl PentaBand {
    /// λ·DᵀD for the (n-2)×n second-difference operator D = [1 -2 1]
    fn second_difference_gram(n: usize, lambda: f64) -> Self {
        const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];
        let mut band = Self {
            d0: vec![0.0; n],
            d1: vec![0.0; n.saturating_sub(1)],
            d2: vec![0.0; n.saturating_sub(2)],
        };
        for r in 0..n.saturating_sub(2) {
            for a in 0..3 {
                for b in a..3 {
                    let v = lambda * STENCIL[a] * STENCIL[b];
                    match b - a {
                        0 => band.d0[r + a] += v,
                        1 => band.d1[r + a] += v,
                        _ => band.d2[r + a] += v,
                    }
                }
            }
        }
        band
    }

    /// Solve A x = b by LDLᵀ factorization
    fn solve(&self, b: &[f64]) -> Result<Vec<f64>, SolverError> {
        let n = self.d0.len();
        let mut d = vec![0.0; n];
        let mut l1 = vec![0.0; n]; // L[i+1][i]
        let mut l2 = vec![0.0; n]; // L[i+2][i]

        for i in 0..n {
            let mut pivot = self.d0[i];
            if i >= 1 {
                pivot -= l1[i - 1] * l1[i - 1] * d[i - 1];
            }
            if i >= 2 {
                pivot -= l2[i - 2] * l2[i - 2] * d[i - 2];
            }
            if !pivot.is_finite() || pivot <= f64::EPSILON * self.d0[i].abs() {
                return Err(SolverError::Singular { row: i, pivot });
            }
            d[i] = pivot;

            if i + 1 < n {
                let mut v = self.d1[i];
                if i >= 1 {
                    v -= l2[i - 1] * d[i - 1] * l1[i - 1];
                }
                l1[i] = v / pivot;
            }
            if i + 2 < n {
                l2[i] = self.d2[i] / pivot;
            }
        }

        // forward: L u = b
        let mut x = b.to_vec();
        for i in 0..n {
            if i >= 1 {
                x[i] -= l1[i - 1] * x[i - 1];
            }
            if i >= 2 {
                x[i] -= l2[i - 2] * x[i - 2];
            }
        }
        for (xi, di) in x.iter_mut().zip(&d) {
            *xi /= di;
        }
        // backward: Lᵀ x = v
        for i in (0..n).rev() {
            if i + 1 < n {
                x[i] -= l1[i] * x[i + 1];
            }
            if i + 2 < n {
                x[i] -= l2[i] * x[i + 2];
            }
        }
        Ok(x)
    }
}
