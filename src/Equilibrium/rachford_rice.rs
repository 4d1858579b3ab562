//! Scalar mass-balance (Rachford-Rice) solver for the two-phase split,
//! FO(beta) = sum_i z_i (K_i - 1) / (1 + beta (K_i - 1)) = 0,
//! solved with a bounded third-order Halley iteration. Steps that would
//! leave the feasible window bisect instead.
use crate::Equilibrium::model_api::EquilibriumError;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RachfordRice {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for RachfordRice {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RachfordRiceSolution {
    pub beta: f64,
    /// denominators D_i = 1 + beta (K_i - 1), reused by the flash to form
    /// the phase compositions x = z / D, y = K x
    pub denominator: DVector<f64>,
    /// the feed is outside the two-phase region for the given K
    pub single_phase: bool,
    pub iterations: usize,
}

/// residual of the bubble point condition, sum_i x_i K_i - 1
pub fn bubble_residual(x: &DVector<f64>, k: &DVector<f64>) -> f64 {
    x.dot(k) - 1.0
}

/// residual of the dew point condition, sum_i y_i / K_i - 1
pub fn dew_residual(y: &DVector<f64>, k: &DVector<f64>) -> f64 {
    y.iter().zip(k.iter()).map(|(yi, ki)| yi / ki).sum::<f64>() - 1.0
}

impl RachfordRice {
    /// Solves FO(beta) = 0 for the vapor (trial phase) fraction. `beta0`
    /// seeds the iteration when it lies inside the feasible window.
    ///
    /// When FO(0) <= 0 or FO(1) >= 0 the feed cannot split for the given
    /// K and the corresponding boundary value is returned with
    /// `single_phase` set; the caller decides what that means.
    pub fn solve(
        &self,
        z: &DVector<f64>,
        k: &DVector<f64>,
        beta0: Option<f64>,
    ) -> Result<RachfordRiceSolution, EquilibriumError> {
        let n = z.len();
        let k1: DVector<f64> = k.map(|ki| ki - 1.0);
        let g0: f64 = z.dot(&k1);
        let g1: f64 = 1.0 - z.iter().zip(k.iter()).map(|(zi, ki)| zi / ki).sum::<f64>();

        if g0 <= 0.0 {
            return Ok(RachfordRiceSolution {
                beta: 0.0,
                denominator: DVector::from_element(n, 1.0),
                single_phase: true,
                iterations: 0,
            });
        }
        if g1 >= 0.0 {
            return Ok(RachfordRiceSolution {
                beta: 1.0,
                denominator: k.clone(),
                single_phase: true,
                iterations: 0,
            });
        }

        // Michelsen window keeping every implied composition non-negative
        let mut beta_min: f64 = 0.0;
        let mut beta_max: f64 = 1.0;
        for i in 0..n {
            if k[i] > 1.0 {
                beta_min = beta_min.max((k[i] * z[i] - 1.0) / (k[i] - 1.0));
            } else if k[i] < 1.0 {
                beta_max = beta_max.min((1.0 - z[i]) / (1.0 - k[i]));
            }
        }

        // FO is strictly decreasing, so [lo, hi] brackets the root
        let mut lo = beta_min;
        let mut hi = beta_max;
        let mut beta = match beta0 {
            Some(b) if b > beta_min && b < beta_max => b,
            _ => 0.5 * (beta_min + beta_max),
        };

        let mut it = 0;
        while it < self.max_iterations {
            it += 1;
            let mut fo = 0.0;
            let mut dfo = 0.0;
            let mut d2fo = 0.0;
            for i in 0..n {
                let d = 1.0 + beta * k1[i];
                let t = z[i] * k1[i] / d;
                fo += t;
                dfo -= t * k1[i] / d;
                d2fo += 2.0 * t * (k1[i] / d).powi(2);
            }
            if fo.abs() < self.tolerance {
                return Ok(self.finish(z, &k1, beta, it));
            }
            if fo > 0.0 {
                lo = beta;
            } else {
                hi = beta;
            }
            let den = 2.0 * dfo * dfo - fo * d2fo;
            let dbeta = if den.abs() > f64::MIN_POSITIVE {
                -2.0 * fo * dfo / den
            } else {
                f64::INFINITY
            };
            let mut beta_new = beta + dbeta;
            if !(beta_new > lo && beta_new < hi) || !beta_new.is_finite() {
                beta_new = 0.5 * (lo + hi);
            }
            if (beta_new - beta).abs() < self.tolerance {
                return Ok(self.finish(z, &k1, beta_new, it));
            }
            beta = beta_new;
        }
        Err(EquilibriumError::RachfordRiceFailure {
            iterations: self.max_iterations,
        })
    }

    fn finish(
        &self,
        z: &DVector<f64>,
        k1: &DVector<f64>,
        beta: f64,
        iterations: usize,
    ) -> RachfordRiceSolution {
        let denominator = DVector::from_fn(z.len(), |i, _| 1.0 + beta * k1[i]);
        RachfordRiceSolution {
            beta,
            denominator,
            single_phase: false,
            iterations,
        }
    }
}
