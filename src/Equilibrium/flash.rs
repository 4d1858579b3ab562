//! Isothermal-isobaric two-phase flash. Accelerated successive substitution
//! (outer fugacity update, inner Rachford-Rice) switches to a Newton solve
//! of the full (ln K, beta) system when progress is judged too slow, and
//! falls back on Gibbs energy minimization when Newton fails as well:
//! an explicit ASS -> Newton -> Gibbs escalation ladder.
//!
//! No stability analysis is performed here: callers needing a guaranteed
//! globally stable split must run the tangent plane scan first.
use crate::Equilibrium::gibbs_min::GibbsMinimizer;
use crate::Equilibrium::model_api::{
    EquilibriumError, FugacityModel, PhaseState, normalize, validate_composition, validate_tp,
};
use crate::Equilibrium::rachford_rice::RachfordRice;
use crate::Equilibrium::solvers::{NewtonSys, SolveNonlinear};
use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashStatus {
    Converged,
    /// iteration budget exhausted with the residual still above tolerance
    NotConverged,
    /// both phases collapsed onto the same composition: the assumed number
    /// of phases is wrong, not a numerical fault
    TrivialSolution,
}

/// mode of the escalation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashMode {
    Ass,
    Newton,
    Gibbs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashConfig {
    /// tolerance on the squared ln K update norm
    pub k_tolerance: f64,
    /// accelerated substitution cycles before escalating to Newton
    pub nacc: usize,
    /// overall iteration budget
    pub max_iterations: usize,
    /// slow convergence heuristic: an ASS step counts as slow when the
    /// residual decreases by less than this factor
    pub slow_ratio: f64,
    /// number of consecutive slow steps that triggers Newton
    pub slow_window: usize,
    /// two phases closer than this (max norm) are the trivial solution
    pub trivial_tolerance: f64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            k_tolerance: 1e-10,
            nacc: 5,
            max_iterations: 60,
            slow_ratio: 0.92,
            slow_window: 3,
            trivial_tolerance: 1e-5,
        }
    }
}

/// Converged (or abandoned) two-phase split. Immutable record produced
/// once per flash call.
#[derive(Debug, Clone, Serialize)]
pub struct FlashResult {
    pub temperature: f64,
    pub pressure: f64,
    /// fraction of global moles in the `y` phase
    pub beta: f64,
    pub x: DVector<f64>,
    pub y: DVector<f64>,
    /// molar volumes from the last fugacity model evaluation
    pub vx: f64,
    pub vy: f64,
    pub states: (PhaseState, PhaseState),
    pub error: f64,
    pub iterations: usize,
    pub status: FlashStatus,
    /// which rung of the escalation ladder produced the answer
    pub method: String,
}

/// General dominant eigenvalue extrapolation from the last four iterates
/// `x` (newest) .. `x3` (oldest), used to accelerate successive
/// substitution every third cycle. Fits the two dominant eigenvalues of
/// the fixed-point map to the last three update differences and sums the
/// implied geometric tail; a single-eigenvalue (Aitken) fallback handles
/// the degenerate one-mode history.
pub(crate) fn gdem(
    x: &DVector<f64>,
    x1: &DVector<f64>,
    x2: &DVector<f64>,
    x3: &DVector<f64>,
) -> DVector<f64> {
    let d0 = x - x1;
    let d1 = x1 - x2;
    let d2 = x2 - x3;
    let d11 = d1.dot(&d1);
    let d22 = d2.dot(&d2);
    let d12 = d1.dot(&d2);
    let d01 = d0.dot(&d1);
    let d02 = d0.dot(&d2);
    let det = d11 * d22 - d12 * d12;
    if det.abs() < 1e-30 {
        // history spans a single mode
        if d11 < 1e-30 {
            return DVector::zeros(x.len());
        }
        let lambda = d01 / d11;
        if (1.0 - lambda).abs() < 1e-10 {
            return DVector::zeros(x.len());
        }
        return d0 * (lambda / (1.0 - lambda));
    }
    // d0 = a*d1 - b*d2 in the least squares sense, a and b being the sum
    // and product of the two eigenvalues
    let a = (d01 * d22 - d02 * d12) / det;
    let b = (d01 * d12 - d02 * d11) / det;
    let den = 1.0 - a + b;
    if den.abs() < 1e-10 {
        return DVector::zeros(x.len());
    }
    (d0 * (a - b) - d1 * b) / den
}

#[derive(Debug, Clone, Default)]
pub struct TwoPhaseFlash {
    pub config: FlashConfig,
    pub rachford_rice: RachfordRice,
    pub newton: NewtonSys,
    pub gibbs: GibbsMinimizer,
}

impl TwoPhaseFlash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flash of feed `z` at fixed `t` (K) and `p` (bar) starting from the
    /// phase composition guesses `x0` (reference phase) and `y0` (trial
    /// phase) with the given phase state pair.
    pub fn solve<M: FugacityModel>(
        &self,
        x0: &DVector<f64>,
        y0: &DVector<f64>,
        states: (PhaseState, PhaseState),
        z: &DVector<f64>,
        t: f64,
        p: f64,
        model: &M,
    ) -> Result<FlashResult, EquilibriumError> {
        validate_composition(z, "feed z")?;
        validate_composition(x0, "initial x")?;
        validate_composition(y0, "initial y")?;
        validate_tp(t, p)?;
        let nc = z.len();
        if model.nc() != nc || x0.len() != nc || y0.len() != nc {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "component count mismatch: model has {}, feed has {}",
                model.nc(),
                nc
            )));
        }
        let cfg = &self.config;

        let mut x = x0.clone();
        let mut y = y0.clone();
        let (mut lnphix, mut vx) = model.ln_phi(&x, t, p, states.0)?;
        let (mut lnphiy, mut vy) = model.ln_phi(&y, t, p, states.1)?;
        let mut lnk: DVector<f64> = &lnphix - &lnphiy;
        let mut k = lnk.map(f64::exp);
        let mut beta = 0.5;
        let mut e = f64::INFINITY;
        let mut it = 0usize;
        let mut itacc = 0usize;
        let mut slow_count = 0usize;
        let mut history: Vec<DVector<f64>> = Vec::with_capacity(3);
        let mut mode = FlashMode::Ass;
        let mut newton_failed = false;
        let mut status = FlashStatus::NotConverged;
        let mut method = "ASS".to_string();

        while it < cfg.max_iterations {
            match mode {
                FlashMode::Ass => {
                    it += 1;
                    let rr = self.rachford_rice.solve(z, &k, Some(beta))?;
                    beta = rr.beta;
                    let x_raw = z.component_div(&rr.denominator);
                    let y_raw = k.component_mul(&x_raw);
                    x = x_raw;
                    normalize(&mut x);
                    y = y_raw;
                    normalize(&mut y);
                    (lnphix, vx) = model.ln_phi(&x, t, p, states.0)?;
                    (lnphiy, vy) = model.ln_phi(&y, t, p, states.1)?;
                    let mut lnk_new = &lnphix - &lnphiy;
                    let e_prev = e;
                    e = (&lnk_new - &lnk).norm_squared();
                    history.push(lnk.clone());
                    if history.len() > 3 {
                        history.remove(0);
                    }
                    if it % 3 == 0 && history.len() == 3 {
                        lnk_new += gdem(&lnk_new, &history[2], &history[1], &history[0]);
                        itacc += 1;
                    }
                    lnk = lnk_new;
                    k = lnk.map(f64::exp);
                    if e < cfg.k_tolerance {
                        status = FlashStatus::Converged;
                        break;
                    }
                    if e > cfg.slow_ratio * e_prev {
                        slow_count += 1;
                    } else {
                        slow_count = 0;
                    }
                    if itacc >= cfg.nacc || slow_count >= cfg.slow_window {
                        mode = if newton_failed {
                            FlashMode::Gibbs
                        } else {
                            debug!(
                                "flash: ASS too slow after {} iterations (e = {:e}), switching to Newton",
                                it, e
                            );
                            FlashMode::Newton
                        };
                    }
                }
                FlashMode::Newton => {
                    let mut u0 = DVector::zeros(nc + 1);
                    for i in 0..nc {
                        u0[i] = lnk[i];
                    }
                    u0[nc] = beta.clamp(1e-8, 1.0 - 1e-8);
                    let mut fun = |u: &DVector<f64>| newton_residual(u, z, states, t, p, model);
                    match self.newton.solve(&mut fun, &u0) {
                        Ok(report) => {
                            it += report.iterations;
                            for i in 0..nc {
                                lnk[i] = report.x[i];
                            }
                            k = lnk.map(f64::exp);
                            beta = report.x[nc];
                            if report.converged && !(0.0..=1.0).contains(&beta) {
                                // negative flash root: the feed is single
                                // phase for this K, hand it back to the
                                // substitution loop
                                debug!(
                                    "flash: Newton root beta = {} outside [0, 1], downgrading to ASS",
                                    beta
                                );
                                beta = beta.clamp(0.0, 1.0);
                                newton_failed = true;
                                itacc = 0;
                                slow_count = 0;
                                mode = FlashMode::Ass;
                                continue;
                            }
                            let d = DVector::from_fn(nc, |i, _| 1.0 + beta * (k[i] - 1.0));
                            x = z.component_div(&d);
                            normalize(&mut x);
                            y = k.component_mul(&x);
                            normalize(&mut y);
                            (lnphix, vx) = model.ln_phi(&x, t, p, states.0)?;
                            (lnphiy, vy) = model.ln_phi(&y, t, p, states.1)?;
                            e = report.residual;
                            if report.converged {
                                status = FlashStatus::Converged;
                                method = "Newton".to_string();
                                break;
                            }
                            warn!("flash: Newton stalled, falling back on Gibbs minimization");
                            mode = FlashMode::Gibbs;
                        }
                        Err(EquilibriumError::SingularJacobian { iteration }) => {
                            warn!(
                                "flash: singular Jacobian in Newton step {}, downgrading to ASS",
                                iteration
                            );
                            newton_failed = true;
                            itacc = 0;
                            slow_count = 0;
                            mode = FlashMode::Ass;
                        }
                        Err(EquilibriumError::InfeasibleInput(reason)) => {
                            // the damped steps all left the feasible beta
                            // window, not a fault of the caller's input
                            warn!(
                                "flash: Newton left the feasible domain ({}), downgrading to ASS",
                                reason
                            );
                            newton_failed = true;
                            itacc = 0;
                            slow_count = 0;
                            mode = FlashMode::Ass;
                        }
                        Err(other) => return Err(other),
                    }
                }
                FlashMode::Gibbs => {
                    let beta0 = DVector::from_vec(vec![1.0 - beta, beta]);
                    let ge = self.gibbs.minimize(
                        &[x.clone(), y.clone()],
                        &[states.0, states.1],
                        &beta0,
                        z,
                        t,
                        p,
                        model,
                    )?;
                    it += ge.iterations;
                    beta = ge.beta[1];
                    x = ge.compositions[0].clone();
                    y = ge.compositions[1].clone();
                    vx = ge.volumes[0];
                    vy = ge.volumes[1];
                    e = ge.error;
                    status = if ge.converged {
                        FlashStatus::Converged
                    } else {
                        FlashStatus::NotConverged
                    };
                    method = "Gibbs".to_string();
                    break;
                }
            }
        }

        if status == FlashStatus::Converged && (&x - &y).amax() < cfg.trivial_tolerance {
            warn!("flash: converged to the trivial solution x = y");
            status = FlashStatus::TrivialSolution;
        }
        Ok(FlashResult {
            temperature: t,
            pressure: p,
            beta,
            x,
            y,
            vx,
            vy,
            states,
            error: e,
            iterations: it,
            status,
            method,
        })
    }
}

/// residual of the full Newton system in u = (ln K, beta):
/// f_i = ln K_i + ln phi_i(y) - ln phi_i(x), f_nc = sum(y_raw - x_raw)
fn newton_residual<M: FugacityModel>(
    u: &DVector<f64>,
    z: &DVector<f64>,
    states: (PhaseState, PhaseState),
    t: f64,
    p: f64,
    model: &M,
) -> Result<DVector<f64>, EquilibriumError> {
    let nc = z.len();
    let k = DVector::from_fn(nc, |i, _| u[i].exp());
    let beta = u[nc];
    let d = DVector::from_fn(nc, |i, _| 1.0 + beta * (k[i] - 1.0));
    if d.iter().any(|&di| di <= 0.0) {
        return Err(EquilibriumError::InfeasibleInput(
            "Newton trial point leaves the feasible beta window".to_string(),
        ));
    }
    let x_raw = z.component_div(&d);
    let y_raw = k.component_mul(&x_raw);
    let mut x = x_raw.clone();
    normalize(&mut x);
    let mut y = y_raw.clone();
    normalize(&mut y);
    let (lnphix, _) = model.ln_phi(&x, t, p, states.0)?;
    let (lnphiy, _) = model.ln_phi(&y, t, p, states.1)?;
    let mut f = DVector::zeros(nc + 1);
    for i in 0..nc {
        f[i] = u[i] + lnphiy[i] - lnphix[i];
    }
    f[nc] = y_raw.sum() - x_raw.sum();
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gdem_two_modes() {
        // x_n = x* - c1 r1^n - c2 r2^n: a two-eigenvalue history, the
        // extrapolation must jump straight to the fixed point
        let target = DVector::from_vec(vec![2.0, -1.0]);
        let seq: Vec<DVector<f64>> = (0..4)
            .map(|n| {
                &target
                    - DVector::from_vec(vec![0.5f64.powi(n), 2.0 * 0.25f64.powi(n)])
            })
            .collect();
        let dacc = gdem(&seq[3], &seq[2], &seq[1], &seq[0]);
        let extrapolated = &seq[3] + dacc;
        assert!((extrapolated - target).amax() < 1e-10);
    }

    #[test]
    fn test_gdem_single_mode() {
        // parallel differences degenerate to the Aitken fallback
        let target = DVector::from_vec(vec![2.0, -1.0]);
        let seq: Vec<DVector<f64>> = (0..4)
            .map(|n| {
                &target
                    - DVector::from_vec(vec![0.5f64.powi(n), 2.0 * 0.5f64.powi(n)])
            })
            .collect();
        let dacc = gdem(&seq[3], &seq[2], &seq[1], &seq[0]);
        let extrapolated = &seq[3] + dacc;
        assert!((extrapolated - target).amax() < 1e-10);
    }

    #[test]
    fn test_gdem_stationary_history() {
        let v = DVector::from_vec(vec![1.0, 1.0]);
        let dacc = gdem(&v, &v, &v, &v);
        assert_eq!(dacc.amax(), 0.0);
    }
}
