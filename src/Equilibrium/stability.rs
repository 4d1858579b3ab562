//! Phase stability analysis by tangent plane distance (tpd) minimization,
//!   tpd(w) = sum_i w_i (ln w_i + ln phi_i(w) - ln z_i - ln phi_i(z)),
//! minimized in Michelsen's unconstrained mole-number variables
//! a_i = 2 sqrt(W_i), for which the gradient is exact without any
//! composition derivatives of the fugacity model.
//!
//! Sign law: tpd < 0 at a minimum means the reference composition z is
//! unstable at (T, P) and the minimizer w is a usable trial phase;
//! tpd ~ 0 marginal; tpd > 0 stable with respect to that trial.
use crate::Equilibrium::model_api::{
    EquilibriumError, FugacityModel, PhaseState, validate_composition, validate_tp,
};
use crate::Equilibrium::solvers::{Bfgs, MinimizeScalar};
use log::{debug, warn};
use nalgebra::DVector;

const W_FLOOR: f64 = 1e-30;

#[derive(Debug, Clone)]
pub struct StabilityResult {
    /// composition of the converged trial phase
    pub w: DVector<f64>,
    /// tangent plane distance at `w`
    pub tpd: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct StabilityAnalyzer {
    pub minimizer: Bfgs,
    /// minima closer than this (max norm over compositions) count as one
    pub dedup_tolerance: f64,
}

impl Default for StabilityAnalyzer {
    fn default() -> Self {
        Self {
            minimizer: Bfgs::default(),
            dedup_tolerance: 1e-3,
        }
    }
}

/// Plain tpd functional evaluation at a given trial composition.
pub fn tpd<M: FugacityModel>(
    w: &DVector<f64>,
    z: &DVector<f64>,
    t: f64,
    p: f64,
    model: &M,
    trial_state: PhaseState,
    ref_state: PhaseState,
) -> Result<f64, EquilibriumError> {
    let (lnphi_z, _) = model.ln_phi(z, t, p, ref_state)?;
    let (lnphi_w, _) = model.ln_phi(w, t, p, trial_state)?;
    let mut value = 0.0;
    for i in 0..z.len() {
        if w[i] > 0.0 {
            let di = z[i].max(W_FLOOR).ln() + lnphi_z[i];
            value += w[i] * (w[i].ln() + lnphi_w[i] - di);
        }
    }
    Ok(value)
}

impl StabilityAnalyzer {
    /// Minimizes the tpd functional starting from the trial composition
    /// `w0`; returns the converged composition and its tpd value.
    pub fn tpd_min<M: FugacityModel>(
        &self,
        w0: &DVector<f64>,
        z: &DVector<f64>,
        t: f64,
        p: f64,
        model: &M,
        trial_state: PhaseState,
        ref_state: PhaseState,
    ) -> Result<StabilityResult, EquilibriumError> {
        validate_composition(z, "reference z")?;
        validate_composition(w0, "trial w0")?;
        validate_tp(t, p)?;
        let nc = z.len();
        if model.nc() != nc || w0.len() != nc {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "component count mismatch: model has {}, composition has {}",
                model.nc(),
                nc
            )));
        }

        let (lnphi_z, _) = model.ln_phi(z, t, p, ref_state)?;
        let d = DVector::from_fn(nc, |i, _| z[i].max(W_FLOOR).ln() + lnphi_z[i]);

        // a_i = 2 sqrt(W_i); the modified functional
        // tm(W) = 1 + sum_i W_i (ln W_i + ln phi_i(w) - d_i - 1)
        // has the exact gradient dtm/da_i = sqrt(W_i)(ln W_i + ln phi_i - d_i)
        let a0 = DVector::from_fn(nc, |i, _| 2.0 * w0[i].max(W_FLOOR).sqrt());
        let mut fun = |a: &DVector<f64>| -> Result<(f64, DVector<f64>), EquilibriumError> {
            let big_w = DVector::from_fn(nc, |i, _| (a[i] * a[i] / 4.0).max(W_FLOOR));
            let mut w = big_w.clone();
            let s = w.sum();
            w /= s;
            let (lnphi_w, _) = model.ln_phi(&w, t, p, trial_state)?;
            let mut tm = 1.0;
            let mut grad = DVector::zeros(nc);
            for i in 0..nc {
                let gi = big_w[i].ln() + lnphi_w[i] - d[i];
                tm += big_w[i] * (gi - 1.0);
                grad[i] = big_w[i].sqrt() * gi;
            }
            Ok((tm, grad))
        };
        let report = self.minimizer.minimize(&mut fun, &a0)?;

        let mut w = DVector::from_fn(nc, |i, _| (report.x[i] * report.x[i] / 4.0).max(W_FLOOR));
        let s = w.sum();
        w /= s;
        let value = tpd(&w, z, t, p, model, trial_state, ref_state)?;
        debug!(
            "tpd_min: tpd = {:e} at w = {:?} ({} iterations)",
            value,
            w.as_slice(),
            report.iterations
        );
        Ok(StabilityResult {
            w,
            tpd: value,
            iterations: report.iterations,
            converged: report.converged,
        })
    }

    /// Repeats the tpd minimization from `n` systematically chosen initial
    /// guesses (near-pure corners cycling the components, the feed itself,
    /// the inverted feed) and deduplicates the resulting minima by
    /// composition distance. Fewer than `n` distinct minima may exist.
    pub fn tpd_minimas<M: FugacityModel>(
        &self,
        n: usize,
        z: &DVector<f64>,
        t: f64,
        p: f64,
        model: &M,
        trial_state: PhaseState,
        ref_state: PhaseState,
    ) -> Result<Vec<StabilityResult>, EquilibriumError> {
        validate_composition(z, "reference z")?;
        let nc = z.len();
        let mut minima: Vec<StabilityResult> = Vec::new();
        for j in 0..n.max(1) {
            let w0 = initial_trial(j, nc, z);
            let found = self.tpd_min(&w0, z, t, p, model, trial_state, ref_state)?;
            let duplicate = minima
                .iter()
                .any(|m| (&m.w - &found.w).amax() < self.dedup_tolerance);
            if !duplicate {
                minima.push(found);
            }
            if minima.len() == n {
                break;
            }
        }
        minima.sort_by(|a, b| a.tpd.total_cmp(&b.tpd));
        Ok(minima)
    }

    /// Two-liquid specialization: runs `tpd_minimas` with n = 2 and both
    /// phases liquid, returning the two minima as liquid-liquid initial
    /// guesses for a flash.
    pub fn lle_init<M: FugacityModel>(
        &self,
        z: &DVector<f64>,
        t: f64,
        p: f64,
        model: &M,
    ) -> Result<(DVector<f64>, DVector<f64>), EquilibriumError> {
        let minima =
            self.tpd_minimas(2, z, t, p, model, PhaseState::Liquid, PhaseState::Liquid)?;
        match minima.len() {
            0 => Err(EquilibriumError::InfeasibleInput(
                "no tpd minimum found for liquid-liquid initialization".to_string(),
            )),
            1 => {
                warn!("lle_init: only one distinct tpd minimum, returning it twice");
                Ok((minima[0].w.clone(), minima[0].w.clone()))
            }
            _ => Ok((minima[0].w.clone(), minima[1].w.clone())),
        }
    }
}

/// deterministic initial guess cycle for tpd_minimas
fn initial_trial(j: usize, nc: usize, z: &DVector<f64>) -> DVector<f64> {
    if j < nc {
        // near-pure corner on component j
        let off = 0.05 / (nc as f64 - 1.0).max(1.0);
        DVector::from_fn(nc, |i, _| if i == j { 0.95 } else { off })
    } else if j == nc {
        z.clone()
    } else if j == nc + 1 {
        // inverted feed
        let mut w = DVector::from_fn(nc, |i, _| 1.0 / z[i].max(W_FLOOR));
        let s = w.sum();
        w /= s;
        w
    } else {
        // softer corners on the second sweep
        let jj = j % nc;
        let off = 0.3 / (nc as f64 - 1.0).max(1.0);
        DVector::from_fn(nc, |i, _| if i == jj { 0.7 } else { off })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_trial_cycle() {
        let z = DVector::from_vec(vec![0.3, 0.7]);
        let w0 = initial_trial(0, 2, &z);
        assert_eq!(w0[0], 0.95);
        let w1 = initial_trial(1, 2, &z);
        assert_eq!(w1[1], 0.95);
        let wz = initial_trial(2, 2, &z);
        assert_eq!(wz, z);
        let winv = initial_trial(3, 2, &z);
        assert!(winv[0] > winv[1]);
        for j in 0..6 {
            let w = initial_trial(j, 2, &z);
            assert!((w.sum() - 1.0).abs() < 1e-12);
        }
    }
}
