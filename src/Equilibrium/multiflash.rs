//! Multiphase flash with phase stability variables. Each non-reference
//! phase k carries a pair (beta_k, theta_k) subject to the complementarity
//! condition beta_k * theta_k = 0: a present phase has theta_k = 0 and the
//! usual equilibrium relation, an absent phase has beta_k = 0 and
//! theta_k > 0 measuring how far it is from incipient. The outer loop is
//! accelerated successive substitution on the full ln K matrix; the inner
//! loop is an active-set Newton solve of the extended Rachford-Rice system
//!   f_k = sum_i z_i (K_ik e^{theta_k} - 1) / D_i = 0,
//!   D_i = 1 + sum_j beta_j (K_ij e^{theta_j} - 1).
use crate::Equilibrium::flash::{FlashStatus, gdem};
use crate::Equilibrium::gibbs_min::GibbsMinimizer;
use crate::Equilibrium::model_api::{
    EquilibriumError, FugacityModel, PhaseState, normalize, validate_composition, validate_tp,
};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiFlashConfig {
    /// tolerance on the squared ln K update norm (outer loop)
    pub k_tolerance: f64,
    /// tolerance on the extended Rachford-Rice residual (inner loop)
    pub inner_tolerance: f64,
    /// outer iteration budget
    pub max_iterations: usize,
    /// inner Newton iteration budget per outer pass
    pub inner_iterations: usize,
    /// accelerated cycles before falling back on Gibbs minimization
    pub nacc: usize,
    /// largest allowed inner Newton update component
    pub step_limit: f64,
}

impl Default for MultiFlashConfig {
    fn default() -> Self {
        Self {
            k_tolerance: 1e-10,
            inner_tolerance: 1e-10,
            max_iterations: 80,
            inner_iterations: 15,
            nacc: 8,
            step_limit: 0.5,
        }
    }
}

/// Converged (or abandoned) multiphase split. Phase 0 is the reference
/// phase; `beta` and `theta` cover all phases with theta[0] fixed at 0.
#[derive(Debug, Clone, Serialize)]
pub struct MultiphaseResult {
    pub temperature: f64,
    pub pressure: f64,
    pub beta: DVector<f64>,
    pub theta: DVector<f64>,
    pub compositions: Vec<DVector<f64>>,
    pub volumes: Vec<f64>,
    pub states: Vec<PhaseState>,
    pub error_outer: f64,
    pub error_inner: f64,
    pub iterations: usize,
    pub status: FlashStatus,
    pub method: String,
}

impl MultiphaseResult {
    /// indices of the phases actually present (beta > 0)
    pub fn present_phases(&self) -> Vec<usize> {
        (0..self.beta.len()).filter(|&k| self.beta[k] > 0.0).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiphaseFlash {
    pub config: MultiFlashConfig,
    pub gibbs: GibbsMinimizer,
}

impl MultiphaseFlash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flash of feed `z` at fixed `t` (K) and `p` (bar) over the candidate
    /// phase set given by `x0` and `states` (phase 0 is the reference).
    /// Phases the feed cannot sustain come back with beta = 0 and the
    /// stability variable theta > 0 instead of failing.
    pub fn solve<M: FugacityModel>(
        &self,
        x0: &[DVector<f64>],
        states: &[PhaseState],
        z: &DVector<f64>,
        t: f64,
        p: f64,
        model: &M,
    ) -> Result<MultiphaseResult, EquilibriumError> {
        let np = x0.len();
        let nc = z.len();
        validate_composition(z, "feed z")?;
        validate_tp(t, p)?;
        if np < 2 || states.len() != np {
            return Err(EquilibriumError::InfeasibleInput(
                "multiphase flash needs at least two candidate phases with matching states"
                    .to_string(),
            ));
        }
        if model.nc() != nc {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "component count mismatch: model has {}, feed has {}",
                model.nc(),
                nc
            )));
        }
        for (k, xk) in x0.iter().enumerate() {
            validate_composition(xk, &format!("initial composition of phase {}", k))?;
        }
        let cfg = &self.config;
        let m = np - 1;

        // ln K_ik = ln phi_i(ref) - ln phi_i(k), one column per trial phase
        let lnphi_ref = model.ln_phi(&x0[0], t, p, states[0])?.0;
        let mut lnk = DMatrix::zeros(nc, m);
        for k in 1..np {
            let (lnphik, _) = model.ln_phi(&x0[k], t, p, states[k])?;
            for i in 0..nc {
                lnk[(i, k - 1)] = lnphi_ref[i] - lnphik[i];
            }
        }
        let mut beta = DVector::from_element(m, 1.0 / np as f64);
        let mut theta = DVector::zeros(m);
        let mut compositions: Vec<DVector<f64>> = x0.to_vec();
        let mut volumes = vec![0.0; np];
        let mut e_outer = f64::INFINITY;
        let mut e_inner = f64::INFINITY;
        let mut it = 0usize;
        let mut itacc = 0usize;
        let mut history: Vec<DVector<f64>> = Vec::with_capacity(3);
        let mut status = FlashStatus::NotConverged;
        let mut method = "ASS".to_string();
        let mut use_gibbs = false;

        while it < cfg.max_iterations {
            it += 1;
            let kmat = lnk.map(f64::exp);
            match solve_beta_theta(&mut beta, &mut theta, z, &kmat, cfg) {
                Ok(res) => e_inner = res,
                Err(EquilibriumError::SingularJacobian { iteration }) => {
                    warn!(
                        "multiflash: singular Jacobian in phase-fraction step {}, \
                         falling back on Gibbs minimization",
                        iteration
                    );
                    use_gibbs = true;
                }
                Err(other) => return Err(other),
            }
            if use_gibbs {
                break;
            }

            // compositions from the converged phase fractions
            let d = denominators(z, &kmat, &beta, &theta);
            compositions[0] = z.component_div(&d);
            normalize(&mut compositions[0]);
            for k in 1..np {
                compositions[k] = DVector::from_fn(nc, |i, _| {
                    z[i] * kmat[(i, k - 1)] * theta[k - 1].exp() / d[i]
                });
                normalize(&mut compositions[k]);
            }

            // fugacity update
            let (lnphi0, v0) = model.ln_phi(&compositions[0], t, p, states[0])?;
            volumes[0] = v0;
            let mut lnk_new = DMatrix::zeros(nc, m);
            for k in 1..np {
                let (lnphik, vk) = model.ln_phi(&compositions[k], t, p, states[k])?;
                volumes[k] = vk;
                for i in 0..nc {
                    lnk_new[(i, k - 1)] = lnphi0[i] - lnphik[i];
                }
            }
            let flat_old = DVector::from_column_slice(lnk.as_slice());
            let mut flat_new = DVector::from_column_slice(lnk_new.as_slice());
            e_outer = (&flat_new - &flat_old).norm_squared();
            history.push(flat_old);
            if history.len() > 3 {
                history.remove(0);
            }
            if it % 3 == 0 && history.len() == 3 {
                flat_new += gdem(&flat_new, &history[2], &history[1], &history[0]);
                itacc += 1;
            }
            lnk = DMatrix::from_column_slice(nc, m, flat_new.as_slice());

            if e_outer < cfg.k_tolerance && e_inner < cfg.inner_tolerance {
                status = FlashStatus::Converged;
                break;
            }
            if itacc >= cfg.nacc {
                debug!(
                    "multiflash: substitution too slow after {} iterations (e = {:e}), \
                     falling back on Gibbs minimization",
                    it, e_outer
                );
                use_gibbs = true;
                break;
            }
        }

        let mut beta_full = full_beta(&beta, np);
        let mut theta_full = DVector::zeros(np);
        for k in 1..np {
            theta_full[k] = theta[k - 1];
        }

        if use_gibbs {
            let ge = self
                .gibbs
                .minimize(&compositions, states, &beta_full, z, t, p, model)?;
            it += ge.iterations;
            beta_full = ge.beta;
            theta_full = DVector::zeros(np);
            compositions = ge.compositions;
            volumes = ge.volumes;
            e_outer = ge.error;
            e_inner = ge.error;
            status = if ge.converged {
                FlashStatus::Converged
            } else {
                FlashStatus::NotConverged
            };
            method = "Gibbs".to_string();
        } else {
            // refresh the volumes for phases that never moved
            for k in 0..np {
                volumes[k] = model.ln_phi(&compositions[k], t, p, states[k])?.1;
            }
        }

        if status == FlashStatus::Converged {
            let collapsed = (1..np).any(|k| {
                beta_full[k] > 0.0
                    && beta_full[0] > 0.0
                    && (&compositions[k] - &compositions[0]).amax() < 1e-8
            });
            if collapsed {
                warn!("multiflash: two present phases share a composition");
                status = FlashStatus::TrivialSolution;
            }
        }
        Ok(MultiphaseResult {
            temperature: t,
            pressure: p,
            beta: beta_full,
            theta: theta_full,
            compositions,
            volumes,
            states: states.to_vec(),
            error_outer: e_outer,
            error_inner: e_inner,
            iterations: it,
            status,
            method,
        })
    }
}

fn full_beta(beta: &DVector<f64>, np: usize) -> DVector<f64> {
    let mut full = DVector::zeros(np);
    full[0] = (1.0 - beta.sum()).max(0.0);
    for k in 1..np {
        full[k] = beta[k - 1];
    }
    full
}

fn denominators(
    z: &DVector<f64>,
    kmat: &DMatrix<f64>,
    beta: &DVector<f64>,
    theta: &DVector<f64>,
) -> DVector<f64> {
    let nc = z.len();
    let m = beta.len();
    DVector::from_fn(nc, |i, _| {
        let mut d = 1.0;
        for j in 0..m {
            d += beta[j] * (kmat[(i, j)] * theta[j].exp() - 1.0);
        }
        d.max(1e-10)
    })
}

/// Active-set Newton solve of the extended Rachford-Rice system. For each
/// phase exactly one of (beta_k, theta_k) is free; a free beta driven
/// negative is clamped to zero and hands the slot to theta, and the other
/// way round, so beta_k * theta_k = 0 holds throughout.
fn solve_beta_theta(
    beta: &mut DVector<f64>,
    theta: &mut DVector<f64>,
    z: &DVector<f64>,
    kmat: &DMatrix<f64>,
    cfg: &MultiFlashConfig,
) -> Result<f64, EquilibriumError> {
    let nc = z.len();
    let m = beta.len();
    let mut beta_free: Vec<bool> = (0..m).map(|k| beta[k] > 0.0 || theta[k] <= 0.0).collect();
    let mut res = f64::INFINITY;
    for inner_it in 1..=cfg.inner_iterations {
        let emat = DMatrix::from_fn(nc, m, |i, k| kmat[(i, k)] * theta[k].exp() - 1.0);
        let d = denominators(z, kmat, beta, theta);
        let mut f = DVector::zeros(m);
        for k in 0..m {
            for i in 0..nc {
                f[k] += z[i] * emat[(i, k)] / d[i];
            }
        }
        res = f.amax();
        if res < cfg.inner_tolerance {
            break;
        }

        let mut jac = DMatrix::zeros(m, m);
        for k in 0..m {
            for j in 0..m {
                if beta_free[j] {
                    let mut s = 0.0;
                    for i in 0..nc {
                        s -= z[i] * emat[(i, k)] * emat[(i, j)] / (d[i] * d[i]);
                    }
                    jac[(k, j)] = s;
                } else if k == j {
                    // theta_j free implies beta_j = 0, only the diagonal
                    // term survives
                    let mut s = 0.0;
                    for i in 0..nc {
                        s += z[i] * kmat[(i, k)] * theta[k].exp() / d[i];
                    }
                    jac[(k, j)] = s;
                }
            }
        }
        let lu = jac.lu();
        let du = lu
            .solve(&(-&f))
            .ok_or(EquilibriumError::SingularJacobian { iteration: inner_it })?;

        let mut scale = 1.0f64;
        for k in 0..m {
            if du[k].abs() > cfg.step_limit {
                scale = scale.min(cfg.step_limit / du[k].abs());
            }
        }
        for k in 0..m {
            if beta_free[k] {
                beta[k] += scale * du[k];
                if beta[k] < 0.0 {
                    beta[k] = 0.0;
                    theta[k] = 0.0;
                    beta_free[k] = false;
                }
            } else {
                theta[k] += scale * du[k];
                if theta[k] < 0.0 {
                    theta[k] = 0.0;
                    beta_free[k] = true;
                }
            }
        }
        let total = beta.sum();
        if total > 1.0 {
            *beta *= (1.0 - 1e-10) / total;
        }
    }
    Ok(res)
}
