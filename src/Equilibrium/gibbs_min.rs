//! Robustness fallback: equilibrium as unconstrained minimization of the
//! total Gibbs energy G = sum_k sum_i n_ik * ln f_ik over per-phase mole
//! numbers. The component mass balance sum_k n_ik = z_i is satisfied by
//! construction through a per-component softmax split across the phases,
//! so no constrained solver is needed. A stationary point of G is found,
//! global stability is NOT guaranteed without a preceding stability scan.
use crate::Equilibrium::model_api::{EquilibriumError, FugacityModel, PhaseState};
use crate::Equilibrium::solvers::{Bfgs, MinimizeScalar};
use log::debug;
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone)]
pub struct GibbsEquilibrium {
    /// phase fractions, one entry per phase, sums to 1
    pub beta: DVector<f64>,
    pub compositions: Vec<DVector<f64>>,
    pub volumes: Vec<f64>,
    pub gibbs_energy: f64,
    /// final gradient norm of the minimizer
    pub error: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GibbsMinimizer {
    pub minimizer: Bfgs,
}

const LAMBDA_FLOOR: f64 = 1e-100;

impl GibbsMinimizer {
    /// Minimizes G starting from the given per-phase compositions and
    /// phase fractions. Phase 0 is the softmax gauge; the independent
    /// variables are u_ik = ln(lambda_ik / lambda_i0) for k > 0, where
    /// lambda_ik is the fraction of component i assigned to phase k.
    pub fn minimize<M: FugacityModel>(
        &self,
        x0: &[DVector<f64>],
        states: &[PhaseState],
        beta0: &DVector<f64>,
        z: &DVector<f64>,
        t: f64,
        p: f64,
        model: &M,
    ) -> Result<GibbsEquilibrium, EquilibriumError> {
        let np = x0.len();
        let nc = z.len();
        if np < 2 || states.len() != np || beta0.len() != np {
            return Err(EquilibriumError::InfeasibleInput(
                "Gibbs minimization needs at least two phases with matching states and fractions"
                    .to_string(),
            ));
        }

        // initial split fractions proportional to beta_k * x_ik, floored so
        // that suppressed phases can still be picked up by the minimizer
        let mut u0 = DVector::zeros(nc * (np - 1));
        for i in 0..nc {
            let lam0 = (beta0[0].max(1e-3)) * x0[0][i].max(1e-10);
            for k in 1..np {
                let lamk = (beta0[k].max(1e-3)) * x0[k][i].max(1e-10);
                u0[i * (np - 1) + (k - 1)] = (lamk / lam0).ln();
            }
        }

        let mut fun = |u: &DVector<f64>| -> Result<(f64, DVector<f64>), EquilibriumError> {
            let (lam, n) = split_feed(u, z, nc, np);
            let mu = phase_potentials(&n, states, t, p, model, nc, np)?;
            let mut g = 0.0;
            let mut grad = DVector::zeros(nc * (np - 1));
            for i in 0..nc {
                let mut mu_bar = 0.0;
                for k in 0..np {
                    g += n[(i, k)] * mu[(i, k)];
                    mu_bar += lam[(i, k)] * mu[(i, k)];
                }
                for k in 1..np {
                    grad[i * (np - 1) + (k - 1)] = z[i] * lam[(i, k)] * (mu[(i, k)] - mu_bar);
                }
            }
            Ok((g, grad))
        };
        let report = self.minimizer.minimize(&mut fun, &u0)?;

        // rebuild the converged split
        let (_, n) = split_feed(&report.x, z, nc, np);
        let mut beta = DVector::zeros(np);
        let mut compositions = Vec::with_capacity(np);
        let mut volumes = Vec::with_capacity(np);
        let mut gibbs_energy = 0.0;
        for k in 0..np {
            let nk: f64 = (0..nc).map(|i| n[(i, k)]).sum();
            beta[k] = nk;
            let xk = DVector::from_fn(nc, |i, _| n[(i, k)] / nk.max(1e-300));
            let (lnphi, v) = model.ln_phi(&xk, t, p, states[k])?;
            for i in 0..nc {
                gibbs_energy += n[(i, k)] * (xk[i].max(LAMBDA_FLOOR).ln() + lnphi[i]);
            }
            compositions.push(xk);
            volumes.push(v);
        }
        debug!(
            "Gibbs minimization: G = {:e}, |grad| = {:e}, {} iterations",
            gibbs_energy, report.residual, report.iterations
        );
        Ok(GibbsEquilibrium {
            beta,
            compositions,
            volumes,
            gibbs_energy,
            error: report.residual,
            iterations: report.iterations,
            converged: report.converged,
        })
    }
}

/// softmax split of the feed across phases; returns (lambda, n) as nc x np
fn split_feed(u: &DVector<f64>, z: &DVector<f64>, nc: usize, np: usize) -> (DMatrix<f64>, DMatrix<f64>) {
    let mut lam = DMatrix::zeros(nc, np);
    let mut n = DMatrix::zeros(nc, np);
    for i in 0..nc {
        // shift by the row maximum so the exponentials cannot overflow
        let mut m: f64 = 0.0;
        for k in 1..np {
            m = m.max(u[i * (np - 1) + (k - 1)]);
        }
        let mut denom = (-m).exp();
        for k in 1..np {
            denom += (u[i * (np - 1) + (k - 1)] - m).exp();
        }
        lam[(i, 0)] = (-m).exp() / denom;
        for k in 1..np {
            lam[(i, k)] = (u[i * (np - 1) + (k - 1)] - m).exp() / denom;
        }
        for k in 0..np {
            n[(i, k)] = z[i] * lam[(i, k)];
        }
    }
    (lam, n)
}

/// chemical potentials mu_ik = ln x_ik + ln phi_ik for every phase
fn phase_potentials<M: FugacityModel>(
    n: &DMatrix<f64>,
    states: &[PhaseState],
    t: f64,
    p: f64,
    model: &M,
    nc: usize,
    np: usize,
) -> Result<DMatrix<f64>, EquilibriumError> {
    let mut mu = DMatrix::zeros(nc, np);
    for k in 0..np {
        let nk: f64 = (0..nc).map(|i| n[(i, k)]).sum();
        let xk = DVector::from_fn(nc, |i, _| n[(i, k)] / nk.max(1e-300));
        let (lnphi, _) = model.ln_phi(&xk, t, p, states[k])?;
        for i in 0..nc {
            mu[(i, k)] = xk[i].max(LAMBDA_FLOOR).ln() + lnphi[i];
        }
    }
    Ok(mu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Models::ideal::{AntoineParams, IdealModel};
    use approx::assert_relative_eq;

    fn raoult_model() -> IdealModel {
        // Psat(350 K) = 2.0 and 0.5 bar
        IdealModel::new(
            AntoineParams {
                a: vec![9.2645757520, 9.3068528194],
                b: vec![3000.0, 3500.0],
                c: vec![0.0, 0.0],
            },
            vec![90.0, 60.0],
        )
        .unwrap()
    }

    #[test]
    fn test_gibbs_matches_raoult_flash() {
        // K = [2, 0.5] independent of composition, so the analytic answer
        // is beta = 0.5, x = [1/3, 2/3], y = [2/3, 1/3]
        let model = raoult_model();
        let z = DVector::from_vec(vec![0.5, 0.5]);
        let x0 = DVector::from_vec(vec![0.3, 0.7]);
        let y0 = DVector::from_vec(vec![0.7, 0.3]);
        let gm = GibbsMinimizer::default();
        let sol = gm
            .minimize(
                &[x0, y0],
                &[PhaseState::Liquid, PhaseState::Vapor],
                &DVector::from_vec(vec![0.5, 0.5]),
                &z,
                350.0,
                1.0,
                &model,
            )
            .unwrap();
        assert!(sol.converged);
        assert_relative_eq!(sol.beta[1], 0.5, epsilon = 1e-5);
        assert_relative_eq!(sol.compositions[0][0], 1.0 / 3.0, epsilon = 1e-5);
        assert_relative_eq!(sol.compositions[1][0], 2.0 / 3.0, epsilon = 1e-5);
        // mass balance by construction
        for i in 0..2 {
            let total: f64 = (0..2)
                .map(|k| sol.beta[k] * sol.compositions[k][i])
                .sum();
            assert_relative_eq!(total, z[i], epsilon = 1e-12);
        }
    }
}
