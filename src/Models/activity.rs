//! gamma-phi model: multicomponent NRTL activity coefficients in the
//! liquid, Antoine vapor pressures, ideal vapor. With temperature
//! independent tau the activity part drops out of nothing but the liquid,
//! so K_i = gamma_i Psat_i / P.
use crate::Equilibrium::model_api::{EquilibriumError, FugacityModel, PhaseState, R_GAS};
use crate::Models::ideal::AntoineParams;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// NRTL interaction matrices. `tau` and `alpha` are nc x nc with zero
/// diagonals; `alpha` is normally symmetric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NrtlParams {
    pub tau: DMatrix<f64>,
    pub alpha: DMatrix<f64>,
}

impl NrtlParams {
    /// symmetric binary shortcut used all over the tests
    pub fn binary(tau12: f64, tau21: f64, alpha: f64) -> Self {
        Self {
            tau: DMatrix::from_row_slice(2, 2, &[0.0, tau12, tau21, 0.0]),
            alpha: DMatrix::from_row_slice(2, 2, &[0.0, alpha, alpha, 0.0]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NrtlGammaPhi {
    antoine: AntoineParams,
    liquid_volumes: Vec<f64>,
    nrtl: NrtlParams,
}

impl NrtlGammaPhi {
    pub fn new(
        antoine: AntoineParams,
        liquid_volumes: Vec<f64>,
        nrtl: NrtlParams,
    ) -> Result<Self, EquilibriumError> {
        let nc = antoine.nc();
        if liquid_volumes.len() != nc
            || nrtl.tau.nrows() != nc
            || nrtl.tau.ncols() != nc
            || nrtl.alpha.nrows() != nc
            || nrtl.alpha.ncols() != nc
        {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "NRTL parameter dimensions do not match {} components",
                nc
            )));
        }
        Ok(Self {
            antoine,
            liquid_volumes,
            nrtl,
        })
    }

    /// log activity coefficients of the liquid at composition `x`
    pub fn ln_gamma(&self, x: &DVector<f64>) -> DVector<f64> {
        let nc = x.len();
        let tau = &self.nrtl.tau;
        let g = DMatrix::from_fn(nc, nc, |i, j| {
            (-self.nrtl.alpha[(i, j)] * tau[(i, j)]).exp()
        });
        // S_j = sum_k x_k G_kj, C_j = sum_k x_k tau_kj G_kj
        let s = DVector::from_fn(nc, |j, _| (0..nc).map(|k| x[k] * g[(k, j)]).sum::<f64>());
        let c = DVector::from_fn(nc, |j, _| {
            (0..nc).map(|k| x[k] * tau[(k, j)] * g[(k, j)]).sum::<f64>()
        });
        DVector::from_fn(nc, |i, _| {
            let mut lng = c[i] / s[i];
            for j in 0..nc {
                lng += x[j] * g[(i, j)] / s[j] * (tau[(i, j)] - c[j] / s[j]);
            }
            lng
        })
    }

    pub fn psat(&self, t: f64) -> Result<DVector<f64>, EquilibriumError> {
        self.antoine.psat(t)
    }
}

impl FugacityModel for NrtlGammaPhi {
    fn nc(&self) -> usize {
        self.liquid_volumes.len()
    }

    fn ln_phi(
        &self,
        w: &DVector<f64>,
        t: f64,
        p: f64,
        state: PhaseState,
    ) -> Result<(DVector<f64>, f64), EquilibriumError> {
        if w.len() != self.nc() {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "composition has {} entries, model has {} components",
                w.len(),
                self.nc()
            )));
        }
        match state {
            PhaseState::Liquid => {
                let psat = self.antoine.psat(t)?;
                let lng = self.ln_gamma(w);
                let lnphi = DVector::from_fn(self.nc(), |i, _| lng[i] + (psat[i] / p).ln());
                let v = w
                    .iter()
                    .zip(self.liquid_volumes.iter())
                    .map(|(wi, vi)| wi * vi)
                    .sum();
                Ok((lnphi, v))
            }
            PhaseState::Vapor => Ok((DVector::zeros(self.nc()), R_GAS * t / p)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn antoine() -> AntoineParams {
        AntoineParams {
            a: vec![9.2645757520, 9.3068528194],
            b: vec![3000.0, 3500.0],
            c: vec![0.0, 0.0],
        }
    }

    #[test]
    fn test_ln_gamma_strongly_nonideal() {
        // tau12 = tau21 = 2.5, alpha = 0.3: a demixing binary
        let m = NrtlGammaPhi::new(antoine(), vec![90.0, 60.0], NrtlParams::binary(2.5, 2.5, 0.3))
            .unwrap();
        let lng = m.ln_gamma(&DVector::from_vec(vec![0.3, 0.7]));
        assert_relative_eq!(lng[0], 1.503992256592015, epsilon = 1e-12);
        assert_relative_eq!(lng[1], 0.3380865992706727, epsilon = 1e-12);
    }

    #[test]
    fn test_ln_gamma_mildly_nonideal() {
        let m = NrtlGammaPhi::new(antoine(), vec![90.0, 60.0], NrtlParams::binary(0.5, 0.3, 0.3))
            .unwrap();
        let lng = m.ln_gamma(&DVector::from_vec(vec![0.4, 0.6]));
        assert_relative_eq!(lng[0], 0.27405064929207695, epsilon = 1e-12);
        assert_relative_eq!(lng[1], 0.1152419978724179, epsilon = 1e-12);
    }

    #[test]
    fn test_ln_gamma_pure_limit() {
        // gamma of a component in its own pure liquid is 1
        let m = NrtlGammaPhi::new(antoine(), vec![90.0, 60.0], NrtlParams::binary(2.5, 2.5, 0.3))
            .unwrap();
        let lng = m.ln_gamma(&DVector::from_vec(vec![1.0, 0.0]));
        assert_relative_eq!(lng[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_k_values_gamma_phi() {
        let m = NrtlGammaPhi::new(antoine(), vec![90.0, 60.0], NrtlParams::binary(0.5, 0.3, 0.3))
            .unwrap();
        let x = DVector::from_vec(vec![0.4, 0.6]);
        let (lnphil, _) = m.ln_phi(&x, 350.0, 1.0, PhaseState::Liquid).unwrap();
        let (lnphiv, _) = m.ln_phi(&x, 350.0, 1.0, PhaseState::Vapor).unwrap();
        let lng = m.ln_gamma(&x);
        let psat = m.psat(350.0).unwrap();
        for i in 0..2 {
            let k = (lnphil[i] - lnphiv[i]).exp();
            assert_relative_eq!(k, lng[i].exp() * psat[i] / 1.0, epsilon = 1e-12);
        }
    }
}
