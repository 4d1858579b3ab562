//! Raoult reference model. Vapor pressures from the Antoine correlation
//! ln Psat = A - B / (T + C) with Psat in bar and T in K; the liquid is an
//! ideal solution, the vapor an ideal gas, so K_i = Psat_i / P exactly.
use crate::Equilibrium::model_api::{EquilibriumError, FugacityModel, PhaseState, R_GAS};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Antoine coefficients, one entry per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntoineParams {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
}

impl AntoineParams {
    pub fn nc(&self) -> usize {
        self.a.len()
    }

    fn check(&self) -> Result<(), EquilibriumError> {
        if self.a.is_empty() || self.a.len() != self.b.len() || self.a.len() != self.c.len() {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "Antoine coefficient vectors have inconsistent lengths: {}, {}, {}",
                self.a.len(),
                self.b.len(),
                self.c.len()
            )));
        }
        Ok(())
    }

    /// saturation pressures of all components at `t` (K), in bar
    pub fn psat(&self, t: f64) -> Result<DVector<f64>, EquilibriumError> {
        for i in 0..self.nc() {
            if t + self.c[i] <= 0.0 {
                return Err(EquilibriumError::ModelFailure {
                    temperature: t,
                    pressure: f64::NAN,
                    reason: format!("Antoine correlation of component {} undefined", i),
                });
            }
        }
        Ok(DVector::from_fn(self.nc(), |i, _| {
            (self.a[i] - self.b[i] / (t + self.c[i])).exp()
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdealModel {
    antoine: AntoineParams,
    /// molar volumes of the pure liquids, cm3/mol
    liquid_volumes: Vec<f64>,
}

impl IdealModel {
    pub fn new(antoine: AntoineParams, liquid_volumes: Vec<f64>) -> Result<Self, EquilibriumError> {
        antoine.check()?;
        if liquid_volumes.len() != antoine.nc() {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "{} liquid volumes for {} components",
                liquid_volumes.len(),
                antoine.nc()
            )));
        }
        Ok(Self {
            antoine,
            liquid_volumes,
        })
    }

    pub fn psat(&self, t: f64) -> Result<DVector<f64>, EquilibriumError> {
        self.antoine.psat(t)
    }
}

impl FugacityModel for IdealModel {
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
                let lnphi = psat.map(|ps| (ps / p).ln());
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

    fn model() -> IdealModel {
        // tuned so that Psat(350 K) = 2.0 and 0.5 bar exactly
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
    fn test_psat() {
        let m = model();
        let ps = m.psat(350.0).unwrap();
        assert_relative_eq!(ps[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(ps[1], 0.5, epsilon = 1e-9);
        let ps320 = m.psat(320.0).unwrap();
        assert_relative_eq!(ps320[0], 0.89545416, epsilon = 1e-7);
        assert_relative_eq!(ps320[1], 0.19580281, epsilon = 1e-7);
    }

    #[test]
    fn test_raoult_k_values() {
        // K_i = exp(lnphi_L - lnphi_V) = Psat_i / P for any composition
        let m = model();
        let w = DVector::from_vec(vec![0.25, 0.75]);
        let (lnphil, vl) = m.ln_phi(&w, 350.0, 1.0, PhaseState::Liquid).unwrap();
        let (lnphiv, vv) = m.ln_phi(&w, 350.0, 1.0, PhaseState::Vapor).unwrap();
        assert_relative_eq!((lnphil[0] - lnphiv[0]).exp(), 2.0, epsilon = 1e-9);
        assert_relative_eq!((lnphil[1] - lnphiv[1]).exp(), 0.5, epsilon = 1e-9);
        assert_relative_eq!(vl, 0.25 * 90.0 + 0.75 * 60.0);
        assert_relative_eq!(vv, R_GAS * 350.0 / 1.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let bad = IdealModel::new(
            AntoineParams {
                a: vec![9.0],
                b: vec![3000.0],
                c: vec![0.0],
            },
            vec![90.0, 60.0],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_antoine_domain_failure() {
        let m = IdealModel::new(
            AntoineParams {
                a: vec![9.0],
                b: vec![3000.0],
                c: vec![-400.0],
            },
            vec![90.0],
        )
        .unwrap();
        assert!(matches!(
            m.psat(350.0),
            Err(EquilibriumError::ModelFailure { .. })
        ));
    }
}
