use enum_dispatch::enum_dispatch;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Universal gas constant in bar*cm3/(mol*K)
pub const R_GAS: f64 = 83.14;

/// tolerance for checking that a composition vector sums to unity
pub const COMPOSITION_TOL: f64 = 1e-6;

/// Aggregation state of a phase. Every composition handled by the engines
/// carries one of these tags so that the fugacity model knows which volume
/// root / reference state to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    Liquid,
    Vapor,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseState::Liquid => write!(f, "L"),
            PhaseState::Vapor => write!(f, "V"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EquilibriumError {
    #[error("infeasible input: {0}")]
    InfeasibleInput(String),
    #[error("fugacity model failed at T = {temperature} K, P = {pressure} bar: {reason}")]
    ModelFailure {
        temperature: f64,
        pressure: f64,
        reason: String,
    },
    #[error("singular Jacobian in Newton step at iteration {iteration}")]
    SingularJacobian { iteration: usize },
    #[error("Rachford-Rice iteration did not converge after {iterations} iterations")]
    RachfordRiceFailure { iterations: usize },
    #[error("serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// External thermodynamic model seen by the equilibrium engines. The model
/// maps (composition, T, P, phase state) to the vector of log fugacity
/// coefficients and the molar volume of the phase. It must be deterministic
/// and side effect free; the engines call it many times per flash.
///
/// A failed internal volume-root solution is reported as
/// [`EquilibriumError::ModelFailure`] and aborts the current computation.
#[enum_dispatch]
pub trait FugacityModel {
    /// number of components
    fn nc(&self) -> usize;
    /// log fugacity coefficients ln phi_i and molar volume of the phase
    /// with composition `w` at temperature `t` (K) and pressure `p` (bar)
    fn ln_phi(
        &self,
        w: &DVector<f64>,
        t: f64,
        p: f64,
        state: PhaseState,
    ) -> Result<(DVector<f64>, f64), EquilibriumError>;
}

/// composition vector must be non-negative and sum to unity
pub fn validate_composition(w: &DVector<f64>, name: &str) -> Result<(), EquilibriumError> {
    if w.is_empty() {
        return Err(EquilibriumError::InfeasibleInput(format!(
            "{} is empty",
            name
        )));
    }
    if w.iter().any(|&wi| wi < 0.0) {
        return Err(EquilibriumError::InfeasibleInput(format!(
            "{} has negative entries: {:?}",
            name,
            w.as_slice()
        )));
    }
    let s: f64 = w.sum();
    if (s - 1.0).abs() > COMPOSITION_TOL {
        return Err(EquilibriumError::InfeasibleInput(format!(
            "{} sums to {} instead of 1",
            name, s
        )));
    }
    Ok(())
}

pub fn validate_tp(t: f64, p: f64) -> Result<(), EquilibriumError> {
    if !(t > 0.0) {
        return Err(EquilibriumError::InfeasibleInput(format!(
            "temperature {} K is not positive",
            t
        )));
    }
    if !(p > 0.0) {
        return Err(EquilibriumError::InfeasibleInput(format!(
            "pressure {} bar is not positive",
            p
        )));
    }
    Ok(())
}

/// normalize a composition in place, returns the original sum
pub fn normalize(w: &mut DVector<f64>) -> f64 {
    let s = w.sum();
    if s > 0.0 {
        *w /= s;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_composition() {
        let ok = DVector::from_vec(vec![0.4, 0.6]);
        assert!(validate_composition(&ok, "z").is_ok());

        let bad_sum = DVector::from_vec(vec![0.4, 0.7]);
        assert!(validate_composition(&bad_sum, "z").is_err());

        let negative = DVector::from_vec(vec![-0.1, 1.1]);
        assert!(validate_composition(&negative, "z").is_err());

        let empty: DVector<f64> = DVector::from_vec(vec![]);
        assert!(validate_composition(&empty, "z").is_err());
    }

    #[test]
    fn test_validate_tp() {
        assert!(validate_tp(350.0, 1.0).is_ok());
        assert!(validate_tp(-10.0, 1.0).is_err());
        assert!(validate_tp(350.0, 0.0).is_err());
        assert!(validate_tp(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_normalize() {
        let mut w = DVector::from_vec(vec![2.0, 2.0]);
        let s = normalize(&mut w);
        assert_eq!(s, 4.0);
        assert_eq!(w[0], 0.5);
    }

    #[test]
    fn test_phase_state_display() {
        assert_eq!(PhaseState::Liquid.to_string(), "L");
        assert_eq!(PhaseState::Vapor.to_string(), "V");
    }
}
