/// Raoult model: Antoine vapor pressures, ideal liquid and vapor. The
/// simplest member of the model family and the reference case every
/// engine is checked against.
pub mod ideal;
/// gamma-phi model: NRTL activity coefficients in the liquid phase,
/// ideal vapor. Captures strongly non-ideal VLE and liquid-liquid
/// demixing.
pub mod activity;

use crate::Equilibrium::model_api::{EquilibriumError, FugacityModel, PhaseState};
use enum_dispatch::enum_dispatch;
use nalgebra::DVector;

pub use activity::{NrtlGammaPhi, NrtlParams};
pub use ideal::{AntoineParams, IdealModel};

/// Closed set of the bundled fugacity models. Engines are generic over
/// [`FugacityModel`], this enum lets heterogeneous model collections be
/// stored and serialized without trait objects.
#[enum_dispatch(FugacityModel)]
#[derive(Debug, Clone)]
pub enum ModelEnum {
    Ideal(IdealModel),
    Nrtl(NrtlGammaPhi),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_dispatch() {
        let m: ModelEnum = IdealModel::new(
            AntoineParams {
                a: vec![9.2645757520, 9.3068528194],
                b: vec![3000.0, 3500.0],
                c: vec![0.0, 0.0],
            },
            vec![90.0, 60.0],
        )
        .unwrap()
        .into();
        assert_eq!(m.nc(), 2);
        let w = DVector::from_vec(vec![0.5, 0.5]);
        let (lnphi, v) = m.ln_phi(&w, 350.0, 1.0, PhaseState::Vapor).unwrap();
        assert_eq!(lnphi[0], 0.0);
        assert!(v > 0.0);
    }
}
