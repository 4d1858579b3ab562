//! Phase boundary (saturation) calculations: bubble and dew points with
//! either pressure or temperature as the free scalar. An inner successive
//! substitution loop updates the incipient phase composition at fixed
//! (T, P); an outer secant iteration drives the saturation residual
//! (sum x_i K_i - 1 for bubble, sum y_i / K_i - 1 for dew) to zero.
use crate::Equilibrium::flash::{FlashResult, FlashStatus};
use crate::Equilibrium::model_api::{
    EquilibriumError, FugacityModel, PhaseState, normalize, validate_composition, validate_tp,
};
use crate::Equilibrium::rachford_rice::{bubble_residual, dew_residual};
use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryKind {
    Bubble,
    Dew,
}

/// which scalar the outer iteration adjusts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreeVariable {
    Pressure,
    Temperature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BubbleDewConfig {
    /// tolerance on the saturation residual
    pub tolerance: f64,
    /// outer secant iteration budget
    pub max_iterations: usize,
    /// composition substitution passes per outer step
    pub inner_loops: usize,
    /// tolerance on the inner ln K update
    pub inner_tolerance: f64,
    /// relative perturbation seeding the secant
    pub relative_step: f64,
}

impl Default for BubbleDewConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 50,
            inner_loops: 5,
            inner_tolerance: 1e-10,
            relative_step: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BubbleDew {
    pub config: BubbleDewConfig,
}

impl BubbleDew {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bubble pressure of the liquid `x` at temperature `t`, starting from
    /// the vapor guess `y0` and pressure guess `p0`.
    pub fn bubble_point_p<M: FugacityModel>(
        &self,
        y0: &DVector<f64>,
        p0: f64,
        x: &DVector<f64>,
        t: f64,
        model: &M,
    ) -> Result<FlashResult, EquilibriumError> {
        self.solve_boundary(BoundaryKind::Bubble, FreeVariable::Pressure, y0, p0, x, t, model)
    }

    /// Bubble temperature of the liquid `x` at pressure `p`.
    pub fn bubble_point_t<M: FugacityModel>(
        &self,
        y0: &DVector<f64>,
        t0: f64,
        x: &DVector<f64>,
        p: f64,
        model: &M,
    ) -> Result<FlashResult, EquilibriumError> {
        self.solve_boundary(
            BoundaryKind::Bubble,
            FreeVariable::Temperature,
            y0,
            t0,
            x,
            p,
            model,
        )
    }

    /// Dew pressure of the vapor `y` at temperature `t`, starting from the
    /// liquid guess `x0` and pressure guess `p0`.
    pub fn dew_point_p<M: FugacityModel>(
        &self,
        x0: &DVector<f64>,
        p0: f64,
        y: &DVector<f64>,
        t: f64,
        model: &M,
    ) -> Result<FlashResult, EquilibriumError> {
        self.solve_boundary(BoundaryKind::Dew, FreeVariable::Pressure, x0, p0, y, t, model)
    }

    /// Dew temperature of the vapor `y` at pressure `p`.
    pub fn dew_point_t<M: FugacityModel>(
        &self,
        x0: &DVector<f64>,
        t0: f64,
        y: &DVector<f64>,
        p: f64,
        model: &M,
    ) -> Result<FlashResult, EquilibriumError> {
        self.solve_boundary(
            BoundaryKind::Dew,
            FreeVariable::Temperature,
            x0,
            t0,
            y,
            p,
            model,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_boundary<M: FugacityModel>(
        &self,
        kind: BoundaryKind,
        var: FreeVariable,
        trial0: &DVector<f64>,
        s0: f64,
        fixed: &DVector<f64>,
        other: f64,
        model: &M,
    ) -> Result<FlashResult, EquilibriumError> {
        validate_composition(fixed, "fixed composition")?;
        validate_composition(trial0, "incipient phase guess")?;
        let (t0, p0) = resolve_tp(var, s0, other);
        validate_tp(t0, p0)?;
        let nc = fixed.len();
        if model.nc() != nc || trial0.len() != nc {
            return Err(EquilibriumError::InfeasibleInput(format!(
                "component count mismatch: model has {}, composition has {}",
                model.nc(),
                nc
            )));
        }
        let cfg = &self.config;

        let mut trial = trial0.clone();
        normalize(&mut trial);
        let mut s = s0;
        let eval = |s: f64, trial: &mut DVector<f64>| {
            inner_substitution(kind, var, s, other, fixed, trial, cfg, model)
        };

        // seed the secant with a relative perturbation
        let (mut fo, mut vl, mut vv) = eval(s, &mut trial)?;
        let mut s_prev = s * (1.0 + cfg.relative_step);
        let (mut fo_prev, _, _) = eval(s_prev, &mut trial)?;
        let mut it = 0;
        let mut status = FlashStatus::NotConverged;
        while it < cfg.max_iterations {
            if fo.abs() < cfg.tolerance {
                status = FlashStatus::Converged;
                break;
            }
            it += 1;
            let slope = (fo - fo_prev) / (s - s_prev);
            if slope.abs() < 1e-14 || !slope.is_finite() {
                warn!("boundary solve: flat secant at {:?} = {}", var, s);
                break;
            }
            let mut s_new = s - fo / slope;
            if s_new <= 0.0 {
                // step overshot into the unphysical region
                s_new = 0.5 * s;
            }
            s_prev = s;
            fo_prev = fo;
            s = s_new;
            (fo, vl, vv) = eval(s, &mut trial)?;
        }
        if status != FlashStatus::Converged {
            warn!(
                "boundary solve did not converge: residual {:e} after {} iterations",
                fo, it
            );
        }
        debug!(
            "boundary solve ({:?}, {:?}): s = {}, residual {:e}, {} iterations",
            kind, var, s, fo, it
        );

        let (t, p) = resolve_tp(var, s, other);
        let (beta, x, y) = match kind {
            BoundaryKind::Bubble => (0.0, fixed.clone(), trial.clone()),
            BoundaryKind::Dew => (1.0, trial.clone(), fixed.clone()),
        };
        Ok(FlashResult {
            temperature: t,
            pressure: p,
            beta,
            x,
            y,
            vx: vl,
            vy: vv,
            states: (PhaseState::Liquid, PhaseState::Vapor),
            error: fo.abs(),
            iterations: it,
            status,
            method: "quasi-Newton".to_string(),
        })
    }
}

fn resolve_tp(var: FreeVariable, s: f64, other: f64) -> (f64, f64) {
    match var {
        FreeVariable::Pressure => (other, s),
        FreeVariable::Temperature => (s, other),
    }
}

/// Inner composition loop at fixed (T, P): successive substitution on the
/// incipient phase until the K values settle or the pass budget runs out.
/// Returns the saturation residual and the two molar volumes.
#[allow(clippy::too_many_arguments)]
fn inner_substitution<M: FugacityModel>(
    kind: BoundaryKind,
    var: FreeVariable,
    s: f64,
    other: f64,
    fixed: &DVector<f64>,
    trial: &mut DVector<f64>,
    cfg: &BubbleDewConfig,
    model: &M,
) -> Result<(f64, f64, f64), EquilibriumError> {
    let (t, p) = resolve_tp(var, s, other);
    let mut fo = 0.0;
    let mut vl = 0.0;
    let mut vv = 0.0;
    let mut lnk_old: Option<DVector<f64>> = None;
    // at least one pass, or the residual never gets evaluated
    for _ in 0..cfg.inner_loops.max(1) {
        let (lnphil, lnphiv) = match kind {
            BoundaryKind::Bubble => {
                let (l, vl_) = model.ln_phi(fixed, t, p, PhaseState::Liquid)?;
                let (v, vv_) = model.ln_phi(trial, t, p, PhaseState::Vapor)?;
                vl = vl_;
                vv = vv_;
                (l, v)
            }
            BoundaryKind::Dew => {
                let (l, vl_) = model.ln_phi(trial, t, p, PhaseState::Liquid)?;
                let (v, vv_) = model.ln_phi(fixed, t, p, PhaseState::Vapor)?;
                vl = vl_;
                vv = vv_;
                (l, v)
            }
        };
        let lnk = &lnphil - &lnphiv;
        let k = lnk.map(f64::exp);
        match kind {
            BoundaryKind::Bubble => {
                fo = bubble_residual(fixed, &k);
                *trial = fixed.component_mul(&k);
            }
            BoundaryKind::Dew => {
                fo = dew_residual(fixed, &k);
                *trial = fixed.component_div(&k);
            }
        }
        normalize(trial);
        let settled = lnk_old
            .as_ref()
            .map(|old| (&lnk - old).amax() < cfg.inner_tolerance)
            .unwrap_or(false);
        lnk_old = Some(lnk);
        if settled {
            break;
        }
    }
    Ok((fo, vl, vv))
}
