//! General purpose numerical routines backing the equilibrium engines:
//! a damped Newton solver for systems of nonlinear equations and a BFGS
//! minimizer with backtracking line search. The engines only talk to the
//! [`SolveNonlinear`] and [`MinimizeScalar`] traits, so another numerical
//! backend can be plugged in without touching the engine logic.
use crate::Equilibrium::model_api::EquilibriumError;
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// closure type for a vector-valued residual function
pub type ResidualFn<'a> = &'a mut dyn FnMut(&DVector<f64>) -> Result<DVector<f64>, EquilibriumError>;
/// closure type for a scalar objective returning (value, gradient)
pub type ObjectiveFn<'a> =
    &'a mut dyn FnMut(&DVector<f64>) -> Result<(f64, DVector<f64>), EquilibriumError>;

#[derive(Debug, Clone)]
pub struct SolverReport {
    pub x: DVector<f64>,
    pub residual: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub trait SolveNonlinear {
    fn solve(&self, fun: ResidualFn, x0: &DVector<f64>) -> Result<SolverReport, EquilibriumError>;
}

pub trait MinimizeScalar {
    fn minimize(&self, fun: ObjectiveFn, x0: &DVector<f64>)
    -> Result<SolverReport, EquilibriumError>;
}

/// Damped Newton iteration with forward-difference Jacobian and LU solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewtonSys {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// relative perturbation for the finite-difference Jacobian
    pub fd_step: f64,
    /// maximum number of step halvings in the damping loop
    pub max_halvings: usize,
}

impl Default for NewtonSys {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 50,
            fd_step: 1e-7,
            max_halvings: 6,
        }
    }
}

impl NewtonSys {
    fn jacobian(
        &self,
        fun: &mut dyn FnMut(&DVector<f64>) -> Result<DVector<f64>, EquilibriumError>,
        x: &DVector<f64>,
        f0: &DVector<f64>,
    ) -> Result<DMatrix<f64>, EquilibriumError> {
        let n = x.len();
        let m = f0.len();
        let mut jac = DMatrix::zeros(m, n);
        for j in 0..n {
            let h = self.fd_step * (1.0 + x[j].abs());
            let mut xp = x.clone();
            xp[j] += h;
            let fp = fun(&xp)?;
            for i in 0..m {
                jac[(i, j)] = (fp[i] - f0[i]) / h;
            }
        }
        Ok(jac)
    }
}

impl SolveNonlinear for NewtonSys {
    fn solve(&self, fun: ResidualFn, x0: &DVector<f64>) -> Result<SolverReport, EquilibriumError> {
        let mut x = x0.clone();
        let mut f = fun(&x)?;
        let mut res = f.amax();
        let mut it = 0;
        while res > self.tolerance && it < self.max_iterations {
            it += 1;
            let jac = self.jacobian(fun, &x, &f)?;
            let lu = jac.lu();
            let dx = lu
                .solve(&(-&f))
                .ok_or(EquilibriumError::SingularJacobian { iteration: it })?;
            // damping: halve the step until the residual decreases
            let mut lambda = 1.0;
            let mut accepted = false;
            for _ in 0..=self.max_halvings {
                let x_trial = &x + &dx * lambda;
                match fun(&x_trial) {
                    Ok(f_trial) => {
                        let res_trial = f_trial.amax();
                        if res_trial < res || lambda < 1.0 / (1 << self.max_halvings) as f64 {
                            x = x_trial;
                            f = f_trial;
                            res = res_trial;
                            accepted = true;
                            break;
                        }
                    }
                    Err(_) if lambda > 1.0 / (1 << self.max_halvings) as f64 => {
                        // trial point outside the model domain, shorten the step
                    }
                    Err(e) => return Err(e),
                }
                lambda *= 0.5;
            }
            if !accepted {
                // full and damped steps all increase the residual, take the
                // shortest one anyway and let the caller judge convergence
                let x_trial = &x + &dx * lambda;
                f = fun(&x_trial)?;
                res = f.amax();
                x = x_trial;
            }
        }
        debug!("NewtonSys finished: residual {:e} after {} iterations", res, it);
        Ok(SolverReport {
            x,
            residual: res,
            iterations: it,
            converged: res <= self.tolerance,
        })
    }
}

/// BFGS quasi-Newton minimizer (inverse Hessian update) with Armijo
/// backtracking. The objective closure must return the analytic gradient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bfgs {
    pub grad_tolerance: f64,
    pub max_iterations: usize,
    pub armijo_c1: f64,
    pub max_backtracks: usize,
}

impl Default for Bfgs {
    fn default() -> Self {
        Self {
            grad_tolerance: 1e-8,
            max_iterations: 200,
            armijo_c1: 1e-4,
            max_backtracks: 30,
        }
    }
}

impl MinimizeScalar for Bfgs {
    fn minimize(
        &self,
        fun: ObjectiveFn,
        x0: &DVector<f64>,
    ) -> Result<SolverReport, EquilibriumError> {
        let n = x0.len();
        let mut x = x0.clone();
        let (mut fx, mut g) = fun(&x)?;
        let mut h_inv = DMatrix::<f64>::identity(n, n);
        let mut it = 0;
        while g.amax() > self.grad_tolerance && it < self.max_iterations {
            it += 1;
            let mut d = -(&h_inv * &g);
            let mut slope = d.dot(&g);
            if slope >= 0.0 {
                // h_inv lost positive definiteness, reset to steepest descent
                h_inv = DMatrix::identity(n, n);
                d = -g.clone();
                slope = d.dot(&g);
            }
            let mut alpha = 1.0;
            let mut moved = false;
            for _ in 0..self.max_backtracks {
                let x_trial = &x + &d * alpha;
                match fun(&x_trial) {
                    Ok((f_trial, g_trial)) => {
                        if f_trial <= fx + self.armijo_c1 * alpha * slope {
                            let s = &x_trial - &x;
                            let yv = &g_trial - &g;
                            let sy = s.dot(&yv);
                            if sy > 1e-12 {
                                let rho = 1.0 / sy;
                                let hy = &h_inv * &yv;
                                let yhy = yv.dot(&hy);
                                // Sherman-Morrison form of the inverse BFGS update
                                h_inv += (sy + yhy) * rho * rho * (&s * s.transpose())
                                    - rho * (&hy * s.transpose() + &s * hy.transpose());
                            }
                            x = x_trial;
                            fx = f_trial;
                            g = g_trial;
                            moved = true;
                            break;
                        }
                    }
                    Err(_) => {
                        // outside the objective domain, shorten the step
                    }
                }
                alpha *= 0.5;
            }
            if !moved {
                break;
            }
        }
        debug!(
            "Bfgs finished: f = {:e}, |grad| {:e} after {} iterations",
            fx,
            g.amax(),
            it
        );
        Ok(SolverReport {
            x,
            residual: g.amax(),
            iterations: it,
            converged: g.amax() <= self.grad_tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_newton_two_by_two() {
        // x^2 + y^2 = 4, x - y = 0  ->  x = y = sqrt(2)
        let solver = NewtonSys::default();
        let mut fun = |u: &DVector<f64>| {
            Ok(DVector::from_vec(vec![
                u[0] * u[0] + u[1] * u[1] - 4.0,
                u[0] - u[1],
            ]))
        };
        let report = solver
            .solve(&mut fun, &DVector::from_vec(vec![1.0, 2.0]))
            .unwrap();
        assert!(report.converged);
        assert_relative_eq!(report.x[0], 2f64.sqrt(), epsilon = 1e-8);
        assert_relative_eq!(report.x[1], 2f64.sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn test_newton_singular_jacobian() {
        let solver = NewtonSys::default();
        // both equations identical, Jacobian rank 1
        let mut fun =
            |u: &DVector<f64>| Ok(DVector::from_vec(vec![u[0] + u[1] - 1.0, u[0] + u[1] - 1.0]));
        let err = solver
            .solve(&mut fun, &DVector::from_vec(vec![3.0, 3.0]))
            .unwrap_err();
        match err {
            EquilibriumError::SingularJacobian { .. } => {}
            other => panic!("expected SingularJacobian, got {:?}", other),
        }
    }

    #[test]
    fn test_bfgs_quadratic() {
        let minimizer = Bfgs::default();
        // f = (x-1)^2 + 10*(y+2)^2
        let mut fun = |u: &DVector<f64>| {
            let f = (u[0] - 1.0).powi(2) + 10.0 * (u[1] + 2.0).powi(2);
            let g = DVector::from_vec(vec![2.0 * (u[0] - 1.0), 20.0 * (u[1] + 2.0)]);
            Ok((f, g))
        };
        let report = minimizer
            .minimize(&mut fun, &DVector::from_vec(vec![5.0, 5.0]))
            .unwrap();
        assert!(report.converged);
        assert_relative_eq!(report.x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(report.x[1], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bfgs_rosenbrock() {
        let minimizer = Bfgs {
            max_iterations: 500,
            ..Default::default()
        };
        let mut fun = |u: &DVector<f64>| {
            let (x, y) = (u[0], u[1]);
            let f = (1.0 - x).powi(2) + 100.0 * (y - x * x).powi(2);
            let g = DVector::from_vec(vec![
                -2.0 * (1.0 - x) - 400.0 * x * (y - x * x),
                200.0 * (y - x * x),
            ]);
            Ok((f, g))
        };
        let report = minimizer
            .minimize(&mut fun, &DVector::from_vec(vec![-1.2, 1.0]))
            .unwrap();
        assert!(report.converged);
        assert_relative_eq!(report.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(report.x[1], 1.0, epsilon = 1e-5);
    }
}
