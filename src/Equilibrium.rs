/// Common ground of the equilibrium engines: the [`FugacityModel`] trait
/// every thermodynamic model implements, phase state labels, the error
/// enum and input validation helpers.
pub mod model_api;
/// General purpose numerical backends: damped Newton for nonlinear
/// systems, BFGS minimizer with Armijo backtracking. Engines depend on
/// the traits only.
pub mod solvers;
/// Scalar Rachford-Rice mass balance solver (bounded Halley iteration)
/// plus the bubble and dew point residual helpers.
pub mod rachford_rice;
/// Two-phase isothermal flash with the ASS -> Newton -> Gibbs
/// escalation ladder. Works for VLE and LLE alike, the phase states are
/// whatever the caller declares them to be.
pub mod flash;
/// Tangent plane distance stability analysis in Michelsen's mole-number
/// variables: single minimization, multi-guess minima scan, and the
/// liquid-liquid initial guess helper built on it.
pub mod stability;
/// Bubble and dew point calculations with pressure or temperature free,
/// inner composition substitution inside an outer secant iteration.
pub mod bubble_dew;
/// Multiphase flash with (beta_k, theta_k) complementarity: absent
/// phases get a positive stability variable instead of a failure.
pub mod multiflash;
/// Unconstrained Gibbs energy minimization over a per-component softmax
/// split of the feed, the robustness fallback of both flash engines.
pub mod gibbs_min;
/// prettytable rendering and JSON export of the result records.
pub mod output;

mod stability_tests;

pub use bubble_dew::{BubbleDew, BubbleDewConfig};
pub use flash::{FlashConfig, FlashResult, FlashStatus, TwoPhaseFlash};
pub use gibbs_min::{GibbsEquilibrium, GibbsMinimizer};
pub use model_api::{EquilibriumError, FugacityModel, PhaseState, R_GAS};
pub use multiflash::{MultiFlashConfig, MultiphaseFlash, MultiphaseResult};
pub use rachford_rice::{RachfordRice, RachfordRiceSolution};
pub use stability::{StabilityAnalyzer, StabilityResult, tpd};
