use dvs_calib_core::Real;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Generic non-linear least squares problem with dense parameter/residual vectors.
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows in the problem.
    fn num_residuals(&self) -> usize;

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;

    /// Jacobian of [`NllsProblem::residuals`].
    ///
    /// Defaults to central finite differences with a step relative to the
    /// parameter magnitude.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let m = self.num_residuals();
        let n = x.len();
        let mut j = DMatrix::zeros(m, n);

        let mut x_pert = x.clone();
        for k in 0..n {
            let h = 1e-6 * x[k].abs().max(1.0);
            x_pert[k] = x[k] + h;
            let r_plus = self.residuals(&x_pert);
            x_pert[k] = x[k] - h;
            let r_minus = self.residuals(&x_pert);
            x_pert[k] = x[k];

            j.set_column(k, &((r_plus - r_minus) / (2.0 * h)));
        }

        j
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Maximum number of solver iterations before termination.
    ///
    /// The LM backend follows the MINPACK convention and caps function
    /// evaluations at `max_iters * (n + 1)`.
    pub max_iters: usize,
    /// Relative tolerance on the objective (cost) reduction.
    pub ftol: Real,
    /// Orthogonality/gradient tolerance.
    pub gtol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-12,
            gtol: 1e-12,
            xtol: 1e-12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    /// `0.5 * ||r||^2` at the solution.
    pub final_cost: Real,
    pub converged: bool,
    pub termination: String,
}

pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
