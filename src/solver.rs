//! # Solver boundary and the bundled QP solver
//!
//! The model layer only talks to the [`Solver`] trait: it hands over a [`Problem`]
//! and receives a [`Solution`] with a status and, when optimal, a value for every
//! variable. [`QpSolver`] is the default implementation. It lowers the problem to
//! `min 1/2 x'Px + q'x  s.t.  l <= Ax <= u` and passes it to the Clarabel
//! interior-point solver in conic form:
//!
//! ```text
//! min 1/2 x'Px + q'x   s.t.   Ax + s = b,   s in {0}^e x R+^k
//! ```
//!
//! Equality rows go to the zero cone; every finite side of an inequality row
//! becomes one non-negative row.

use crate::expr::VariableId;
use crate::problem::{Problem, QuadraticProgram};
use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettingsBuilder, DefaultSolver, IPSolver, SupportedConeT};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

/// Outcome of a solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Optimal,
    Infeasible,
    MaxIterationsReached,
    SolverError(String),
}

impl SolverStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, SolverStatus::Optimal)
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverStatus::Optimal => f.write_str("optimal"),
            SolverStatus::Infeasible => f.write_str("infeasible"),
            SolverStatus::MaxIterationsReached => f.write_str("max_iterations_reached"),
            SolverStatus::SolverError(message) => write!(f, "solver_error: {message}"),
        }
    }
}

/// What a solver hands back. `values` is empty unless the status is optimal.
#[derive(Debug, Clone)]
pub struct Solution {
    pub status: SolverStatus,
    pub values: HashMap<VariableId, Array1<f64>>,
    pub objective: Option<f64>,
    pub iterations: usize,
}

impl Solution {
    fn without_values(status: SolverStatus, iterations: usize) -> Self {
        Self {
            status,
            values: HashMap::new(),
            objective: None,
            iterations,
        }
    }
}

/// Anything that can solve a [`Problem`].
pub trait Solver {
    fn solve(&self, problem: &Problem) -> Solution;
}

/// Tuning knobs for [`QpSolver`], passed through to Clarabel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iterations: u32,
    /// Wall-clock limit in seconds; infinite means none.
    pub time_limit: f64,
    pub tol_gap_abs: f64,
    pub tol_gap_rel: f64,
    pub tol_feas: f64,
    pub tol_infeas_abs: f64,
    pub tol_infeas_rel: f64,
    pub equilibrate: bool,
    /// Print Clarabel's own iteration log to stdout.
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            time_limit: f64::INFINITY,
            tol_gap_abs: 1e-8,
            tol_gap_rel: 1e-8,
            tol_feas: 1e-8,
            tol_infeas_abs: 1e-8,
            tol_infeas_rel: 1e-8,
            equilibrate: true,
            verbose: false,
        }
    }
}

impl SolverSettings {
    fn validate(&self) -> Result<(), QpError> {
        if self.max_iterations == 0 {
            return Err(QpError::Settings("max_iterations must be positive"));
        }
        let tolerances = [
            self.tol_gap_abs,
            self.tol_gap_rel,
            self.tol_feas,
            self.tol_infeas_abs,
            self.tol_infeas_rel,
        ];
        if tolerances.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(QpError::Settings("tolerances must be finite and positive"));
        }
        if self.time_limit.is_nan() || self.time_limit <= 0.0 {
            return Err(QpError::Settings("time_limit must be positive"));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
enum QpError {
    #[error("Invalid settings: {0}")]
    Settings(&'static str),
    #[error("Clarabel rejected the settings: {0}")]
    Builder(String),
    #[error("Clarabel rejected the problem data: {0}")]
    Data(String),
    #[error("Clarabel stopped with status {0}.")]
    Numerical(String),
}

enum Outcome {
    Solved { x: Array1<f64>, iterations: usize },
    Infeasible { iterations: usize },
    Stalled { iterations: usize },
}

/// The lowered program in Clarabel's `Ax + s = b` form.
struct ConicForm {
    p: CscMatrix<f64>,
    q: Vec<f64>,
    a: CscMatrix<f64>,
    b: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
}

impl ConicForm {
    fn from_program(qp: &QuadraticProgram) -> Self {
        let n = qp.q.len();
        let mut equalities: Vec<(ArrayView1<f64>, f64, f64)> = Vec::new();
        let mut inequalities: Vec<(ArrayView1<f64>, f64, f64)> = Vec::new();
        for (row, (&l, &u)) in qp.a.rows().into_iter().zip(qp.l.iter().zip(qp.u.iter())) {
            if l == u {
                equalities.push((row, 1.0, u));
                continue;
            }
            // l <= a'x  becomes  -a'x + s = -l
            if l.is_finite() {
                inequalities.push((row, -1.0, -l));
            }
            if u.is_finite() {
                inequalities.push((row, 1.0, u));
            }
        }

        let mut a = Array2::<f64>::zeros((equalities.len() + inequalities.len(), n));
        let mut b = Vec::with_capacity(a.nrows());
        for (i, &(row, sign, rhs)) in equalities.iter().chain(inequalities.iter()).enumerate() {
            a.row_mut(i).assign(&row.mapv(|v| v * sign));
            b.push(rhs);
        }

        let mut cones = Vec::new();
        if !equalities.is_empty() {
            cones.push(SupportedConeT::ZeroConeT(equalities.len()));
        }
        if !inequalities.is_empty() {
            cones.push(SupportedConeT::NonnegativeConeT(inequalities.len()));
        }

        Self {
            p: compressed_columns(&qp.p, true),
            q: qp.q.to_vec(),
            a: compressed_columns(&a, false),
            b,
            cones,
        }
    }
}

/// Dense to CSC, keeping only the upper triangle when `upper` is set.
fn compressed_columns(dense: &Array2<f64>, upper: bool) -> CscMatrix<f64> {
    let (m, n) = dense.dim();
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..n {
        let last = if upper { (j + 1).min(m) } else { m };
        for i in 0..last {
            let value = dense[[i, j]];
            if value != 0.0 {
                rowval.push(i);
                nzval.push(value);
            }
        }
        colptr.push(rowval.len());
    }
    CscMatrix::new(m, n, colptr, rowval, nzval)
}

/// Dense convex QP solver backed by Clarabel.
#[derive(Debug, Clone, Default)]
pub struct QpSolver {
    settings: SolverSettings,
}

impl QpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    fn run(&self, qp: &QuadraticProgram) -> Result<Outcome, QpError> {
        let cfg = &self.settings;
        cfg.validate()?;

        let settings = DefaultSettingsBuilder::default()
            .max_iter(cfg.max_iterations)
            .time_limit(cfg.time_limit)
            .tol_gap_abs(cfg.tol_gap_abs)
            .tol_gap_rel(cfg.tol_gap_rel)
            .tol_feas(cfg.tol_feas)
            .tol_infeas_abs(cfg.tol_infeas_abs)
            .tol_infeas_rel(cfg.tol_infeas_rel)
            .equilibrate_enable(cfg.equilibrate)
            .verbose(cfg.verbose)
            .build()
            .map_err(|e| QpError::Builder(e.to_string()))?;

        let form = ConicForm::from_program(qp);
        log::trace!(
            "Conic form: {} unknowns, {} rows in {} cones",
            form.q.len(),
            form.b.len(),
            form.cones.len()
        );
        let mut solver = DefaultSolver::new(&form.p, &form.q, &form.a, &form.b, &form.cones, settings)
            .map_err(|e| QpError::Data(format!("{e:?}")))?;
        solver.solve();

        let iterations = solver.solution.iterations as usize;
        use clarabel::solver::SolverStatus as Conic;
        match solver.solution.status {
            Conic::Solved => Ok(Outcome::Solved {
                x: Array1::from(solver.solution.x.clone()),
                iterations,
            }),
            Conic::AlmostSolved => {
                log::warn!("Clarabel reached reduced accuracy only after {iterations} iterations.");
                Ok(Outcome::Solved {
                    x: Array1::from(solver.solution.x.clone()),
                    iterations,
                })
            }
            Conic::PrimalInfeasible | Conic::AlmostPrimalInfeasible => {
                log::debug!("Primal infeasibility certificate found at iteration {iterations}");
                Ok(Outcome::Infeasible { iterations })
            }
            Conic::MaxIterations | Conic::MaxTime => {
                log::warn!("Clarabel stopped after {iterations} iterations without meeting tolerances.");
                Ok(Outcome::Stalled { iterations })
            }
            other => Err(QpError::Numerical(format!("{other:?}"))),
        }
    }
}

impl Solver for QpSolver {
    fn solve(&self, problem: &Problem) -> Solution {
        let start = Instant::now();
        let (qp, layout) = problem.lower();
        let solution = match self.run(&qp) {
            Ok(Outcome::Solved { x, iterations }) => {
                let values = layout.extract(x.view());
                let objective = problem.objective(&values);
                Solution {
                    status: SolverStatus::Optimal,
                    values,
                    objective,
                    iterations,
                }
            }
            Ok(Outcome::Infeasible { iterations }) => {
                Solution::without_values(SolverStatus::Infeasible, iterations)
            }
            Ok(Outcome::Stalled { iterations }) => {
                Solution::without_values(SolverStatus::MaxIterationsReached, iterations)
            }
            Err(e) => {
                log::error!("QP solve failed: {e}");
                Solution::without_values(SolverStatus::SolverError(e.to_string()), 0)
            }
        };
        log::debug!(
            "Solve finished with status '{}' in {:.2?} ({} iterations)",
            solution.status,
            start.elapsed(),
            solution.iterations
        );
        solution
    }
}
