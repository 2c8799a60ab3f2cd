//! # Additive regressor
//!
//! A [`Regressor`] is an ordered set of splines with unique tags. Fitting sums the
//! spline expressions into one prediction, collects every penalty and constraint
//! relation, and hands the resulting [`Problem`] to a caller-supplied [`Solver`].
//! Solver statuses other than optimal are returned as data; only configuration and
//! input errors are `Err`.

use crate::data::{DataError, FeatureSource};
use crate::expr::LinearExpr;
use crate::model::ModelError;
use crate::problem::Problem;
use crate::solver::{Solver, SolverStatus};
use crate::spline::Spline;
use crate::summary::{ModelSummary, SummaryRecord};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::fmt;
use std::ops::Add;

#[derive(Debug)]
pub struct Regressor {
    splines: Vec<Spline>,
    status: Option<SolverStatus>,
}

impl Regressor {
    /// Fails on an empty list or on duplicate tags.
    pub fn new(splines: Vec<Spline>) -> Result<Self, ModelError> {
        if splines.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        let mut regressor = Self {
            splines: Vec::with_capacity(splines.len()),
            status: None,
        };
        for spline in splines {
            regressor.push(spline)?;
        }
        Ok(regressor)
    }

    /// Appends every spline of `other`, keeping tags unique.
    pub fn compose(mut self, other: impl Into<Regressor>) -> Result<Regressor, ModelError> {
        for spline in other.into().splines {
            self.push(spline)?;
        }
        Ok(self)
    }

    pub fn push(&mut self, spline: Spline) -> Result<(), ModelError> {
        if self.splines.iter().any(|s| s.tag() == spline.tag()) {
            return Err(ModelError::DuplicateTag(spline.tag().to_string()));
        }
        self.splines.push(spline);
        self.status = None;
        Ok(())
    }

    pub fn remove(&mut self, tag: &str) -> Result<Spline, ModelError> {
        let index = self.position(tag)?;
        self.status = None;
        Ok(self.splines.remove(index))
    }

    pub fn spline(&self, tag: &str) -> Result<&Spline, ModelError> {
        let index = self.position(tag)?;
        Ok(&self.splines[index])
    }

    pub fn spline_mut(&mut self, tag: &str) -> Result<&mut Spline, ModelError> {
        let index = self.position(tag)?;
        Ok(&mut self.splines[index])
    }

    fn position(&self, tag: &str) -> Result<usize, ModelError> {
        self.splines
            .iter()
            .position(|s| s.tag() == tag)
            .ok_or_else(|| ModelError::UnknownTag(tag.to_string()))
    }

    pub fn splines(&self) -> &[Spline] {
        &self.splines
    }

    pub fn len(&self) -> usize {
        self.splines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splines.is_empty()
    }

    /// Status of the last fit, if any.
    pub fn status(&self) -> Option<&SolverStatus> {
        self.status.as_ref()
    }

    pub(crate) fn restore_status(&mut self, status: SolverStatus) {
        self.status = Some(status);
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            records: self.splines.iter().map(SummaryRecord::from_spline).collect(),
            status: self.status.clone(),
        }
    }

    /// Fits every spline jointly to `y`.
    ///
    /// Minimizes `||sum_i basis_i(x_i) v_i - y||^2 + penalties` subject to every
    /// attached constraint, with one solver call. On an optimal solve each spline
    /// receives its coefficients; otherwise all coefficients stay unset.
    pub fn fit<F, S>(
        &mut self,
        x: &F,
        y: ArrayView1<f64>,
        solver: &S,
    ) -> Result<SolverStatus, ModelError>
    where
        F: FeatureSource + ?Sized,
        S: Solver + ?Sized,
    {
        if self.splines.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        if y.is_empty() {
            return Err(ModelError::EmptyTarget);
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound("target".to_string()).into());
        }
        let columns = self.columns(x, Some(y.len()))?;

        self.status = None;
        let mut prediction = LinearExpr::constant(Array1::zeros(y.len()));
        let mut penalties = Vec::new();
        let mut constraints = Vec::new();
        for (spline, column) in self.splines.iter_mut().zip(&columns) {
            spline.clear_solution();
            spline.initialize(column.view())?;
            prediction = prediction + spline.evaluate_expression(column.view())?;
            penalties.extend(spline.build_penalties()?);
            constraints.extend(spline.build_constraints()?);
        }

        log::info!(
            "Fitting {} splines on {} observations ({} constraint relations, {} penalty terms)",
            self.splines.len(),
            y.len(),
            constraints.len(),
            penalties.len()
        );
        let problem = Problem::least_squares(prediction, y.to_owned())
            .with_penalties(penalties)
            .with_constraints(constraints);
        let solution = solver.solve(&problem);

        if solution.status.is_optimal() {
            for spline in &mut self.splines {
                if !spline.accept_solution(&solution.values) {
                    log::warn!("Solver returned no values for spline '{}'.", spline.tag());
                }
            }
            if let Some(objective) = solution.objective {
                log::debug!("Objective at optimum: {objective:.6e}");
            }
        } else {
            log::warn!(
                "Fit finished with status '{}'; coefficients were not updated.",
                solution.status
            );
        }

        self.status = Some(solution.status.clone());
        log::info!("\n{}", self.summary());
        Ok(solution.status)
    }

    /// Sum of every spline's contribution.
    pub fn predict<F: FeatureSource + ?Sized>(&self, x: &F) -> Result<Array1<f64>, ModelError> {
        Ok(self.predict_components(x)?.sum_axis(Axis(1)))
    }

    /// One column per spline, in spline order. A spline without coefficients
    /// contributes zeros.
    pub fn predict_components<F: FeatureSource + ?Sized>(
        &self,
        x: &F,
    ) -> Result<Array2<f64>, ModelError> {
        if self.splines.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        let columns = self.columns(x, None)?;
        let rows = columns.first().map_or(0, |c| c.len());
        let mut components = Array2::zeros((rows, self.splines.len()));
        for (j, (spline, column)) in self.splines.iter().zip(&columns).enumerate() {
            if spline.is_fitted() {
                components
                    .column_mut(j)
                    .assign(&spline.predict(column.view())?);
            } else {
                log::warn!(
                    "Spline for term '{}' has no fitted coefficients. Using zeros.",
                    spline.term()
                );
            }
        }
        Ok(components)
    }

    /// Looks up every spline's input column and checks the lengths agree, with
    /// `expected` when given and with each other otherwise.
    fn columns<F: FeatureSource + ?Sized>(
        &self,
        x: &F,
        expected: Option<usize>,
    ) -> Result<Vec<Array1<f64>>, ModelError> {
        let mut columns: Vec<Array1<f64>> = Vec::with_capacity(self.splines.len());
        for spline in &self.splines {
            let column = x.feature(spline.term())?;
            let expected = expected.or_else(|| columns.first().map(|c| c.len()));
            if let Some(expected) = expected {
                if column.len() != expected {
                    return Err(ModelError::LengthMismatch {
                        term: spline.term().to_string(),
                        found: column.len(),
                        expected,
                    });
                }
            }
            columns.push(column);
        }
        Ok(columns)
    }
}

impl From<Spline> for Regressor {
    fn from(spline: Spline) -> Self {
        Self {
            splines: vec![spline],
            status: None,
        }
    }
}

impl fmt::Display for Regressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Regressor(splines=[")?;
        for (i, spline) in self.splines.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{spline}")?;
        }
        write!(f, "])")
    }
}

impl Add<Spline> for Spline {
    type Output = Result<Regressor, ModelError>;

    fn add(self, rhs: Spline) -> Self::Output {
        Regressor::from(self).compose(rhs)
    }
}

impl Add<Regressor> for Spline {
    type Output = Result<Regressor, ModelError>;

    fn add(self, rhs: Regressor) -> Self::Output {
        Regressor::from(self).compose(rhs)
    }
}

impl Add<Spline> for Regressor {
    type Output = Result<Regressor, ModelError>;

    fn add(self, rhs: Spline) -> Self::Output {
        self.compose(rhs)
    }
}

impl Add<Regressor> for Regressor {
    type Output = Result<Regressor, ModelError>;

    fn add(self, rhs: Regressor) -> Self::Output {
        self.compose(rhs)
    }
}

/// Lets sums chain: `(a + b + c)?`. An earlier error is passed through.
impl Add<Spline> for Result<Regressor, ModelError> {
    type Output = Result<Regressor, ModelError>;

    fn add(self, rhs: Spline) -> Self::Output {
        self?.compose(rhs)
    }
}
