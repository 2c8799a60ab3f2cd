use crate::expr::{PenaltyShape, PenaltyTerm, Variable};
use crate::spline::SplineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Regularization added to the objective for one spline's coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Penalty {
    /// `alpha * sum(v^2)`
    Ridge { alpha: f64 },
    /// `alpha * sum(|v|)`
    Lasso { alpha: f64 },
}

/// Penalty variants without their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PenaltyKind {
    Ridge,
    Lasso,
}

impl Penalty {
    pub fn ridge(alpha: f64) -> Result<Self, SplineError> {
        let penalty = Penalty::Ridge { alpha };
        penalty.validate()?;
        Ok(penalty)
    }

    pub fn lasso(alpha: f64) -> Result<Self, SplineError> {
        let penalty = Penalty::Lasso { alpha };
        penalty.validate()?;
        Ok(penalty)
    }

    pub fn alpha(&self) -> f64 {
        match *self {
            Penalty::Ridge { alpha } | Penalty::Lasso { alpha } => alpha,
        }
    }

    pub fn kind(&self) -> PenaltyKind {
        match self {
            Penalty::Ridge { .. } => PenaltyKind::Ridge,
            Penalty::Lasso { .. } => PenaltyKind::Lasso,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind() {
            PenaltyKind::Ridge => "Ridge",
            PenaltyKind::Lasso => "Lasso",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SplineError> {
        let alpha = self.alpha();
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(SplineError::InvalidPenaltyWeight(alpha));
        }
        Ok(())
    }

    /// The objective term this penalty contributes for `variable`.
    pub fn build(&self, variable: &Variable) -> PenaltyTerm {
        let shape = match self.kind() {
            PenaltyKind::Ridge => PenaltyShape::SumSquares,
            PenaltyKind::Lasso => PenaltyShape::SumAbs,
        };
        PenaltyTerm {
            variable: variable.clone(),
            shape,
            weight: self.alpha(),
        }
    }
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(alpha={})", self.name(), self.alpha())
    }
}
