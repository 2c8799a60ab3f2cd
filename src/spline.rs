//! # Spline terms
//!
//! A [`Spline`] is one additive term of a model: a feature name, a unique tag,
//! a family-specific configuration ([`SplineKind`]), a lazily bound coefficient
//! variable and the constraints and penalties attached to it.
//!
//! The coefficient slot moves through three states. It is `Unbound` until the
//! variable is first requested, which fixes its dimensionality; `Symbolic` while the
//! problem is assembled; and `Solved` once a fit wrote optimal values back.

use crate::basis::{self, BasisError};
use crate::constraints::{self, Constraint};
use crate::expr::{LinearExpr, PenaltyTerm, Relation, Variable, VariableId};
use crate::penalties::Penalty;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Configuration and attachment errors raised by a single spline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplineError {
    #[error("Invalid basis configuration: {0}")]
    Basis(#[from] BasisError),

    #[error("{spline} cannot accept {kind} {what}.")]
    Incompatible {
        spline: &'static str,
        kind: &'static str,
        what: &'static str,
    },

    #[error("Anchor constraint requires at least one (x, y) point.")]
    EmptyAnchor,

    #[error("Anchor point ({0}, {1}) must be finite.")]
    NonFiniteAnchor(f64, f64),

    #[error("Constraint range start ({0}) must not exceed its end ({1}).")]
    InvalidRange(f64, f64),

    #[error("Penalty weight must be finite and non-negative, but was {0}.")]
    InvalidPenaltyWeight(f64),

    #[error("A factor spline needs at least one class.")]
    NoClasses,

    #[error(
        "Spline '{tag}' has a {existing}-dimensional coefficient vector; refusing to resize it to {requested}."
    )]
    DimensionChanged {
        tag: String,
        existing: usize,
        requested: usize,
    },

    #[error("Spline '{tag}' expects {expected} coefficients, but {found} were supplied.")]
    CoefficientLength {
        tag: String,
        expected: usize,
        found: usize,
    },

    #[error("Spline for term '{term}' has not been fitted.")]
    Unfit { term: String },
}

/// The closed set of spline families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplineFamily {
    Constant,
    Linear,
    PiecewiseLinear,
    BSpline,
    CyclicSpline,
    Factor,
}

impl SplineFamily {
    pub fn name(self) -> &'static str {
        match self {
            SplineFamily::Constant => "Constant",
            SplineFamily::Linear => "Linear",
            SplineFamily::PiecewiseLinear => "PiecewiseLinear",
            SplineFamily::BSpline => "BSpline",
            SplineFamily::CyclicSpline => "CyclicSpline",
            SplineFamily::Factor => "Factor",
        }
    }

    /// Short label used for default tags and variable names.
    fn label(self) -> &'static str {
        match self {
            SplineFamily::Constant => "constant",
            SplineFamily::Linear => "linear",
            SplineFamily::PiecewiseLinear => "pwl",
            SplineFamily::BSpline => "bspline",
            SplineFamily::CyclicSpline => "cyclicspline",
            SplineFamily::Factor => "factor",
        }
    }
}

impl fmt::Display for SplineFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Family-specific configuration of a spline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplineKind {
    Constant,
    Linear {
        #[serde(default = "default_bias")]
        bias: bool,
    },
    PiecewiseLinear {
        knots: Vec<f64>,
    },
    #[serde(rename = "bspline")]
    BSpline {
        knots: Vec<f64>,
        #[serde(default = "default_degree")]
        degree: usize,
    },
    #[serde(rename = "cyclic")]
    CyclicSpline {
        order: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        period: Option<f64>,
    },
    Factor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        n_classes: Option<usize>,
    },
}

fn default_bias() -> bool {
    true
}

fn default_degree() -> usize {
    3
}

impl SplineKind {
    pub fn family(&self) -> SplineFamily {
        match self {
            SplineKind::Constant => SplineFamily::Constant,
            SplineKind::Linear { .. } => SplineFamily::Linear,
            SplineKind::PiecewiseLinear { .. } => SplineFamily::PiecewiseLinear,
            SplineKind::BSpline { .. } => SplineFamily::BSpline,
            SplineKind::CyclicSpline { .. } => SplineFamily::CyclicSpline,
            SplineKind::Factor { .. } => SplineFamily::Factor,
        }
    }

    /// Validates and normalizes a configuration: knots are sorted, B-spline
    /// dimensionality and explicit periods/class counts are checked.
    pub fn normalized(self) -> Result<Self, SplineError> {
        Ok(match self {
            SplineKind::PiecewiseLinear { knots } => SplineKind::PiecewiseLinear {
                knots: basis::sorted_knots(&knots)?,
            },
            SplineKind::BSpline { knots, degree } => {
                let knots = basis::sorted_knots(&knots)?;
                basis::bspline_dimension(knots.len(), degree)?;
                SplineKind::BSpline { knots, degree }
            }
            SplineKind::CyclicSpline {
                period: Some(period),
                ..
            } if !period.is_finite() || period <= 0.0 => {
                return Err(BasisError::InvalidPeriod(period).into());
            }
            SplineKind::Factor { n_classes: Some(0) } => return Err(SplineError::NoClasses),
            other => other,
        })
    }

    /// Number of coefficients, when it is already determined by the configuration.
    fn dim(&self) -> Result<usize, BasisError> {
        match self {
            SplineKind::Constant => Ok(1),
            SplineKind::Linear { bias } => Ok(if *bias { 2 } else { 1 }),
            SplineKind::PiecewiseLinear { knots } => Ok(2 + knots.len()),
            SplineKind::BSpline { knots, degree } => basis::bspline_dimension(knots.len(), *degree),
            SplineKind::CyclicSpline { order, .. } => Ok(1 + 2 * order),
            SplineKind::Factor { n_classes } => n_classes.ok_or(BasisError::Uninitialized {
                what: "class count",
            }),
        }
    }
}

/// Where a spline's coefficients are in their lifecycle.
#[derive(Debug, Default)]
enum CoefficientSlot {
    #[default]
    Unbound,
    Symbolic(Variable),
    Solved {
        variable: Variable,
        values: Array1<f64>,
    },
}

/// One additive term of a model.
///
/// Not `Clone`: a copy would share its coefficient variable identity with the original.
#[derive(Debug)]
pub struct Spline {
    term: String,
    tag: String,
    kind: SplineKind,
    slot: CoefficientSlot,
    constraints: Vec<Constraint>,
    penalties: Vec<Penalty>,
    /// The class count came from data rather than configuration.
    inferred_classes: bool,
}

impl Spline {
    /// Creates a spline from a configuration, validating it immediately. The tag
    /// defaults to `<family>(<term>)`, e.g. `pwl(temperature)`.
    pub fn new(term: impl Into<String>, kind: SplineKind) -> Result<Self, SplineError> {
        let term = term.into();
        let kind = kind.normalized()?;
        let tag = format!("{}({})", kind.family().label(), term);
        Ok(Self {
            term,
            tag,
            kind,
            slot: CoefficientSlot::Unbound,
            constraints: Vec::new(),
            penalties: Vec::new(),
            inferred_classes: false,
        })
    }

    /// Intercept-only term.
    pub fn constant(term: impl Into<String>) -> Self {
        Self::infallible(term.into(), SplineKind::Constant)
    }

    /// `slope * x (+ intercept)`.
    pub fn linear(term: impl Into<String>, bias: bool) -> Self {
        Self::infallible(term.into(), SplineKind::Linear { bias })
    }

    /// Continuous piecewise-linear term with hinges at `knots`.
    pub fn piecewise_linear(term: impl Into<String>, knots: &[f64]) -> Result<Self, SplineError> {
        Self::new(
            term,
            SplineKind::PiecewiseLinear {
                knots: knots.to_vec(),
            },
        )
    }

    /// B-spline term over the full knot vector `knots`.
    pub fn bspline(
        term: impl Into<String>,
        knots: &[f64],
        degree: usize,
    ) -> Result<Self, SplineError> {
        Self::new(
            term,
            SplineKind::BSpline {
                knots: knots.to_vec(),
                degree,
            },
        )
    }

    /// Fourier term with `order` harmonics. Without a period, it is inferred from the
    /// fitting sample.
    pub fn cyclic(
        term: impl Into<String>,
        order: usize,
        period: Option<f64>,
    ) -> Result<Self, SplineError> {
        Self::new(term, SplineKind::CyclicSpline { order, period })
    }

    /// One-hot term. Without a class count, it is inferred from the fitting sample.
    pub fn factor(term: impl Into<String>, n_classes: Option<usize>) -> Result<Self, SplineError> {
        Self::new(term, SplineKind::Factor { n_classes })
    }

    fn infallible(term: String, kind: SplineKind) -> Self {
        let tag = format!("{}({})", kind.family().label(), term);
        Self {
            term,
            tag,
            kind,
            slot: CoefficientSlot::Unbound,
            constraints: Vec::new(),
            penalties: Vec::new(),
            inferred_classes: false,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> &SplineKind {
        &self.kind
    }

    pub fn family(&self) -> SplineFamily {
        self.kind.family()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn penalties(&self) -> &[Penalty] {
        &self.penalties
    }

    /// Number of coefficients. Fails for a factor whose class count is unresolved.
    pub fn dim(&self) -> Result<usize, SplineError> {
        Ok(self.kind.dim()?)
    }

    /// Attaches a constraint after checking it against this spline's family.
    pub fn add_constraint(mut self, constraint: Constraint) -> Result<Self, SplineError> {
        self.attach_constraint(constraint)?;
        Ok(self)
    }

    /// Attaches a penalty after checking it against this spline's family.
    pub fn add_penalty(mut self, penalty: Penalty) -> Result<Self, SplineError> {
        self.attach_penalty(penalty)?;
        Ok(self)
    }

    pub fn attach_constraint(&mut self, constraint: Constraint) -> Result<&mut Self, SplineError> {
        constraint.validate()?;
        if !constraints::accepts_constraint(self.family(), constraint.kind()) {
            return Err(SplineError::Incompatible {
                spline: self.family().name(),
                kind: constraint.kind().name(),
                what: "constraint",
            });
        }
        self.constraints.push(constraint);
        Ok(self)
    }

    pub fn attach_penalty(&mut self, penalty: Penalty) -> Result<&mut Self, SplineError> {
        penalty.validate()?;
        if !constraints::accepts_penalty(self.family(), penalty.kind()) {
            return Err(SplineError::Incompatible {
                spline: self.family().name(),
                kind: penalty.name(),
                what: "penalty",
            });
        }
        self.penalties.push(penalty);
        Ok(self)
    }

    /// Resolves data-dependent configuration (cyclic period, factor class count) from
    /// the fitting sample.
    ///
    /// A configured value is never touched and an inferred period is kept. An
    /// inferred class count is derived again from every sample; once the coefficient
    /// variable exists, a sample implying a different count is rejected with
    /// [`SplineError::DimensionChanged`].
    pub fn initialize(&mut self, x: ArrayView1<f64>) -> Result<(), SplineError> {
        match &mut self.kind {
            SplineKind::CyclicSpline { period, .. } if period.is_none() => {
                let inferred = basis::infer_period(x)?;
                log::debug!("Inferred period {inferred} for '{}'", self.tag);
                *period = Some(inferred);
            }
            SplineKind::Factor { n_classes } if n_classes.is_none() || self.inferred_classes => {
                let inferred = basis::infer_class_count(x)?;
                match *n_classes {
                    Some(existing) if existing == inferred => {}
                    Some(existing) if !matches!(self.slot, CoefficientSlot::Unbound) => {
                        return Err(SplineError::DimensionChanged {
                            tag: self.tag.clone(),
                            existing,
                            requested: inferred,
                        });
                    }
                    _ => {
                        log::debug!("Inferred {inferred} classes for '{}'", self.tag);
                        *n_classes = Some(inferred);
                        self.inferred_classes = true;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The family basis matrix for `x`, of shape `(x.len(), dim)`.
    pub fn basis(&self, x: ArrayView1<f64>) -> Result<Array2<f64>, SplineError> {
        let matrix = match &self.kind {
            SplineKind::Constant => basis::constant_basis(x),
            SplineKind::Linear { bias } => basis::linear_basis(x, *bias),
            SplineKind::PiecewiseLinear { knots } => basis::piecewise_linear_basis(x, knots),
            SplineKind::BSpline { knots, degree } => basis::bspline_basis(x, knots, *degree)?,
            SplineKind::CyclicSpline { order, period } => {
                let period = period.ok_or(BasisError::Uninitialized { what: "period" })?;
                basis::cyclic_basis(x, *order, period)?
            }
            SplineKind::Factor { n_classes } => {
                let n_classes = n_classes.ok_or(BasisError::Uninitialized {
                    what: "class count",
                })?;
                basis::factor_basis(x, n_classes)
            }
        };
        Ok(matrix)
    }

    /// The coefficient variable, created on first request. Later requests return the
    /// same identity.
    pub fn variables(&mut self) -> Result<&Variable, SplineError> {
        let dim = self.dim()?;
        if let CoefficientSlot::Unbound = self.slot {
            let name = format!("{}_{}", self.term, self.family().label());
            log::trace!("Binding {dim}-dimensional variable '{name}' for '{}'", self.tag);
            self.slot = CoefficientSlot::Symbolic(Variable::new(name, dim));
        }
        match &self.slot {
            CoefficientSlot::Symbolic(variable) | CoefficientSlot::Solved { variable, .. } => {
                Ok(variable)
            }
            CoefficientSlot::Unbound => unreachable!("coefficient slot is bound before it is read"),
        }
    }

    /// `basis(x) · v` as a symbolic expression.
    pub fn evaluate_expression(&mut self, x: ArrayView1<f64>) -> Result<LinearExpr, SplineError> {
        let matrix = self.basis(x)?;
        let variable = self.variables()?;
        Ok(LinearExpr::product(matrix, variable))
    }

    /// Every relation produced by the attached constraints, in attachment order.
    pub fn build_constraints(&mut self) -> Result<Vec<Relation>, SplineError> {
        let variable = self.variables()?.clone();
        let mut relations = Vec::new();
        for constraint in &self.constraints {
            relations.extend(constraint.build(self, &variable)?);
        }
        Ok(relations)
    }

    /// Every penalty term, in attachment order.
    pub fn build_penalties(&mut self) -> Result<Vec<PenaltyTerm>, SplineError> {
        let variable = self.variables()?.clone();
        Ok(self
            .penalties
            .iter()
            .map(|penalty| penalty.build(&variable))
            .collect())
    }

    /// Solved coefficients, if the last fit produced them.
    pub fn coefficients(&self) -> Option<ArrayView1<'_, f64>> {
        match &self.slot {
            CoefficientSlot::Solved { values, .. } => Some(values.view()),
            _ => None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.slot, CoefficientSlot::Solved { .. })
    }

    /// Installs coefficients from a previously saved fit.
    pub fn set_coefficients(&mut self, values: Array1<f64>) -> Result<(), SplineError> {
        let variable = self.variables()?.clone();
        if values.len() != variable.dim() {
            return Err(SplineError::CoefficientLength {
                tag: self.tag.clone(),
                expected: variable.dim(),
                found: values.len(),
            });
        }
        self.slot = CoefficientSlot::Solved { variable, values };
        Ok(())
    }

    /// `basis(x) · coefficients`.
    pub fn predict(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, SplineError> {
        let coefficients = self.solved_coefficients()?;
        Ok(self.basis(x)?.dot(&coefficients))
    }

    /// Each basis column scaled by its coefficient; rows sum to [`Spline::predict`].
    pub fn predict_terms(&self, x: ArrayView1<f64>) -> Result<Array2<f64>, SplineError> {
        let coefficients = self.solved_coefficients()?;
        Ok(self.basis(x)? * &coefficients.insert_axis(Axis(0)))
    }

    fn solved_coefficients(&self) -> Result<ArrayView1<'_, f64>, SplineError> {
        self.coefficients().ok_or_else(|| SplineError::Unfit {
            term: self.term.clone(),
        })
    }

    /// Copies this spline's solved values out of a solver result. Returns `false`
    /// (leaving the slot symbolic) when the result holds no values for it.
    pub(crate) fn accept_solution(&mut self, values: &HashMap<VariableId, Array1<f64>>) -> bool {
        let slot = std::mem::take(&mut self.slot);
        let (next, accepted) = match slot {
            CoefficientSlot::Symbolic(variable) | CoefficientSlot::Solved { variable, .. } => {
                match values.get(&variable.id()) {
                    Some(v) => (
                        CoefficientSlot::Solved {
                            variable,
                            values: v.clone(),
                        },
                        true,
                    ),
                    None => (CoefficientSlot::Symbolic(variable), false),
                }
            }
            CoefficientSlot::Unbound => (CoefficientSlot::Unbound, false),
        };
        self.slot = next;
        accepted
    }

    /// Drops solved values so a new fit (or a failed one) never leaves stale numbers.
    pub(crate) fn clear_solution(&mut self) {
        if let CoefficientSlot::Solved { variable, .. } = std::mem::take(&mut self.slot) {
            self.slot = CoefficientSlot::Symbolic(variable);
        }
    }
}

impl fmt::Display for Spline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SplineKind::Constant => write!(f, "Constant(term='{}')", self.term),
            SplineKind::Linear { bias } => write!(f, "Linear(term='{}', bias={bias})", self.term),
            SplineKind::PiecewiseLinear { knots } => {
                write!(f, "PiecewiseLinear(term='{}', knots={knots:?})", self.term)
            }
            SplineKind::BSpline { knots, degree } => write!(
                f,
                "BSpline(term='{}', degree={degree}, knots={knots:?})",
                self.term
            ),
            SplineKind::CyclicSpline { order, period } => write!(
                f,
                "CyclicSpline(term='{}', period={period:?}, order={order})",
                self.term
            ),
            SplineKind::Factor { n_classes } => {
                write!(f, "Factor(term='{}', n_classes={n_classes:?})", self.term)
            }
        }
    }
}
