//! # Shape constraints
//!
//! Constraints are plain parameter holders. At fit time each one is turned into
//! linear relations over the coefficient vector of the spline it is attached to;
//! the relations depend on the spline family, so the builders dispatch on the
//! `(constraint, family)` pair. Which pairs are legal is decided once, by
//! [`accepts_constraint`], when the constraint is attached.

use crate::expr::{Relation, Variable};
use crate::penalties::PenaltyKind;
use crate::spline::{Spline, SplineError, SplineFamily, SplineKind};
use ndarray::{Array1, s};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A shape constraint on one spline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// The fitted term passes through every `(x, y)` point.
    Anchor { points: Vec<(f64, f64)> },
    /// Non-decreasing (or non-increasing) over the whole domain or over `range`.
    Monotonic {
        #[serde(default)]
        decreasing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<(f64, f64)>,
    },
    Convex {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<(f64, f64)>,
    },
    Concave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<(f64, f64)>,
    },
}

/// Constraint variants without their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Anchor,
    Monotonic,
    Convex,
    Concave,
}

impl ConstraintKind {
    pub fn name(self) -> &'static str {
        match self {
            ConstraintKind::Anchor => "Anchor",
            ConstraintKind::Monotonic => "Monotonic",
            ConstraintKind::Convex => "Convex",
            ConstraintKind::Concave => "Concave",
        }
    }
}

/// Whether a spline family can carry a constraint kind.
pub fn accepts_constraint(family: SplineFamily, kind: ConstraintKind) -> bool {
    use ConstraintKind as C;
    use SplineFamily as F;
    match (family, kind) {
        (_, C::Anchor) => true,
        (F::Linear | F::PiecewiseLinear | F::BSpline, C::Monotonic) => true,
        (F::Constant | F::CyclicSpline | F::Factor, C::Monotonic) => false,
        (F::BSpline, C::Convex | C::Concave) => true,
        (
            F::Constant | F::Linear | F::PiecewiseLinear | F::CyclicSpline | F::Factor,
            C::Convex | C::Concave,
        ) => false,
    }
}

/// Whether a spline family can carry a penalty kind. Every family accepts both.
pub fn accepts_penalty(family: SplineFamily, kind: PenaltyKind) -> bool {
    use SplineFamily as F;
    match (family, kind) {
        (
            F::Constant | F::Linear | F::PiecewiseLinear | F::BSpline | F::CyclicSpline | F::Factor,
            PenaltyKind::Ridge | PenaltyKind::Lasso,
        ) => true,
    }
}

impl Constraint {
    /// Pins the term to the given points. Fails on an empty list.
    pub fn anchor(points: Vec<(f64, f64)>) -> Result<Self, SplineError> {
        let constraint = Constraint::Anchor { points };
        constraint.validate()?;
        Ok(constraint)
    }

    pub fn monotonic(decreasing: bool) -> Self {
        Constraint::Monotonic {
            decreasing,
            range: None,
        }
    }

    pub fn monotonic_between(decreasing: bool, start: f64, end: f64) -> Result<Self, SplineError> {
        let constraint = Constraint::Monotonic {
            decreasing,
            range: Some((start, end)),
        };
        constraint.validate()?;
        Ok(constraint)
    }

    pub fn convex() -> Self {
        Constraint::Convex { range: None }
    }

    pub fn concave() -> Self {
        Constraint::Concave { range: None }
    }

    pub fn convex_between(start: f64, end: f64) -> Result<Self, SplineError> {
        let constraint = Constraint::Convex {
            range: Some((start, end)),
        };
        constraint.validate()?;
        Ok(constraint)
    }

    pub fn concave_between(start: f64, end: f64) -> Result<Self, SplineError> {
        let constraint = Constraint::Concave {
            range: Some((start, end)),
        };
        constraint.validate()?;
        Ok(constraint)
    }

    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::Anchor { .. } => ConstraintKind::Anchor,
            Constraint::Monotonic { .. } => ConstraintKind::Monotonic,
            Constraint::Convex { .. } => ConstraintKind::Convex,
            Constraint::Concave { .. } => ConstraintKind::Concave,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub(crate) fn validate(&self) -> Result<(), SplineError> {
        match self {
            Constraint::Anchor { points } => {
                if points.is_empty() {
                    return Err(SplineError::EmptyAnchor);
                }
                if let Some(&(x, y)) = points.iter().find(|(x, y)| !x.is_finite() || !y.is_finite())
                {
                    return Err(SplineError::NonFiniteAnchor(x, y));
                }
                Ok(())
            }
            Constraint::Monotonic { range, .. }
            | Constraint::Convex { range }
            | Constraint::Concave { range } => match *range {
                Some((start, end)) if !(start <= end) || !start.is_finite() || !end.is_finite() => {
                    Err(SplineError::InvalidRange(start, end))
                }
                _ => Ok(()),
            },
        }
    }

    /// The linear relations this constraint imposes on `spline`'s coefficient
    /// `variable`.
    pub fn build(&self, spline: &Spline, variable: &Variable) -> Result<Vec<Relation>, SplineError> {
        let relations = match (self, spline.kind()) {
            (Constraint::Anchor { points }, _) => anchor_relations(spline, variable, points)?,
            (Constraint::Monotonic { decreasing, .. }, SplineKind::Linear { .. }) => {
                // Column 0 of a linear basis is `x`, so its coefficient is the slope.
                let mut coeffs = Array1::zeros(variable.dim());
                coeffs[0] = direction(*decreasing);
                vec![Relation::non_negative(variable, coeffs)]
            }
            (Constraint::Monotonic { decreasing, range }, SplineKind::PiecewiseLinear { knots }) => {
                piecewise_slopes(variable, knots, *range, direction(*decreasing))
            }
            (Constraint::Monotonic { decreasing, range }, SplineKind::BSpline { knots, degree }) => {
                coefficient_differences(variable, knots, *degree, *range, 1, direction(*decreasing))
            }
            (Constraint::Convex { range }, SplineKind::BSpline { knots, degree }) => {
                coefficient_differences(variable, knots, *degree, *range, 2, 1.0)
            }
            (Constraint::Concave { range }, SplineKind::BSpline { knots, degree }) => {
                coefficient_differences(variable, knots, *degree, *range, 2, -1.0)
            }
            (constraint, kind) => {
                return Err(SplineError::Incompatible {
                    spline: kind.family().name(),
                    kind: constraint.name(),
                    what: "constraint",
                });
            }
        };
        log::trace!(
            "{} on '{}' produced {} relations",
            self.name(),
            spline.tag(),
            relations.len()
        );
        Ok(relations)
    }
}

fn direction(decreasing: bool) -> f64 {
    if decreasing { -1.0 } else { 1.0 }
}

/// `basis([x0]) · v == y0` for every anchor point.
fn anchor_relations(
    spline: &Spline,
    variable: &Variable,
    points: &[(f64, f64)],
) -> Result<Vec<Relation>, SplineError> {
    let xs: Array1<f64> = points.iter().map(|&(x, _)| x).collect();
    let basis = spline.basis(xs.view())?;
    Ok(basis
        .rows()
        .into_iter()
        .zip(points)
        .map(|(row, &(_, y))| Relation::equal(variable, row.to_owned(), y))
        .collect())
}

/// Sign constraints on the running slope of a hinge basis.
///
/// `v[1]` is the slope left of the first knot and `v[1] + ... + v[i]` the slope right
/// of knot `i - 2`. With a range, a prefix ending at `i >= 2` is kept when knot
/// `i - 2` lies in `[start, end]`, and `v[1]` alone when the range starts left of the
/// first knot.
fn piecewise_slopes(
    variable: &Variable,
    knots: &[f64],
    range: Option<(f64, f64)>,
    sign: f64,
) -> Vec<Relation> {
    let enforced = |i: usize| match range {
        None => true,
        Some((start, _)) if i == 1 => knots.first().is_none_or(|&first| start < first),
        Some((start, end)) => (start..=end).contains(&knots[i - 2]),
    };
    (1..variable.dim())
        .filter(|&i| enforced(i))
        .map(|i| {
            let mut coeffs = Array1::zeros(variable.dim());
            coeffs.slice_mut(s![1..=i]).fill(sign);
            Relation::non_negative(variable, coeffs)
        })
        .collect()
}

/// Sign constraints on `order`-th differences of B-spline coefficients.
///
/// Relation `i` constrains the difference ending at coefficient `i`. Without a range
/// every difference is constrained. With one, only the differences whose coefficients
/// are all active on some non-empty knot span overlapping the range are kept; on span
/// `j` the active coefficients are `j - degree ..= j`.
fn coefficient_differences(
    variable: &Variable,
    knots: &[f64],
    degree: usize,
    range: Option<(f64, f64)>,
    order: usize,
    sign: f64,
) -> Vec<Relation> {
    let dim = variable.dim();
    if dim <= order {
        return Vec::new();
    }

    let indices: BTreeSet<usize> = match range {
        None => (order..dim).collect(),
        Some((start, end)) => {
            let mut selected = BTreeSet::new();
            for j in 0..knots.len() - 1 {
                let (left, right) = (knots[j], knots[j + 1]);
                if !(left < right && left <= end && right > start) {
                    continue;
                }
                let lowest = (j as i64 - degree as i64 + order as i64).max(order as i64);
                let highest = (j as i64).min(dim as i64 - 1);
                for i in lowest..=highest {
                    selected.insert(i as usize);
                }
            }
            selected
        }
    };

    let stencil: &[f64] = if order == 1 { &[-1.0, 1.0] } else { &[1.0, -2.0, 1.0] };
    indices
        .into_iter()
        .map(|i| {
            let mut coeffs = Array1::zeros(dim);
            for (offset, &weight) in stencil.iter().enumerate() {
                coeffs[i + offset - order] = sign * weight;
            }
            Relation::non_negative(variable, coeffs)
        })
        .collect()
}
