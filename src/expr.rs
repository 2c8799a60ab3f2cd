//! # Symbolic expressions over coefficient variables
//!
//! The solver boundary speaks in terms of a small algebra: coefficient
//! variables with a stable identity, vector-valued linear expressions built from
//! `basis · variable` blocks, scalar linear relations, and penalty terms. Nothing
//! in here evaluates anything numerically except `LinearExpr::evaluate`, which
//! substitutes solved values.

use ndarray::{Array1, Array2, ArrayView1};
use std::collections::HashMap;
use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_VARIABLE_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of a coefficient variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(usize);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A vector of unknowns solved for by the convex program.
///
/// Cloning a `Variable` clones the handle, not the identity: two clones compare equal
/// and address the same solved values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    id: VariableId,
    name: String,
    dim: usize,
}

impl Variable {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            id: VariableId(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            dim,
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// A vector-valued affine expression `sum_j M_j v_j + c`.
///
/// Every block matrix has `len()` rows; its column count equals the dimension of
/// the variable it multiplies.
#[derive(Debug, Clone)]
pub struct LinearExpr {
    blocks: Vec<(Variable, Array2<f64>)>,
    constant: Array1<f64>,
}

impl LinearExpr {
    /// `matrix · variable`.
    ///
    /// # Panics
    /// If the matrix column count differs from the variable dimension. Callers build
    /// the matrix from the same configuration that sized the variable.
    pub fn product(matrix: Array2<f64>, variable: &Variable) -> Self {
        assert_eq!(
            matrix.ncols(),
            variable.dim(),
            "basis width does not match variable '{}'",
            variable.name()
        );
        let rows = matrix.nrows();
        Self {
            blocks: vec![(variable.clone(), matrix)],
            constant: Array1::zeros(rows),
        }
    }

    /// An expression with no variables.
    pub fn constant(values: Array1<f64>) -> Self {
        Self {
            blocks: Vec::new(),
            constant: values,
        }
    }

    pub fn len(&self) -> usize {
        self.constant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constant.is_empty()
    }

    pub fn blocks(&self) -> &[(Variable, Array2<f64>)] {
        &self.blocks
    }

    pub fn offset(&self) -> ArrayView1<'_, f64> {
        self.constant.view()
    }

    /// Variables in order of first appearance.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.blocks.iter().map(|(v, _)| v)
    }

    /// Substitutes solved values. Returns `None` if any variable is missing.
    pub fn evaluate(&self, values: &HashMap<VariableId, Array1<f64>>) -> Option<Array1<f64>> {
        let mut out = self.constant.clone();
        for (variable, matrix) in &self.blocks {
            let v = values.get(&variable.id())?;
            out += &matrix.dot(v);
        }
        Some(out)
    }
}

impl Add for LinearExpr {
    type Output = LinearExpr;

    /// Elementwise sum. Blocks for the same variable are merged.
    ///
    /// # Panics
    /// If the two expressions have a different number of rows.
    fn add(mut self, rhs: LinearExpr) -> LinearExpr {
        assert_eq!(self.len(), rhs.len(), "cannot add expressions of different length");
        self.constant += &rhs.constant;
        for (variable, matrix) in rhs.blocks {
            match self.blocks.iter_mut().find(|(v, _)| v.id() == variable.id()) {
                Some((_, existing)) => *existing += &matrix,
                None => self.blocks.push((variable, matrix)),
            }
        }
        self
    }
}

/// Sense of a scalar relation `coeffs · v  (== | >=)  rhs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Equal,
    GreaterOrEqual,
}

/// A linear (in)equality over a single coefficient variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub variable: Variable,
    pub coeffs: Array1<f64>,
    pub sense: Sense,
    pub rhs: f64,
}

impl Relation {
    pub fn equal(variable: &Variable, coeffs: Array1<f64>, rhs: f64) -> Self {
        debug_assert_eq!(coeffs.len(), variable.dim());
        Self {
            variable: variable.clone(),
            coeffs,
            sense: Sense::Equal,
            rhs,
        }
    }

    /// `coeffs · v >= 0`.
    pub fn non_negative(variable: &Variable, coeffs: Array1<f64>) -> Self {
        debug_assert_eq!(coeffs.len(), variable.dim());
        Self {
            variable: variable.clone(),
            coeffs,
            sense: Sense::GreaterOrEqual,
            rhs: 0.0,
        }
    }

    /// Signed violation at `values`: positive means the relation does not hold.
    pub fn violation(&self, values: ArrayView1<f64>) -> f64 {
        let lhs = self.coeffs.dot(&values);
        match self.sense {
            Sense::Equal => (lhs - self.rhs).abs(),
            Sense::GreaterOrEqual => self.rhs - lhs,
        }
    }
}

/// Shape of a convex penalty over one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyShape {
    /// `sum(v_i^2)`
    SumSquares,
    /// `sum(|v_i|)`
    SumAbs,
}

/// `weight * shape(v)`, added to the objective.
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyTerm {
    pub variable: Variable,
    pub shape: PenaltyShape,
    pub weight: f64,
}

impl PenaltyTerm {
    pub fn value(&self, values: ArrayView1<f64>) -> f64 {
        let raw = match self.shape {
            PenaltyShape::SumSquares => values.dot(&values),
            PenaltyShape::SumAbs => values.iter().map(|v| v.abs()).sum(),
        };
        self.weight * raw
    }
}
