//! # Convex fitting problem
//!
//! A [`Problem`] is the solver-neutral description of a fit:
//!
//! ```text
//! minimize    || prediction(v) - y ||^2  +  sum_k penalty_k(v)
//! subject to  every relation
//! ```
//!
//! Solvers either consume it symbolically or call [`Problem::lower`] to get the
//! dense quadratic program `min 1/2 x'Px + q'x  s.t.  l <= Ax <= u` over the stacked
//! coefficient vector.

use crate::expr::{LinearExpr, PenaltyShape, PenaltyTerm, Relation, Sense, Variable, VariableId};
use ndarray::{Array1, Array2, ArrayView1, s};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Problem {
    prediction: LinearExpr,
    target: Array1<f64>,
    penalties: Vec<PenaltyTerm>,
    constraints: Vec<Relation>,
}

impl Problem {
    /// Least squares of `prediction` against `target`.
    ///
    /// # Panics
    /// If the two lengths differ.
    pub fn least_squares(prediction: LinearExpr, target: Array1<f64>) -> Self {
        assert_eq!(
            prediction.len(),
            target.len(),
            "prediction and target lengths differ"
        );
        Self {
            prediction,
            target,
            penalties: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_penalties(mut self, penalties: Vec<PenaltyTerm>) -> Self {
        self.penalties.extend(penalties);
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<Relation>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    pub fn prediction(&self) -> &LinearExpr {
        &self.prediction
    }

    pub fn target(&self) -> ArrayView1<'_, f64> {
        self.target.view()
    }

    pub fn penalties(&self) -> &[PenaltyTerm] {
        &self.penalties
    }

    pub fn constraints(&self) -> &[Relation] {
        &self.constraints
    }

    /// Every variable the problem mentions, in order of first appearance.
    pub fn variables(&self) -> Vec<Variable> {
        let mut seen = Vec::<Variable>::new();
        let candidates = self
            .prediction
            .variables()
            .chain(self.penalties.iter().map(|p| &p.variable))
            .chain(self.constraints.iter().map(|r| &r.variable));
        for variable in candidates {
            if !seen.iter().any(|v| v.id() == variable.id()) {
                seen.push(variable.clone());
            }
        }
        seen
    }

    /// Objective value at `values`, or `None` if a variable has no value.
    pub fn objective(&self, values: &HashMap<VariableId, Array1<f64>>) -> Option<f64> {
        let residual = self.prediction.evaluate(values)? - &self.target;
        let mut total = residual.dot(&residual);
        for penalty in &self.penalties {
            total += penalty.value(values.get(&penalty.variable.id())?.view());
        }
        Some(total)
    }

    /// Lowers the problem to a dense QP over the stacked coefficient vector.
    ///
    /// Variables are laid out in order of first appearance. Each L1 penalty on a
    /// `d`-dimensional variable adds `d` auxiliary bounds `t >= |v|` after them; the
    /// auxiliary entries are dropped again by [`Layout::extract`].
    pub(crate) fn lower(&self) -> (QuadraticProgram, Layout) {
        let mut offsets = HashMap::new();
        let mut blocks = Vec::new();
        let mut width = 0;
        for variable in self.variables() {
            offsets.insert(variable.id(), width);
            let dim = variable.dim();
            blocks.push((variable, width));
            width += dim;
        }
        let primary = width;

        let mut auxiliary = Vec::new();
        for penalty in &self.penalties {
            if penalty.shape == PenaltyShape::SumAbs {
                auxiliary.push(width);
                width += penalty.variable.dim();
            }
        }

        let mut design = Array2::<f64>::zeros((self.prediction.len(), width));
        for (variable, matrix) in self.prediction.blocks() {
            let start = offsets[&variable.id()];
            let mut block = design.slice_mut(s![.., start..start + variable.dim()]);
            block += matrix;
        }
        let shift = &self.prediction.offset() - &self.target;
        let mut p = 2.0 * design.t().dot(&design);
        let mut q = 2.0 * design.t().dot(&shift);

        let num_rows = self.constraints.len()
            + 2 * self
                .penalties
                .iter()
                .filter(|p| p.shape == PenaltyShape::SumAbs)
                .map(|p| p.variable.dim())
                .sum::<usize>();
        let mut a = Array2::<f64>::zeros((num_rows, width));
        let mut l = Array1::<f64>::zeros(num_rows);
        let mut u = Array1::<f64>::zeros(num_rows);

        for (row, relation) in self.constraints.iter().enumerate() {
            let start = offsets[&relation.variable.id()];
            a.slice_mut(s![row, start..start + relation.variable.dim()])
                .assign(&relation.coeffs);
            l[row] = relation.rhs;
            u[row] = match relation.sense {
                Sense::Equal => relation.rhs,
                Sense::GreaterOrEqual => f64::INFINITY,
            };
        }

        let mut row = self.constraints.len();
        let mut aux = auxiliary.into_iter();
        for penalty in &self.penalties {
            let start = offsets[&penalty.variable.id()];
            let dim = penalty.variable.dim();
            match penalty.shape {
                PenaltyShape::SumSquares => {
                    for i in start..start + dim {
                        p[[i, i]] += 2.0 * penalty.weight;
                    }
                }
                PenaltyShape::SumAbs => {
                    let Some(t) = aux.next() else { continue };
                    for i in 0..dim {
                        q[t + i] += penalty.weight;
                        // t - v >= 0 and t + v >= 0
                        for (sign, r) in [(-1.0, row), (1.0, row + 1)] {
                            a[[r, t + i]] = 1.0;
                            a[[r, start + i]] = sign;
                            l[r] = 0.0;
                            u[r] = f64::INFINITY;
                        }
                        row += 2;
                    }
                }
            }
        }

        log::debug!(
            "Lowered problem: {} unknowns ({} auxiliary), {} constraint rows, {} observations",
            width,
            width - primary,
            num_rows,
            self.prediction.len()
        );

        (QuadraticProgram { p, q, a, l, u }, Layout { blocks })
    }
}

/// `min 1/2 x'Px + q'x  s.t.  l <= Ax <= u`, with `P` symmetric positive semidefinite.
#[derive(Debug, Clone)]
pub(crate) struct QuadraticProgram {
    pub p: Array2<f64>,
    pub q: Array1<f64>,
    pub a: Array2<f64>,
    pub l: Array1<f64>,
    pub u: Array1<f64>,
}

/// Where each variable lives inside the stacked unknown vector.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    blocks: Vec<(Variable, usize)>,
}

impl Layout {
    pub(crate) fn extract(&self, x: ArrayView1<f64>) -> HashMap<VariableId, Array1<f64>> {
        self.blocks
            .iter()
            .map(|(variable, start)| {
                (
                    variable.id(),
                    x.slice(s![*start..*start + variable.dim()]).to_owned(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line_problem() -> (Problem, Variable) {
        let v = Variable::new("x_linear", 2);
        let design = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0]];
        let problem = Problem::least_squares(LinearExpr::product(design, &v), array![1.0, 3.0, 5.0]);
        (problem, v)
    }

    #[test]
    fn objective_is_residual_plus_penalties() {
        let (problem, v) = line_problem();
        let problem = problem.with_penalties(vec![PenaltyTerm {
            variable: v.clone(),
            shape: PenaltyShape::SumSquares,
            weight: 0.5,
        }]);
        let mut values = HashMap::new();
        assert!(problem.objective(&values).is_none());
        values.insert(v.id(), array![2.0, 1.0]);
        assert_eq!(problem.objective(&values), Some(2.5));
        values.insert(v.id(), array![0.0, 0.0]);
        assert_eq!(problem.objective(&values), Some(35.0));
    }

    #[test]
    fn lowering_builds_normal_equations() {
        let (problem, v) = line_problem();
        let problem = problem.with_constraints(vec![
            Relation::non_negative(&v, array![1.0, 0.0]),
            Relation::equal(&v, array![0.0, 1.0], 1.0),
        ]);
        let (qp, layout) = problem.lower();
        assert_eq!(qp.p, array![[10.0, 6.0], [6.0, 6.0]]);
        assert_eq!(qp.q, array![-26.0, -18.0]);
        assert_eq!(qp.a, array![[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(qp.l, array![0.0, 1.0]);
        assert_eq!(qp.u[0], f64::INFINITY);
        assert_eq!(qp.u[1], 1.0);

        let values = layout.extract(array![2.0, 1.0].view());
        assert_eq!(values[&v.id()], array![2.0, 1.0]);
    }

    #[test]
    fn lasso_adds_hidden_bounds() {
        let (problem, v) = line_problem();
        let problem = problem.with_penalties(vec![PenaltyTerm {
            variable: v.clone(),
            shape: PenaltyShape::SumAbs,
            weight: 3.0,
        }]);
        let (qp, layout) = problem.lower();
        assert_eq!(qp.q.len(), 4);
        assert_eq!(qp.q.slice(s![2..]), array![3.0, 3.0]);
        assert_eq!(qp.a.nrows(), 4);
        assert_eq!(qp.a.row(0), array![-1.0, 0.0, 1.0, 0.0]);
        assert_eq!(qp.a.row(1), array![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(qp.a.row(3), array![0.0, 1.0, 0.0, 1.0]);

        let values = layout.extract(array![1.0, 2.0, 1.0, 2.0].view());
        assert_eq!(values.len(), 1);
        assert_eq!(values[&v.id()], array![1.0, 2.0]);
    }

    #[test]
    fn variables_are_deduplicated_in_order() {
        let (problem, v) = line_problem();
        let w = Variable::new("z_constant", 1);
        let problem = problem.with_constraints(vec![
            Relation::non_negative(&w, array![1.0]),
            Relation::non_negative(&v, array![1.0, 0.0]),
        ]);
        let ids: Vec<_> = problem.variables().iter().map(Variable::id).collect();
        assert_eq!(ids, vec![v.id(), w.id()]);
    }
}
