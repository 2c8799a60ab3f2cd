//! Read-only reporting records and the text table built from them.

use crate::solver::SolverStatus;
use crate::spline::Spline;
use itertools::Itertools;
use std::fmt;

const RULE_WIDTH: usize = 96;

/// One row of the model summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRecord {
    pub spline_type: &'static str,
    pub term: String,
    pub tag: String,
    /// Comma-separated constraint names, or `"None"`.
    pub constraints: String,
    /// Comma-separated penalty descriptors, or `"None"`.
    pub penalties: String,
    pub parameters: usize,
}

impl SummaryRecord {
    pub fn from_spline(spline: &Spline) -> Self {
        let constraints = or_none(spline.constraints().iter().map(|c| c.name()).join(", "));
        let penalties = or_none(spline.penalties().iter().map(ToString::to_string).join(", "));
        Self {
            spline_type: spline.family().name(),
            term: spline.term().to_string(),
            tag: spline.tag().to_string(),
            constraints,
            penalties,
            // A factor whose class count is still unknown has no parameters yet.
            parameters: spline.dim().unwrap_or(0),
        }
    }
}

fn or_none(joined: String) -> String {
    if joined.is_empty() {
        "None".to_string()
    } else {
        joined
    }
}

/// Per-spline records plus the status of the last solve.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub records: Vec<SummaryRecord>,
    pub status: Option<SolverStatus>,
}

impl ModelSummary {
    pub fn total_parameters(&self) -> usize {
        self.records.iter().map(|r| r.parameters).sum()
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .status
            .as_ref()
            .map_or_else(|| "not fitted".to_string(), ToString::to_string);
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "Model Summary")?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "Problem Status: {status}")?;
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(
            f,
            "{:<16} | {:<12} | {:<20} | {:<6} | {:<16} | Penalties",
            "Spline Type", "Term", "Tag", "Params", "Constraints"
        )?;
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        for r in &self.records {
            writeln!(
                f,
                "{:<16} | {:<12} | {:<20} | {:<6} | {:<16} | {}",
                r.spline_type, r.term, r.tag, r.parameters, r.constraints, r.penalties
            )?;
        }
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(f, "{:<52} | {:<6} |", "Total Parameters", self.total_parameters())?;
        write!(f, "{}", "=".repeat(RULE_WIDTH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Constraint;
    use crate::penalties::Penalty;

    #[test]
    fn records_describe_attachments() {
        let spline = Spline::bspline("age", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], 1)
            .unwrap()
            .add_constraint(Constraint::monotonic(false))
            .unwrap()
            .add_constraint(Constraint::convex())
            .unwrap()
            .add_penalty(Penalty::ridge(0.5).unwrap())
            .unwrap();
        let record = SummaryRecord::from_spline(&spline);
        assert_eq!(record.spline_type, "BSpline");
        assert_eq!(record.tag, "bspline(age)");
        assert_eq!(record.constraints, "Monotonic, Convex");
        assert_eq!(record.penalties, "Ridge(alpha=0.5)");
        assert_eq!(record.parameters, 4);

        let bare = SummaryRecord::from_spline(&Spline::constant("age"));
        assert_eq!(bare.constraints, "None");
        assert_eq!(bare.penalties, "None");
    }

    #[test]
    fn table_lists_status_and_totals() {
        let summary = ModelSummary {
            records: vec![
                SummaryRecord::from_spline(&Spline::linear("x", true)),
                SummaryRecord::from_spline(&Spline::constant("x")),
            ],
            status: Some(SolverStatus::Optimal),
        };
        assert_eq!(summary.total_parameters(), 3);
        let text = summary.to_string();
        assert!(text.contains("Problem Status: optimal"));
        assert!(text.contains("linear(x)"));
        assert!(text.contains("Total Parameters"));

        let unfitted = ModelSummary {
            records: Vec::new(),
            status: None,
        };
        assert!(unfitted.to_string().contains("Problem Status: not fitted"));
    }
}
