//! # Model files
//!
//! Two TOML artifacts:
//!
//! - [`ModelSpec`]: what to fit. A list of splines (term, optional tag, family
//!   configuration, constraints, penalties) plus solver settings.
//! - [`FittedModel`]: what was fitted. The resolved configuration of every spline
//!   (inferred periods and class counts included), its coefficients and the solver
//!   status, enough to rebuild a [`Regressor`] that predicts without refitting.
//!
//! ```toml
//! [solver]
//! max_iterations = 500
//!
//! [[splines]]
//! term = "temperature"
//! kind = { type = "bspline", knots = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0], degree = 2 }
//! constraints = [{ type = "monotonic", decreasing = true }]
//! penalties = [{ type = "ridge", alpha = 0.1 }]
//! ```

use crate::constraints::Constraint;
use crate::data::DataError;
use crate::penalties::Penalty;
use crate::regressor::Regressor;
use crate::solver::{QpSolver, SolverSettings, SolverStatus};
use crate::spline::{Spline, SplineError, SplineKind};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(transparent)]
    Spline(#[from] SplineError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("The model contains no splines.")]
    EmptyModel,
    #[error("All splines must have unique tags, but '{0}' appears more than once.")]
    DuplicateTag(String),
    #[error("No spline is tagged '{0}'.")]
    UnknownTag(String),
    #[error("Column '{term}' has {found} rows, but {expected} were expected.")]
    LengthMismatch {
        term: String,
        found: usize,
        expected: usize,
    },
    #[error("Cannot fit on an empty target vector.")]
    EmptyTarget,
    #[error("The model has not been fitted yet.")]
    NotFitted,
}

/// Declarative description of one spline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineSpec {
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub kind: SplineKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub penalties: Vec<Penalty>,
}

impl SplineSpec {
    /// Builds the spline, validating the configuration and every attachment.
    pub fn build(&self) -> Result<Spline, SplineError> {
        let mut spline = Spline::new(self.term.clone(), self.kind.clone())?;
        if let Some(tag) = &self.tag {
            spline = spline.with_tag(tag.clone());
        }
        for constraint in &self.constraints {
            spline.attach_constraint(constraint.clone())?;
        }
        for penalty in &self.penalties {
            spline.attach_penalty(*penalty)?;
        }
        Ok(spline)
    }
}

/// A model specification file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub solver: SolverSettings,
    pub splines: Vec<SplineSpec>,
}

impl ModelSpec {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let spec = toml::from_str(&toml_string)?;
        Ok(spec)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_toml(self, path)
    }

    /// An unfitted regressor with every spline of the specification.
    pub fn build(&self) -> Result<Regressor, ModelError> {
        let splines = self
            .splines
            .iter()
            .map(SplineSpec::build)
            .collect::<Result<Vec<_>, _>>()?;
        Regressor::new(splines)
    }

    pub fn solver(&self) -> QpSolver {
        QpSolver::new(self.solver.clone())
    }
}

/// One spline of a fitted model, with its resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedSpline {
    pub term: String,
    pub tag: String,
    pub kind: SplineKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub penalties: Vec<Penalty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<Vec<f64>>,
}

/// A fitted model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub status: SolverStatus,
    pub splines: Vec<FittedSpline>,
}

impl FittedModel {
    /// Snapshots a regressor. Fails if it has never been fitted.
    pub fn from_regressor(regressor: &Regressor) -> Result<Self, ModelError> {
        let status = regressor.status().cloned().ok_or(ModelError::NotFitted)?;
        let splines = regressor
            .splines()
            .iter()
            .map(|spline| FittedSpline {
                term: spline.term().to_string(),
                tag: spline.tag().to_string(),
                kind: spline.kind().clone(),
                constraints: spline.constraints().to_vec(),
                penalties: spline.penalties().to_vec(),
                coefficients: spline.coefficients().map(|c| c.to_vec()),
            })
            .collect();
        Ok(Self { status, splines })
    }

    /// Rebuilds a regressor whose splines carry the saved coefficients.
    pub fn to_regressor(&self) -> Result<Regressor, ModelError> {
        let mut splines = Vec::with_capacity(self.splines.len());
        for saved in &self.splines {
            let spec = SplineSpec {
                term: saved.term.clone(),
                tag: Some(saved.tag.clone()),
                kind: saved.kind.clone(),
                constraints: saved.constraints.clone(),
                penalties: saved.penalties.clone(),
            };
            let mut spline = spec.build()?;
            if let Some(values) = &saved.coefficients {
                spline.set_coefficients(Array1::from(values.clone()))?;
            }
            splines.push(spline);
        }
        let mut regressor = Regressor::new(splines)?;
        regressor.restore_status(self.status.clone());
        Ok(regressor)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_toml(self, path)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}

fn write_toml<T: Serialize>(value: &T, path: &Path) -> Result<(), ModelError> {
    let toml_string = toml::to_string_pretty(value)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}
