//! # Data Loading and Feature Access
//!
//! Splines look up their input by feature name through the [`FeatureSource`]
//! trait. Two sources are provided: a `polars` [`DataFrame`] (what the CLI reads
//! from TSV files) and a plain in-memory map of named columns (what library users
//! and tests build by hand).
//!
//! Failures are assumed to be user-input errors, so every `DataError` names the
//! offending column.

use ndarray::Array1;
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The column '{0}' was not found in the input data. Please check spelling and case.")]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("The input table '{0}' contains no data rows.")]
    EmptyTable(String),
}

/// Named numeric columns a model can be fitted on or evaluated against.
pub trait FeatureSource {
    /// The column called `name`, or [`DataError::ColumnNotFound`].
    fn feature(&self, name: &str) -> Result<Array1<f64>, DataError>;

    fn has_feature(&self, name: &str) -> bool;
}

impl FeatureSource for DataFrame {
    fn feature(&self, name: &str) -> Result<Array1<f64>, DataError> {
        if !self.has_feature(name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
        extract_numeric_column(self, name)
    }

    fn has_feature(&self, name: &str) -> bool {
        self.get_column_names().iter().any(|c| c.as_str() == name)
    }
}

impl FeatureSource for HashMap<String, Array1<f64>> {
    fn feature(&self, name: &str) -> Result<Array1<f64>, DataError> {
        let column = self
            .get(name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))?;
        validate_is_finite(column.iter().copied(), name)?;
        Ok(column.clone())
    }

    fn has_feature(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

fn validate_is_finite(mut values: impl Iterator<Item = f64>, column_name: &str) -> Result<(), DataError> {
    if values.any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(())
}

/// Casts a column to `f64`, rejecting nulls, text and non-finite values.
pub fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Array1<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", series.dtype()),
    };
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    // Non-strict casts turn unparsable text into nulls.
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    let chunked = casted.f64()?.rechunk();
    let values: Array1<f64> = chunked.into_no_null_iter().collect();
    validate_is_finite(values.iter().copied(), column_name)?;
    Ok(values)
}

/// Reads a tab-separated table with a header row.
pub fn load_table(path: &Path) -> Result<DataFrame, DataError> {
    log::info!("Loading data from '{}'", path.display());
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    if df.height() == 0 {
        return Err(DataError::EmptyTable(path.display().to_string()));
    }
    log::debug!(
        "Loaded {} rows with columns {:?}",
        df.height(),
        df.get_column_names()
    );
    Ok(df)
}
