//! # Data Loading
//!
//! Reads tab-separated tables with a header row into `ndarray` structures.
//! The response, offset and trial columns are named in the run
//! configuration; every other column becomes a design column, in file order.

use crate::model::DataSection;
use ndarray::{Array1, Array2, Axis};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read tab-separated data: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The required column '{0}' was not found in the input file. Please check spelling and case.")]
    ColumnNotFound(String),
    #[error("Row {row}, column '{column}': cannot parse '{value}' as a number.")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("The input file contains no data rows.")]
    EmptyData,
    #[error("No design columns remain after removing the response, offset and trials.")]
    NoDesignColumns,
}

/// A numeric table with named columns.
#[derive(Debug, Clone)]
pub struct DataTable {
    columns: Vec<String>,
    values: Array2<f64>,
}

/// Response, design and optional offset/trials, ready for a model constructor.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub endog: Array1<f64>,
    pub exog: Array2<f64>,
    pub exog_names: Vec<String>,
    pub offset: Option<Array1<f64>>,
    pub trials: Option<Array1<f64>>,
}

pub fn load_table(path: &Path) -> Result<DataTable, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut flat = Vec::new();
    let mut nrows = 0;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        for (value, column) in record.iter().zip(columns.iter()) {
            let parsed = value.parse::<f64>().map_err(|_| DataError::InvalidValue {
                row: row + 1,
                column: column.clone(),
                value: value.to_string(),
            })?;
            flat.push(parsed);
        }
        nrows += 1;
    }
    if nrows == 0 {
        return Err(DataError::EmptyData);
    }
    let values = Array2::from_shape_vec((nrows, columns.len()), flat)
        .map_err(|_| DataError::EmptyData)?;
    log::info!(
        "Loaded {} rows and {} columns from {}",
        nrows,
        columns.len(),
        path.display()
    );
    Ok(DataTable { columns, values })
}

impl DataTable {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    fn index_of(&self, name: &str) -> Result<usize, DataError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<Array1<f64>, DataError> {
        let index = self.index_of(name)?;
        Ok(self.values.column(index).to_owned())
    }

    /// Splits the table according to `section`.
    pub fn to_model_data(&self, section: &DataSection) -> Result<ModelData, DataError> {
        let endog = self.column(&section.response)?;
        let offset = section.offset.as_deref().map(|c| self.column(c)).transpose()?;
        let trials = section.trials.as_deref().map(|c| self.column(c)).transpose()?;

        let reserved: Vec<&str> = std::iter::once(section.response.as_str())
            .chain(section.offset.as_deref())
            .chain(section.trials.as_deref())
            .collect();
        let design_indices: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !reserved.contains(&self.columns[i].as_str()))
            .collect();

        let mut exog_names: Vec<String> = Vec::with_capacity(design_indices.len() + 1);
        let mut exog = self.values.select(Axis(1), &design_indices);
        if section.add_intercept {
            let ones = Array2::ones((self.nrows(), 1));
            exog = ndarray::concatenate![Axis(1), ones, exog];
            exog_names.push("const".to_string());
        }
        exog_names.extend(design_indices.iter().map(|&i| self.columns[i].clone()));
        if exog.ncols() == 0 {
            return Err(DataError::NoDesignColumns);
        }

        Ok(ModelData {
            endog,
            exog,
            exog_names,
            offset,
            trials,
        })
    }
}
