//! # Data Loading and Validation Module
//!
//! This module is the entry point for the labeled case table the diagnostic
//! engine learns from. It reads delimited text files, keeps them in a small
//! row-oriented `Dataset`, and validates them into the dense `LabeledData`
//! shape consumed by the probability table and the simulator.
//!
//! - One label column: its name is supplied by the caller (`prognosis` by
//!   convention). Every other column is a binary symptom flag.
//! - Missing symptom cells are read as absent (0). A missing label is an error.
//! - Errors name the offending column (and row, where there is one) so a bad
//!   file can be fixed without a debugger.

use ndarray::Array2;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A single cell of the raw case table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<u8> for Cell {
    fn from(value: u8) -> Self {
        Cell::Number(f64::from(value))
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

/// A row-oriented table of cases: named columns and rows of equal width.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

/// The validated, dense view of a `Dataset`.
#[derive(Debug, Clone)]
pub struct LabeledData {
    /// Symptom names in column order, label column removed.
    pub symptoms: Vec<String>,
    /// One label per row.
    pub labels: Vec<String>,
    /// Symptom flags, shape [n_rows, n_symptoms], every entry 0 or 1.
    pub flags: Array2<u8>,
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or empty values were found in the label column '{0}'. Every case needs a label."
    )]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the symptom column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error(
        "The symptom column '{column}' contains {value} at row {row}; only 0 and 1 are allowed."
    )]
    NonBinaryValue {
        column: String,
        row: usize,
        value: f64,
    },
    #[error("Row {row} has {found} cells, but the table has {expected} columns.")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("The input table contains no data rows.")]
    EmptyDataset,
    #[error("The column name '{0}' appears more than once.")]
    DuplicateColumn(String),
    #[error("Smoothing constant must be finite and strictly positive, got {0}.")]
    InvalidSmoothing(f64),
    #[error("Inconsistent probability table: {0}")]
    InconsistentTable(String),
}

impl Dataset {
    /// Builds a dataset, rejecting rows whose width does not match the header.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, DataError> {
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(DataError::DuplicateColumn(name.clone()));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DataError::RaggedRow {
                    row: i + 1,
                    found: row.len(),
                    expected: columns.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Splits the table into labels and a binary symptom matrix.
    pub fn labeled(&self, label_column: &str) -> Result<LabeledData, DataError> {
        let label_idx = self
            .columns
            .iter()
            .position(|c| c == label_column)
            .ok_or_else(|| DataError::ColumnNotFound(label_column.to_string()))?;

        if self.rows.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        let symptom_cols: Vec<usize> = (0..self.columns.len())
            .filter(|&c| c != label_idx)
            .collect();
        let symptoms: Vec<String> = symptom_cols
            .iter()
            .map(|&c| self.columns[c].clone())
            .collect();

        let mut labels = Vec::with_capacity(self.rows.len());
        let mut flags = Array2::<u8>::zeros((self.rows.len(), symptom_cols.len()));

        for (r, row) in self.rows.iter().enumerate() {
            let label = label_text(&row[label_idx])
                .ok_or_else(|| DataError::MissingValuesFound(label_column.to_string()))?;
            labels.push(label);

            for (s, &c) in symptom_cols.iter().enumerate() {
                let column = &self.columns[c];
                flags[[r, s]] = symptom_flag(&row[c], column, r + 1)?;
            }
        }

        log::debug!(
            "Validated {} rows with {} symptom columns against label '{}'",
            labels.len(),
            symptoms.len(),
            label_column
        );

        Ok(LabeledData {
            symptoms,
            labels,
            flags,
        })
    }
}

fn label_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Missing => None,
        Cell::Number(v) if !v.is_finite() => None,
        Cell::Number(v) => Some(v.to_string()),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}

fn symptom_flag(cell: &Cell, column: &str, row: usize) -> Result<u8, DataError> {
    let value = match cell {
        Cell::Missing => return Ok(0),
        Cell::Number(v) => *v,
        Cell::Text(s) if s.trim().is_empty() => return Ok(0),
        Cell::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| DataError::ColumnWrongType {
                column_name: column.to_string(),
                expected_type: "0/1 flag",
                found_type: format!("text '{s}' at row {row}"),
            })?,
    };

    if !value.is_finite() {
        return Err(DataError::NonFiniteValuesFound(column.to_string()));
    }
    if value == 0.0 {
        Ok(0)
    } else if value == 1.0 {
        Ok(1)
    } else {
        Err(DataError::NonBinaryValue {
            column: column.to_string(),
            row,
            value,
        })
    }
}

/// Reads a delimited text file with a header row into a `Dataset`.
///
/// String columns keep their text; every other column is cast to `f64`.
/// Nulls become `Cell::Missing`.
pub fn load_dataset(path: &Path, separator: u8) -> Result<Dataset, DataError> {
    log::info!("Loading case table from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    let columns: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let height = df.height();
    let mut rows: Vec<Vec<Cell>> = (0..height)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();

    for name in &columns {
        let column = df.column(name)?;
        if matches!(column.dtype(), DataType::String) {
            let text = column.str()?;
            for (row, value) in rows.iter_mut().zip(text.into_iter()) {
                row.push(value.map_or(Cell::Missing, |s| Cell::Text(s.to_string())));
            }
        } else {
            let casted = column
                .cast(&DataType::Float64)
                .map_err(|_| DataError::ColumnWrongType {
                    column_name: name.clone(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", column.dtype()),
                })?;
            let numbers = casted.f64()?;
            for (row, value) in rows.iter_mut().zip(numbers.into_iter()) {
                row.push(value.map_or(Cell::Missing, Cell::Number));
            }
        }
    }

    log::info!(
        "Loaded {} rows with {} columns from '{}'",
        height,
        columns.len(),
        path.display()
    );

    Dataset::new(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{content}")?;
        file.flush()?;
        Ok(file)
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn labeled_splits_label_from_symptoms() {
        let ds = Dataset::new(
            columns(&["fever", "prognosis", "cough"]),
            vec![
                vec![1u8.into(), "flu".into(), 0u8.into()],
                vec![0u8.into(), "cold".into(), 1u8.into()],
            ],
        )
        .unwrap();

        let labeled = ds.labeled("prognosis").unwrap();
        assert_eq!(labeled.symptoms, vec!["fever", "cough"]);
        assert_eq!(labeled.labels, vec!["flu", "cold"]);
        assert_eq!(labeled.flags[[0, 0]], 1);
        assert_eq!(labeled.flags[[0, 1]], 0);
        assert_eq!(labeled.flags[[1, 1]], 1);
    }

    #[test]
    fn missing_label_column_is_rejected() {
        let ds = Dataset::new(
            columns(&["fever", "cough"]),
            vec![vec![1u8.into(), 0u8.into()]],
        )
        .unwrap();
        match ds.labeled("prognosis").unwrap_err() {
            DataError::ColumnNotFound(col) => assert_eq!(col, "prognosis"),
            other => panic!("Expected ColumnNotFound(prognosis), got {other:?}"),
        }
    }

    #[test]
    fn missing_symptom_cells_read_as_absent() {
        let ds = Dataset::new(
            columns(&["prognosis", "fever"]),
            vec![vec!["flu".into(), Cell::Missing]],
        )
        .unwrap();
        let labeled = ds.labeled("prognosis").unwrap();
        assert_eq!(labeled.flags[[0, 0]], 0);
    }

    #[test]
    fn missing_label_value_is_rejected() {
        let ds = Dataset::new(
            columns(&["prognosis", "fever"]),
            vec![vec![Cell::Missing, 1u8.into()]],
        )
        .unwrap();
        assert!(matches!(
            ds.labeled("prognosis"),
            Err(DataError::MissingValuesFound(_))
        ));
    }

    #[test]
    fn non_binary_value_reports_column_and_row() {
        let ds = Dataset::new(
            columns(&["prognosis", "fever"]),
            vec![
                vec!["flu".into(), 1u8.into()],
                vec!["flu".into(), Cell::Number(2.0)],
            ],
        )
        .unwrap();
        match ds.labeled("prognosis").unwrap_err() {
            DataError::NonBinaryValue { column, row, value } => {
                assert_eq!(column, "fever");
                assert_eq!(row, 2);
                assert_eq!(value, 2.0);
            }
            other => panic!("Expected NonBinaryValue, got {other:?}"),
        }
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Dataset::new(columns(&["prognosis", "fever"]), vec![vec!["flu".into()]])
            .unwrap_err();
        assert!(matches!(
            err,
            DataError::RaggedRow {
                row: 1,
                found: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let ds = Dataset::new(columns(&["prognosis", "fever"]), vec![]).unwrap();
        assert!(matches!(ds.labeled("prognosis"), Err(DataError::EmptyDataset)));
    }

    #[test]
    fn load_dataset_from_csv() {
        let content = "itching,skin_rash,prognosis\n1,0,Fungal infection\n0,1,Allergy\n1,,Allergy";
        let file = csv_file(content).unwrap();
        let ds = load_dataset(file.path(), b',').unwrap();
        assert_eq!(ds.columns(), &["itching", "skin_rash", "prognosis"]);
        assert_eq!(ds.len(), 3);

        let labeled = ds.labeled("prognosis").unwrap();
        assert_eq!(
            labeled.labels,
            vec!["Fungal infection", "Allergy", "Allergy"]
        );
        assert_eq!(labeled.flags[[2, 0]], 1);
        assert_eq!(labeled.flags[[2, 1]], 0);
    }
}
