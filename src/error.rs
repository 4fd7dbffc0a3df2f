//src/error.rs

use thiserror::Error;

/// The export does not look like the declared instrument's results file.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("no results table found{}", context_suffix(.context))]
    NoTable { context: Option<String> },

    #[error("expected column '{column}' is missing ({context}); check the instrument setting")]
    MissingColumn { column: String, context: String },

    #[error("expected sheet '{sheet}' is missing from the workbook; check the instrument setting")]
    MissingSheet { sheet: String },

    #[error("column '{column}' holds a non-numeric value: '{value}'")]
    InvalidNumber { column: String, value: String },

    #[error("cannot build a standard curve for {reporter}: {reason}")]
    StandardCurve { reporter: String, reason: String },
}

fn context_suffix(context: &Option<String>) -> String {
    context.as_ref().map(|c| format!(" in {c}")).unwrap_or_default()
}

/// The selected files do not agree with the configured assay, or with each other.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MismatchError {
    #[error("fluorophores in file do not match expected fluorophores; check assay assignment. Expected: {expected:?}, found: {found:?}")]
    Reporters { expected: Vec<String>, found: Vec<String> },

    #[error("incorrect number of files: expected {expected}, got {found}")]
    FileCount { expected: usize, found: usize },

    #[error("incorrect files selected, or file names have been edited. Selected: {expected:?}, matched: {found:?}")]
    Files { expected: Vec<String>, found: Vec<String> },

    #[error("well {well} appears more than once in the {reporter} table")]
    DuplicateWell { reporter: String, well: String },

    #[error("wells in the {reporter} table do not match the first table. Missing: {missing:?}, unexpected: {unexpected:?}")]
    Wells {
        reporter: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum QpcrError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Mismatch(#[from] MismatchError),

    #[error("invalid assay '{0}': not defined in the assay configuration")]
    UnknownAssay(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type QpcrResult<T> = Result<T, QpcrError>;

impl QpcrError {
    /// Configuration problems are fixed by the operator, not by choosing other files.
    pub fn is_configuration(&self) -> bool {
        matches!(self, QpcrError::UnknownAssay(_) | QpcrError::InvalidConfig(_) | QpcrError::Toml(_))
    }
}
