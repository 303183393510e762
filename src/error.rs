// 🚨 Error taxonomy for the reconciliation pipeline
//
// Schema problems are fatal and abort the run before anything is published.
// Zero-loan division and empty anomaly distributions are NOT errors; they are
// recovered where they happen (see kpi.rs and anomaly.rs).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("dataset '{dataset}' is missing required column '{column}'")]
    MissingColumn { dataset: String, column: String },

    #[error("risk dataset has {rows} rows for LoanID '{loan_id}' (strict risk keys enabled)")]
    DuplicateRiskKey { loan_id: String, rows: usize },
}

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid value in {dataset} line {line}, column '{column}': '{value}'")]
    InvalidValue {
        dataset: String,
        line: usize,
        column: String,
        value: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconError {
    pub fn is_schema(&self) -> bool {
        matches!(self, ReconError::Schema(_))
    }
}

pub type ReconResult<T> = Result<T, ReconError>;
