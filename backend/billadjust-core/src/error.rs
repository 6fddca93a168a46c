// src/error.rs
use rust_decimal::Decimal;
use thiserror::Error;

// --- Error Types ---

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Budget period could not be recognized from label '{label}'")]
    PeriodNotRecognized { label: String },

    #[error("Reference data missing or empty: {source_name}")]
    MissingReferenceData { source_name: String },

    #[error("Table '{table}' has no column for field '{field}' (accepted headers: {aliases:?})")]
    MissingColumn {
        table: String,
        field: String,
        aliases: Vec<String>,
    },

    #[error("No allocation row with id '{id}'")]
    UnknownAllocationRow { id: String },

    #[error("Invalid override for '{id}': adjusted hours must be >= 0, got {value}")]
    InvalidOverride { id: String, value: Decimal },

    #[error("Duplicate aggregation key: {key}")]
    DuplicateAggregationKey { key: String },

    #[error("Arithmetic overflow while computing {operation}")]
    ArithmeticOverflow { operation: String },

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Configuration could not be loaded")]
    Env(#[from] envy::Error),

    #[error("CSV processing error")]
    Csv(#[from] csv::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

// Helper to attach a description to an io::Error
pub(crate) fn io_context(source: std::io::Error, context: impl Into<String>) -> EngineError {
    EngineError::Io {
        source,
        context: context.into(),
    }
}

// --- Checked Decimal Arithmetic ---

fn overflow(operation: &str) -> EngineError {
    EngineError::ArithmeticOverflow {
        operation: operation.to_string(),
    }
}

pub(crate) fn checked_add(lhs: Decimal, rhs: Decimal, operation: &str) -> EngineResult<Decimal> {
    lhs.checked_add(rhs).ok_or_else(|| overflow(operation))
}

pub(crate) fn checked_sub(lhs: Decimal, rhs: Decimal, operation: &str) -> EngineResult<Decimal> {
    lhs.checked_sub(rhs).ok_or_else(|| overflow(operation))
}

pub(crate) fn checked_mul(lhs: Decimal, rhs: Decimal, operation: &str) -> EngineResult<Decimal> {
    lhs.checked_mul(rhs).ok_or_else(|| overflow(operation))
}

// Callers rule out a zero divisor, so `None` here means the quotient overflowed
pub(crate) fn checked_div(lhs: Decimal, rhs: Decimal, operation: &str) -> EngineResult<Decimal> {
    lhs.checked_div(rhs).ok_or_else(|| overflow(operation))
}
