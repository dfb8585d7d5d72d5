//! Error taxonomy for a copy run.
//!
//! Everything below the command layer reports through [`CopyError`]. Store
//! implementations report through [`StoreError`], which the engine wraps with
//! the row id and column name it was working on.

use thiserror::Error;

/// Failure reported by a store or type-system implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation}: {message}")]
pub struct StoreError {
    pub operation: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError {
            operation,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CopyError {
    /// Invalid configuration or command-line input, detected before any row I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed row-set expression.
    #[error("Invalid row set '{expression}': {reason}")]
    RowSet { expression: String, reason: String },

    /// Columns without a compatible cast while strict matching was requested.
    #[error("No compatible cast for column(s): {}", .columns.join(", "))]
    Unresolved { columns: Vec<String> },

    /// Matching and binding left no column to copy.
    #[error("No column can be copied to the destination")]
    NothingToCopy,

    /// Enumerating columns or types, or binding a cursor, failed.
    #[error("Discovery failed for '{subject}': {source}")]
    Discovery {
        subject: String,
        #[source]
        source: StoreError,
    },

    /// Row-level operation (open, commit, close) failed.
    #[error("Row #{row_id}: {source}")]
    Row {
        row_id: i64,
        #[source]
        source: StoreError,
    },

    /// Reading or writing a single cell failed.
    #[error("Column '{column}' at row #{row_id}: {source}")]
    Cell {
        column: String,
        row_id: i64,
        #[source]
        source: StoreError,
    },

    /// The final whole-cursor commit failed.
    #[error("Committing destination after processing all rows failed: {0}")]
    Commit(#[source] StoreError),

    /// Scratch buffer could not grow to hold a cell.
    #[error("Scratch buffer exhausted: {requested} bytes requested, limit is {limit} bytes")]
    ResourceExhausted { requested: usize, limit: usize },
}

impl CopyError {
    pub fn config(message: impl Into<String>) -> Self {
        CopyError::Config(message.into())
    }

    pub fn discovery(subject: impl Into<String>, source: StoreError) -> Self {
        CopyError::Discovery {
            subject: subject.into(),
            source,
        }
    }

    pub fn cell(column: &str, row_id: i64, source: StoreError) -> Self {
        CopyError::Cell {
            column: column.to_string(),
            row_id,
            source,
        }
    }

    /// True for failures that happen before the first row is touched.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            CopyError::Config(_)
                | CopyError::RowSet { .. }
                | CopyError::Unresolved { .. }
                | CopyError::NothingToCopy
                | CopyError::Discovery { .. }
        )
    }
}

pub type Result<T, E = CopyError> = std::result::Result<T, E>;
