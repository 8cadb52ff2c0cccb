//! Tabular data and method signatures.

mod frame;
mod signature;

use thiserror::Error;

pub use frame::{Column, ColumnData, DataFrame, Prediction};
pub use signature::{
    default_output_names, infer_signature, truncate, DataType, FeatureSpec, ModelSignature,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("Column {column} has {found} rows, expected {expected}")]
    RaggedColumns {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Expected {expected} columns, got {found}")]
    ColumnCount { expected: usize, found: usize },
}
