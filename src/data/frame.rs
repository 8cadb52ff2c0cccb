//! Tabular values exchanged with packaged models.

use serde::{Deserialize, Serialize};

use super::signature::DataType;
use super::DataError;

/// One typed column of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Int(_) => DataType::Int64,
            ColumnData::Float(_) => DataType::Double,
            ColumnData::Text(_) => DataType::String,
        }
    }

    /// First `n` values.
    pub fn head(&self, n: usize) -> ColumnData {
        match self {
            ColumnData::Bool(v) => ColumnData::Bool(v.iter().take(n).cloned().collect()),
            ColumnData::Int(v) => ColumnData::Int(v.iter().take(n).cloned().collect()),
            ColumnData::Float(v) => ColumnData::Float(v.iter().take(n).cloned().collect()),
            ColumnData::Text(v) => ColumnData::Text(v.iter().take(n).cloned().collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    columns: Vec<Column>,
}

impl DataFrame {
    pub fn new(columns: Vec<Column>) -> Result<Self, DataError> {
        if let Some(first) = columns.first() {
            let rows = first.data.len();
            if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
                return Err(DataError::RaggedColumns {
                    column: bad.name.clone(),
                    expected: rows,
                    found: bad.data.len(),
                });
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DataError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Label unnamed columns positionally with `names`.
    pub fn from_unlabeled(names: &[String], data: Vec<ColumnData>) -> Result<Self, DataError> {
        if names.len() != data.len() {
            return Err(DataError::ColumnCount {
                expected: names.len(),
                found: data.len(),
            });
        }
        Self::new(
            names
                .iter()
                .cloned()
                .zip(data)
                .map(|(name, data)| Column { name, data })
                .collect(),
        )
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> DataFrame {
        DataFrame {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.head(n)))
                .collect(),
        }
    }
}

/// Raw result of invoking a native model method.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Already labeled output.
    Table(DataFrame),
    /// Unlabeled output columns.
    Columns(Vec<ColumnData>),
    /// One column group per output of a multi-output method; groups must
    /// share a row count and are concatenated column-wise.
    MultiOutput(Vec<Vec<ColumnData>>),
}

impl Prediction {
    /// Flatten into unlabeled columns, concatenating multi-output groups.
    pub fn into_columns(self) -> Vec<ColumnData> {
        match self {
            Prediction::Table(frame) => frame.into_columns().into_iter().map(|c| c.data).collect(),
            Prediction::Columns(columns) => columns,
            Prediction::MultiOutput(groups) => groups.into_iter().flatten().collect(),
        }
    }

    /// Labels the prediction carries itself, if any.
    pub fn labels(&self) -> Option<Vec<String>> {
        match self {
            Prediction::Table(frame) => Some(frame.column_names()),
            _ => None,
        }
    }
}
