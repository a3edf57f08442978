use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the table a row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Column {
    A,
    B,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::A => f.write_str("A"),
            Column::B => f.write_str("B"),
        }
    }
}

/// Stable identity of a row: (column, ordinal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub column: Column,
    pub ordinal: usize,
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.column, self.ordinal)
    }
}

/// A raw value from one column of the input table.
///
/// `ordinal` is the 0-based data row index in the original table and is the
/// join key back to it. Rows are never reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub column: Column,
    pub ordinal: usize,
    pub value: String,
}

impl Row {
    #[inline]
    #[must_use]
    pub fn new(column: Column, ordinal: usize, value: impl Into<String>) -> Self {
        Self {
            column,
            ordinal,
            value: value.into(),
        }
    }

    #[inline]
    pub fn id(&self) -> RowId {
        RowId {
            column: self.column,
            ordinal: self.ordinal,
        }
    }
}
