//! Tabular loader
//!
//! Parses CSV bytes into two ordered [`Row`] sequences. Shape errors are
//! reported as [`Error::MalformedInput`] before any embedding work starts.

use crate::normalize::{normalize, NormalizeOptions};
use crate::row::{Column, Row};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Which input columns play the A and B roles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSelection {
    /// Header name for column A; first column when unset
    pub column_a: Option<String>,
    /// Header name for column B; second column when unset
    pub column_b: Option<String>,
    /// Make A the column with fewer non-empty values
    pub swap_columns_by_count: bool,
}

/// Loader output
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub header_a: String,
    pub header_b: String,
    pub a: Vec<Row>,
    pub b: Vec<Row>,
    /// Data rows read, header excluded
    pub data_rows: usize,
    pub columns_swapped: bool,
}

impl Table {
    pub fn total_rows(&self) -> usize {
        self.a.len() + self.b.len()
    }
}

/// Parse comma-delimited bytes into a [`Table`].
///
/// `normalize_opts` only decides which values count as non-empty for the
/// optional column swap.
pub fn load_table(
    bytes: &[u8],
    selection: &ColumnSelection,
    normalize_opts: &NormalizeOptions,
) -> Result<Table> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes);
    if matches!(text, std::borrow::Cow::Owned(_)) {
        tracing::warn!("input is not valid UTF-8, invalid sequences were replaced");
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| Error::MalformedInput(format!("unreadable header row: {}", e)))?
        .clone();

    if headers.len() < 2 {
        return Err(Error::MalformedInput(format!(
            "expected at least 2 columns, found {}",
            headers.len()
        )));
    }

    let idx_a = resolve_column(&headers, selection.column_a.as_deref(), 0)?;
    let idx_b = resolve_column(&headers, selection.column_b.as_deref(), 1)?;
    if idx_a == idx_b {
        return Err(Error::MalformedInput(format!(
            "column A and column B both refer to '{}'",
            &headers[idx_a]
        )));
    }

    let mut a = Vec::new();
    let mut b = Vec::new();
    let mut data_rows = 0usize;

    for (ordinal, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            Error::MalformedInput(format!("data row {}: {}", ordinal + 1, e))
        })?;
        data_rows += 1;

        for (idx, column, out) in [(idx_a, Column::A, &mut a), (idx_b, Column::B, &mut b)] {
            let value = record.get(idx).unwrap_or("");
            if !value.trim().is_empty() {
                out.push(Row::new(column, ordinal, value));
            }
        }
    }

    if data_rows == 0 {
        return Err(Error::MalformedInput("table has no data rows".to_string()));
    }

    let mut table = Table {
        header_a: headers[idx_a].to_string(),
        header_b: headers[idx_b].to_string(),
        a,
        b,
        data_rows,
        columns_swapped: false,
    };

    if selection.swap_columns_by_count {
        let count_a = count_non_empty(&table.a, normalize_opts);
        let count_b = count_non_empty(&table.b, normalize_opts);
        if count_a > count_b {
            swap_roles(&mut table);
        }
    }

    tracing::debug!(
        data_rows = table.data_rows,
        a = table.a.len(),
        b = table.b.len(),
        swapped = table.columns_swapped,
        "loaded table"
    );
    Ok(table)
}

fn resolve_column(headers: &csv::StringRecord, name: Option<&str>, default: usize) -> Result<usize> {
    match name {
        None => Ok(default),
        Some(name) => headers
            .iter()
            .position(|h| h == name || h.trim() == name.trim())
            .ok_or_else(|| Error::MalformedInput(format!("column '{}' not found in header", name))),
    }
}

fn count_non_empty(rows: &[Row], opts: &NormalizeOptions) -> usize {
    rows.iter()
        .filter(|r| !normalize(&r.value, opts).is_empty())
        .count()
}

fn swap_roles(table: &mut Table) {
    std::mem::swap(&mut table.header_a, &mut table.header_b);
    std::mem::swap(&mut table.a, &mut table.b);
    for row in &mut table.a {
        row.column = Column::A;
    }
    for row in &mut table.b {
        row.column = Column::B;
    }
    table.columns_swapped = true;
}
