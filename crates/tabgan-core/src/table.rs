//! Training tables: labeled tables and raw numeric matrices.
//!
//! A [`Table`] is a dense row-major `rows × cols` block of `f32` values,
//! optionally carrying column names. Labeled tables resolve discrete column
//! identifiers by name, raw matrices by index.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TabError;

/// Identifies a column either by name (labeled tables) or index (matrices).
///
/// # Example
///
/// ```
/// use tabgan_core::ColumnId;
///
/// let by_name = ColumnId::from("age");
/// let by_index = ColumnId::from(2);
/// assert_eq!(by_name.to_string(), "age");
/// assert_eq!(by_index.to_string(), "2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnId {
    /// Column name in a labeled table.
    Name(String),
    /// Column position in a raw matrix. Signed so negative input is reported
    /// as invalid instead of wrapping.
    Index(i64),
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(idx) => write!(f, "{idx}"),
        }
    }
}

impl From<&str> for ColumnId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ColumnId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for ColumnId {
    fn from(idx: i64) -> Self {
        Self::Index(idx)
    }
}

impl From<i32> for ColumnId {
    fn from(idx: i32) -> Self {
        Self::Index(i64::from(idx))
    }
}

impl From<usize> for ColumnId {
    fn from(idx: usize) -> Self {
        Self::Index(idx as i64)
    }
}

/// Dense training table.
///
/// # Example
///
/// ```
/// use tabgan_core::Table;
///
/// let table = Table::labeled(
///     vec!["x".into(), "y".into()],
///     vec![1.0, 2.0, 3.0, 4.0],
/// ).unwrap();
/// assert_eq!(table.n_rows(), 2);
/// assert_eq!(table.row(1), &[3.0, 4.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Option<Vec<String>>,
    n_rows: usize,
    n_cols: usize,
    values: Vec<f32>,
}

impl Table {
    /// Creates a labeled table from column names and row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] if there are no columns or the
    /// value count is not a multiple of the column count.
    pub fn labeled(columns: Vec<String>, values: Vec<f32>) -> Result<Self, TabError> {
        let n_cols = columns.len();
        let n_rows = Self::check_shape(n_cols, values.len())?;
        Ok(Self {
            columns: Some(columns),
            n_rows,
            n_cols,
            values,
        })
    }

    /// Creates a raw matrix with `n_cols` columns from row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] on a zero-width or ragged shape.
    pub fn matrix(n_cols: usize, values: Vec<f32>) -> Result<Self, TabError> {
        let n_rows = Self::check_shape(n_cols, values.len())?;
        Ok(Self {
            columns: None,
            n_rows,
            n_cols,
            values,
        })
    }

    /// Creates a raw matrix from a list of equally sized rows.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] if the rows are empty or ragged.
    ///
    /// # Example
    ///
    /// ```
    /// use tabgan_core::Table;
    ///
    /// let table = Table::from_rows(&[vec![0.0, 1.0], vec![2.0, 3.0]]).unwrap();
    /// assert_eq!(table.n_cols(), 2);
    /// assert!(Table::from_rows(&[vec![0.0], vec![1.0, 2.0]]).is_err());
    /// ```
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, TabError> {
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err(TabError::UnsupportedTable {
                message: "rows have differing lengths".to_string(),
            });
        }
        Self::matrix(n_cols, rows.concat())
    }

    /// Parses a JSON value into a table.
    ///
    /// Recognized containers:
    /// - `[[1, 2], [3, 4]]`: raw matrix
    /// - `[{"a": 1, "b": 2}, ...]`: labeled records, columns in first-record key order
    /// - `{"columns": ["a", "b"], "data": [[1, 2], ...]}`: labeled table
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] for any other shape.
    ///
    /// # Example
    ///
    /// ```
    /// use tabgan_core::Table;
    ///
    /// let value = serde_json::json!({"columns": ["a"], "data": [[1.0], [2.0]]});
    /// let table = Table::from_json(&value).unwrap();
    /// assert!(table.is_labeled());
    /// assert!(Table::from_json(&serde_json::json!("nope")).is_err());
    /// ```
    pub fn from_json(value: &Value) -> Result<Self, TabError> {
        match value {
            Value::Array(items) if items.iter().all(Value::is_array) && !items.is_empty() => {
                let rows = items
                    .iter()
                    .map(numeric_row)
                    .collect::<Result<Vec<_>, _>>()?;
                Self::from_rows(&rows)
            }
            Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
                let columns: Vec<String> = match &items[0] {
                    Value::Object(first) => first.keys().cloned().collect(),
                    _ => Vec::new(),
                };
                let mut values = Vec::with_capacity(items.len() * columns.len());
                for item in items {
                    let record = item.as_object().ok_or_else(|| unsupported("record"))?;
                    if record.len() != columns.len() {
                        return Err(unsupported("records have differing keys"));
                    }
                    for column in &columns {
                        let v = record
                            .get(column)
                            .and_then(Value::as_f64)
                            .ok_or_else(|| unsupported("record field is missing or non-numeric"))?;
                        values.push(v as f32);
                    }
                }
                Self::labeled(columns, values)
            }
            Value::Object(map) => {
                let columns = map
                    .get("columns")
                    .and_then(Value::as_array)
                    .ok_or_else(|| unsupported("object without a `columns` array"))?
                    .iter()
                    .map(|c| c.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| unsupported("column names must be strings"))?;
                let data = map
                    .get("data")
                    .and_then(Value::as_array)
                    .ok_or_else(|| unsupported("object without a `data` array"))?;
                let mut values = Vec::with_capacity(data.len() * columns.len());
                for row in data {
                    let row = numeric_row(row)?;
                    if row.len() != columns.len() {
                        return Err(unsupported("data row width does not match columns"));
                    }
                    values.extend(row);
                }
                Self::labeled(columns, values)
            }
            other => Err(TabError::UnsupportedTable {
                message: format!("expected an array or a columns/data object, got {other}"),
            }),
        }
    }

    /// Returns `true` for tables with column names.
    pub fn is_labeled(&self) -> bool {
        self.columns.is_some()
    }

    /// Column names for labeled tables.
    pub fn column_names(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Row-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Returns row `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= n_rows`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.values[i * self.n_cols..(i + 1) * self.n_cols]
    }

    /// Copies column `j` out of the table.
    pub fn column(&self, j: usize) -> Vec<f32> {
        (0..self.n_rows).map(|i| self.values[i * self.n_cols + j]).collect()
    }

    /// Resolves a column identifier to a position.
    ///
    /// Names only resolve against labeled tables, indices only against raw
    /// matrices.
    pub fn resolve_column(&self, id: &ColumnId) -> Option<usize> {
        match (id, &self.columns) {
            (ColumnId::Name(name), Some(columns)) => columns.iter().position(|c| c == name),
            (ColumnId::Index(idx), None) => {
                usize::try_from(*idx).ok().filter(|&i| i < self.n_cols)
            }
            _ => None,
        }
    }

    fn check_shape(n_cols: usize, len: usize) -> Result<usize, TabError> {
        if n_cols == 0 {
            return Err(unsupported("table has no columns"));
        }
        if len % n_cols != 0 {
            return Err(TabError::UnsupportedTable {
                message: format!("{len} values do not fill rows of width {n_cols}"),
            });
        }
        Ok(len / n_cols)
    }
}

fn numeric_row(row: &Value) -> Result<Vec<f32>, TabError> {
    row.as_array()
        .ok_or_else(|| unsupported("row is not an array"))?
        .iter()
        .map(|v| v.as_f64().map(|x| x as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| unsupported("row contains a non-numeric value"))
}

fn unsupported(message: &str) -> TabError {
    TabError::UnsupportedTable {
        message: message.to_string(),
    }
}
