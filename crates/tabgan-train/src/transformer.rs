//! Table encoding for conditional training.
//!
//! Discrete columns become one-hot `Softmax` spans over their sorted distinct
//! values. Continuous columns become a single `Tanh` span holding the value
//! min-max scaled to `[-1, 1]`.

use std::cmp::Ordering;

use tabgan_core::{ActivationFn, ColumnId, ColumnInfo, SpanInfo, TabError, Table};

/// Location of a conditioning category in the encoded space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionInfo {
    /// Position among the discrete columns.
    pub discrete_column_id: usize,
    /// Position in the source table.
    pub column_id: usize,
    /// Category index within the column.
    pub value_id: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum ColumnTransform {
    Continuous { min: f32, max: f32 },
    Discrete { categories: Vec<f32> },
}

impl ColumnTransform {
    fn width(&self) -> usize {
        match self {
            Self::Continuous { .. } => 1,
            Self::Discrete { categories } => categories.len(),
        }
    }

    fn category_index(categories: &[f32], value: f32) -> Option<usize> {
        categories.binary_search_by(|c| c.total_cmp(&value)).ok()
    }
}

/// Fitted encoder between source tables and the generator's feature space.
///
/// # Example
///
/// ```
/// use tabgan_core::{ColumnId, Table};
/// use tabgan_train::transformer::TableTransformer;
///
/// let table = Table::labeled(vec!["x".into(), "k".into()], vec![0.0, 1.0, 10.0, 2.0]).unwrap();
/// let tf = TableTransformer::fit(&table, &[ColumnId::from("k")]).unwrap();
/// assert_eq!(tf.output_dim(), 1 + 2);
/// let encoded = tf.transform(&table).unwrap();
/// assert_eq!(encoded.row(0), &[-1.0, 1.0, 0.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TableTransformer {
    columns: Vec<ColumnTransform>,
    column_names: Option<Vec<String>>,
    output_info: Vec<ColumnInfo>,
}

impl TableTransformer {
    /// Learns per-column encodings from `table`.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidColumns`] if a discrete identifier does not
    /// resolve, or [`TabError::UnsupportedTable`] for an empty table.
    pub fn fit(table: &Table, discrete_columns: &[ColumnId]) -> Result<Self, TabError> {
        tabgan_core::validate_discrete_columns(table, discrete_columns)?;
        if table.n_rows() == 0 {
            return Err(TabError::UnsupportedTable {
                message: "cannot fit an encoder on an empty table".to_string(),
            });
        }
        let discrete: Vec<usize> = discrete_columns
            .iter()
            .filter_map(|id| table.resolve_column(id))
            .collect();

        let mut columns = Vec::with_capacity(table.n_cols());
        let mut output_info = Vec::with_capacity(table.n_cols());
        for j in 0..table.n_cols() {
            let values = table.column(j);
            let transform = if discrete.contains(&j) {
                let mut categories = values;
                categories.sort_by(f32::total_cmp);
                categories.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
                output_info.push(vec![SpanInfo::new(categories.len(), ActivationFn::Softmax)]);
                ColumnTransform::Discrete { categories }
            } else {
                let min = values.iter().copied().fold(f32::INFINITY, f32::min);
                let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                output_info.push(vec![SpanInfo::new(1, ActivationFn::Tanh)]);
                ColumnTransform::Continuous { min, max }
            };
            columns.push(transform);
        }

        Ok(Self {
            columns,
            column_names: table.column_names().map(<[String]>::to_vec),
            output_info,
        })
    }

    /// Encodes `table` into the feature space.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] if the width differs from the
    /// fitted table, or [`TabError::UnknownCategory`] for an unseen
    /// discrete value.
    pub fn transform(&self, table: &Table) -> Result<Table, TabError> {
        if table.n_cols() != self.columns.len() {
            return Err(TabError::UnsupportedTable {
                message: format!(
                    "encoder fitted on {} columns, table has {}",
                    self.columns.len(),
                    table.n_cols()
                ),
            });
        }
        let width = self.output_dim();
        let mut out = Vec::with_capacity(table.n_rows() * width);
        for i in 0..table.n_rows() {
            for (j, (transform, &value)) in self.columns.iter().zip(table.row(i)).enumerate() {
                match transform {
                    ColumnTransform::Continuous { min, max } => {
                        let range = max - min;
                        let scaled = if range > 0.0 { 2.0 * (value - min) / range - 1.0 } else { 0.0 };
                        out.push(scaled);
                    }
                    ColumnTransform::Discrete { categories } => {
                        let k = ColumnTransform::category_index(categories, value).ok_or_else(|| {
                            TabError::UnknownCategory {
                                message: format!("value {value} not seen in column {j}"),
                            }
                        })?;
                        out.extend((0..categories.len()).map(|c| if c == k { 1.0 } else { 0.0 }));
                    }
                }
            }
        }
        Table::matrix(width, out)
    }

    /// Decodes rows of the feature space back into source columns.
    ///
    /// Continuous values are clamped to `[-1, 1]` before rescaling; discrete
    /// spans decode to their arg-max category. The result carries the fitted
    /// column names when the source table was labeled.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] if `values` is not a whole number
    /// of encoded rows.
    pub fn inverse_transform(&self, values: &[f32]) -> Result<Table, TabError> {
        let width = self.output_dim();
        if width == 0 || values.len() % width != 0 {
            return Err(TabError::UnsupportedTable {
                message: format!("{} values do not fill encoded rows of width {width}", values.len()),
            });
        }
        let mut out = Vec::with_capacity(values.len() / width * self.columns.len());
        for row in values.chunks(width) {
            let mut st = 0;
            for transform in &self.columns {
                let span = &row[st..st + transform.width()];
                let decoded = match transform {
                    ColumnTransform::Continuous { min, max } => {
                        let x = span[0].clamp(-1.0, 1.0);
                        min + (x + 1.0) / 2.0 * (max - min)
                    }
                    ColumnTransform::Discrete { categories } => {
                        let k = span
                            .iter()
                            .enumerate()
                            .max_by(|a, b| a.1.total_cmp(b.1))
                            .map_or(0, |(k, _)| k);
                        categories[k]
                    }
                };
                out.push(decoded);
                st += transform.width();
            }
        }
        match &self.column_names {
            Some(names) => Table::labeled(names.clone(), out),
            None => Table::matrix(self.columns.len(), out),
        }
    }

    /// Span layout of the encoded space.
    pub fn output_info(&self) -> &[ColumnInfo] {
        &self.output_info
    }

    /// Width of the encoded space.
    pub fn output_dim(&self) -> usize {
        tabgan_core::output_dim(&self.output_info)
    }

    /// Locates the category `value` of discrete `column`.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnknownCategory`] if the column is unknown, not
    /// discrete, or never took `value`.
    pub fn convert_column_name_value_to_id(
        &self,
        column: &ColumnId,
        value: f32,
    ) -> Result<ConditionInfo, TabError> {
        let column_id = self.resolve(column).ok_or_else(|| TabError::UnknownCategory {
            message: format!("no column {column}"),
        })?;

        let mut discrete_column_id = 0;
        for (j, transform) in self.columns.iter().enumerate() {
            if let ColumnTransform::Discrete { categories } = transform {
                if j == column_id {
                    let value_id = ColumnTransform::category_index(categories, value)
                        .ok_or_else(|| TabError::UnknownCategory {
                            message: format!("value {value} not found in column {column}"),
                        })?;
                    return Ok(ConditionInfo {
                        discrete_column_id,
                        column_id,
                        value_id,
                    });
                }
                discrete_column_id += 1;
            }
        }
        Err(TabError::UnknownCategory {
            message: format!("column {column} is not discrete"),
        })
    }

    fn resolve(&self, column: &ColumnId) -> Option<usize> {
        match (column, &self.column_names) {
            (ColumnId::Name(name), Some(names)) => names.iter().position(|n| n == name),
            (ColumnId::Index(idx), None) => {
                usize::try_from(*idx).ok().filter(|&i| i < self.columns.len())
            }
            _ => None,
        }
    }
}
