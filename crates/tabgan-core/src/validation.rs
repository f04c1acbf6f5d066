//! Pre-fit validation of discrete column identifiers.

use crate::error::TabError;
use crate::table::{ColumnId, Table};

/// Checks that every discrete column identifier exists in `table`.
///
/// Labeled tables are checked by name, raw matrices by `0 <= idx < cols`.
///
/// # Errors
///
/// Returns [`TabError::InvalidColumns`] listing every offending identifier,
/// in the order given.
///
/// # Example
///
/// ```
/// use tabgan_core::{validate_discrete_columns, ColumnId, Table, TabError};
///
/// let table = Table::matrix(3, vec![0.0; 6]).unwrap();
/// assert!(validate_discrete_columns(&table, &[ColumnId::Index(2)]).is_ok());
///
/// let err = validate_discrete_columns(&table, &[ColumnId::Index(0), ColumnId::Index(3)]);
/// assert_eq!(err, Err(TabError::InvalidColumns { columns: vec!["3".into()] }));
/// ```
pub fn validate_discrete_columns(table: &Table, discrete: &[ColumnId]) -> Result<(), TabError> {
    let invalid: Vec<String> = discrete
        .iter()
        .filter(|id| table.resolve_column(id).is_none())
        .map(ToString::to_string)
        .collect();

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(TabError::InvalidColumns { columns: invalid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled() -> Table {
        Table::labeled(
            vec!["age".into(), "city".into(), "income".into()],
            vec![0.0; 9],
        )
        .unwrap()
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(validate_discrete_columns(&labeled(), &[]).is_ok());
    }

    #[test]
    fn names_validated_against_labels() {
        assert!(validate_discrete_columns(&labeled(), &["city".into()]).is_ok());

        let err = validate_discrete_columns(&labeled(), &["city".into(), "zip".into()]).unwrap_err();
        assert_eq!(err, TabError::InvalidColumns { columns: vec!["zip".into()] });
    }

    #[test]
    fn every_offender_is_reported() {
        let table = Table::matrix(2, vec![0.0; 4]).unwrap();
        let err = validate_discrete_columns(
            &table,
            &[ColumnId::Index(-1), ColumnId::Index(1), ColumnId::Index(5), "a".into()],
        )
        .unwrap_err();
        assert_eq!(
            err,
            TabError::InvalidColumns {
                columns: vec!["-1".into(), "5".into(), "a".into()]
            }
        );
    }
}
