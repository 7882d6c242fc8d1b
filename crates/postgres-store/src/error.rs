use domain::StoreError;
use thiserror::Error;

/// A stored value could not be turned back into a domain value.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid {column} value: {value}")]
    InvalidValue { column: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub(crate) fn db(err: sqlx::Error) -> StoreError {
    StoreError::backend(err)
}

pub(crate) fn decode(err: DecodeError) -> StoreError {
    StoreError::backend(err)
}

/// Converts a count to an `INTEGER` column value.
pub(crate) fn to_i32(column: &'static str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| {
        decode(DecodeError::InvalidValue {
            column,
            value: value.to_string(),
        })
    })
}

/// Reads a non-negative `INTEGER` column value.
pub(crate) fn to_u32(column: &'static str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| {
        decode(DecodeError::InvalidValue {
            column,
            value: value.to_string(),
        })
    })
}

/// True if the error is a violation of the named constraint.
pub(crate) fn is_constraint(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}
