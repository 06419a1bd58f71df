//! Small helpers for mapping SQLite rows to domain values.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::StoreError;

/// Parse a TEXT column into an enum, mapping the error into [`StoreError`].
pub fn parse_column<T>(value: String, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse::<T>()
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}
