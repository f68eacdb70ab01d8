//! Decoding query rows into Rust values.

use tokio_postgres::Row;
use tokio_postgres::types::FromSqlOwned;

use crate::core::{DbError, Result};

/// Types that can be built from one result row.
///
/// Implemented for common scalars (read from the first column) and for
/// tuples of up to six columns.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}

fn column<T: FromSqlOwned>(row: &Row, index: usize) -> Result<T> {
    if index >= row.len() {
        return Err(DbError::Decode(format!(
            "column {index} out of range for row with {} columns",
            row.len()
        )));
    }
    Ok(row.try_get(index)?)
}

macro_rules! scalar_from_row {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &Row) -> Result<Self> {
                    column(row, 0)
                }
            }
        )*
    };
}

scalar_from_row!(bool, i16, i32, i64, f32, f64, String, Vec<u8>);

impl<T: FromSqlOwned> FromRow for Option<T> {
    fn from_row(row: &Row) -> Result<Self> {
        column(row, 0)
    }
}

macro_rules! tuple_from_row {
    ($($name:ident : $index:tt),+) => {
        impl<$($name: FromSqlOwned),+> FromRow for ($($name,)+) {
            fn from_row(row: &Row) -> Result<Self> {
                Ok(($(column::<$name>(row, $index)?,)+))
            }
        }
    };
}

tuple_from_row!(A: 0);
tuple_from_row!(A: 0, B: 1);
tuple_from_row!(A: 0, B: 1, C: 2);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// Decodes every row, stopping at the first failure.
pub fn decode_rows<T: FromRow>(rows: &[Row]) -> Result<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}
