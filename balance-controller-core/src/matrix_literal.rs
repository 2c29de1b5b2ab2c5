use core::fmt::{Display, Write};
use core::str::FromStr;

use nalgebra::{DMatrix, SMatrix};

use crate::error::ConfigurationError;

/// Dense matrix written as `;`-separated rows of whitespace-separated entries,
/// e.g. `"0 1 0 0; 1 0 0 1"`. Surrounding brackets are accepted on input.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixLiteral(pub DMatrix<f64>);

impl MatrixLiteral {
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.0
    }

    /// Converts to a fixed-size matrix, failing if the literal has the wrong shape.
    pub fn to_fixed<const R: usize, const C: usize>(
        &self,
        name: &'static str,
    ) -> Result<SMatrix<f64, R, C>, ConfigurationError> {
        if self.0.nrows() != R || self.0.ncols() != C {
            return Err(ConfigurationError::DimensionMismatch {
                name,
                expected_rows: R,
                expected_cols: C,
                rows: self.0.nrows(),
                cols: self.0.ncols(),
            });
        }
        Ok(SMatrix::<f64, R, C>::from_fn(|r, c| self.0[(r, c)]))
    }
}

impl FromStr for MatrixLiteral {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_matrix(s).map(MatrixLiteral)
    }
}

impl Display for MatrixLiteral {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&format_matrix(&self.0))
    }
}

pub fn parse_matrix(literal: &str) -> Result<DMatrix<f64>, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidMatrixLiteral {
        literal: literal.to_string(),
        reason,
    };

    let mut body = literal.trim();
    if let Some(stripped) = body.strip_prefix('[') {
        body = stripped
            .strip_suffix(']')
            .ok_or_else(|| invalid("unbalanced brackets".into()))?
            .trim();
    }

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (row_index, row) in body.split(';').enumerate() {
        let entries = row
            .split_whitespace()
            .map(|entry| match entry.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                Ok(_) => Err(invalid(format!("entry {entry:?} is not finite"))),
                Err(_) => Err(invalid(format!("entry {entry:?} is not a number"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if entries.is_empty() {
            return Err(invalid(format!("row {row_index} is empty")));
        }
        if let Some(first) = rows.first() {
            if first.len() != entries.len() {
                return Err(invalid(format!(
                    "row {row_index} has {} entries, expected {}",
                    entries.len(),
                    first.len()
                )));
            }
        }
        rows.push(entries);
    }

    let ncols = rows[0].len();
    Ok(DMatrix::from_fn(rows.len(), ncols, |r, c| rows[r][c]))
}

/// Inverse of [`parse_matrix`]. `f64`'s `Display` prints the shortest
/// representation that parses back to the same value.
pub fn format_matrix(m: &DMatrix<f64>) -> String {
    let mut s = String::with_capacity(m.nrows() * m.ncols() * 8);

    for r in 0..m.nrows() {
        for c in 0..m.ncols() {
            // infallible for String
            let _ = write!(&mut s, "{}", m[(r, c)]);
            if c + 1 < m.ncols() {
                s.push(' ');
            }
        }
        if r + 1 < m.nrows() {
            s.push_str("; ");
        }
    }

    s
}
