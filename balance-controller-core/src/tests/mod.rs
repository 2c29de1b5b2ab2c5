#[cfg(feature = "log")]
use log::LevelFilter;
use nalgebra::{DMatrix, SMatrix};

use crate::matrix_literal::format_matrix;

pub mod plant;

pub fn init_logger() {
    #[cfg(feature = "log")]
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("balance_controller_core"), LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Formats a matrix as a literal that can be pasted back into `--state-weights`
/// style flags, for eyeballing failures.
pub fn to_literal<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> String {
    format_matrix(&DMatrix::from_column_slice(R, C, m.as_slice()))
}

#[test]
fn literal_keeps_row_major_layout() {
    let m = SMatrix::<f64, 2, 3>::new(1.0, 2.0, 3.0, 4.0, 5.5, -6.0);
    assert_eq!(to_literal(&m), "1 2 3; 4 5.5 -6");
}
