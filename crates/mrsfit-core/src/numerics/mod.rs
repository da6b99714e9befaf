pub mod linalg;
pub mod spectral;

pub use linalg::{
    DenseMatrix, LuDecomposition, LuError, add_relative_ridge, dot, gram_matrix, lu_factorize,
    lu_invert, lu_solve, solve_least_squares,
};
pub use spectral::{
    SpectralError, SpectralTransform, detrend, fid_to_spec, frequency_axis, l2_norm,
    orthonormal_polynomials, ppm_axis, ppm_range, ppm_to_angular, spec_to_fid, time_axis, trapz,
};

/// Mean and (sample) standard deviation; `None` when `values` is empty.
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    if values.len() < 2 {
        return Some((mean, 0.0));
    }
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (count - 1.0);
    Some((mean, variance.sqrt()))
}
