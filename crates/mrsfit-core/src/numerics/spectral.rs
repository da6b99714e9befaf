//! Time/frequency transforms and spectral axes.
//!
//! Spectra are `fftshift(FFT(fid'))/sqrt(N)` where `fid'` is the FID with its
//! first point halved, so the zero-frequency bin sits at index `N/2` and the
//! ppm axis increases with the index.

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpectralError {
    #[error("spectral window ({low}, {high}) ppm selects no points on the ppm axis")]
    EmptyWindow { low: f64, high: f64 },
    #[error("spectral window bounds must be finite with low < high, got ({low}, {high})")]
    InvalidWindow { low: f64, high: f64 },
    #[error("polynomial helpers need at least {required} points, got {actual}")]
    InsufficientPoints { required: usize, actual: usize },
}

/// Cached forward/inverse plans for one transform length.
#[derive(Clone)]
pub struct SpectralTransform {
    points: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("points", &self.points)
            .finish()
    }
}

impl SpectralTransform {
    pub fn new(points: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            points,
            forward: planner.plan_fft_forward(points),
            inverse: planner.plan_fft_inverse(points),
        }
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn fid_to_spec(&self, fid: &[Complex64]) -> Vec<Complex64> {
        let mut buffer = fid.to_vec();
        self.fid_to_spec_in_place(&mut buffer);
        buffer
    }

    pub fn fid_to_spec_in_place(&self, buffer: &mut [Complex64]) {
        let n = buffer.len();
        if n == 0 {
            return;
        }
        buffer[0] *= 0.5;
        self.forward.process(buffer);
        let norm = 1.0 / (n as f64).sqrt();
        for value in buffer.iter_mut() {
            *value *= norm;
        }
        buffer.rotate_right(n / 2);
    }

    pub fn spec_to_fid(&self, spectrum: &[Complex64]) -> Vec<Complex64> {
        let n = spectrum.len();
        let mut buffer = spectrum.to_vec();
        if n == 0 {
            return buffer;
        }
        buffer.rotate_left(n / 2);
        self.inverse.process(&mut buffer);
        let norm = 1.0 / (n as f64).sqrt();
        for value in buffer.iter_mut() {
            *value *= norm;
        }
        buffer[0] *= 2.0;
        buffer
    }
}

pub fn fid_to_spec(fid: &[Complex64]) -> Vec<Complex64> {
    SpectralTransform::new(fid.len()).fid_to_spec(fid)
}

pub fn spec_to_fid(spectrum: &[Complex64]) -> Vec<Complex64> {
    SpectralTransform::new(spectrum.len()).spec_to_fid(spectrum)
}

pub fn time_axis(points: usize, dwell_time: f64) -> Vec<f64> {
    (0..points).map(|index| index as f64 * dwell_time).collect()
}

pub fn frequency_axis(points: usize, dwell_time: f64) -> Vec<f64> {
    let half = (points / 2) as f64;
    let resolution = 1.0 / (points as f64 * dwell_time);
    (0..points)
        .map(|index| (index as f64 - half) * resolution)
        .collect()
}

pub fn ppm_axis(points: usize, dwell_time: f64, spectrometer_mhz: f64, shift: f64) -> Vec<f64> {
    frequency_axis(points, dwell_time)
        .into_iter()
        .map(|hz| hz / spectrometer_mhz + shift)
        .collect()
}

/// Index range of an increasing ppm axis that lies inside `[low, high]`.
pub fn ppm_range(ppm: &[f64], low: f64, high: f64) -> Result<Range<usize>, SpectralError> {
    if !(low.is_finite() && high.is_finite() && low < high) {
        return Err(SpectralError::InvalidWindow { low, high });
    }
    let first = ppm.partition_point(|value| *value < low);
    let last = ppm.partition_point(|value| *value <= high);
    if last <= first {
        return Err(SpectralError::EmptyWindow { low, high });
    }
    Ok(first..last)
}

/// Convert a ppm offset into an angular frequency (rad/s).
pub fn ppm_to_angular(ppm: f64, spectrometer_mhz: f64) -> f64 {
    2.0 * PI * ppm * spectrometer_mhz
}

/// Trapezoidal integral with unit spacing.
pub fn trapz(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let interior: f64 = values[1..values.len() - 1].iter().sum();
    interior + 0.5 * (values[0] + values[values.len() - 1])
}

/// Orthonormal polynomial regressors of order `0..=order` on `linspace(-1, 1, points)`.
pub fn orthonormal_polynomials(points: usize, order: usize) -> Result<Vec<Vec<f64>>, SpectralError> {
    if points <= order {
        return Err(SpectralError::InsufficientPoints {
            required: order + 1,
            actual: points,
        });
    }

    let x: Vec<f64> = if points == 1 {
        vec![0.0]
    } else {
        (0..points)
            .map(|index| -1.0 + 2.0 * index as f64 / (points - 1) as f64)
            .collect()
    };

    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(order + 1);
    for degree in 0..=order {
        let mut column: Vec<f64> = x.iter().map(|value| value.powi(degree as i32)).collect();
        // two passes of modified Gram-Schmidt
        for _ in 0..2 {
            for previous in &basis {
                let projection: f64 = column.iter().zip(previous).map(|(a, b)| a * b).sum();
                for (value, reference) in column.iter_mut().zip(previous) {
                    *value -= projection * reference;
                }
            }
        }
        let norm = column.iter().map(|value| value * value).sum::<f64>().sqrt();
        if norm <= f64::EPSILON {
            return Err(SpectralError::InsufficientPoints {
                required: order + 1,
                actual: points,
            });
        }
        column.iter_mut().for_each(|value| *value /= norm);
        basis.push(column);
    }

    Ok(basis)
}

/// Remove the least-squares polynomial trend of the given degree.
pub fn detrend(values: &[f64], degree: usize) -> Result<Vec<f64>, SpectralError> {
    let polynomials = orthonormal_polynomials(values.len(), degree)?;
    let mut residual = values.to_vec();
    for polynomial in &polynomials {
        let projection: f64 = residual.iter().zip(polynomial).map(|(a, b)| a * b).sum();
        for (value, reference) in residual.iter_mut().zip(polynomial) {
            *value -= projection * reference;
        }
    }
    Ok(residual)
}

pub fn l2_norm(values: &[Complex64]) -> f64 {
    values.iter().map(Complex64::norm_sqr).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::{
        detrend, fid_to_spec, frequency_axis, orthonormal_polynomials, ppm_axis, ppm_range,
        spec_to_fid, trapz, SpectralError,
    };
    use num_complex::Complex64;
    use std::f64::consts::PI;

    #[test]
    fn transform_round_trip_restores_fid() {
        let fid: Vec<Complex64> = (0..64)
            .map(|n| Complex64::new((n as f64 * 0.3).cos(), (n as f64 * 0.7).sin()))
            .collect();
        let restored = spec_to_fid(&fid_to_spec(&fid));
        for (expected, actual) in fid.iter().zip(&restored) {
            assert!((expected - actual).norm() <= 1.0e-12);
        }
    }

    #[test]
    fn positive_frequency_peak_lands_on_matching_axis_bin() {
        let points = 128;
        let dwell = 1.0e-3;
        let axis = frequency_axis(points, dwell);
        let target_bin = 80;
        let hz = axis[target_bin];
        let fid: Vec<Complex64> = (0..points)
            .map(|n| Complex64::from_polar(1.0, 2.0 * PI * hz * n as f64 * dwell))
            .collect();

        let spectrum = fid_to_spec(&fid);
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(index, _)| index)
            .expect("non-empty spectrum");
        assert_eq!(peak, target_bin);
    }

    #[test]
    fn ppm_range_selects_closed_interval_and_rejects_empty_windows() {
        let ppm = ppm_axis(256, 1.0 / 4000.0, 123.2, 4.65);
        let range = ppm_range(&ppm, 0.2, 4.2).expect("window");
        assert!(ppm[range.start] >= 0.2);
        assert!(ppm[range.end - 1] <= 4.2);
        assert!(ppm[range.start - 1] < 0.2);

        assert!(matches!(
            ppm_range(&ppm, 100.0, 101.0),
            Err(SpectralError::EmptyWindow { .. })
        ));
        assert!(matches!(
            ppm_range(&ppm, 3.0, 1.0),
            Err(SpectralError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn detrend_removes_polynomial_content() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 / 49.0).collect();
        let y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x - 3.0 * x * x).collect();
        let residual = detrend(&y, 2).expect("detrend");
        assert!(residual.iter().all(|value| value.abs() <= 1.0e-10));
    }

    #[test]
    fn polynomials_are_orthonormal() {
        let basis = orthonormal_polynomials(40, 3).expect("basis");
        for (i, a) in basis.iter().enumerate() {
            for (j, b) in basis.iter().enumerate() {
                let product: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product - expected).abs() <= 1.0e-10);
            }
        }
    }

    #[test]
    fn trapz_integrates_linear_ramp() {
        assert!((trapz(&[0.0, 1.0, 2.0, 3.0]) - 4.5).abs() <= 1.0e-12);
        assert_eq!(trapz(&[5.0]), 0.0);
    }
}
