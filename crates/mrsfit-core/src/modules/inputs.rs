//! Loaders for the JSON FID format and FSL-style basis directories.

use crate::domain::{BasisSet, MrsError, MrsResult, Nucleus, Signal, SpectralGeometry};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Relative tolerance under which basis and FID dwell times count as equal.
const DWELL_TOLERANCE: f64 = 1.0e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FidFile {
    pub dwelltime: f64,
    pub spectrometer_frequency: f64,
    #[serde(default)]
    pub nucleus: Option<String>,
    pub fid_re: Vec<f64>,
    pub fid_im: Vec<f64>,
}

impl FidFile {
    #[cfg(test)]
    pub(crate) fn from_signal(signal: &Signal) -> Self {
        Self {
            dwelltime: signal.dwell_time(),
            spectrometer_frequency: signal.spectrometer_frequency(),
            nucleus: Some(signal.nucleus().to_string()),
            fid_re: signal.fid().iter().map(|value| value.re).collect(),
            fid_im: signal.fid().iter().map(|value| value.im).collect(),
        }
    }

    pub fn into_signal(self) -> MrsResult<Signal> {
        if self.fid_re.len() != self.fid_im.len() {
            return Err(MrsError::input_validation(
                "INPUT.FID_FORMAT",
                format!(
                    "fid_re has {} points but fid_im has {}",
                    self.fid_re.len(),
                    self.fid_im.len()
                ),
            ));
        }
        let fid = complex_samples(&self.fid_re, &self.fid_im);
        let nucleus = self.nucleus.map_or_else(Nucleus::proton, Nucleus::new);
        Signal::new(fid, self.dwelltime, self.spectrometer_frequency, nucleus)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisFile {
    pub basis: Option<BasisRecord>,
    #[serde(default)]
    pub meta: BasisMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisRecord {
    pub basis_re: Vec<f64>,
    pub basis_im: Vec<f64>,
    pub basis_dwell: f64,
    #[serde(default)]
    pub basis_centre: Option<f64>,
    #[serde(default)]
    pub basis_width: Option<f64>,
    #[serde(default)]
    pub basis_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasisMeta {
    #[serde(rename = "TE", default)]
    pub echo_time: Option<f64>,
}

pub fn load_fid(path: &Path) -> MrsResult<Signal> {
    let file: FidFile = read_json(path, "INPUT.FID_FORMAT")?;
    file.into_signal().map_err(|error| {
        MrsError::new(
            error.category(),
            error.placeholder(),
            format!("{}: {}", path.display(), error.message()),
        )
    })
}

/// Read every `*.json` basis file under `directory`, sorted by file name,
/// conjugated and resampled onto `geometry`.
///
/// The echo time comes from the first file whose header carries `meta.TE`
/// (milliseconds when larger than 1, seconds otherwise).
pub fn load_basis_dir(directory: &Path, geometry: &SpectralGeometry) -> MrsResult<BasisSet> {
    let files = basis_files(directory)?;
    if files.is_empty() {
        return Err(MrsError::input_validation(
            "INPUT.BASIS_EMPTY",
            format!("no basis .json files found in '{}'", directory.display()),
        ));
    }

    let mut names = Vec::with_capacity(files.len());
    let mut fids = Vec::with_capacity(files.len());
    let mut echo_time = None;
    for path in &files {
        let file: BasisFile = read_json(path, "INPUT.BASIS_FORMAT")?;
        let Some(record) = file.basis else {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_FORMAT",
                format!("'{}' has no 'basis' field", path.display()),
            ));
        };
        if record.basis_re.len() != record.basis_im.len() {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_FORMAT",
                format!("'{}' has mismatched real/imaginary lengths", path.display()),
            ));
        }
        if !(record.basis_dwell.is_finite() && record.basis_dwell > 0.0) {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_FORMAT",
                format!(
                    "'{}' has invalid basis_dwell {}",
                    path.display(),
                    record.basis_dwell
                ),
            ));
        }

        let name = record.basis_name.clone().unwrap_or_else(|| file_stem(path));
        let samples: Vec<Complex64> = complex_samples(&record.basis_re, &record.basis_im)
            .into_iter()
            .map(|value| value.conj())
            .collect();
        debug!(name = %name, points = samples.len(), dwell = record.basis_dwell, "basis function");
        fids.push(resample(&samples, record.basis_dwell, geometry));
        names.push(name);
        if echo_time.is_none() {
            echo_time = file.meta.echo_time.map(echo_time_seconds);
        }
    }

    Ok(BasisSet::new(names, fids)?.with_echo_time(echo_time))
}

/// Header echo times above 1 are milliseconds.
pub fn echo_time_seconds(value: f64) -> f64 {
    if value > 1.0 { value / 1000.0 } else { value }
}

/// Linear interpolation onto the FID time axis; truncated or zero-filled to its length.
pub fn resample(samples: &[Complex64], dwell: f64, geometry: &SpectralGeometry) -> Vec<Complex64> {
    let zero = Complex64::new(0.0, 0.0);
    if ((dwell - geometry.dwell_time) / geometry.dwell_time).abs() <= DWELL_TOLERANCE {
        return (0..geometry.points)
            .map(|index| samples.get(index).copied().unwrap_or(zero))
            .collect();
    }

    (0..geometry.points)
        .map(|index| {
            let position = index as f64 * geometry.dwell_time / dwell;
            let lower = position.floor() as usize;
            let weight = position - lower as f64;
            match (samples.get(lower), samples.get(lower + 1)) {
                (Some(a), Some(b)) => *a * (1.0 - weight) + *b * weight,
                (Some(a), None) if weight == 0.0 => *a,
                _ => zero,
            }
        })
        .collect()
}

fn basis_files(directory: &Path) -> MrsResult<Vec<PathBuf>> {
    let entries = fs::read_dir(directory).map_err(|error| {
        MrsError::io_system(
            "IO.INPUT_READ",
            format!("failed to read basis directory '{}': {error}", directory.display()),
        )
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|error| {
                MrsError::io_system(
                    "IO.INPUT_READ",
                    format!("failed to list '{}': {error}", directory.display()),
                )
            })?
            .path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, placeholder: &'static str) -> MrsResult<T> {
    let content = fs::read_to_string(path).map_err(|error| {
        MrsError::io_system(
            "IO.INPUT_READ",
            format!("failed to read '{}': {error}", path.display()),
        )
    })?;
    serde_json::from_str(&content).map_err(|error| {
        MrsError::input_validation(placeholder, format!("{}: {error}", path.display()))
    })
}

fn complex_samples(real: &[f64], imaginary: &[f64]) -> Vec<Complex64> {
    real.iter()
        .zip(imaginary)
        .map(|(re, im)| Complex64::new(*re, *im))
        .collect()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
