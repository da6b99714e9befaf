//! Owner of the observed FID, the optional water reference and the basis set.
//!
//! Orientation checks compare the detrended real spectrum of a signal with
//! that of its conjugate inside the metabolite region; the orientation with
//! more structure wins. Comparison is strict so a repaired signal is never
//! flipped back.

use crate::domain::{BasisSet, MrsError, MrsResult, PpmWindow, Signal, SpectralGeometry};
use crate::numerics::{detrend, fid_to_spec};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const ORIENTATION_DETREND_DEGREE: usize = 4;
const ORIENTATION_WINDOW: PpmWindow = PpmWindow {
    low: 0.2,
    high: 4.2,
};
const PHASE_REFERENCE_WINDOW: PpmWindow = PpmWindow {
    low: 2.8,
    high: 3.2,
};

/// Manual override of the conjugation heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConjugationMode {
    #[default]
    Auto,
    Force,
    Forbid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalBasisRepository {
    signal: Signal,
    water: Option<Signal>,
    basis: BasisSet,
}

impl SignalBasisRepository {
    pub fn new(signal: Signal, basis: BasisSet, water: Option<Signal>) -> MrsResult<Self> {
        if basis.points() != signal.len() {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_GEOMETRY",
                format!(
                    "basis functions have {} points but the FID has {}",
                    basis.points(),
                    signal.len()
                ),
            ));
        }
        if let Some(water) = &water {
            if (water.dwell_time() - signal.dwell_time()).abs() > signal.dwell_time() * 1.0e-6 {
                return Err(MrsError::input_validation(
                    "INPUT.WATER_GEOMETRY",
                    format!(
                        "water reference dwell time {} s differs from FID dwell time {} s",
                        water.dwell_time(),
                        signal.dwell_time()
                    ),
                ));
            }
        }

        Ok(Self {
            signal,
            water,
            basis,
        })
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn water(&self) -> Option<&Signal> {
        self.water.as_ref()
    }

    pub fn basis(&self) -> &BasisSet {
        &self.basis
    }

    pub fn geometry(&self) -> SpectralGeometry {
        self.signal.geometry()
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Signal, &mut BasisSet, Option<&mut Signal>) {
        (&mut self.signal, &mut self.basis, self.water.as_mut())
    }

    /// Swap in a basis set derived from the current one (e.g. with synthetic peaks appended).
    pub fn replace_basis(&mut self, basis: BasisSet) -> MrsResult<()> {
        if basis.points() != self.signal.len() {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_GEOMETRY",
                format!(
                    "basis functions have {} points but the FID has {}",
                    basis.points(),
                    self.signal.len()
                ),
            ));
        }
        self.basis = basis;
        Ok(())
    }

    /// Returns `true` when the FID looks conjugated. With `repair` the FID
    /// (and the water reference, acquired with the same receiver) is conjugated.
    pub fn check_signal_orientation(&mut self, repair: bool) -> MrsResult<bool> {
        let inverted = looks_conjugated(self.signal.fid(), &self.signal.geometry())?;
        if inverted {
            if repair {
                self.conjugate_signal();
            } else {
                tracing::warn!("FID may need conjugation; inspect the spectrum orientation");
            }
        }
        Ok(inverted)
    }

    /// Returns `true` when the summed basis looks conjugated; repairs in place on request.
    pub fn check_basis_orientation(&mut self, repair: bool) -> MrsResult<bool> {
        let inverted = looks_conjugated(&self.basis.summed_fid(), &self.signal.geometry())?;
        if inverted {
            if repair {
                self.basis.conjugate();
            } else {
                tracing::warn!("basis set may need conjugation; inspect the basis orientation");
            }
        }
        Ok(inverted)
    }

    /// Applies the manual override or the heuristic; returns whether the FID was conjugated.
    pub fn orient_signal(&mut self, mode: ConjugationMode) -> MrsResult<bool> {
        match mode {
            ConjugationMode::Force => {
                self.conjugate_signal();
                Ok(true)
            }
            ConjugationMode::Forbid => Ok(false),
            ConjugationMode::Auto => self.check_signal_orientation(true),
        }
    }

    pub fn orient_basis(&mut self, mode: ConjugationMode) -> MrsResult<bool> {
        match mode {
            ConjugationMode::Force => {
                self.basis.conjugate();
                Ok(true)
            }
            ConjugationMode::Forbid => Ok(false),
            ConjugationMode::Auto => self.check_basis_orientation(true),
        }
    }

    fn conjugate_signal(&mut self) {
        self.signal.conjugate();
        if let Some(water) = &mut self.water {
            water.conjugate();
        }
    }

    /// Retain only the named basis functions.
    pub fn keep(&mut self, names: &[String]) -> MrsResult<()> {
        self.ensure_known(names, "keep")?;
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        self.basis.retain_names(|name| wanted.contains(name));
        self.ensure_not_empty("keep")
    }

    /// Remove the named basis functions.
    pub fn ignore(&mut self, names: &[String]) -> MrsResult<()> {
        self.ensure_known(names, "ignore")?;
        let unwanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        self.basis.retain_names(|name| !unwanted.contains(name));
        self.ensure_not_empty("ignore")
    }

    /// Applies a single keep-or-ignore request; naming both lists is an error.
    pub fn select_basis(&mut self, keep: &[String], ignore: &[String]) -> MrsResult<()> {
        match (keep.is_empty(), ignore.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => self.keep(keep),
            (true, false) => self.ignore(ignore),
            (false, false) => Err(MrsError::input_validation(
                "INPUT.BASIS_FILTER",
                "keep and ignore lists are mutually exclusive",
            )),
        }
    }

    /// Zero-order phase so the largest peak in 2.8–3.2 ppm is real-positive.
    /// Returns the applied phase in radians.
    pub fn phase_correct(&mut self) -> MrsResult<f64> {
        let geometry = self.signal.geometry();
        let range = geometry.window_range(PHASE_REFERENCE_WINDOW)?;
        let spectrum = fid_to_spec(self.signal.fid());
        let peak = spectrum[range]
            .iter()
            .copied()
            .max_by(|a, b| a.norm().total_cmp(&b.norm()))
            .unwrap_or(Complex64::new(0.0, 0.0));
        if peak.norm() == 0.0 {
            return Ok(0.0);
        }
        let phase = -peak.arg();
        self.signal.rotate_phase(phase);
        Ok(phase)
    }

    fn ensure_known(&self, names: &[String], operation: &str) -> MrsResult<()> {
        if let Some(unknown) = names
            .iter()
            .find(|name| self.basis.index_of(name).is_none())
        {
            return Err(MrsError::input_validation(
                "INPUT.UNKNOWN_METABOLITE",
                format!("cannot {operation} '{unknown}': not a basis function name"),
            ));
        }
        Ok(())
    }

    fn ensure_not_empty(&self, operation: &str) -> MrsResult<()> {
        if self.basis.is_empty() {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_EMPTY",
                format!("{operation} removed every basis function"),
            ));
        }
        Ok(())
    }
}

/// Orientation heuristic shared by FID and basis checks.
pub fn looks_conjugated(fid: &[Complex64], geometry: &SpectralGeometry) -> MrsResult<bool> {
    let ppm = geometry.ppm_axis();
    let window = if geometry.ppm_shift > 0.0 {
        geometry.window_range(ORIENTATION_WINDOW)?
    } else {
        0..ppm.len()
    };

    let conjugated: Vec<Complex64> = fid.iter().map(Complex64::conj).collect();
    let original_power = detrended_power(&fid_to_spec(fid)[window.clone()])?;
    let conjugate_power = detrended_power(&fid_to_spec(&conjugated)[window])?;
    Ok(original_power < conjugate_power)
}

fn detrended_power(spectrum: &[Complex64]) -> MrsResult<f64> {
    let real: Vec<f64> = spectrum.iter().map(|value| value.re).collect();
    let residual = detrend(&real, ORIENTATION_DETREND_DEGREE).map_err(|error| {
        MrsError::input_validation("INPUT.ORIENTATION_WINDOW", error.to_string())
    })?;
    Ok(residual.iter().map(|value| value * value).sum::<f64>().sqrt())
}
