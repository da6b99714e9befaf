//! Amplitude normalisation ahead of fitting.
//!
//! The FID is scaled to a fixed L2 norm; the water reference follows the FID
//! factor so water and metabolite amplitudes stay comparable. Basis functions
//! share one factor (bringing the largest function to the target norm) except
//! those listed as independently scaled, which are normalised on their own.
//! A fitted amplitude `a_i` maps back to physical units as `a_i * f_i / f_fid`.

use super::repository::SignalBasisRepository;
use crate::common::constants::RESCALE_TARGET_NORM;
use crate::domain::{MrsError, MrsResult};
use crate::numerics::l2_norm;
use serde::Serialize;
use std::collections::BTreeSet;

/// Multiplicative factors applied to the data, kept for inverting fitted amplitudes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingRecord {
    pub fid: f64,
    pub water: Option<f64>,
    pub basis: Vec<f64>,
}

impl ScalingRecord {
    pub fn identity(basis_count: usize, has_water: bool) -> Self {
        Self {
            fid: 1.0,
            water: has_water.then_some(1.0),
            basis: vec![1.0; basis_count],
        }
    }

    /// Register functions appended after rescaling; they live in scaled units already.
    pub fn extend_unscaled(&mut self, count: usize) {
        self.basis.extend(std::iter::repeat_n(1.0, count));
    }

    /// Fitted amplitude of basis function `index` expressed against the unscaled data.
    pub fn physical_amplitude(&self, index: usize, amplitude: f64) -> f64 {
        amplitude * self.basis_factor(index) / self.fid
    }

    pub fn physical_amplitudes(&self, amplitudes: &[f64]) -> Vec<f64> {
        amplitudes
            .iter()
            .enumerate()
            .map(|(index, amplitude)| self.physical_amplitude(index, *amplitude))
            .collect()
    }

    /// Undo the water factor on a quantity measured from the scaled water FID.
    pub fn physical_water(&self, value: f64) -> f64 {
        value / self.water.unwrap_or(1.0)
    }

    /// Undo the basis factor on a quantity measured from scaled basis function `index`.
    pub fn physical_basis(&self, index: usize, value: f64) -> f64 {
        value / self.basis_factor(index)
    }

    fn basis_factor(&self, index: usize) -> f64 {
        self.basis.get(index).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescaler {
    target_norm: f64,
}

impl Default for Rescaler {
    fn default() -> Self {
        Self {
            target_norm: RESCALE_TARGET_NORM,
        }
    }
}

impl Rescaler {
    pub fn rescale(
        &self,
        repository: &mut SignalBasisRepository,
        independent: &BTreeSet<String>,
    ) -> MrsResult<ScalingRecord> {
        if let Some(unknown) = independent
            .iter()
            .find(|name| repository.basis().index_of(name).is_none())
        {
            return Err(MrsError::input_validation(
                "INPUT.UNKNOWN_METABOLITE",
                format!("cannot scale '{unknown}' independently: not a basis function name"),
            ));
        }

        let (signal, basis, water) = repository.parts_mut();

        let fid_norm = l2_norm(signal.fid());
        if !(fid_norm.is_finite() && fid_norm > 0.0) {
            return Err(MrsError::input_validation(
                "INPUT.SIGNAL_DEGENERATE",
                "FID has zero norm; the rescale factor is undefined",
            ));
        }
        let fid_factor = self.target_norm / fid_norm;
        signal.scale(fid_factor);

        let water_factor = water.map(|water| {
            water.scale(fid_factor);
            fid_factor
        });

        let norms: Vec<f64> = basis.fids().iter().map(|fid| l2_norm(fid)).collect();
        let shared_norm = basis
            .names()
            .iter()
            .zip(&norms)
            .filter(|(name, _)| !independent.contains(*name))
            .map(|(_, norm)| *norm)
            .fold(0.0_f64, f64::max);

        let mut factors = Vec::with_capacity(norms.len());
        for (index, norm) in norms.iter().enumerate() {
            let reference = if independent.contains(&basis.names()[index]) {
                *norm
            } else {
                shared_norm
            };
            let factor = if reference > 0.0 {
                self.target_norm / reference
            } else {
                tracing::warn!(
                    basis = %basis.names()[index],
                    "basis function has zero norm; leaving it unscaled"
                );
                1.0
            };
            basis.scale_function(index, factor);
            factors.push(factor);
        }

        tracing::debug!(fid_factor, ?factors, "rescaled data for fitting");
        Ok(ScalingRecord {
            fid: fid_factor,
            water: water_factor,
            basis: factors,
        })
    }
}
