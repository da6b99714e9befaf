pub mod errors;

pub use errors::{MrsError, MrsErrorCategory, MrsResult};

use crate::common::constants::H1_PPM_SHIFT;
use crate::numerics::{SpectralError, fid_to_spec, frequency_axis, ppm_axis, ppm_range, time_axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nucleus(String);

impl Nucleus {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn proton() -> Self {
        Self::new("1H")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_proton(&self) -> bool {
        self.0.eq_ignore_ascii_case("1H")
    }

    /// Receiver reference shift applied when building the ppm axis.
    pub fn ppm_shift(&self) -> f64 {
        if self.is_proton() { H1_PPM_SHIFT } else { 0.0 }
    }

    /// Fit window used when none is requested.
    pub fn default_window(&self) -> Option<PpmWindow> {
        self.is_proton().then_some(PpmWindow {
            low: 0.2,
            high: 4.2,
        })
    }
}

impl Default for Nucleus {
    fn default() -> Self {
        Self::proton()
    }
}

impl Display for Nucleus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sampling description shared by a signal and every basis function fit against it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralGeometry {
    pub points: usize,
    pub dwell_time: f64,
    pub spectrometer_frequency: f64,
    pub ppm_shift: f64,
}

impl SpectralGeometry {
    pub fn time_axis(&self) -> Vec<f64> {
        time_axis(self.points, self.dwell_time)
    }

    pub fn frequency_axis(&self) -> Vec<f64> {
        frequency_axis(self.points, self.dwell_time)
    }

    pub fn ppm_axis(&self) -> Vec<f64> {
        ppm_axis(
            self.points,
            self.dwell_time,
            self.spectrometer_frequency,
            self.ppm_shift,
        )
    }

    pub fn window_range(&self, window: PpmWindow) -> MrsResult<Range<usize>> {
        ppm_range(&self.ppm_axis(), window.low, window.high).map_err(|error| match error {
            SpectralError::EmptyWindow { .. } => {
                MrsError::input_validation("INPUT.FIT_WINDOW_EMPTY", error.to_string())
            }
            _ => MrsError::input_validation("INPUT.FIT_WINDOW", error.to_string()),
        })
    }
}

/// Complex time-domain signal with its acquisition parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    fid: Vec<Complex64>,
    dwell_time: f64,
    spectrometer_frequency: f64,
    nucleus: Nucleus,
}

impl Signal {
    pub fn new(
        fid: Vec<Complex64>,
        dwell_time: f64,
        spectrometer_frequency: f64,
        nucleus: Nucleus,
    ) -> MrsResult<Self> {
        if fid.is_empty() {
            return Err(MrsError::input_validation(
                "INPUT.SIGNAL_EMPTY",
                "FID must contain at least one sample",
            ));
        }
        if !(dwell_time.is_finite() && dwell_time > 0.0) {
            return Err(MrsError::input_validation(
                "INPUT.SIGNAL_DWELL",
                format!("dwell time must be finite and > 0, got {dwell_time}"),
            ));
        }
        if !(spectrometer_frequency.is_finite() && spectrometer_frequency > 0.0) {
            return Err(MrsError::input_validation(
                "INPUT.SIGNAL_FREQUENCY",
                format!(
                    "spectrometer frequency must be finite and > 0 MHz, got {spectrometer_frequency}"
                ),
            ));
        }
        if let Some(index) = fid.iter().position(|value| !value.is_finite()) {
            return Err(MrsError::input_validation(
                "INPUT.SIGNAL_VALUE",
                format!("FID sample {index} is not finite"),
            ));
        }

        Ok(Self {
            fid,
            dwell_time,
            spectrometer_frequency,
            nucleus,
        })
    }

    pub fn fid(&self) -> &[Complex64] {
        &self.fid
    }

    pub fn len(&self) -> usize {
        self.fid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fid.is_empty()
    }

    pub fn dwell_time(&self) -> f64 {
        self.dwell_time
    }

    pub fn spectrometer_frequency(&self) -> f64 {
        self.spectrometer_frequency
    }

    pub fn nucleus(&self) -> &Nucleus {
        &self.nucleus
    }

    pub fn geometry(&self) -> SpectralGeometry {
        SpectralGeometry {
            points: self.fid.len(),
            dwell_time: self.dwell_time,
            spectrometer_frequency: self.spectrometer_frequency,
            ppm_shift: self.nucleus.ppm_shift(),
        }
    }

    pub fn spectrum(&self) -> Vec<Complex64> {
        fid_to_spec(&self.fid)
    }

    pub fn conjugate(&mut self) {
        self.fid.iter_mut().for_each(|value| *value = value.conj());
    }

    pub fn scale(&mut self, factor: f64) {
        self.fid.iter_mut().for_each(|value| *value *= factor);
    }

    pub fn rotate_phase(&mut self, radians: f64) {
        let rotation = Complex64::from_polar(1.0, radians);
        self.fid.iter_mut().for_each(|value| *value *= rotation);
    }
}

/// Ordered, uniquely named basis FIDs sharing one sampling geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisSet {
    names: Vec<String>,
    fids: Vec<Vec<Complex64>>,
    echo_time: Option<f64>,
}

impl BasisSet {
    pub fn new(names: Vec<String>, fids: Vec<Vec<Complex64>>) -> MrsResult<Self> {
        if names.is_empty() {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_EMPTY",
                "basis set must contain at least one function",
            ));
        }
        if names.len() != fids.len() {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_SHAPE",
                format!(
                    "basis set has {} names but {} FIDs",
                    names.len(),
                    fids.len()
                ),
            ));
        }

        let mut seen = BTreeSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(MrsError::input_validation(
                    "INPUT.BASIS_DUPLICATE",
                    format!("basis function name '{name}' appears more than once"),
                ));
            }
        }

        let points = fids[0].len();
        if let Some((index, fid)) = fids.iter().enumerate().find(|(_, fid)| fid.len() != points) {
            return Err(MrsError::input_validation(
                "INPUT.BASIS_SHAPE",
                format!(
                    "basis function '{}' has {} points, expected {}",
                    names[index],
                    fid.len(),
                    points
                ),
            ));
        }

        Ok(Self {
            names,
            fids,
            echo_time: None,
        })
    }

    pub fn with_echo_time(mut self, echo_time: Option<f64>) -> Self {
        self.echo_time = echo_time;
        self
    }

    pub fn echo_time(&self) -> Option<f64> {
        self.echo_time
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn points(&self) -> usize {
        self.fids.first().map_or(0, Vec::len)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn fids(&self) -> &[Vec<Complex64>] {
        &self.fids
    }

    pub fn fid(&self, index: usize) -> &[Complex64] {
        &self.fids[index]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn summed_fid(&self) -> Vec<Complex64> {
        let mut total = vec![Complex64::new(0.0, 0.0); self.points()];
        for fid in &self.fids {
            for (sum, value) in total.iter_mut().zip(fid) {
                *sum += value;
            }
        }
        total
    }

    pub fn conjugate(&mut self) {
        for fid in &mut self.fids {
            fid.iter_mut().for_each(|value| *value = value.conj());
        }
    }

    pub fn scale_function(&mut self, index: usize, factor: f64) {
        self.fids[index].iter_mut().for_each(|value| *value *= factor);
    }

    /// Keep only functions whose name satisfies `keep`, preserving order.
    pub(crate) fn retain_names(&mut self, keep: impl Fn(&str) -> bool) {
        let mut names = Vec::with_capacity(self.names.len());
        let mut fids = Vec::with_capacity(self.fids.len());
        for (name, fid) in self.names.drain(..).zip(self.fids.drain(..)) {
            if keep(&name) {
                names.push(name);
                fids.push(fid);
            }
        }
        self.names = names;
        self.fids = fids;
    }

    /// New basis set with `extra` functions appended after the existing ones.
    pub fn extended(&self, extra: Vec<(String, Vec<Complex64>)>) -> MrsResult<Self> {
        let mut names = self.names.clone();
        let mut fids = self.fids.clone();
        for (name, fid) in extra {
            names.push(name);
            fids.push(fid);
        }
        Ok(Self::new(names, fids)?.with_echo_time(self.echo_time))
    }
}

/// Basis-function index to parameter-group id. Ids are contiguous from 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupAssignment {
    groups: Vec<usize>,
}

impl GroupAssignment {
    pub fn new(groups: Vec<usize>) -> MrsResult<Self> {
        if groups.is_empty() {
            return Err(MrsError::input_validation(
                "INPUT.GROUP_SPEC",
                "group assignment must cover at least one basis function",
            ));
        }
        let distinct: BTreeSet<usize> = groups.iter().copied().collect();
        let count = distinct.len();
        if distinct.iter().copied().ne(0..count) {
            return Err(MrsError::input_validation(
                "INPUT.GROUP_SPEC",
                format!(
                    "group ids must be contiguous from 0, got {:?}",
                    distinct.into_iter().collect::<Vec<_>>()
                ),
            ));
        }
        Ok(Self { groups })
    }

    pub fn single_group(basis_count: usize) -> MrsResult<Self> {
        Self::new(vec![0; basis_count])
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups.iter().copied().max().map_or(0, |max| max + 1)
    }

    pub fn members(&self, group: usize) -> impl Iterator<Item = usize> + '_ {
        self.groups
            .iter()
            .enumerate()
            .filter(move |(_, candidate)| **candidate == group)
            .map(|(index, _)| index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PpmWindow {
    pub low: f64,
    pub high: f64,
}

impl PpmWindow {
    pub fn new(low: f64, high: f64) -> MrsResult<Self> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(MrsError::input_validation(
                "INPUT.FIT_WINDOW",
                format!("ppm window requires finite low < high, got ({low}, {high})"),
            ));
        }
        Ok(Self { low, high })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FitAlgorithm {
    #[default]
    Newton,
    #[serde(rename = "MH")]
    MetropolisHastings,
}

impl FitAlgorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Newton => "Newton",
            Self::MetropolisHastings => "MH",
        }
    }
}

impl Display for FitAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lineshape {
    Lorentzian,
    #[default]
    Voigt,
}

impl Lineshape {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lorentzian => "lorentzian",
            Self::Voigt => "voigt",
        }
    }
}

/// White matter / grey matter / CSF volume fractions of the voxel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TissueFractions {
    pub wm: f64,
    pub gm: f64,
    pub csf: f64,
}

impl TissueFractions {
    pub fn new(wm: f64, gm: f64, csf: f64) -> MrsResult<Self> {
        for (label, value) in [("WM", wm), ("GM", gm), ("CSF", csf)] {
            if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
                return Err(MrsError::input_validation(
                    "INPUT.TISSUE_FRACTIONS",
                    format!("{label} fraction must lie in [0, 1], got {value}"),
                ));
            }
        }
        if wm + gm + csf > 1.0 + 1.0e-6 {
            return Err(MrsError::input_validation(
                "INPUT.TISSUE_FRACTIONS",
                format!(
                    "tissue fractions must sum to at most 1, got {}",
                    wm + gm + csf
                ),
            ));
        }
        if csf >= 1.0 {
            return Err(MrsError::input_validation(
                "INPUT.TISSUE_FRACTIONS",
                "CSF fraction of 1 leaves no tissue water to reference",
            ));
        }
        Ok(Self { wm, gm, csf })
    }
}

#[cfg(test)]
mod tests {
    use super::{BasisSet, GroupAssignment, Nucleus, PpmWindow, Signal, TissueFractions};
    use crate::domain::MrsErrorCategory;
    use num_complex::Complex64;

    fn fid(values: &[f64]) -> Vec<Complex64> {
        values.iter().map(|value| Complex64::new(*value, 0.0)).collect()
    }

    #[test]
    fn signal_rejects_non_positive_dwell_time() {
        let error = Signal::new(fid(&[1.0, 2.0]), 0.0, 123.2, Nucleus::proton())
            .expect_err("zero dwell should fail");
        assert_eq!(error.category(), MrsErrorCategory::InputValidationError);
        assert_eq!(error.placeholder(), "INPUT.SIGNAL_DWELL");
    }

    #[test]
    fn basis_set_rejects_duplicate_names_and_ragged_lengths() {
        let duplicate = BasisSet::new(
            vec!["NAA".to_string(), "NAA".to_string()],
            vec![fid(&[1.0]), fid(&[2.0])],
        )
        .expect_err("duplicate names");
        assert_eq!(duplicate.placeholder(), "INPUT.BASIS_DUPLICATE");

        let ragged = BasisSet::new(
            vec!["NAA".to_string(), "Cr".to_string()],
            vec![fid(&[1.0, 2.0]), fid(&[2.0])],
        )
        .expect_err("ragged lengths");
        assert_eq!(ragged.placeholder(), "INPUT.BASIS_SHAPE");
    }

    #[test]
    fn group_assignment_requires_contiguous_ids() {
        assert!(GroupAssignment::new(vec![0, 1, 1, 2]).is_ok());
        assert!(GroupAssignment::new(vec![0, 2]).is_err());
        assert!(GroupAssignment::new(vec![1, 1]).is_err());

        let groups = GroupAssignment::new(vec![0, 1, 0]).expect("groups");
        assert_eq!(groups.group_count(), 2);
        assert_eq!(groups.members(0).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn tissue_fractions_are_bounded() {
        assert!(TissueFractions::new(0.4, 0.5, 0.1).is_ok());
        assert!(TissueFractions::new(0.6, 0.6, 0.0).is_err());
        assert!(TissueFractions::new(-0.1, 0.5, 0.1).is_err());
    }

    #[test]
    fn ppm_window_requires_ordered_bounds() {
        assert!(PpmWindow::new(0.2, 4.2).is_ok());
        assert!(PpmWindow::new(4.2, 0.2).is_err());
    }

    #[test]
    fn proton_default_window_and_shift() {
        let nucleus = Nucleus::proton();
        assert_eq!(nucleus.ppm_shift(), 4.65);
        assert_eq!(
            nucleus.default_window(),
            Some(PpmWindow {
                low: 0.2,
                high: 4.2
            })
        );
        assert_eq!(Nucleus::new("31P").ppm_shift(), 0.0);
    }
}
