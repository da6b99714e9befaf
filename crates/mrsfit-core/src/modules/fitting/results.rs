use super::FitOutcome;
use super::model::{ParameterLayout, SpectralModel};
use crate::domain::{FitAlgorithm, Lineshape, MrsError, MrsResult};
use crate::modules::quantify::QuantificationSummary;
use crate::numerics::mean_and_std;
use num_complex::Complex64;
use serde::Serialize;

/// Point estimates from the optimizer or a full set of posterior draws.
#[derive(Debug, Clone, PartialEq)]
pub enum FitEstimates {
    Point {
        params: Vec<f64>,
        sd: Vec<f64>,
    },
    Sampled {
        samples: Vec<Vec<f64>>,
        mean: Vec<f64>,
        sd: Vec<f64>,
    },
}

impl FitEstimates {
    /// Summarises draws (rows are samples, columns parameters).
    pub fn sampled(samples: Vec<Vec<f64>>) -> Self {
        let width = samples.first().map_or(0, Vec::len);
        let mut mean = Vec::with_capacity(width);
        let mut sd = Vec::with_capacity(width);
        for column in 0..width {
            let values: Vec<f64> = samples.iter().map(|sample| sample[column]).collect();
            let (m, s) = mean_and_std(&values).unwrap_or((f64::NAN, f64::NAN));
            mean.push(m);
            sd.push(s);
        }
        Self::Sampled { samples, mean, sd }
    }

    pub fn mean(&self) -> &[f64] {
        match self {
            Self::Point { params, .. } => params,
            Self::Sampled { mean, .. } => mean,
        }
    }

    pub fn sd(&self) -> &[f64] {
        match self {
            Self::Point { sd, .. } => sd,
            Self::Sampled { sd, .. } => sd,
        }
    }

    pub fn samples(&self) -> Option<&[Vec<f64>]> {
        match self {
            Self::Point { .. } => None,
            Self::Sampled { samples, .. } => Some(samples),
        }
    }

    pub fn is_sampled(&self) -> bool {
        matches!(self, Self::Sampled { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FitDiagnostics {
    pub iterations: Option<usize>,
    pub converged: Option<bool>,
    /// Per-parameter acceptance rate (sampler only; NaN for fixed parameters).
    pub acceptance: Vec<f64>,
    /// Per-parameter split-chain R-hat (sampler only).
    pub rhat: Vec<f64>,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QcMetrics {
    pub snr: Vec<f64>,
    pub fwhm_ppm: Vec<f64>,
    pub mse: f64,
}

/// A reported metabolite: either one basis function or a combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaboliteRow {
    pub name: String,
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConcentrationKind {
    /// Fitted amplitude in the units of the unscaled data.
    Raw,
    /// Ratio to the internal reference.
    Internal,
    /// Water-referenced concentration, mmol/kg.
    Molality,
    /// Water-referenced concentration, mmol/L.
    Molarity,
}

impl ConcentrationKind {
    pub const ALL: [Self; 4] = [Self::Raw, Self::Internal, Self::Molality, Self::Molarity];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Internal => "internal",
            Self::Molality => "molality",
            Self::Molarity => "molarity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationStat {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    algorithm: FitAlgorithm,
    lineshape: Lineshape,
    layout: ParameterLayout,
    parameter_names: Vec<String>,
    groups: Vec<usize>,
    estimates: FitEstimates,
    diagnostics: FitDiagnostics,
    qc: QcMetrics,
    ppm: Vec<f64>,
    data: Vec<Complex64>,
    fitted: Vec<Complex64>,
    baseline: Vec<Complex64>,
    warnings: Vec<String>,
    pub(crate) quantification: Option<QuantificationSummary>,
    pub(crate) combined: Vec<MetaboliteRow>,
}

impl FitResult {
    pub(crate) fn from_model(
        model: &SpectralModel,
        algorithm: FitAlgorithm,
        lineshape: Lineshape,
        outcome: FitOutcome,
    ) -> Self {
        let params = outcome.estimates.mean().to_vec();
        let fitted = model.predict(&params);
        let baseline = model.baseline(&params);
        let qc = quality_metrics(model, &params, &fitted);

        Self {
            algorithm,
            lineshape,
            layout: *model.layout(),
            parameter_names: model.parameter_names().to_vec(),
            groups: model.groups().to_vec(),
            estimates: outcome.estimates,
            diagnostics: outcome.diagnostics,
            qc,
            ppm: model.ppm().to_vec(),
            data: model.data().to_vec(),
            fitted,
            baseline,
            warnings: outcome.warnings,
            quantification: None,
            combined: Vec::new(),
        }
    }

    /// Point-estimate result for amplitudes obtained elsewhere, without spectra or QC.
    pub fn from_amplitudes(
        names: Vec<String>,
        amplitudes: Vec<f64>,
        sd: Vec<f64>,
    ) -> MrsResult<Self> {
        if names.is_empty() || names.len() != amplitudes.len() || names.len() != sd.len() {
            return Err(MrsError::input_validation(
                "INPUT.AMPLITUDES",
                format!(
                    "{} names, {} amplitudes and {} standard deviations must match and be non-empty",
                    names.len(),
                    amplitudes.len(),
                    sd.len()
                ),
            ));
        }
        let layout = ParameterLayout::new(names.len(), 1, Lineshape::Lorentzian, -1);
        let mut params = vec![0.0; layout.len()];
        params[..names.len()].copy_from_slice(&amplitudes);
        let mut deviations = vec![0.0; layout.len()];
        deviations[..names.len()].copy_from_slice(&sd);
        let count = names.len();

        Ok(Self {
            algorithm: FitAlgorithm::Newton,
            lineshape: Lineshape::Lorentzian,
            layout,
            parameter_names: layout.names(&names),
            groups: vec![0; count],
            estimates: FitEstimates::Point {
                params,
                sd: deviations,
            },
            diagnostics: FitDiagnostics::default(),
            qc: QcMetrics {
                snr: vec![f64::NAN; count],
                fwhm_ppm: vec![f64::NAN; count],
                mse: f64::NAN,
            },
            ppm: Vec::new(),
            data: Vec::new(),
            fitted: Vec::new(),
            baseline: Vec::new(),
            warnings: Vec::new(),
            quantification: None,
            combined: Vec::new(),
        })
    }

    pub fn algorithm(&self) -> FitAlgorithm {
        self.algorithm
    }

    pub fn lineshape(&self) -> Lineshape {
        self.lineshape
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn basis_names(&self) -> &[String] {
        &self.parameter_names[..self.layout.basis_count]
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn groups(&self) -> &[usize] {
        &self.groups
    }

    pub fn estimates(&self) -> &FitEstimates {
        &self.estimates
    }

    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.diagnostics
    }

    pub(crate) fn set_elapsed(&mut self, seconds: f64) {
        self.diagnostics.elapsed_seconds = seconds;
    }

    pub fn qc(&self) -> &QcMetrics {
        &self.qc
    }

    pub fn ppm(&self) -> &[f64] {
        &self.ppm
    }

    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn fitted(&self) -> &[Complex64] {
        &self.fitted
    }

    pub fn baseline(&self) -> &[Complex64] {
        &self.baseline
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn quantification(&self) -> Option<&QuantificationSummary> {
        self.quantification.as_ref()
    }

    pub fn combined(&self) -> &[MetaboliteRow] {
        &self.combined
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.basis_names().iter().position(|candidate| candidate == name)
    }

    /// Basis functions in fit order followed by combined rows.
    pub fn rows(&self) -> Vec<MetaboliteRow> {
        self.basis_names()
            .iter()
            .enumerate()
            .map(|(index, name)| MetaboliteRow {
                name: name.clone(),
                members: vec![index],
            })
            .chain(self.combined.iter().cloned())
            .collect()
    }

    /// Per-basis multiplier from fitted amplitude to the requested concentration kind.
    pub fn concentration_factors(&self, kind: ConcentrationKind) -> Option<Vec<f64>> {
        let count = self.layout.basis_count;
        let Some(summary) = &self.quantification else {
            return (kind == ConcentrationKind::Raw).then(|| vec![1.0; count]);
        };
        let scale = match kind {
            ConcentrationKind::Raw => 1.0,
            ConcentrationKind::Internal => summary.internal_scale?,
            ConcentrationKind::Molality => summary.molality_scale?,
            ConcentrationKind::Molarity => summary.molarity_scale?,
        };
        Some(
            summary
                .amplitude_factors
                .iter()
                .map(|factor| factor * scale)
                .collect(),
        )
    }

    /// Most informative concentration kind available.
    pub fn preferred_kind(&self) -> ConcentrationKind {
        [ConcentrationKind::Molality, ConcentrationKind::Internal]
            .into_iter()
            .find(|kind| self.concentration_factors(*kind).is_some())
            .unwrap_or(ConcentrationKind::Raw)
    }

    /// Mean and standard deviation per row; combined rows add means and
    /// combine standard deviations in quadrature.
    pub fn concentration_summary(&self, kind: ConcentrationKind) -> Option<Vec<ConcentrationStat>> {
        let factors = self.concentration_factors(kind)?;
        let mean = self.estimates.mean();
        let sd = self.estimates.sd();
        Some(
            self.rows()
                .into_iter()
                .map(|row| ConcentrationStat {
                    mean: row.members.iter().map(|i| mean[*i] * factors[*i]).sum(),
                    sd: row
                        .members
                        .iter()
                        .map(|i| (sd[*i] * factors[*i]).powi(2))
                        .sum::<f64>()
                        .sqrt(),
                    name: row.name,
                })
                .collect(),
        )
    }

    /// Per-draw concentrations (outer: samples, inner: rows); sampled fits only.
    pub fn concentration_draws(&self, kind: ConcentrationKind) -> Option<Vec<Vec<f64>>> {
        let samples = self.estimates.samples()?;
        let factors = self.concentration_factors(kind)?;
        let rows = self.rows();
        Some(
            samples
                .iter()
                .map(|sample| {
                    rows.iter()
                        .map(|row| row.members.iter().map(|i| sample[*i] * factors[*i]).sum())
                        .collect()
                })
                .collect(),
        )
    }
}

fn quality_metrics(model: &SpectralModel, params: &[f64], fitted: &[Complex64]) -> QcMetrics {
    let residual: Vec<f64> = model
        .data()
        .iter()
        .zip(fitted)
        .map(|(data, model)| (*data - *model).re)
        .collect();
    let noise = mean_and_std(&residual).map_or(f64::NAN, |(_, sd)| sd);
    let mse = model
        .data()
        .iter()
        .zip(fitted)
        .map(|(data, model)| (*data - *model).norm_sqr())
        .sum::<f64>()
        / model.window_len().max(1) as f64;

    let mut snr = Vec::with_capacity(model.layout().basis_count);
    let mut fwhm_ppm = Vec::with_capacity(model.layout().basis_count);
    for index in 0..model.layout().basis_count {
        let component: Vec<f64> = model
            .component(params, index)
            .iter()
            .map(|value| value.re)
            .collect();
        let peak = component.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        snr.push(if noise > 0.0 { peak / noise } else { f64::NAN });
        fwhm_ppm.push(full_width_half_max(model.ppm(), &component));
    }

    QcMetrics { snr, fwhm_ppm, mse }
}

/// Width (ppm) of the tallest peak at half its height, linearly interpolated.
pub fn full_width_half_max(ppm: &[f64], values: &[f64]) -> f64 {
    let Some((peak_index, peak)) = values
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
    else {
        return f64::NAN;
    };
    if peak <= 0.0 {
        return f64::NAN;
    }
    let half = 0.5 * peak;

    let mut left = ppm[0];
    for index in (0..peak_index).rev() {
        if values[index] < half {
            let fraction = (half - values[index]) / (values[index + 1] - values[index]);
            left = ppm[index] + fraction * (ppm[index + 1] - ppm[index]);
            break;
        }
    }

    let mut right = ppm[ppm.len() - 1];
    for index in peak_index + 1..values.len() {
        if values[index] < half {
            let fraction = (values[index - 1] - half) / (values[index - 1] - values[index]);
            right = ppm[index - 1] + fraction * (ppm[index] - ppm[index - 1]);
            break;
        }
    }

    (right - left).abs()
}
