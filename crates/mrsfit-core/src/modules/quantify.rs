//! Conversion of fitted amplitudes into concentrations.
//!
//! Amplitudes are first mapped back to the unscaled data through the
//! [`ScalingRecord`]. Internal referencing divides by the summed reference
//! amplitudes. Water referencing expresses amplitudes in mmol/kg (molality)
//! and mmol/L (molarity) using the water signal, relaxation attenuation of
//! water and metabolites, and optionally tissue partial volumes. Tissue water
//! densities only enter the molarity.

use super::fitting::FitResult;
use super::rescale::ScalingRecord;
use crate::common::constants::{
    DEFAULT_REFERENCE_LIMITS_PPM, DEFAULT_REFERENCE_PROTONS, H2O_MOLALITY_MMOL_PER_KG,
    H2O_PROTONS, PURE_WATER_DENSITY, TISSUE_WATER_DENSITY_CSF, TISSUE_WATER_DENSITY_GM,
    TISSUE_WATER_DENSITY_WM,
};
use crate::common::relaxation::{
    RelaxationTable, field_strength_tesla, standard_relaxation,
};
use crate::domain::{BasisSet, MrsError, MrsResult, PpmWindow, Signal, TissueFractions};
use crate::numerics::{fid_to_spec, trapz};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantificationOptions {
    /// Metabolites whose summed amplitude is the internal reference.
    pub internal_reference: Vec<String>,
    /// Echo time, seconds. Filled from the basis header when not given.
    pub echo_time: Option<f64>,
    /// Repetition time, seconds; enables T1 saturation correction.
    pub repetition_time: Option<f64>,
    pub tissue_fractions: Option<TissueFractions>,
    /// Final multiplicative calibration of water-referenced concentrations.
    pub extra_scale: f64,
    /// Overrides the field-strength relaxation tables.
    pub relaxation: Option<RelaxationTable>,
    pub reference_protons: f64,
    pub reference_limits: (f64, f64),
}

impl Default for QuantificationOptions {
    fn default() -> Self {
        Self {
            internal_reference: vec!["Cr".to_string(), "PCr".to_string()],
            echo_time: None,
            repetition_time: None,
            tissue_fractions: None,
            extra_scale: 1.0,
            relaxation: None,
            reference_protons: DEFAULT_REFERENCE_PROTONS,
            reference_limits: DEFAULT_REFERENCE_LIMITS_PPM,
        }
    }
}

/// Scaling attached to a [`FitResult`] once it has been quantified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantificationSummary {
    pub internal_reference: Vec<String>,
    /// Per basis function: fitted amplitude to physical amplitude.
    pub amplitude_factors: Vec<f64>,
    /// Physical amplitude to ratio against the internal reference.
    pub internal_scale: Option<f64>,
    /// Physical amplitude to mmol/kg.
    pub molality_scale: Option<f64>,
    /// Physical amplitude to mmol/L.
    pub molarity_scale: Option<f64>,
    pub water_amplitude: Option<f64>,
    pub echo_time: Option<f64>,
    pub relaxation: Option<RelaxationTable>,
}

/// Attach concentration scaling to `result`.
///
/// `water_amplitude` is the water signal in basis-amplitude units per mmol/kg
/// of water (see [`water_reference_amplitude`]). Water referencing degrades to
/// internal referencing, with a warning, when the echo time or the relaxation
/// constants are unknown.
pub fn scale_concentrations(
    result: &mut FitResult,
    scaling: &ScalingRecord,
    water_amplitude: Option<f64>,
    options: &QuantificationOptions,
    spectrometer_frequency: f64,
) -> MrsResult<()> {
    validate_options(options)?;
    let names = result.basis_names().to_vec();
    let reference = reference_indices(&names, &options.internal_reference)?;

    let amplitude_factors = scaling.physical_amplitudes(&vec![1.0; names.len()]);
    let mean = result.estimates().mean();
    let reference_total: f64 = reference
        .iter()
        .map(|index| mean[*index] * amplitude_factors[*index])
        .sum();
    let internal_scale = if reference_total > 0.0 {
        Some(1.0 / reference_total)
    } else {
        result.push_warning(format!(
            "internal reference {} has no positive amplitude; ratios are not reported",
            options.internal_reference.join("+")
        ));
        None
    };

    let relaxation = options
        .relaxation
        .or_else(|| standard_relaxation(spectrometer_frequency));
    let mut water_scale: Option<WaterScale> = None;
    if let Some(water) = water_amplitude {
        match (options.echo_time, relaxation) {
            (None, _) => result.push_warning(
                "echo time is unknown; water referencing skipped, reporting internal-reference ratios only",
            ),
            (Some(_), None) => result.push_warning(format!(
                "no relaxation constants for a {:.2}T field; water referencing skipped",
                field_strength_tesla(spectrometer_frequency)
            )),
            (Some(echo_time), Some(table)) => {
                if options.tissue_fractions.is_none() {
                    result.push_warning("no tissue fractions supplied; assuming pure water");
                }
                water_scale = Some(water_concentration_scale(
                    water,
                    echo_time,
                    options.repetition_time,
                    options.tissue_fractions,
                    &table,
                    options.extra_scale,
                )?);
            }
        }
    }

    info!(
        internal = internal_scale.is_some(),
        water = water_scale.is_some(),
        "concentrations scaled"
    );
    result.quantification = Some(QuantificationSummary {
        internal_reference: options.internal_reference.clone(),
        amplitude_factors,
        internal_scale,
        molality_scale: water_scale.map(|scale| scale.molality),
        molarity_scale: water_scale.map(|scale| scale.molarity),
        water_amplitude,
        echo_time: options.echo_time,
        relaxation,
    });
    Ok(())
}

/// Water-referenced factors from physical metabolite amplitude to concentration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaterScale {
    /// To mmol/kg of tissue water.
    pub molality: f64,
    /// To mmol/L of tissue, weighting compartments by their water density.
    pub molarity: f64,
}

/// `extra * water_term / (W * R_metab)`, where the molality water term is
/// `Σ f_t R_t / (1 - f_CSF)` and the molarity term additionally weights each
/// compartment by its water density.
pub fn water_concentration_scale(
    water_amplitude: f64,
    echo_time: f64,
    repetition_time: Option<f64>,
    fractions: Option<TissueFractions>,
    relaxation: &RelaxationTable,
    extra_scale: f64,
) -> MrsResult<WaterScale> {
    if !(water_amplitude.is_finite() && water_amplitude > 0.0) {
        return Err(MrsError::computation(
            "RUN.WATER_AMPLITUDE",
            format!("water reference amplitude must be positive, got {water_amplitude}"),
        ));
    }
    let attenuation =
        |t2: f64, t1: f64| relaxation_attenuation(echo_time, repetition_time, t2, t1);

    let (molal_term, molar_term) = match fractions {
        None => {
            let water = attenuation(relaxation.t2.h2o_csf, relaxation.t1.h2o_csf);
            (water, PURE_WATER_DENSITY * water)
        }
        Some(fractions) => {
            let compartments = [
                (
                    fractions.gm,
                    TISSUE_WATER_DENSITY_GM,
                    attenuation(relaxation.t2.h2o_gm, relaxation.t1.h2o_gm),
                ),
                (
                    fractions.wm,
                    TISSUE_WATER_DENSITY_WM,
                    attenuation(relaxation.t2.h2o_wm, relaxation.t1.h2o_wm),
                ),
                (
                    fractions.csf,
                    TISSUE_WATER_DENSITY_CSF,
                    attenuation(relaxation.t2.h2o_csf, relaxation.t1.h2o_csf),
                ),
            ];
            let visible = 1.0 - fractions.csf;
            let molal: f64 = compartments.iter().map(|(f, _, r)| f * r).sum();
            let molar: f64 = compartments.iter().map(|(f, d, r)| f * d * r).sum();
            (molal / visible, molar / visible)
        }
    };
    let metabolite = attenuation(relaxation.t2.metab, relaxation.t1.metab);
    debug!(molal_term, molar_term, metabolite, "water referencing terms");

    let scale = extra_scale / (water_amplitude * metabolite);
    Ok(WaterScale {
        molality: scale * molal_term,
        molarity: scale * molar_term,
    })
}

/// `exp(-TE/T2)`, times `1 - exp(-TR/T1)` when a repetition time is known.
pub fn relaxation_attenuation(
    echo_time: f64,
    repetition_time: Option<f64>,
    t2: f64,
    t1: f64,
) -> f64 {
    let transverse = (-echo_time / t2).exp();
    repetition_time.map_or(transverse, |tr| transverse * (1.0 - (-tr / t1).exp()))
}

/// Water signal expressed as basis amplitude per mmol/kg of water.
///
/// The water spectrum is phased on its largest point and integrated over the
/// full axis; the first internal-reference basis function is integrated over
/// `reference_limits` and normalised by its proton count. Both areas are
/// mapped back to unscaled units first.
pub fn water_reference_amplitude(
    water: &Signal,
    basis: &BasisSet,
    scaling: &ScalingRecord,
    options: &QuantificationOptions,
) -> MrsResult<f64> {
    validate_options(options)?;
    let reference = reference_indices(basis.names(), &options.internal_reference)?;
    let index = reference.first().copied().ok_or_else(|| {
        MrsError::input_validation(
            "INPUT.INTERNAL_REFERENCE",
            "at least one internal reference metabolite is required",
        )
    })?;

    let spectrum = water.spectrum();
    let peak = spectrum
        .iter()
        .copied()
        .max_by(|a, b| a.norm().total_cmp(&b.norm()))
        .unwrap_or(Complex64::new(0.0, 0.0));
    let rotation = Complex64::from_polar(1.0, -peak.arg());
    let water_real: Vec<f64> = spectrum.iter().map(|value| (*value * rotation).re).collect();
    let water_area = scaling.physical_water(trapz(&water_real));

    let (low, high) = options.reference_limits;
    let range = water.geometry().window_range(PpmWindow::new(low, high)?)?;
    let reference_real: Vec<f64> = fid_to_spec(basis.fid(index))[range]
        .iter()
        .map(|value| value.re)
        .collect();
    let reference_area = scaling.physical_basis(index, trapz(&reference_real));
    if !(reference_area.is_finite() && reference_area > 0.0) {
        return Err(MrsError::computation(
            "RUN.REFERENCE_AREA",
            format!(
                "basis function '{}' has no positive area in {low}-{high} ppm",
                basis.names()[index]
            ),
        ));
    }

    Ok(water_area / reference_area * options.reference_protons
        / H2O_PROTONS
        / H2O_MOLALITY_MMOL_PER_KG)
}

fn validate_options(options: &QuantificationOptions) -> MrsResult<()> {
    if options.internal_reference.is_empty() {
        return Err(MrsError::input_validation(
            "INPUT.INTERNAL_REFERENCE",
            "at least one internal reference metabolite is required",
        ));
    }
    if !(options.extra_scale.is_finite() && options.extra_scale > 0.0) {
        return Err(MrsError::input_validation(
            "INPUT.QUANT_OPTIONS",
            format!("extra scale must be positive, got {}", options.extra_scale),
        ));
    }
    if let Some(echo_time) = options.echo_time {
        if !(echo_time.is_finite() && echo_time >= 0.0) {
            return Err(MrsError::input_validation(
                "INPUT.QUANT_OPTIONS",
                format!("echo time must be non-negative, got {echo_time}"),
            ));
        }
    }
    Ok(())
}

fn reference_indices(names: &[String], reference: &[String]) -> MrsResult<Vec<usize>> {
    reference
        .iter()
        .map(|name| {
            names.iter().position(|candidate| candidate == name).ok_or_else(|| {
                MrsError::input_validation(
                    "INPUT.UNKNOWN_METABOLITE",
                    format!("internal reference '{name}' is not in the basis set"),
                )
            })
        })
        .collect()
}
