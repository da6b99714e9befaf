//! Physical constants shared by the rescaling, macromolecule and
//! quantification stages.

/// Proton gyromagnetic ratio over 2π, MHz/T.
pub const H1_GAMMA_MHZ_PER_T: f64 = 42.576;
/// Chemical shift of the receiver reference for 1H spectra, ppm.
pub const H1_PPM_SHIFT: f64 = 4.65;
/// Pure water molality, mmol/kg.
pub const H2O_MOLALITY_MMOL_PER_KG: f64 = 55.51e3;
pub const H2O_PROTONS: f64 = 2.0;

/// Tissue water densities (g/ml) for grey matter, white matter and CSF.
pub const TISSUE_WATER_DENSITY_GM: f64 = 0.78;
pub const TISSUE_WATER_DENSITY_WM: f64 = 0.65;
pub const TISSUE_WATER_DENSITY_CSF: f64 = 0.97;
pub const PURE_WATER_DENSITY: f64 = 1.0;

/// Target L2 norm used when rescaling FIDs and basis functions.
pub const RESCALE_TARGET_NORM: f64 = 100.0;

/// Default proton count and ppm window of the reference metabolite used to
/// express the water signal in basis-amplitude units (total creatine).
pub const DEFAULT_REFERENCE_PROTONS: f64 = 5.0;
pub const DEFAULT_REFERENCE_LIMITS_PPM: (f64, f64) = (2.0, 5.0);

/// Default macromolecule peak positions (ppm) and relative amplitudes.
pub const MACROMOLECULE_PPM: [&[f64]; 5] =
    [&[0.9], &[1.2], &[1.4], &[1.7], &[2.08, 2.25, 1.95, 3.0]];
pub const MACROMOLECULE_AMPLITUDES: [&[f64]; 5] =
    [&[3.0], &[2.0], &[2.0], &[2.0], &[1.33, 0.33, 0.33, 0.4]];
/// Default Lorentzian (s⁻¹) and Gaussian (s⁻¹) broadening of synthetic MM peaks.
pub const MACROMOLECULE_GAMMA: f64 = 40.0;
pub const MACROMOLECULE_SIGMA: f64 = 30.0;
