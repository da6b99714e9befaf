pub mod aggregate;
pub mod fitting;
pub mod groups;
pub mod inputs;
pub mod pipeline;
pub mod quantify;
pub mod repository;
pub mod rescale;
pub mod serialization;

pub use aggregate::{ResultAggregator, TableKind, default_combinations};
pub use fitting::{FitDispatcher, FitEstimates, FitOptions, FitResult, FitStrategy};
pub use groups::{GroupSpec, MacromoleculeExtension, add_macromolecule_peaks, build_groups};
pub use pipeline::{LogConfig, PipelineOptions, PipelineReport, run_fit_pipeline};
pub use quantify::{QuantificationOptions, QuantificationSummary, scale_concentrations};
pub use repository::{ConjugationMode, SignalBasisRepository};
pub use rescale::{Rescaler, ScalingRecord};

#[cfg(test)]
pub(crate) mod testing {
    use crate::domain::{Nucleus, Signal};
    use num_complex::Complex64;
    use std::f64::consts::PI;

    pub const POINTS: usize = 1024;
    pub const DWELL: f64 = 1.0 / 4000.0;
    pub const CENTRAL_MHZ: f64 = 123.2;

    /// Lorentzian peaks at `(ppm, amplitude)` with linewidth `fwhm_hz`.
    pub fn peak_fid(peaks: &[(f64, f64)], fwhm_hz: f64) -> Vec<Complex64> {
        (0..POINTS)
            .map(|n| {
                let t = n as f64 * DWELL;
                peaks
                    .iter()
                    .map(|(ppm, amplitude)| {
                        let hz = (ppm - 4.65) * CENTRAL_MHZ;
                        Complex64::from_polar(*amplitude, 2.0 * PI * hz * t)
                            * (-PI * fwhm_hz * t).exp()
                    })
                    .sum()
            })
            .collect()
    }

    pub fn proton_signal(fid: Vec<Complex64>) -> Signal {
        Signal::new(fid, DWELL, CENTRAL_MHZ, Nucleus::proton()).expect("test signal")
    }
}
