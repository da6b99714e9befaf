//! Fit dispatch: builds the spectral model over the requested window and
//! hands it to the selected estimation strategy.

pub mod mh;
pub mod model;
pub mod newton;
pub mod results;

pub use mh::{MetropolisHastingsStrategy, SamplerOptions};
pub use model::{ParameterLayout, SpectralModel};
pub use newton::NewtonStrategy;
pub use results::{
    ConcentrationKind, ConcentrationStat, FitDiagnostics, FitEstimates, FitResult, MetaboliteRow,
    QcMetrics,
};

use crate::domain::{
    BasisSet, FitAlgorithm, GroupAssignment, Lineshape, MrsResult, PpmWindow, Signal,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Fit window; the nucleus default (or the full axis) when absent.
    pub ppm_window: Option<PpmWindow>,
    pub algorithm: FitAlgorithm,
    /// Polynomial baseline order, `-1` disables the baseline.
    pub baseline_order: i32,
    pub lineshape: Lineshape,
    pub disable_mh_priors: bool,
    pub max_iterations: usize,
    pub sampler: SamplerOptions,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            ppm_window: None,
            algorithm: FitAlgorithm::Newton,
            baseline_order: 2,
            lineshape: Lineshape::Voigt,
            disable_mh_priors: false,
            max_iterations: 200,
            sampler: SamplerOptions::default(),
        }
    }
}

/// What a strategy hands back before it is wrapped into a [`FitResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub estimates: FitEstimates,
    pub diagnostics: FitDiagnostics,
    pub warnings: Vec<String>,
}

pub trait FitStrategy {
    fn algorithm(&self) -> FitAlgorithm;

    fn fit(&self, model: &SpectralModel) -> MrsResult<FitOutcome>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FitDispatcher;

impl FitDispatcher {
    pub fn strategy(options: &FitOptions) -> Box<dyn FitStrategy> {
        let newton = NewtonStrategy::new(options.max_iterations);
        match options.algorithm {
            FitAlgorithm::Newton => Box::new(newton),
            FitAlgorithm::MetropolisHastings => Box::new(MetropolisHastingsStrategy::new(
                options.sampler,
                !options.disable_mh_priors,
                newton,
            )),
        }
    }

    pub fn fit(
        signal: &Signal,
        basis: &BasisSet,
        groups: &GroupAssignment,
        options: &FitOptions,
    ) -> MrsResult<FitResult> {
        let window = resolve_window(signal, options.ppm_window)?;
        let model = SpectralModel::new(
            signal,
            basis,
            groups,
            options.lineshape,
            window,
            options.baseline_order,
        )?;
        let strategy = Self::strategy(options);

        info!(
            algorithm = %strategy.algorithm(),
            lineshape = options.lineshape.as_str(),
            basis = basis.len(),
            groups = groups.group_count(),
            window_points = model.window_len(),
            "fitting"
        );
        let started = Instant::now();
        let outcome = strategy.fit(&model)?;
        let elapsed = started.elapsed().as_secs_f64();
        info!(elapsed_seconds = elapsed, "fit finished");
        for warning in &outcome.warnings {
            debug!("{warning}");
        }

        let mut result =
            FitResult::from_model(&model, strategy.algorithm(), options.lineshape, outcome);
        result.set_elapsed(elapsed);
        Ok(result)
    }
}

fn resolve_window(signal: &Signal, requested: Option<PpmWindow>) -> MrsResult<PpmWindow> {
    if let Some(window) = requested.or_else(|| signal.nucleus().default_window()) {
        return Ok(window);
    }
    let ppm = signal.geometry().ppm_axis();
    let low = ppm.iter().copied().fold(f64::INFINITY, f64::min);
    let high = ppm.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    PpmWindow::new(low, high)
}

#[cfg(test)]
mod tests {
    use super::{FitDispatcher, FitOptions};
    use crate::domain::{BasisSet, FitAlgorithm, GroupAssignment, Lineshape, PpmWindow};
    use crate::modules::testing::{peak_fid, proton_signal};

    fn basis() -> BasisSet {
        BasisSet::new(
            vec!["NAA".to_string(), "Cr".to_string(), "Cho".to_string()],
            vec![
                peak_fid(&[(2.01, 1.0)], 4.0),
                peak_fid(&[(3.03, 1.0)], 4.0),
                peak_fid(&[(3.21, 1.0)], 4.0),
            ],
        )
        .expect("basis")
    }

    #[test]
    fn deterministic_fit_recovers_scaled_basis_function() {
        let basis = basis();
        let fid = basis.fid(0).iter().map(|value| *value * 3.0).collect();
        let options = FitOptions {
            baseline_order: -1,
            lineshape: Lineshape::Lorentzian,
            ..FitOptions::default()
        };
        let result = FitDispatcher::fit(
            &proton_signal(fid),
            &basis,
            &GroupAssignment::single_group(3).expect("groups"),
            &options,
        )
        .expect("fit");

        let mean = result.estimates().mean();
        assert!((mean[0] - 3.0).abs() <= 1.0e-3, "NAA {}", mean[0]);
        assert!(mean[1].abs() <= 1.0e-3 && mean[2].abs() <= 1.0e-3);
        assert_eq!(result.algorithm(), FitAlgorithm::Newton);
        assert!(!result.estimates().is_sampled());
        assert!(result.diagnostics().elapsed_seconds >= 0.0);
        assert_eq!(result.qc().snr.len(), 3);
    }

    #[test]
    fn mismatched_groups_fail_before_fitting() {
        let basis = basis();
        let error = FitDispatcher::fit(
            &proton_signal(basis.fid(0).to_vec()),
            &basis,
            &GroupAssignment::single_group(2).expect("groups"),
            &FitOptions::default(),
        )
        .expect_err("group mismatch");
        assert_eq!(error.placeholder(), "INPUT.GROUP_SPEC");
    }

    #[test]
    fn window_outside_axis_is_rejected() {
        let basis = basis();
        let options = FitOptions {
            ppm_window: Some(PpmWindow::new(40.0, 41.0).expect("window")),
            ..FitOptions::default()
        };
        let error = FitDispatcher::fit(
            &proton_signal(basis.fid(0).to_vec()),
            &basis,
            &GroupAssignment::single_group(3).expect("groups"),
            &options,
        )
        .expect_err("empty window");
        assert_eq!(error.placeholder(), "INPUT.FIT_WINDOW_EMPTY");
    }
}
