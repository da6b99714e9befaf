//! Stochastic strategy: single-site random-walk Metropolis–Hastings started
//! from the deterministic fit.
//!
//! The negative log posterior is `(m/2) ln(SSE)` (Gaussian noise with the
//! variance profiled out, `m` real residuals) plus optional priors. Baseline
//! coefficients stay at their optimised values; bounds are enforced by
//! rejecting out-of-range proposals.

use super::model::SpectralModel;
use super::newton::NewtonStrategy;
use super::results::{FitDiagnostics, FitEstimates};
use super::{FitOutcome, FitStrategy};
use crate::domain::{FitAlgorithm, MrsError, MrsResult};
use crate::numerics::{mean_and_std, ppm_to_angular};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// Mean of the exponential priors on Lorentzian and Gaussian broadening, s⁻¹.
const GAMMA_PRIOR_MEAN: f64 = 20.0;
const SIGMA_PRIOR_MEAN: f64 = 20.0;
/// Standard deviation of the Gaussian prior on frequency shifts, ppm.
const EPS_PRIOR_SD_PPM: f64 = 0.1;
const RHAT_WARNING_THRESHOLD: f64 = 1.1;
const ADAPTATION_BLOCK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerOptions {
    pub samples: usize,
    pub burnin: usize,
    pub thin: usize,
    pub seed: u64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            samples: 500,
            burnin: 100,
            thin: 1,
            seed: 1_234_567,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetropolisHastingsStrategy {
    options: SamplerOptions,
    priors: bool,
    newton: NewtonStrategy,
}

impl MetropolisHastingsStrategy {
    pub fn new(options: SamplerOptions, priors: bool, newton: NewtonStrategy) -> Self {
        Self {
            options,
            priors,
            newton,
        }
    }

    fn energy(&self, model: &SpectralModel, params: &[f64]) -> f64 {
        let sse = model.sse(params).max(f64::MIN_POSITIVE);
        let mut energy = 0.5 * model.residual_len() as f64 * sse.ln();
        if self.priors {
            let layout = model.layout();
            let eps_sd = ppm_to_angular(EPS_PRIOR_SD_PPM, model.spectrometer_frequency());
            for group in 0..layout.group_count {
                energy += params[layout.gamma(group)] / GAMMA_PRIOR_MEAN;
                if let Some(index) = layout.sigma(group) {
                    energy += params[index] / SIGMA_PRIOR_MEAN;
                }
                energy += 0.5 * (params[layout.eps(group)] / eps_sd).powi(2);
            }
        }
        energy
    }
}

impl FitStrategy for MetropolisHastingsStrategy {
    fn algorithm(&self) -> FitAlgorithm {
        FitAlgorithm::MetropolisHastings
    }

    fn fit(&self, model: &SpectralModel) -> MrsResult<FitOutcome> {
        if self.options.samples < 2 || self.options.thin == 0 {
            return Err(MrsError::input_validation(
                "INPUT.SAMPLER",
                format!(
                    "sampler needs at least 2 samples and thin >= 1, got samples={} thin={}",
                    self.options.samples, self.options.thin
                ),
            ));
        }

        let layout = *model.layout();
        let initial = self.newton.optimise(model)?;
        let mut current = initial.params.clone();
        layout.project(&mut current);

        let baseline = layout.baseline_range();
        let sampled: Vec<usize> = (0..layout.len())
            .filter(|index| !baseline.contains(index))
            .collect();
        let mut widths: Vec<f64> = sampled
            .iter()
            .map(|index| {
                let sd = initial.sd[*index];
                if sd.is_finite() && sd > 0.0 {
                    sd
                } else {
                    0.1 * current[*index].abs() + 1.0e-3
                }
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let normal = Normal::new(0.0, 1.0).map_err(|error| {
            MrsError::internal("INTERNAL.SAMPLER", format!("proposal distribution: {error}"))
        })?;

        let mut energy = self.energy(model, &current);
        let mut block_accepted = vec![0_usize; sampled.len()];
        let mut block_rejected = vec![0_usize; sampled.len()];
        let mut accepted = vec![0_usize; sampled.len()];
        let mut proposed = vec![0_usize; sampled.len()];
        let mut samples = Vec::with_capacity(self.options.samples);

        let total = self.options.burnin + self.options.samples * self.options.thin;
        for iteration in 0..total {
            let burning_in = iteration < self.options.burnin;
            for (slot, index) in sampled.iter().enumerate() {
                let previous = current[*index];
                let proposal = previous + widths[slot] * normal.sample(&mut rng);
                let in_bounds = layout
                    .lower_bound(*index)
                    .is_none_or(|lower| proposal >= lower);

                let mut accept = false;
                if in_bounds {
                    current[*index] = proposal;
                    let candidate = self.energy(model, &current);
                    let threshold: f64 = rng.r#gen::<f64>().ln();
                    if candidate.is_finite() && threshold < energy - candidate {
                        energy = candidate;
                        accept = true;
                    } else {
                        current[*index] = previous;
                    }
                }

                if burning_in {
                    if accept {
                        block_accepted[slot] += 1;
                    } else {
                        block_rejected[slot] += 1;
                    }
                } else {
                    proposed[slot] += 1;
                    accepted[slot] += usize::from(accept);
                }
            }

            if burning_in && (iteration + 1) % ADAPTATION_BLOCK == 0 {
                for slot in 0..sampled.len() {
                    widths[slot] *= ((1 + block_accepted[slot]) as f64
                        / (1 + block_rejected[slot]) as f64)
                        .sqrt();
                    block_accepted[slot] = 0;
                    block_rejected[slot] = 0;
                }
            }

            if !burning_in && (iteration - self.options.burnin) % self.options.thin == 0 {
                samples.push(current.clone());
            }
        }

        let mut acceptance = vec![f64::NAN; layout.len()];
        let mut rhat = vec![f64::NAN; layout.len()];
        let mut warnings = Vec::new();
        for (slot, index) in sampled.iter().enumerate() {
            acceptance[*index] = accepted[slot] as f64 / proposed[slot].max(1) as f64;
            let chain: Vec<f64> = samples.iter().map(|sample| sample[*index]).collect();
            rhat[*index] = split_rhat(&chain);
            if rhat[*index] > RHAT_WARNING_THRESHOLD {
                warnings.push(format!(
                    "chain for '{}' has not mixed (split R-hat {:.3}); consider more samples",
                    model.parameter_names()[*index],
                    rhat[*index]
                ));
            }
        }

        Ok(FitOutcome {
            estimates: FitEstimates::sampled(samples),
            diagnostics: FitDiagnostics {
                iterations: Some(total),
                converged: Some(initial.converged),
                acceptance,
                rhat,
                ..FitDiagnostics::default()
            },
            warnings,
        })
    }
}

/// Split-chain potential scale reduction factor.
pub fn split_rhat(chain: &[f64]) -> f64 {
    let half = chain.len() / 2;
    if half < 2 {
        return f64::NAN;
    }
    let first = &chain[..half];
    let second = &chain[chain.len() - half..];
    let (Some((mean_a, sd_a)), Some((mean_b, sd_b))) = (mean_and_std(first), mean_and_std(second))
    else {
        return f64::NAN;
    };

    let n = half as f64;
    let within = 0.5 * (sd_a * sd_a + sd_b * sd_b);
    let grand = 0.5 * (mean_a + mean_b);
    let between = n * ((mean_a - grand).powi(2) + (mean_b - grand).powi(2));
    if within <= 0.0 {
        return if between <= 0.0 { 1.0 } else { f64::INFINITY };
    }
    let pooled = (n - 1.0) / n * within + between / n;
    (pooled / within).sqrt()
}

#[cfg(test)]
mod tests {
    use super::{
        EPS_PRIOR_SD_PPM, GAMMA_PRIOR_MEAN, MetropolisHastingsStrategy, SamplerOptions, split_rhat,
    };
    use crate::domain::{BasisSet, GroupAssignment, Lineshape, PpmWindow};
    use crate::modules::fitting::model::SpectralModel;
    use crate::modules::fitting::newton::NewtonStrategy;
    use crate::modules::fitting::{FitEstimates, FitStrategy};
    use crate::modules::testing::{peak_fid, proton_signal};
    use crate::numerics::ppm_to_angular;
    use num_complex::Complex64;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn noisy_model() -> SpectralModel {
        let naa = peak_fid(&[(2.01, 1.0)], 6.0);
        let cr = peak_fid(&[(3.03, 1.0)], 6.0);
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 0.01).expect("noise");
        let fid: Vec<Complex64> = naa
            .iter()
            .zip(&cr)
            .map(|(a, b)| {
                *a * 2.0
                    + *b
                    + Complex64::new(noise.sample(&mut rng), noise.sample(&mut rng))
            })
            .collect();
        let basis =
            BasisSet::new(vec!["NAA".to_string(), "Cr".to_string()], vec![naa, cr]).expect("basis");
        SpectralModel::new(
            &proton_signal(fid),
            &basis,
            &GroupAssignment::single_group(2).expect("groups"),
            Lineshape::Lorentzian,
            PpmWindow::new(0.2, 4.2).expect("window"),
            -1,
        )
        .expect("model")
    }

    fn options() -> SamplerOptions {
        SamplerOptions {
            samples: 200,
            burnin: 50,
            thin: 1,
            seed: 11,
        }
    }

    #[test]
    fn sampler_is_reproducible_and_centred_on_truth() {
        let model = noisy_model();
        let strategy = MetropolisHastingsStrategy::new(options(), true, NewtonStrategy::default());
        let first = strategy.fit(&model).expect("first chain");
        let second = strategy.fit(&model).expect("second chain");
        assert_eq!(first.estimates, second.estimates);

        let FitEstimates::Sampled { samples, mean, .. } = &first.estimates else {
            panic!("stochastic fit must produce samples");
        };
        assert_eq!(samples.len(), 200);
        assert!((mean[0] - 2.0).abs() <= 0.1, "NAA mean {}", mean[0]);
        assert!((mean[1] - 1.0).abs() <= 0.1, "Cr mean {}", mean[1]);

        let layout = model.layout();
        let baseline = layout.baseline(0, false);
        assert!(samples.iter().all(|sample| sample[baseline] == 0.0));
        assert!(samples.iter().all(|sample| sample[0] >= 0.0));

        let acceptance = &first.diagnostics.acceptance;
        assert!(acceptance[0] > 0.0 && acceptance[0] < 1.0);
        assert!(acceptance[baseline].is_nan());
    }

    #[test]
    fn priors_penalise_broadening_and_frequency_shifts() {
        let model = noisy_model();
        let layout = *model.layout();
        let with_priors = MetropolisHastingsStrategy::new(options(), true, NewtonStrategy::default());
        let without_priors =
            MetropolisHastingsStrategy::new(options(), false, NewtonStrategy::default());

        // With zero concentrations the model is flat, so gamma and eps are
        // unidentified by the data and only the priors depend on them.
        let mut narrow = vec![0.0; layout.len()];
        narrow[layout.gamma(0)] = 5.0;
        let mut broad = narrow.clone();
        broad[layout.gamma(0)] = 50.0;
        let mut shifted = narrow.clone();
        let eps_sd = ppm_to_angular(EPS_PRIOR_SD_PPM, model.spectrometer_frequency());
        shifted[layout.eps(0)] = 2.0 * eps_sd;

        let flat = without_priors.energy(&model, &narrow);
        assert!((without_priors.energy(&model, &broad) - flat).abs() <= 1.0e-9);
        assert!((without_priors.energy(&model, &shifted) - flat).abs() <= 1.0e-9);

        let base = with_priors.energy(&model, &narrow);
        assert!((base - flat - 5.0 / GAMMA_PRIOR_MEAN).abs() <= 1.0e-9);
        assert!(
            (with_priors.energy(&model, &broad) - base - 45.0 / GAMMA_PRIOR_MEAN).abs() <= 1.0e-9
        );
        assert!((with_priors.energy(&model, &shifted) - base - 2.0).abs() <= 1.0e-9);
    }

    #[test]
    fn disabling_priors_changes_the_chain() {
        let model = noisy_model();
        let with_priors = MetropolisHastingsStrategy::new(options(), true, NewtonStrategy::default())
            .fit(&model)
            .expect("chain with priors");
        let without_priors =
            MetropolisHastingsStrategy::new(options(), false, NewtonStrategy::default())
                .fit(&model)
                .expect("chain without priors");

        assert_ne!(with_priors.estimates, without_priors.estimates);
        let FitEstimates::Sampled { mean, .. } = &without_priors.estimates else {
            panic!("stochastic fit must produce samples");
        };
        assert!((mean[0] - 2.0).abs() <= 0.1, "NAA mean {}", mean[0]);
    }

    #[test]
    fn invalid_chain_length_is_rejected() {
        let model = noisy_model();
        let strategy = MetropolisHastingsStrategy::new(
            SamplerOptions {
                samples: 1,
                ..options()
            },
            false,
            NewtonStrategy::default(),
        );
        let error = strategy.fit(&model).expect_err("too few samples");
        assert_eq!(error.placeholder(), "INPUT.SAMPLER");
    }

    #[test]
    fn split_rhat_flags_drifting_chains() {
        let stationary: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((split_rhat(&stationary) - 1.0).abs() <= 0.05);

        let drifting: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert!(split_rhat(&drifting) > 1.1);
        assert_eq!(split_rhat(&[1.0; 10]), 1.0);
        assert!(split_rhat(&[1.0, 2.0]).is_nan());
    }
}
