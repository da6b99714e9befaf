//! Deterministic strategy: grid-initialised, bounded Levenberg–Marquardt.

use super::model::{ParameterLayout, SpectralModel};
use super::results::{FitDiagnostics, FitEstimates};
use super::{FitOutcome, FitStrategy};
use crate::domain::{FitAlgorithm, MrsError, MrsResult};
use crate::numerics::{
    DenseMatrix, LuError, add_relative_ridge, dot, lu_invert, lu_solve, ppm_to_angular,
    solve_least_squares,
};

const INITIAL_GAMMA_GRID: [f64; 6] = [0.0, 2.0, 5.0, 10.0, 20.0, 40.0];
const INITIAL_SIGMA_GRID: [f64; 4] = [0.0, 5.0, 10.0, 20.0];
const INITIAL_SHIFT_GRID_PPM: [f64; 7] = [-0.1, -0.05, -0.02, 0.0, 0.02, 0.05, 0.1];

const INITIAL_DAMPING: f64 = 1.0e-3;
const MAX_DAMPING: f64 = 1.0e12;
const MIN_DAMPING: f64 = 1.0e-12;
const RELATIVE_SSE_TOLERANCE: f64 = 1.0e-10;
/// `|J_iᵀ r|` below this fraction of `‖J_i‖ ‖data‖` counts as stationary.
const STATIONARY_GRADIENT_TOLERANCE: f64 = 1.0e-6;
const COVARIANCE_RIDGE: f64 = 1.0e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewtonStrategy {
    max_iterations: usize,
}

impl NewtonStrategy {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    /// Best-fit point estimates and their standard deviations, used directly
    /// and as the starting point of the sampler.
    pub(crate) fn optimise(&self, model: &SpectralModel) -> MrsResult<NewtonSolution> {
        let start = initial_parameters(model)?;
        let outcome = levenberg_marquardt(model, start, self.max_iterations)?;
        let sd = standard_deviations(model, &outcome.params, outcome.sse)?;
        Ok(NewtonSolution {
            params: outcome.params,
            sd,
            sse: outcome.sse,
            iterations: outcome.iterations,
            converged: outcome.converged,
            stalled: outcome.stalled,
        })
    }
}

impl Default for NewtonStrategy {
    fn default() -> Self {
        Self::new(200)
    }
}

impl FitStrategy for NewtonStrategy {
    fn algorithm(&self) -> FitAlgorithm {
        FitAlgorithm::Newton
    }

    fn fit(&self, model: &SpectralModel) -> MrsResult<FitOutcome> {
        let solution = self.optimise(model)?;
        let mut warnings = Vec::new();
        if solution.stalled {
            warnings.push(format!(
                "optimizer stalled after {} iterations away from a stationary point; estimates are best effort",
                solution.iterations
            ));
        } else if !solution.converged {
            warnings.push(format!(
                "optimizer did not converge within {} iterations; estimates are best effort",
                solution.iterations
            ));
        }
        tracing::debug!(
            iterations = solution.iterations,
            sse = solution.sse,
            converged = solution.converged,
            "Levenberg-Marquardt finished"
        );

        Ok(FitOutcome {
            estimates: FitEstimates::Point {
                params: solution.params,
                sd: solution.sd,
            },
            diagnostics: FitDiagnostics {
                iterations: Some(solution.iterations),
                converged: Some(solution.converged),
                ..FitDiagnostics::default()
            },
            warnings,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewtonSolution {
    pub params: Vec<f64>,
    pub sd: Vec<f64>,
    pub sse: f64,
    pub iterations: usize,
    pub converged: bool,
    pub stalled: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct LmOutcome {
    params: Vec<f64>,
    sse: f64,
    iterations: usize,
    converged: bool,
    /// No downhill step was found while the gradient was still significant.
    stalled: bool,
}

/// Grid search over one shared lineshape; concentrations and baseline come
/// from a linear solve with concentrations clipped to be non-negative.
pub(crate) fn initial_parameters(model: &SpectralModel) -> MrsResult<Vec<f64>> {
    let layout = *model.layout();
    let target = model.stacked_data();
    let sigma_grid: &[f64] = if layout.voigt {
        &INITIAL_SIGMA_GRID
    } else {
        &[0.0]
    };

    let mut best: Option<(f64, f64, f64, f64, Vec<f64>)> = None;
    for &gamma in &INITIAL_GAMMA_GRID {
        for &sigma in sigma_grid {
            for &shift_ppm in &INITIAL_SHIFT_GRID_PPM {
                let eps = ppm_to_angular(shift_ppm, model.spectrometer_frequency());
                let columns = model.linear_design(gamma, sigma, eps);
                let mut beta = solve_least_squares(&columns, &target).map_err(linear_error)?;
                beta[..layout.basis_count]
                    .iter_mut()
                    .for_each(|value| *value = value.max(0.0));

                let mut residual = target.clone();
                for (column, coefficient) in columns.iter().zip(&beta) {
                    for (value, regressor) in residual.iter_mut().zip(column) {
                        *value -= coefficient * regressor;
                    }
                }
                let sse = dot(&residual, &residual);
                if best.as_ref().is_none_or(|(best_sse, ..)| sse < *best_sse) {
                    best = Some((sse, gamma, sigma, eps, beta));
                }
            }
        }
    }

    let (_, gamma, sigma, eps, beta) = best.ok_or_else(|| {
        MrsError::internal("INTERNAL.FIT_INIT", "initialisation grid is empty")
    })?;

    let mut params = vec![0.0; layout.len()];
    params[..layout.basis_count].copy_from_slice(&beta[..layout.basis_count]);
    for group in 0..layout.group_count {
        params[layout.gamma(group)] = gamma;
        if let Some(index) = layout.sigma(group) {
            params[index] = sigma;
        }
        params[layout.eps(group)] = eps;
    }
    if !layout.baseline_fixed {
        for (offset, value) in beta[layout.basis_count..].iter().enumerate() {
            params[layout.baseline(0, false) + offset] = *value;
        }
    }
    Ok(params)
}

fn levenberg_marquardt(
    model: &SpectralModel,
    mut params: Vec<f64>,
    max_iterations: usize,
) -> MrsResult<LmOutcome> {
    let layout = *model.layout();
    layout.project(&mut params);
    let free: Vec<usize> = (0..layout.len()).filter(|index| !layout.is_fixed(*index)).collect();

    let mut sse = model.sse(&params);
    let mut damping = INITIAL_DAMPING;
    let mut iterations = 0;
    let mut converged = false;
    let mut stalled = false;
    let data_norm = model
        .data()
        .iter()
        .map(|value| value.norm_sqr())
        .sum::<f64>()
        .sqrt();

    while iterations < max_iterations {
        iterations += 1;
        if sse <= f64::MIN_POSITIVE {
            converged = true;
            break;
        }

        let residual = model.residual(&params);
        let jacobian = model.jacobian(&params);
        // parameters with a vanishing derivative (e.g. sigma at 0) cannot move this step
        let column_norms: Vec<f64> = free
            .iter()
            .map(|index| dot(&jacobian[*index], &jacobian[*index]))
            .collect();
        let diagonal_scale = column_norms
            .iter()
            .copied()
            .fold(0.0_f64, f64::max)
            .max(f64::MIN_POSITIVE);
        let (active, active_norms): (Vec<usize>, Vec<f64>) = free
            .iter()
            .zip(&column_norms)
            .filter(|(_, norm)| **norm > 1.0e-20 * diagonal_scale)
            .map(|(index, norm)| (*index, norm.sqrt()))
            .unzip();
        let (normal, gradient) = normal_equations(&jacobian, &residual, &active);

        let mut improved = None;
        while damping <= MAX_DAMPING {
            let mut damped = normal.clone();
            for index in 0..active.len() {
                damped[(index, index)] +=
                    damping * (normal[(index, index)] + 1.0e-12 * diagonal_scale);
            }
            let step = match lu_solve(&damped, &gradient) {
                Ok(step) => step,
                Err(_) => {
                    damping *= 10.0;
                    continue;
                }
            };

            let mut candidate = params.clone();
            for (position, index) in active.iter().enumerate() {
                candidate[*index] += step[position];
            }
            layout.project(&mut candidate);
            let candidate_sse = model.sse(&candidate);
            if candidate_sse.is_finite() && candidate_sse < sse {
                damping = (damping / 10.0).max(MIN_DAMPING);
                improved = Some((candidate, candidate_sse));
                break;
            }
            damping *= 10.0;
        }

        match improved {
            Some((candidate, candidate_sse)) => {
                let decrease = sse - candidate_sse;
                params = candidate;
                sse = candidate_sse;
                if decrease <= RELATIVE_SSE_TOLERANCE * sse.max(f64::MIN_POSITIVE) {
                    converged = true;
                    break;
                }
            }
            // no downhill step at any damping
            None => {
                converged =
                    is_stationary(&layout, &params, &active, &gradient, &active_norms, data_norm);
                stalled = !converged;
                break;
            }
        }
    }

    Ok(LmOutcome {
        params,
        sse,
        iterations,
        converged,
        stalled,
    })
}

/// First-order optimality under the lower bounds: every active gradient
/// component `J_iᵀ r` is negligible, or pushes a parameter sitting on its
/// bound further outside.
fn is_stationary(
    layout: &ParameterLayout,
    params: &[f64],
    active: &[usize],
    gradient: &[f64],
    column_norms: &[f64],
    data_norm: f64,
) -> bool {
    active
        .iter()
        .zip(gradient)
        .zip(column_norms)
        .all(|((index, component), norm)| {
            let on_bound = layout
                .lower_bound(*index)
                .is_some_and(|lower| params[*index] <= lower);
            (on_bound && *component <= 0.0)
                || component.abs() <= STATIONARY_GRADIENT_TOLERANCE * norm * data_norm
        })
}

fn normal_equations(
    jacobian: &[Vec<f64>],
    residual: &[f64],
    free: &[usize],
) -> (DenseMatrix, Vec<f64>) {
    let mut normal = DenseMatrix::zeros(free.len(), free.len());
    for (row, first) in free.iter().enumerate() {
        for (col, second) in free.iter().enumerate().skip(row) {
            let value = dot(&jacobian[*first], &jacobian[*second]);
            normal[(row, col)] = value;
            normal[(col, row)] = value;
        }
    }
    let gradient = free
        .iter()
        .map(|index| dot(&jacobian[*index], residual))
        .collect();
    (normal, gradient)
}

/// `sqrt(diag(s² (JᵀJ)⁻¹))` with `s² = SSE / (m − p)`; fixed parameters get zero.
fn standard_deviations(model: &SpectralModel, params: &[f64], sse: f64) -> MrsResult<Vec<f64>> {
    let layout = *model.layout();
    let free: Vec<usize> = (0..layout.len()).filter(|index| !layout.is_fixed(*index)).collect();
    let residual = model.residual(params);
    let jacobian = model.jacobian(params);
    let (mut normal, _) = normal_equations(&jacobian, &residual, &free);
    add_relative_ridge(&mut normal, COVARIANCE_RIDGE);

    let inverse = lu_invert(&normal).map_err(|error| {
        MrsError::computation(
            "RUN.COVARIANCE",
            format!("parameter covariance is not available: {error}"),
        )
    })?;

    let observations = model.residual_len();
    let dof = observations.saturating_sub(free.len()).max(1);
    let variance = sse / dof as f64;

    let mut sd = vec![0.0; layout.len()];
    for (position, index) in free.iter().enumerate() {
        sd[*index] = (variance * inverse[(position, position)].max(0.0)).sqrt();
    }
    Ok(sd)
}

fn linear_error(error: LuError) -> MrsError {
    MrsError::computation(
        "RUN.FIT_INIT",
        format!("linear initialisation failed: {error}"),
    )
}
