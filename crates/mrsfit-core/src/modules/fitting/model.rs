//! Frequency-domain model of a spectrum as a sum of broadened, shifted basis
//! functions plus a complex polynomial baseline.
//!
//! `M(t) = Σ_i c_i b_i(t) exp(-(γ_g + σ_g² t + iε_g) t)`, `g = group(i)`;
//! `S(ν) = exp(-i(φ0 + 2πν φ1)) FFT(M)(ν) + Σ_k (β_k + iβ'_k) P_k(ν)`.
//!
//! Residuals and Jacobian columns are stacked real vectors `[Re(..); Im(..)]`
//! over the fit window.

use crate::domain::{
    BasisSet, GroupAssignment, Lineshape, MrsError, MrsResult, PpmWindow, Signal,
};
use crate::numerics::{SpectralTransform, orthonormal_polynomials};
use num_complex::Complex64;
use serde::Serialize;
use std::f64::consts::PI;
use std::ops::Range;

const I: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Index arithmetic over the flat parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterLayout {
    pub basis_count: usize,
    pub group_count: usize,
    pub voigt: bool,
    pub baseline_terms: usize,
    pub baseline_fixed: bool,
}

impl ParameterLayout {
    /// Negative baseline orders keep one order of coefficients pinned at zero.
    pub fn new(
        basis_count: usize,
        group_count: usize,
        lineshape: Lineshape,
        baseline_order: i32,
    ) -> Self {
        Self {
            basis_count,
            group_count,
            voigt: lineshape == Lineshape::Voigt,
            baseline_terms: usize::try_from(baseline_order).map_or(1, |order| order + 1),
            baseline_fixed: baseline_order < 0,
        }
    }

    pub fn len(&self) -> usize {
        let shape = if self.voigt { 3 } else { 2 };
        self.basis_count + shape * self.group_count + 2 + 2 * self.baseline_terms
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn conc(&self) -> Range<usize> {
        0..self.basis_count
    }

    pub fn gamma(&self, group: usize) -> usize {
        self.basis_count + group
    }

    pub fn sigma(&self, group: usize) -> Option<usize> {
        self.voigt
            .then_some(self.basis_count + self.group_count + group)
    }

    pub fn eps(&self, group: usize) -> usize {
        let offset = if self.voigt { 2 } else { 1 };
        self.basis_count + offset * self.group_count + group
    }

    pub fn phi0(&self) -> usize {
        self.eps(self.group_count)
    }

    pub fn phi1(&self) -> usize {
        self.phi0() + 1
    }

    pub fn baseline(&self, term: usize, imaginary: bool) -> usize {
        self.phi1() + 1 + 2 * term + usize::from(imaginary)
    }

    pub fn baseline_range(&self) -> Range<usize> {
        self.baseline(0, false)..self.len()
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.baseline_fixed && self.baseline_range().contains(&index)
    }

    /// Lower bound (concentrations and linewidths are non-negative).
    pub fn lower_bound(&self, index: usize) -> Option<f64> {
        let shape_end = if self.voigt {
            self.basis_count + 2 * self.group_count
        } else {
            self.basis_count + self.group_count
        };
        (index < shape_end).then_some(0.0)
    }

    pub fn project(&self, params: &mut [f64]) {
        for (index, value) in params.iter_mut().enumerate() {
            if self.is_fixed(index) {
                *value = 0.0;
            } else if let Some(lower) = self.lower_bound(index) {
                *value = value.max(lower);
            }
        }
    }

    pub fn names(&self, basis_names: &[String]) -> Vec<String> {
        let mut names: Vec<String> = basis_names.to_vec();
        names.extend((0..self.group_count).map(|group| format!("gamma_{group}")));
        if self.voigt {
            names.extend((0..self.group_count).map(|group| format!("sigma_{group}")));
        }
        names.extend((0..self.group_count).map(|group| format!("eps_{group}")));
        names.push("Phi0".to_string());
        names.push("Phi1".to_string());
        for term in 0..self.baseline_terms {
            names.push(format!("B_real_{term}"));
            names.push(format!("B_imag_{term}"));
        }
        names
    }
}

#[derive(Debug, Clone)]
pub struct SpectralModel {
    layout: ParameterLayout,
    parameter_names: Vec<String>,
    groups: Vec<usize>,
    basis: Vec<Vec<Complex64>>,
    time: Vec<f64>,
    frequency: Vec<f64>,
    ppm: Vec<f64>,
    window: Range<usize>,
    polynomials: Vec<Vec<f64>>,
    data: Vec<Complex64>,
    spectrometer_frequency: f64,
    transform: SpectralTransform,
}

impl SpectralModel {
    pub fn new(
        signal: &Signal,
        basis: &BasisSet,
        groups: &GroupAssignment,
        lineshape: Lineshape,
        window: PpmWindow,
        baseline_order: i32,
    ) -> MrsResult<Self> {
        if groups.len() != basis.len() {
            return Err(MrsError::input_validation(
                "INPUT.GROUP_SPEC",
                format!(
                    "group assignment covers {} functions but the basis has {}",
                    groups.len(),
                    basis.len()
                ),
            ));
        }
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

        let geometry = signal.geometry();
        let window_range = geometry.window_range(window)?;
        let layout = ParameterLayout::new(
            basis.len(),
            groups.group_count(),
            lineshape,
            baseline_order,
        );
        let polynomials = orthonormal_polynomials(window_range.len(), layout.baseline_terms - 1)
            .map_err(|error| MrsError::input_validation("INPUT.FIT_WINDOW", error.to_string()))?;

        let transform = SpectralTransform::new(signal.len());
        let data = transform.fid_to_spec(signal.fid())[window_range.clone()].to_vec();
        let frequency = geometry.frequency_axis()[window_range.clone()].to_vec();
        let ppm = geometry.ppm_axis()[window_range.clone()].to_vec();

        Ok(Self {
            layout,
            parameter_names: layout.names(basis.names()),
            groups: groups.as_slice().to_vec(),
            basis: basis.fids().to_vec(),
            time: geometry.time_axis(),
            frequency,
            ppm,
            window: window_range,
            polynomials,
            data,
            spectrometer_frequency: signal.spectrometer_frequency(),
            transform,
        })
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn basis_names(&self) -> &[String] {
        &self.parameter_names[..self.layout.basis_count]
    }

    pub fn window(&self) -> Range<usize> {
        self.window.clone()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Number of real residuals.
    pub fn residual_len(&self) -> usize {
        2 * self.window.len()
    }

    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn ppm(&self) -> &[f64] {
        &self.ppm
    }

    pub fn groups(&self) -> &[usize] {
        &self.groups
    }

    /// Spectrometer frequency in MHz, i.e. Hz per ppm.
    pub fn spectrometer_frequency(&self) -> f64 {
        self.spectrometer_frequency
    }

    fn lineshape(&self, params: &[f64], group: usize) -> Vec<Complex64> {
        let gamma = params[self.layout.gamma(group)];
        let sigma = self
            .layout
            .sigma(group)
            .map_or(0.0, |index| params[index]);
        let eps = params[self.layout.eps(group)];
        self.time
            .iter()
            .map(|t| (-Complex64::new(gamma + sigma * sigma * t, eps) * *t).exp())
            .collect()
    }

    fn lineshapes(&self, params: &[f64]) -> Vec<Vec<Complex64>> {
        (0..self.layout.group_count)
            .map(|group| self.lineshape(params, group))
            .collect()
    }

    fn windowed(&self, mut fid: Vec<Complex64>) -> Vec<Complex64> {
        self.transform.fid_to_spec_in_place(&mut fid);
        fid[self.window.clone()].to_vec()
    }

    fn phase(&self, params: &[f64]) -> Vec<Complex64> {
        let phi0 = params[self.layout.phi0()];
        let phi1 = params[self.layout.phi1()];
        self.frequency
            .iter()
            .map(|nu| Complex64::from_polar(1.0, -(phi0 + 2.0 * PI * nu * phi1)))
            .collect()
    }

    /// Time-domain metabolite model, optionally restricted to a subset of basis functions.
    fn time_model(
        &self,
        params: &[f64],
        lineshapes: &[Vec<Complex64>],
        only: Option<usize>,
    ) -> Vec<Complex64> {
        let mut model = vec![Complex64::new(0.0, 0.0); self.time.len()];
        for (index, fid) in self.basis.iter().enumerate() {
            if only.is_some_and(|selected| selected != index) {
                continue;
            }
            let amplitude = params[index];
            if amplitude == 0.0 {
                continue;
            }
            let shape = &lineshapes[self.groups[index]];
            for ((value, basis), decay) in model.iter_mut().zip(fid).zip(shape) {
                *value += amplitude * *basis * *decay;
            }
        }
        model
    }

    pub fn baseline(&self, params: &[f64]) -> Vec<Complex64> {
        let mut baseline = vec![Complex64::new(0.0, 0.0); self.window.len()];
        for (term, polynomial) in self.polynomials.iter().enumerate() {
            let coefficient = Complex64::new(
                params[self.layout.baseline(term, false)],
                params[self.layout.baseline(term, true)],
            );
            for (value, p) in baseline.iter_mut().zip(polynomial) {
                *value += coefficient * *p;
            }
        }
        baseline
    }

    /// Model spectrum over the fit window.
    pub fn predict(&self, params: &[f64]) -> Vec<Complex64> {
        let lineshapes = self.lineshapes(params);
        let spectrum = self.windowed(self.time_model(params, &lineshapes, None));
        let phase = self.phase(params);
        let baseline = self.baseline(params);
        spectrum
            .iter()
            .zip(&phase)
            .zip(&baseline)
            .map(|((value, rotation), offset)| *value * *rotation + *offset)
            .collect()
    }

    /// Phased spectrum of a single fitted basis function over the fit window.
    pub fn component(&self, params: &[f64], index: usize) -> Vec<Complex64> {
        let lineshapes = self.lineshapes(params);
        let spectrum = self.windowed(self.time_model(params, &lineshapes, Some(index)));
        spectrum
            .iter()
            .zip(self.phase(params))
            .map(|(value, rotation)| value * rotation)
            .collect()
    }

    pub fn residual(&self, params: &[f64]) -> Vec<f64> {
        let predicted = self.predict(params);
        let difference: Vec<Complex64> = self
            .data
            .iter()
            .zip(&predicted)
            .map(|(data, model)| data - model)
            .collect();
        stack(&difference)
    }

    pub fn sse(&self, params: &[f64]) -> f64 {
        self.data
            .iter()
            .zip(self.predict(params))
            .map(|(data, model)| (data - model).norm_sqr())
            .sum()
    }

    /// Columns `∂S/∂p_j` over the window; fixed parameters get zero columns.
    pub fn jacobian(&self, params: &[f64]) -> Vec<Vec<f64>> {
        let layout = &self.layout;
        let lineshapes = self.lineshapes(params);
        let phase = self.phase(params);
        let phased = |spectrum: Vec<Complex64>| -> Vec<Complex64> {
            spectrum
                .iter()
                .zip(&phase)
                .map(|(value, rotation)| value * rotation)
                .collect()
        };

        let mut columns = vec![Vec::new(); layout.len()];
        let mut group_sums =
            vec![vec![Complex64::new(0.0, 0.0); self.time.len()]; layout.group_count];

        for (index, fid) in self.basis.iter().enumerate() {
            let group = self.groups[index];
            let shape = &lineshapes[group];
            let broadened: Vec<Complex64> =
                fid.iter().zip(shape).map(|(basis, decay)| *basis * *decay).collect();
            for (sum, value) in group_sums[group].iter_mut().zip(&broadened) {
                *sum += params[index] * *value;
            }
            columns[index] = stack(&phased(self.windowed(broadened)));
        }

        let mut total = vec![Complex64::new(0.0, 0.0); self.time.len()];
        for (group, sum) in group_sums.iter().enumerate() {
            for (value, contribution) in total.iter_mut().zip(sum) {
                *value += contribution;
            }

            let d_gamma: Vec<Complex64> =
                sum.iter().zip(&self.time).map(|(value, t)| -*t * *value).collect();
            columns[layout.gamma(group)] = stack(&phased(self.windowed(d_gamma)));

            if let Some(sigma_index) = layout.sigma(group) {
                let sigma = params[sigma_index];
                let d_sigma: Vec<Complex64> = sum
                    .iter()
                    .zip(&self.time)
                    .map(|(value, t)| -2.0 * sigma * t * t * *value)
                    .collect();
                columns[sigma_index] = stack(&phased(self.windowed(d_sigma)));
            }

            let d_eps: Vec<Complex64> = sum
                .iter()
                .zip(&self.time)
                .map(|(value, t)| -I * *t * *value)
                .collect();
            columns[layout.eps(group)] = stack(&phased(self.windowed(d_eps)));
        }

        let model = phased(self.windowed(total));
        let d_phi0: Vec<Complex64> = model.iter().map(|value| -I * *value).collect();
        let d_phi1: Vec<Complex64> = model
            .iter()
            .zip(&self.frequency)
            .map(|(value, nu)| -I * (2.0 * PI * nu) * *value)
            .collect();
        columns[layout.phi0()] = stack(&d_phi0);
        columns[layout.phi1()] = stack(&d_phi1);

        let m = self.window.len();
        for (term, polynomial) in self.polynomials.iter().enumerate() {
            let mut real = vec![0.0; 2 * m];
            let mut imaginary = vec![0.0; 2 * m];
            if !layout.baseline_fixed {
                real[..m].copy_from_slice(polynomial);
                imaginary[m..].copy_from_slice(polynomial);
            }
            columns[layout.baseline(term, false)] = real;
            columns[layout.baseline(term, true)] = imaginary;
        }

        columns
    }

    /// Unphased, stacked design columns for concentrations (and free baseline
    /// terms) at one shared lineshape.
    pub fn linear_design(&self, gamma: f64, sigma: f64, eps: f64) -> Vec<Vec<f64>> {
        let shape: Vec<Complex64> = self
            .time
            .iter()
            .map(|t| (-Complex64::new(gamma + sigma * sigma * t, eps) * *t).exp())
            .collect();
        let mut columns: Vec<Vec<f64>> = self
            .basis
            .iter()
            .map(|fid| {
                let broadened = fid.iter().zip(&shape).map(|(b, l)| *b * *l).collect();
                stack(&self.windowed(broadened))
            })
            .collect();
        if !self.layout.baseline_fixed {
            let m = self.window.len();
            for polynomial in &self.polynomials {
                let mut real = vec![0.0; 2 * m];
                real[..m].copy_from_slice(polynomial);
                let mut imaginary = vec![0.0; 2 * m];
                imaginary[m..].copy_from_slice(polynomial);
                columns.push(real);
                columns.push(imaginary);
            }
        }
        columns
    }

    pub fn stacked_data(&self) -> Vec<f64> {
        stack(&self.data)
    }
}

/// `[Re(z); Im(z)]`.
pub fn stack(values: &[Complex64]) -> Vec<f64> {
    values
        .iter()
        .map(|value| value.re)
        .chain(values.iter().map(|value| value.im))
        .collect()
}
