//! End-to-end fit and quantification of one FID.
//!
//! Stages run strictly in order: load, select, orient, rescale, group, fit,
//! quantify, combine, write. Only `options.json` is written before the fit;
//! a failing stage leaves no tables behind.

use super::aggregate::{ResultAggregator, default_combinations};
use super::fitting::{FitDispatcher, FitOptions, FitResult};
use super::groups::{GroupSpec, add_macromolecule_peaks, build_groups};
use super::inputs::{load_basis_dir, load_fid};
use super::quantify::{QuantificationOptions, scale_concentrations, water_reference_amplitude};
use super::repository::{ConjugationMode, SignalBasisRepository};
use super::rescale::{Rescaler, ScalingRecord};
use super::serialization::{format_fixed_f64, write_json_artifact, write_text_artifact};
use crate::common::constants::{MACROMOLECULE_GAMMA, MACROMOLECULE_SIGMA};
use crate::domain::{MrsError, MrsErrorCategory, MrsResult};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

pub const OPTIONS_FILE: &str = "options.json";
pub const REPORT_FILE: &str = "fit_report.txt";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub data: PathBuf,
    pub basis: PathBuf,
    pub output: PathBuf,
    pub water: Option<PathBuf>,
    pub keep: Vec<String>,
    pub ignore: Vec<String>,
    /// Explicit combinations; the default list when absent.
    pub combine: Option<Vec<Vec<String>>>,
    pub metab_groups: GroupSpec,
    pub add_mm: bool,
    pub ind_scale: Vec<String>,
    pub no_rescale: bool,
    pub phase_correct: bool,
    pub conj_fid: ConjugationMode,
    pub conj_basis: ConjugationMode,
    pub fit: FitOptions,
    pub quantification: QuantificationOptions,
    /// Recorded in the options echo only.
    pub report: bool,
    pub t1: Option<PathBuf>,
}

/// Whether collected warnings are also emitted as log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogConfig {
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub result: FitResult,
    pub artifacts: Vec<PathBuf>,
    pub warnings: Vec<String>,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Serialize)]
struct OptionsEcho<'a> {
    version: &'static str,
    timestamp: String,
    options: &'a PipelineOptions,
}

pub fn run_fit_pipeline(options: &PipelineOptions, log: LogConfig) -> MrsResult<PipelineReport> {
    let started = Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    fs::create_dir_all(&options.output).map_err(|error| {
        MrsError::io_system(
            "IO.OUTPUT_DIR",
            format!(
                "failed to create output directory '{}': {error}",
                options.output.display()
            ),
        )
    })?;
    let options_path = options.output.join(OPTIONS_FILE);
    write_json_artifact(
        &options_path,
        &OptionsEcho {
            version: env!("CARGO_PKG_VERSION"),
            timestamp: timestamp.clone(),
            options,
        },
    )?;
    let mut artifacts = vec![options_path];
    let mut warnings = Vec::new();

    let signal = load_fid(&options.data)?;
    let water = options.water.as_deref().map(load_fid).transpose()?;
    let basis = load_basis_dir(&options.basis, &signal.geometry())?;
    info!(
        points = signal.len(),
        basis = basis.len(),
        water = water.is_some(),
        "inputs loaded"
    );
    let mut repository = SignalBasisRepository::new(signal, basis, water)?;

    repository.select_basis(&options.keep, &options.ignore)?;
    if repository.orient_signal(options.conj_fid)? && options.conj_fid == ConjugationMode::Auto {
        warnings.push("FID appeared conjugated and was conjugated before fitting".to_string());
    }
    if repository.orient_basis(options.conj_basis)? && options.conj_basis == ConjugationMode::Auto
    {
        warnings.push("basis appeared conjugated and was conjugated before fitting".to_string());
    }
    if options.phase_correct {
        let phase = repository.phase_correct()?;
        info!(radians = phase, "zero-order phase correction");
    }

    let mut scaling = if options.no_rescale {
        ScalingRecord::identity(repository.basis().len(), repository.water().is_some())
    } else {
        let independent: BTreeSet<String> = options.ind_scale.iter().cloned().collect();
        Rescaler::default().rescale(&mut repository, &independent)?
    };

    let mut groups = build_groups(&options.metab_groups, repository.basis().names())?;
    if options.add_mm {
        let extension = add_macromolecule_peaks(
            repository.basis(),
            &groups,
            &repository.geometry(),
            MACROMOLECULE_GAMMA,
            MACROMOLECULE_SIGMA,
        )?;
        info!(added = ?extension.added_names, "macromolecule peaks added");
        scaling.extend_unscaled(extension.added_names.len());
        repository.replace_basis(extension.basis)?;
        groups = extension.groups;
    }

    let mut result = FitDispatcher::fit(
        repository.signal(),
        repository.basis(),
        &groups,
        &options.fit,
    )?;

    let mut quantification = options.quantification.clone();
    if quantification.echo_time.is_none() {
        quantification.echo_time = repository.basis().echo_time();
    }
    // A water signal that cannot be measured degrades to internal referencing.
    let water_amplitude = match repository.water() {
        None => None,
        Some(water) => {
            match water_reference_amplitude(water, repository.basis(), &scaling, &quantification) {
                Ok(amplitude) => Some(amplitude),
                Err(error) if error.category() == MrsErrorCategory::ComputationError => {
                    warnings.push(format!(
                        "water referencing skipped: {}; reporting internal-reference ratios only",
                        error.message()
                    ));
                    None
                }
                Err(error) => return Err(error),
            }
        }
    };
    scale_concentrations(
        &mut result,
        &scaling,
        water_amplitude,
        &quantification,
        repository.signal().spectrometer_frequency(),
    )?;

    let combinations = options
        .combine
        .clone()
        .unwrap_or_else(|| default_combinations(result.basis_names()));
    ResultAggregator::combine(&mut result, &combinations)?;

    warnings.extend(result.warnings().iter().cloned());
    if log.verbose {
        for warning in &warnings {
            warn!("{warning}");
        }
    }

    artifacts.extend(ResultAggregator::write_tables(&result, &options.output)?);
    let report_path = options.output.join(REPORT_FILE);
    write_text_artifact(
        &report_path,
        &render_report(&result, &warnings, &timestamp, &options.output),
    )?;
    artifacts.push(report_path);

    let elapsed_seconds = started.elapsed().as_secs_f64();
    info!(elapsed_seconds, artifacts = artifacts.len(), "pipeline finished");
    Ok(PipelineReport {
        result,
        artifacts,
        warnings,
        elapsed_seconds,
    })
}

fn render_report(
    result: &FitResult,
    warnings: &[String],
    timestamp: &str,
    output: &Path,
) -> String {
    let diagnostics = result.diagnostics();
    let kind = result.preferred_kind();
    let mut lines = vec![
        format!("mrsfit {} fit report", env!("CARGO_PKG_VERSION")),
        format!("generated  {timestamp}"),
        format!("output     {}", output.display()),
        format!("algorithm  {}", result.algorithm()),
        format!("lineshape  {}", result.lineshape().as_str()),
        format!("elapsed    {:.3} s", diagnostics.elapsed_seconds),
    ];
    if let Some(iterations) = diagnostics.iterations {
        lines.push(format!("iterations {iterations}"));
    }
    if let Some(converged) = diagnostics.converged {
        lines.push(format!("converged  {converged}"));
    }
    lines.push(format!("fit MSE    {:.6e}", result.qc().mse));
    lines.push(String::new());

    lines.push(format!("{:<16}{:>14}{:>14}", "Metab", kind.as_str(), "sd"));
    if let Some(stats) = result.concentration_summary(kind) {
        for stat in stats {
            lines.push(format!(
                "{:<16}{}{}",
                stat.name,
                format_fixed_f64(stat.mean, 14, 4),
                format_fixed_f64(stat.sd, 14, 4)
            ));
        }
    }

    if !warnings.is_empty() {
        lines.push(String::new());
        lines.push("warnings".to_string());
        lines.extend(warnings.iter().map(|warning| format!("  - {warning}")));
    }
    lines.join("\n")
}
