use super::helpers::{
    OutputDirectory, conjugation_mode, group_spec, init_logging, parse_combinations,
    parse_tissue_fractions, prepare_output_directory,
};
use super::{Cli, CliError};
use mrsfit_core::domain::{FitAlgorithm, Lineshape, PpmWindow};
use mrsfit_core::modules::fitting::{FitOptions, SamplerOptions};
use mrsfit_core::modules::quantify::QuantificationOptions;
use mrsfit_core::modules::{LogConfig, PipelineOptions, run_fit_pipeline};
use std::io;
use tracing::debug;

pub(super) fn run_fit_command(cli: Cli) -> Result<i32, CliError> {
    init_logging(cli.verbose);

    let options = pipeline_options(&cli)?;
    debug!(output = %cli.output.display(), algorithm = %options.fit.algorithm, "options resolved");
    let stdin = io::stdin();
    match prepare_output_directory(&cli.output, cli.overwrite, &mut stdin.lock())? {
        OutputDirectory::Ready => {}
        OutputDirectory::Declined => {
            println!("Output directory '{}' left untouched.", cli.output.display());
            return Ok(0);
        }
    }

    let report = run_fit_pipeline(
        &options,
        LogConfig {
            verbose: cli.verbose,
        },
    )
    .map_err(CliError::Compute)?;

    println!(
        "Fit completed in {:.2} s; {} files written to '{}'.",
        report.elapsed_seconds,
        report.artifacts.len(),
        cli.output.display()
    );
    if !report.warnings.is_empty() && !cli.verbose {
        println!(
            "{} warning(s) recorded in fit_report.txt; rerun with --verbose to print them.",
            report.warnings.len()
        );
    }
    Ok(0)
}

fn pipeline_options(cli: &Cli) -> Result<PipelineOptions, CliError> {
    let ppm_window = match cli.ppmlim.as_deref() {
        None => None,
        Some([low, high]) => Some(PpmWindow::new(*low, *high).map_err(CliError::Compute)?),
        Some(values) => {
            return Err(CliError::Usage(format!(
                "--ppmlim expects LOW HIGH, got {} values",
                values.len()
            )));
        }
    };
    let algorithm = match cli.algo.as_str() {
        "MH" => FitAlgorithm::MetropolisHastings,
        _ => FitAlgorithm::Newton,
    };
    let tissue_fractions = if cli.tissue_frac.is_empty() {
        None
    } else {
        Some(parse_tissue_fractions(&cli.tissue_frac)?)
    };
    let combine = if cli.combine.is_empty() {
        None
    } else {
        Some(parse_combinations(&cli.combine))
    };

    Ok(PipelineOptions {
        data: cli.data.clone(),
        basis: cli.basis.clone(),
        output: cli.output.clone(),
        water: cli.h2o.clone(),
        keep: cli.keep.clone(),
        ignore: cli.ignore.clone(),
        combine,
        metab_groups: group_spec(&cli.metab_groups),
        add_mm: cli.add_mm,
        ind_scale: cli.ind_scale.clone(),
        no_rescale: cli.no_rescale,
        phase_correct: cli.phase_correct,
        conj_fid: conjugation_mode(cli.conj_fid, cli.no_conj_fid),
        conj_basis: conjugation_mode(cli.conj_basis, cli.no_conj_basis),
        fit: FitOptions {
            ppm_window,
            algorithm,
            baseline_order: cli.baseline_order,
            lineshape: if cli.lorentzian {
                Lineshape::Lorentzian
            } else {
                Lineshape::Voigt
            },
            disable_mh_priors: cli.disable_mh_priors,
            sampler: SamplerOptions {
                samples: cli.mh_samples,
                ..SamplerOptions::default()
            },
            ..FitOptions::default()
        },
        quantification: QuantificationOptions {
            internal_reference: cli.internal_ref.clone(),
            echo_time: cli.te.map(|milliseconds| milliseconds / 1000.0),
            repetition_time: cli.tr,
            tissue_fractions,
            extra_scale: cli.h2o_scale,
            ..QuantificationOptions::default()
        },
        report: cli.report,
        t1: cli.t1.clone(),
    })
}
