mod commands;
mod helpers;

use clap::{ArgAction, Parser};
use mrsfit_core::domain::MrsError;
use std::path::PathBuf;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let error = error.as_mrs_error();
            eprintln!("{}", error.diagnostic_line());
            if let Some(summary_line) = error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("mrsfit".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => commands::run_fit_command(cli),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// Fit an MRS spectrum against a basis set and quantify metabolite concentrations.
#[derive(Debug, Parser)]
#[command(name = "mrsfit", version, about = "MRS spectral fitting and quantification")]
struct Cli {
    /// FID to fit (JSON)
    #[arg(long, value_name = "FILE")]
    data: PathBuf,
    /// Directory of basis JSON files
    #[arg(long, value_name = "DIR")]
    basis: PathBuf,
    /// Output directory
    #[arg(long, value_name = "DIR")]
    output: PathBuf,

    /// Fitting algorithm
    #[arg(long, default_value = "Newton", value_parser = ["Newton", "MH"])]
    algo: String,
    /// Basis functions to leave out of the fit
    #[arg(long, num_args = 1.., value_name = "METAB")]
    ignore: Vec<String>,
    /// Only fit these basis functions
    #[arg(long, num_args = 1.., value_name = "METAB")]
    keep: Vec<String>,
    /// Report a combined row, members joined by `+` or `,` (e.g. `--combine Cr+PCr`); repeatable
    #[arg(long, action = ArgAction::Append, value_name = "METAB+METAB")]
    combine: Vec<String>,
    /// Fit window in ppm
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"], allow_negative_numbers = true)]
    ppmlim: Option<Vec<f64>>,
    /// Unsuppressed water FID for absolute quantification
    #[arg(long, value_name = "FILE")]
    h2o: Option<PathBuf>,
    /// Baseline polynomial order, -1 disables the baseline
    #[arg(long = "baseline_order", default_value_t = 2, allow_negative_numbers = true)]
    baseline_order: i32,
    /// Group count, one group index per basis function, or metabolite names
    #[arg(long = "metab_groups", num_args = 1.., value_name = "GROUP")]
    metab_groups: Vec<String>,
    /// Append synthetic macromolecule peaks
    #[arg(long = "add_MM")]
    add_mm: bool,
    /// Lorentzian lineshape instead of Voigt
    #[arg(long)]
    lorentzian: bool,
    /// Basis functions rescaled independently of the others
    #[arg(long = "ind_scale", num_args = 1.., value_name = "METAB")]
    ind_scale: Vec<String>,
    /// Disable the priors of the MH sampler
    #[arg(long = "disable_MH_priors")]
    disable_mh_priors: bool,
    /// Number of MH samples kept after burn-in
    #[arg(long = "mh_samples", default_value_t = 500)]
    mh_samples: usize,

    /// T1 relaxation file (recorded only)
    #[arg(long, value_name = "FILE")]
    t1: Option<PathBuf>,
    /// Echo time in ms
    #[arg(long = "TE")]
    te: Option<f64>,
    /// Repetition time in s
    #[arg(long = "TR")]
    tr: Option<f64>,
    /// Tissue fractions: three numbers (WM GM CSF) or a segmentation JSON file
    #[arg(long = "tissue_frac", num_args = 1..=3, value_name = "FRAC")]
    tissue_frac: Vec<String>,
    /// Internal reference metabolites
    #[arg(long = "internal_ref", num_args = 1.., default_values = ["Cr", "PCr"])]
    internal_ref: Vec<String>,
    /// Additional scaling of water-referenced concentrations
    #[arg(long = "h2o_scale", default_value_t = 1.0)]
    h2o_scale: f64,

    /// Accepted for compatibility; no HTML report is produced
    #[arg(long)]
    report: bool,
    /// Print warnings and progress
    #[arg(long)]
    verbose: bool,
    /// Zero-order phase the FID on its 2.8-3.2 ppm peak
    #[arg(long = "phase_correct")]
    phase_correct: bool,
    /// Replace an existing output directory without asking
    #[arg(long)]
    overwrite: bool,
    /// Always conjugate the FID
    #[arg(long = "conj_fid", conflicts_with = "no_conj_fid")]
    conj_fid: bool,
    /// Never conjugate the FID
    #[arg(long = "no_conj_fid")]
    no_conj_fid: bool,
    /// Always conjugate the basis
    #[arg(long = "conj_basis", conflicts_with = "no_conj_basis")]
    conj_basis: bool,
    /// Never conjugate the basis
    #[arg(long = "no_conj_basis")]
    no_conj_basis: bool,
    /// Fit the data without amplitude rescaling
    #[arg(long = "no_rescale")]
    no_rescale: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(MrsError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_mrs_error(&self) -> MrsError {
        match self {
            Self::Usage(message) => MrsError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => MrsError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
