use super::CliError;
use anyhow::Context;
use mrsfit_core::domain::TissueFractions;
use mrsfit_core::modules::{ConjugationMode, GroupSpec};
use serde::Deserialize;
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum OutputDirectory {
    Ready,
    Declined,
}

/// Segmentation summary written by tissue-segmentation tools.
#[derive(Debug, Deserialize)]
struct SegmentationFile {
    #[serde(rename = "WM")]
    wm: f64,
    #[serde(rename = "GM")]
    gm: f64,
    #[serde(rename = "CSF")]
    csf: f64,
}

/// `warn` by default, `info` with `--verbose`; `RUST_LOG` takes precedence.
pub(super) fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(error) = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to initialise logging: {error}");
    }
}

/// Existing, non-empty output directories are replaced with `overwrite`,
/// otherwise only after a `Y` answer on `input`.
pub(super) fn prepare_output_directory(
    path: &Path,
    overwrite: bool,
    input: &mut impl BufRead,
) -> Result<OutputDirectory, CliError> {
    let occupied = path.exists()
        && (!path.is_dir()
            || fs::read_dir(path)
                .with_context(|| format!("failed to inspect '{}'", path.display()))?
                .next()
                .is_some());
    if occupied {
        if !overwrite {
            print!(
                "Output '{}' already exists. Delete it and continue? [Y,N] ",
                path.display()
            );
            std::io::stdout()
                .flush()
                .context("failed to write confirmation prompt")?;
            let mut answer = String::new();
            input
                .read_line(&mut answer)
                .context("failed to read confirmation")?;
            if answer.trim() != "Y" {
                return Ok(OutputDirectory::Declined);
            }
        }
        remove_output(path)?;
    }

    fs::create_dir_all(path)
        .with_context(|| format!("failed to create output directory '{}'", path.display()))?;
    Ok(OutputDirectory::Ready)
}

fn remove_output(path: &Path) -> Result<(), CliError> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.with_context(|| format!("failed to remove existing output '{}'", path.display()))?;
    Ok(())
}

/// Three numbers (WM GM CSF) or the path of a segmentation JSON file.
pub(super) fn parse_tissue_fractions(values: &[String]) -> Result<TissueFractions, CliError> {
    let (wm, gm, csf) = match values {
        [path] => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read tissue fractions '{path}'"))?;
            let file: SegmentationFile = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse tissue fractions '{path}'"))?;
            (file.wm, file.gm, file.csf)
        }
        [wm, gm, csf] => (fraction(wm)?, fraction(gm)?, fraction(csf)?),
        _ => {
            return Err(CliError::Usage(format!(
                "--tissue_frac expects WM GM CSF or a JSON file, got {} values",
                values.len()
            )));
        }
    };
    TissueFractions::new(wm, gm, csf).map_err(CliError::Compute)
}

fn fraction(value: &str) -> Result<f64, CliError> {
    value
        .parse()
        .map_err(|_| CliError::Usage(format!("tissue fraction '{value}' is not a number")))
}

/// Each `--combine` value names its members joined by `+` or `,`.
pub(super) fn parse_combinations(values: &[String]) -> Vec<Vec<String>> {
    values
        .iter()
        .map(|value| {
            value
                .split(['+', ','])
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .collect()
}

/// One integer is a group count, several integers are per-function indices,
/// anything else is a list of metabolite names.
pub(super) fn group_spec(values: &[String]) -> GroupSpec {
    let integers: Option<Vec<i64>> = values.iter().map(|value| value.parse().ok()).collect();
    match integers {
        _ if values.is_empty() => GroupSpec::default(),
        Some(integers) if integers.len() == 1 => GroupSpec::Count(integers[0]),
        Some(integers) => GroupSpec::Indices(integers),
        None => GroupSpec::Names(values.to_vec()),
    }
}

pub(super) fn conjugation_mode(force: bool, forbid: bool) -> ConjugationMode {
    match (force, forbid) {
        (true, _) => ConjugationMode::Force,
        (false, true) => ConjugationMode::Forbid,
        (false, false) => ConjugationMode::Auto,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        OutputDirectory, conjugation_mode, group_spec, parse_combinations, parse_tissue_fractions,
        prepare_output_directory,
    };
    use crate::cli::CliError;
    use mrsfit_core::modules::{ConjugationMode, GroupSpec};
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[test]
    fn tissue_fractions_accept_numbers_or_json() {
        let fractions = parse_tissue_fractions(&strings(&["0.4", "0.5", "0.1"])).expect("numbers");
        assert_eq!((fractions.wm, fractions.gm, fractions.csf), (0.4, 0.5, 0.1));

        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("segmentation.json");
        fs::write(&path, r#"{"WM": 0.3, "GM": 0.6, "CSF": 0.1}"#).expect("write");
        let fractions = parse_tissue_fractions(&[path.display().to_string()]).expect("json");
        assert_eq!(fractions.gm, 0.6);

        let error = parse_tissue_fractions(&strings(&["0.4", "0.5"])).expect_err("two values");
        assert!(matches!(error, CliError::Usage(_)));
        let error = parse_tissue_fractions(&strings(&["0.6", "0.6", "0.1"])).expect_err("sum > 1");
        assert!(matches!(error, CliError::Compute(_)));
    }

    #[test]
    fn group_spec_is_sniffed_from_values() {
        assert_eq!(group_spec(&[]), GroupSpec::Count(0));
        assert_eq!(group_spec(&strings(&["2"])), GroupSpec::Count(2));
        assert_eq!(
            group_spec(&strings(&["0", "1", "1"])),
            GroupSpec::Indices(vec![0, 1, 1])
        );
        assert_eq!(
            group_spec(&strings(&["NAA", "Cr+PCr"])),
            GroupSpec::Names(strings(&["NAA", "Cr+PCr"]))
        );
    }

    #[test]
    fn combinations_split_on_plus_and_comma() {
        assert_eq!(
            parse_combinations(&strings(&["Cr+PCr", "Glu,Gln", "NAA + NAAG"])),
            vec![
                strings(&["Cr", "PCr"]),
                strings(&["Glu", "Gln"]),
                strings(&["NAA", "NAAG"]),
            ]
        );
        assert_eq!(parse_combinations(&strings(&["Glu Gln"])), vec![strings(&["Glu Gln"])]);
    }

    #[test]
    fn conjugation_flags_map_to_modes() {
        assert_eq!(conjugation_mode(true, false), ConjugationMode::Force);
        assert_eq!(conjugation_mode(false, true), ConjugationMode::Forbid);
        assert_eq!(conjugation_mode(false, false), ConjugationMode::Auto);
    }

    #[test]
    fn occupied_output_requires_confirmation() {
        let temp = TempDir::new().expect("tempdir");
        let output = temp.path().join("out");
        fs::create_dir_all(&output).expect("create");
        fs::write(output.join("stale.csv"), "old").expect("write");

        let answer = prepare_output_directory(&output, false, &mut Cursor::new("N\n"))
            .expect("prompt");
        assert_eq!(answer, OutputDirectory::Declined);
        assert!(output.join("stale.csv").is_file());

        let answer = prepare_output_directory(&output, false, &mut Cursor::new("Y\n"))
            .expect("prompt");
        assert_eq!(answer, OutputDirectory::Ready);
        assert!(output.is_dir());
        assert!(!output.join("stale.csv").exists());
    }

    #[test]
    fn overwrite_replaces_without_prompting() {
        let temp = TempDir::new().expect("tempdir");
        let output = temp.path().join("out");
        fs::create_dir_all(&output).expect("create");
        fs::write(output.join("stale.csv"), "old").expect("write");

        let answer = prepare_output_directory(&output, true, &mut Cursor::new(""))
            .expect("overwrite");
        assert_eq!(answer, OutputDirectory::Ready);
        assert!(!output.join("stale.csv").exists());
    }
}
