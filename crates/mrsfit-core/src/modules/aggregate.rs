//! Combined pseudo-metabolites and tabular output of a [`FitResult`].

use super::fitting::{ConcentrationKind, ConcentrationStat, FitResult, MetaboliteRow};
use super::serialization::{CsvTable, format_csv_f64};
use crate::domain::{MrsError, MrsResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Combinations reported when none are requested and every member is fitted.
pub const DEFAULT_COMBINATIONS: [&[&str]; 5] = [
    &["NAA", "NAAG"],
    &["Glu", "Gln"],
    &["GPC", "PCh"],
    &["Cr", "PCr"],
    &["Glc", "Tau"],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Summary,
    Concentrations,
    Qc,
    AllParameters,
    ConcentrationSamples,
    AllSamples,
}

impl TableKind {
    pub const ALL: [Self; 6] = [
        Self::Summary,
        Self::Concentrations,
        Self::Qc,
        Self::AllParameters,
        Self::ConcentrationSamples,
        Self::AllSamples,
    ];

    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Summary => "summary.csv",
            Self::Concentrations => "concentrations.csv",
            Self::Qc => "qc.csv",
            Self::AllParameters => "all_parameters.csv",
            Self::ConcentrationSamples => "concentration_samples.csv",
            Self::AllSamples => "all_samples.csv",
        }
    }

    pub const fn requires_samples(self) -> bool {
        matches!(self, Self::ConcentrationSamples | Self::AllSamples)
    }
}

pub fn default_combinations(names: &[String]) -> Vec<Vec<String>> {
    DEFAULT_COMBINATIONS
        .iter()
        .filter(|members| {
            members
                .iter()
                .all(|member| names.iter().any(|name| name == member))
        })
        .map(|members| members.iter().map(|member| (*member).to_string()).collect())
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Append one row per combination, named by joining its members with `+`.
    /// Basis rows are left in place.
    pub fn combine(result: &mut FitResult, combinations: &[Vec<String>]) -> MrsResult<()> {
        let mut rows = Vec::with_capacity(combinations.len());
        let mut seen: BTreeSet<String> = result
            .basis_names()
            .iter()
            .chain(result.combined().iter().map(|row| &row.name))
            .cloned()
            .collect();

        for members in combinations {
            if members.is_empty() {
                return Err(MrsError::input_validation(
                    "INPUT.COMBINE",
                    "a combination needs at least one metabolite",
                ));
            }
            let indices = members
                .iter()
                .map(|name| {
                    result.index_of(name).ok_or_else(|| {
                        MrsError::input_validation(
                            "INPUT.UNKNOWN_METABOLITE",
                            format!("cannot combine '{name}': not a fitted metabolite"),
                        )
                    })
                })
                .collect::<MrsResult<Vec<_>>>()?;
            let name = members.join("+");
            if !seen.insert(name.clone()) {
                return Err(MrsError::input_validation(
                    "INPUT.COMBINE",
                    format!("combination '{name}' duplicates an existing row"),
                ));
            }
            rows.push(MetaboliteRow {
                name,
                members: indices,
            });
        }

        result.combined.extend(rows);
        Ok(())
    }

    pub fn to_table(result: &FitResult, kind: TableKind) -> MrsResult<CsvTable> {
        match kind {
            TableKind::Summary => Ok(summary_table(result)),
            TableKind::Concentrations => Ok(concentrations_table(result)),
            TableKind::Qc => Ok(qc_table(result)),
            TableKind::AllParameters => Ok(parameters_table(result)),
            TableKind::ConcentrationSamples => concentration_samples_table(result),
            TableKind::AllSamples => all_samples_table(result),
        }
    }

    /// Every table available for `result`, written under `directory`.
    pub fn write_tables(result: &FitResult, directory: &Path) -> MrsResult<Vec<PathBuf>> {
        let sampled = result.estimates().is_sampled();
        let mut written = Vec::new();
        for kind in TableKind::ALL {
            if kind.requires_samples() && !sampled {
                continue;
            }
            let path = directory.join(kind.file_name());
            Self::to_table(result, kind)?.write(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}

fn labels(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|label| (*label).to_string()).collect()
}

fn summary_table(result: &FitResult) -> CsvTable {
    let mut table = CsvTable::new(labels(&["Metab", "mMol/kg", "%CRLB", "/Cr", "SNR", "FWHM"]));
    let raw = result.concentration_summary(ConcentrationKind::Raw);
    let molality = result.concentration_summary(ConcentrationKind::Molality);
    let internal = result.concentration_summary(ConcentrationKind::Internal);
    let basis_count = result.basis_names().len();

    for (index, row) in result.rows().into_iter().enumerate() {
        let crlb = raw.as_ref().map_or(f64::NAN, |stats| {
            let stat = &stats[index];
            100.0 * stat.sd / stat.mean.abs()
        });
        let pick = |stats: &Option<Vec<ConcentrationStat>>| {
            stats.as_ref().map_or(f64::NAN, |stats| stats[index].mean)
        };
        let (snr, fwhm) = if index < basis_count {
            (result.qc().snr[index], result.qc().fwhm_ppm[index])
        } else {
            (f64::NAN, f64::NAN)
        };
        table.push_row(vec![
            row.name,
            format_csv_f64(pick(&molality)),
            format_csv_f64(crlb),
            format_csv_f64(pick(&internal)),
            format_csv_f64(snr),
            format_csv_f64(fwhm),
        ]);
    }
    table
}

fn concentrations_table(result: &FitResult) -> CsvTable {
    let available: Vec<_> = ConcentrationKind::ALL
        .into_iter()
        .filter_map(|kind| Some((kind, result.concentration_summary(kind)?)))
        .collect();

    let mut header = vec!["Metab".to_string()];
    for (kind, _) in &available {
        header.push(format!("{}_mean", kind.as_str()));
        header.push(format!("{}_sd", kind.as_str()));
    }
    let mut table = CsvTable::new(header);

    for (index, row) in result.rows().into_iter().enumerate() {
        let mut cells = vec![row.name];
        for (_, stats) in &available {
            cells.push(format_csv_f64(stats[index].mean));
            cells.push(format_csv_f64(stats[index].sd));
        }
        table.push_row(cells);
    }
    table
}

fn qc_table(result: &FitResult) -> CsvTable {
    let mut table = CsvTable::new(labels(&["Metab", "SNR", "FWHM"]));
    let qc = result.qc();
    for (index, name) in result.basis_names().iter().enumerate() {
        table.push_row(vec![
            name.clone(),
            format_csv_f64(qc.snr[index]),
            format_csv_f64(qc.fwhm_ppm[index]),
        ]);
    }
    table
}

fn parameters_table(result: &FitResult) -> CsvTable {
    let mut table = CsvTable::new(labels(&["parameter", "mean", "sd"]));
    let mean = result.estimates().mean();
    let sd = result.estimates().sd();
    for (index, name) in result.parameter_names().iter().enumerate() {
        table.push_row(vec![
            name.clone(),
            format_csv_f64(mean[index]),
            format_csv_f64(sd[index]),
        ]);
    }
    table
}

fn sample_table(header: Vec<String>, draws: &[Vec<f64>]) -> CsvTable {
    let mut table = CsvTable::new(
        std::iter::once("sample".to_string())
            .chain(header)
            .collect(),
    );
    for (index, draw) in draws.iter().enumerate() {
        table.push_row(
            std::iter::once(index.to_string())
                .chain(draw.iter().map(|value| format_csv_f64(*value)))
                .collect(),
        );
    }
    table
}

fn samples_unavailable(kind: TableKind) -> MrsError {
    MrsError::computation(
        "RUN.TABLE_UNAVAILABLE",
        format!(
            "{} is only produced by the sampling strategy",
            kind.file_name()
        ),
    )
}

fn concentration_samples_table(result: &FitResult) -> MrsResult<CsvTable> {
    let draws = result
        .concentration_draws(result.preferred_kind())
        .ok_or_else(|| samples_unavailable(TableKind::ConcentrationSamples))?;
    let names = result.rows().into_iter().map(|row| row.name).collect();
    Ok(sample_table(names, &draws))
}

fn all_samples_table(result: &FitResult) -> MrsResult<CsvTable> {
    let samples = result
        .estimates()
        .samples()
        .ok_or_else(|| samples_unavailable(TableKind::AllSamples))?;
    Ok(sample_table(result.parameter_names().to_vec(), samples))
}

#[cfg(test)]
mod tests {
    use super::{ResultAggregator, TableKind, default_combinations};
    use crate::modules::fitting::{ConcentrationKind, FitResult};

    fn glx() -> FitResult {
        FitResult::from_amplitudes(
            vec!["Glu".to_string(), "Gln".to_string(), "NAA".to_string()],
            vec![4.0, 1.0, 6.0],
            vec![0.3, 0.4, 0.5],
        )
        .expect("amplitudes")
    }

    #[test]
    fn combination_sums_means_and_adds_sd_in_quadrature() {
        let mut result = glx();
        ResultAggregator::combine(&mut result, &[vec!["Glu".to_string(), "Gln".to_string()]])
            .expect("combine");

        let stats = result
            .concentration_summary(ConcentrationKind::Raw)
            .expect("raw");
        assert_eq!(stats.len(), 4);
        assert_eq!(stats[0].name, "Glu");
        assert_eq!(stats[1].name, "Gln");
        assert_eq!(stats[3].name, "Glu+Gln");
        assert!((stats[3].mean - 5.0).abs() <= 1.0e-12);
        assert!((stats[3].sd - 0.5).abs() <= 1.0e-12);
    }

    #[test]
    fn unknown_or_repeated_combinations_are_rejected() {
        let mut result = glx();
        let error = ResultAggregator::combine(&mut result, &[vec!["Glx".to_string()]])
            .expect_err("unknown");
        assert_eq!(error.placeholder(), "INPUT.UNKNOWN_METABOLITE");

        let pair = vec!["Glu".to_string(), "Gln".to_string()];
        let error = ResultAggregator::combine(&mut result, &[pair.clone(), pair])
            .expect_err("duplicate");
        assert_eq!(error.placeholder(), "INPUT.COMBINE");
        assert!(result.combined().is_empty());
    }

    #[test]
    fn default_combinations_require_every_member() {
        let names: Vec<String> = ["Cr", "PCr", "Glu", "NAA"]
            .iter()
            .map(|name| (*name).to_string())
            .collect();
        assert_eq!(
            default_combinations(&names),
            vec![vec!["Cr".to_string(), "PCr".to_string()]]
        );
    }

    #[test]
    fn tables_cover_every_row() {
        let mut result = glx();
        ResultAggregator::combine(&mut result, &[vec!["Glu".to_string(), "Gln".to_string()]])
            .expect("combine");

        let summary = ResultAggregator::to_table(&result, TableKind::Summary).expect("summary");
        assert_eq!(summary.rows.len(), 4);
        let row = summary.row_index("Glu+Gln").expect("combined row");
        assert_eq!(summary.cell(row, "mMol/kg"), Some(""));
        assert_eq!(summary.cell(row, "%CRLB"), Some("10"));

        let concentrations =
            ResultAggregator::to_table(&result, TableKind::Concentrations).expect("table");
        assert_eq!(concentrations.header, ["Metab", "raw_mean", "raw_sd"]);
        assert_eq!(concentrations.cell(2, "raw_mean"), Some("6"));

        let parameters =
            ResultAggregator::to_table(&result, TableKind::AllParameters).expect("table");
        assert_eq!(parameters.rows.len(), result.parameter_names().len());
        assert_eq!(
            ResultAggregator::to_table(&result, TableKind::Qc)
                .expect("qc")
                .rows
                .len(),
            3
        );
    }

    #[test]
    fn sample_tables_need_a_sampled_fit() {
        let result = glx();
        for kind in [TableKind::ConcentrationSamples, TableKind::AllSamples] {
            let error = ResultAggregator::to_table(&result, kind).expect_err("point estimates");
            assert_eq!(error.placeholder(), "RUN.TABLE_UNAVAILABLE");
        }
    }
}
