use mrsfit_core::domain::{FitAlgorithm, Lineshape};
use mrsfit_core::modules::fitting::{ConcentrationKind, FitOptions, SamplerOptions};
use mrsfit_core::modules::{LogConfig, PipelineOptions, run_fit_pipeline};
use num_complex::Complex64;
use serde_json::json;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const POINTS: usize = 1024;
const DWELL: f64 = 1.0 / 4000.0;
const CENTRAL_MHZ: f64 = 123.2;
const LINEWIDTH_HZ: f64 = 8.0;

const BASIS: [(&str, &[(f64, f64)]); 5] = [
    ("Cr", &[(3.03, 3.0), (3.92, 2.0)]),
    ("Gln", &[(2.45, 1.0), (3.77, 1.0)]),
    ("Glu", &[(2.35, 1.0), (3.75, 1.0)]),
    ("NAA", &[(2.01, 3.0)]),
    ("PCr", &[(3.12, 3.0), (3.98, 2.0)]),
];

fn peak_fid(peaks: &[(f64, f64)]) -> Vec<Complex64> {
    (0..POINTS)
        .map(|n| {
            let t = n as f64 * DWELL;
            peaks
                .iter()
                .map(|(ppm, amplitude)| {
                    let hz = (ppm - 4.65) * CENTRAL_MHZ;
                    Complex64::from_polar(*amplitude, 2.0 * PI * hz * t)
                        * (-PI * LINEWIDTH_HZ * t).exp()
                })
                .sum()
        })
        .collect()
}

fn mixture(amplitudes: &[(&str, f64)]) -> Vec<Complex64> {
    let mut fid = vec![Complex64::new(0.0, 0.0); POINTS];
    for (name, amplitude) in amplitudes {
        let (_, peaks) = BASIS
            .iter()
            .find(|(candidate, _)| candidate == name)
            .expect("known basis function");
        for (sum, value) in fid.iter_mut().zip(peak_fid(peaks)) {
            *sum += value * *amplitude;
        }
    }
    fid
}

fn write_fid(path: &Path, fid: &[Complex64]) {
    let content = json!({
        "dwelltime": DWELL,
        "spectrometer_frequency": CENTRAL_MHZ,
        "nucleus": "1H",
        "fid_re": fid.iter().map(|value| value.re).collect::<Vec<_>>(),
        "fid_im": fid.iter().map(|value| value.im).collect::<Vec<_>>(),
    });
    fs::write(path, content.to_string()).expect("fid fixture should be written");
}

/// FSL basis files store the conjugate of the FID convention used for data.
fn write_basis_dir(directory: &Path, echo_time_ms: Option<f64>) {
    fs::create_dir_all(directory).expect("basis directory should be created");
    for (name, peaks) in BASIS {
        let fid = peak_fid(peaks);
        let mut content = json!({
            "basis": {
                "basis_re": fid.iter().map(|value| value.re).collect::<Vec<_>>(),
                "basis_im": fid.iter().map(|value| -value.im).collect::<Vec<_>>(),
                "basis_dwell": DWELL,
                "basis_centre": CENTRAL_MHZ,
                "basis_width": 1.0 / DWELL,
                "basis_name": name,
            },
        });
        if let Some(echo_time) = echo_time_ms {
            content["meta"] = json!({ "TE": echo_time });
        }
        fs::write(directory.join(format!("{name}.json")), content.to_string())
            .expect("basis fixture should be written");
    }
}

fn fixture(temp: &TempDir, data: &[(&str, f64)], echo_time_ms: Option<f64>) -> PipelineOptions {
    let data_path = temp.path().join("metab.json");
    write_fid(&data_path, &mixture(data));
    let basis_path = temp.path().join("basis");
    write_basis_dir(&basis_path, echo_time_ms);
    PipelineOptions {
        data: data_path,
        basis: basis_path,
        output: temp.path().join("out"),
        ..PipelineOptions::default()
    }
}

fn mean_of(stats: &[mrsfit_core::modules::fitting::ConcentrationStat], name: &str) -> f64 {
    stats
        .iter()
        .find(|stat| stat.name == name)
        .unwrap_or_else(|| panic!("row '{name}' should be reported"))
        .mean
}

#[test]
fn scaled_single_metabolite_is_recovered_end_to_end() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 3.0)], None);
    options.fit = FitOptions {
        baseline_order: -1,
        ..FitOptions::default()
    };

    let report = run_fit_pipeline(&options, LogConfig::default()).expect("pipeline should run");
    let raw = report
        .result
        .concentration_summary(ConcentrationKind::Raw)
        .expect("raw amplitudes");
    assert!((mean_of(&raw, "NAA") - 3.0).abs() <= 1.0e-3);
    for name in ["Cr", "Gln", "Glu", "PCr"] {
        assert!(mean_of(&raw, name).abs() <= 1.0e-3, "{name} should vanish");
    }

    for artifact in [
        "options.json",
        "summary.csv",
        "concentrations.csv",
        "qc.csv",
        "all_parameters.csv",
        "fit_report.txt",
    ] {
        assert!(
            options.output.join(artifact).is_file(),
            "artifact '{artifact}' should exist"
        );
    }
    assert!(!options.output.join("concentration_samples.csv").exists());
    assert!(!options.output.join("all_samples.csv").exists());
}

#[test]
fn internal_reference_and_default_combinations_are_reported() {
    let temp = TempDir::new().expect("tempdir should be created");
    let options = fixture(
        &temp,
        &[("NAA", 2.0), ("Cr", 1.0), ("PCr", 1.0), ("Glu", 0.5), ("Gln", 0.5)],
        None,
    );

    let report = run_fit_pipeline(&options, LogConfig::default()).expect("pipeline should run");
    let internal = report
        .result
        .concentration_summary(ConcentrationKind::Internal)
        .expect("internal ratios");
    assert!((mean_of(&internal, "NAA") - 1.0).abs() <= 1.0e-3);
    assert!((mean_of(&internal, "Glu+Gln") - 0.5).abs() <= 1.0e-3);
    assert!((mean_of(&internal, "Cr+PCr") - 1.0).abs() <= 1.0e-3);

    let summary = fs::read_to_string(options.output.join("summary.csv")).expect("summary");
    assert!(summary.starts_with("Metab,mMol/kg,%CRLB,/Cr,SNR,FWHM\n"));
    assert!(summary.lines().any(|line| line.starts_with("Glu+Gln,")));
    assert!(summary.lines().any(|line| line.starts_with("Glu,")));
}

#[test]
fn water_reference_yields_molal_concentrations() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 2.0), ("Cr", 1.0), ("PCr", 1.0)], Some(30.0));
    let water_path = temp.path().join("water.json");
    write_fid(&water_path, &peak_fid(&[(4.65, 1000.0)]));
    options.water = Some(water_path);

    let report = run_fit_pipeline(&options, LogConfig::default()).expect("pipeline should run");
    let molality = report
        .result
        .concentration_summary(ConcentrationKind::Molality)
        .expect("water referencing");

    // Water term (pure water, CSF T2) over metabolite attenuation at 3T.
    let relaxation = (-0.03_f64 / 2.55).exp() / (-0.03_f64 / 0.271).exp();
    // Cr carries 5 units of area per unit amplitude inside 2-5 ppm.
    let per_unit = 55.51e3 * 2.0 / 5.0 * 5.0 / 1000.0 * relaxation;
    let naa = mean_of(&molality, "NAA");
    assert!((naa / (2.0 * per_unit) - 1.0).abs() <= 0.05, "NAA {naa} mmol/kg");
    assert!((naa / mean_of(&molality, "Cr") - 2.0).abs() <= 1.0e-3);
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.contains("pure water"))
    );
}

#[test]
fn missing_echo_time_keeps_internal_referencing() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 2.0), ("Cr", 1.0), ("PCr", 1.0)], None);
    let water_path = temp.path().join("water.json");
    write_fid(&water_path, &peak_fid(&[(4.65, 1000.0)]));
    options.water = Some(water_path);

    let report = run_fit_pipeline(&options, LogConfig { verbose: true }).expect("pipeline");
    assert!(
        report
            .result
            .concentration_summary(ConcentrationKind::Molality)
            .is_none()
    );
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.contains("echo time"))
    );
    let text = fs::read_to_string(options.output.join("fit_report.txt")).expect("report");
    assert!(text.contains("echo time"));
}

#[test]
fn unmeasurable_water_reference_degrades_to_internal_ratios() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 2.0), ("Cr", 1.0), ("PCr", 1.0)], None);
    // An inverted singlet at 1.3 ppm has no positive area in the 2-5 ppm
    // reference window.
    let inverted = peak_fid(&[(1.3, -1.0)]);
    let content = json!({
        "basis": {
            "basis_re": inverted.iter().map(|value| value.re).collect::<Vec<_>>(),
            "basis_im": inverted.iter().map(|value| -value.im).collect::<Vec<_>>(),
            "basis_dwell": DWELL,
            "basis_centre": CENTRAL_MHZ,
            "basis_name": "Ref",
        },
    });
    fs::write(options.basis.join("Ref.json"), content.to_string())
        .expect("reference fixture should be written");
    let water_path = temp.path().join("water.json");
    write_fid(&water_path, &peak_fid(&[(4.65, 1000.0)]));
    options.water = Some(water_path);
    options.quantification.internal_reference = vec!["Ref".to_string(), "Cr".to_string()];
    options.combine = Some(Vec::new());

    let report = run_fit_pipeline(&options, LogConfig::default()).expect("pipeline should run");
    assert!(
        report
            .result
            .concentration_summary(ConcentrationKind::Molality)
            .is_none()
    );
    assert!(
        report
            .result
            .concentration_summary(ConcentrationKind::Internal)
            .is_some()
    );
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.contains("water referencing skipped"))
    );
    assert!(options.output.join("summary.csv").is_file());
}

#[test]
fn keep_list_restricts_the_fitted_basis() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 2.0), ("Cr", 1.0)], None);
    options.keep = vec!["NAA".to_string(), "Cr".to_string()];
    options.quantification.internal_reference = vec!["Cr".to_string()];
    options.combine = Some(Vec::new());
    options.fit.lineshape = Lineshape::Lorentzian;

    let report = run_fit_pipeline(&options, LogConfig::default()).expect("pipeline should run");
    assert_eq!(report.result.basis_names(), ["Cr", "NAA"]);
    let internal = report
        .result
        .concentration_summary(ConcentrationKind::Internal)
        .expect("internal ratios");
    assert!((mean_of(&internal, "NAA") - 2.0).abs() <= 1.0e-3);
}

#[test]
fn invalid_request_leaves_only_the_options_echo() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 1.0)], None);
    options.ignore = vec!["Lac".to_string()];

    let error = run_fit_pipeline(&options, LogConfig::default()).expect_err("unknown name");
    assert_eq!(error.placeholder(), "INPUT.UNKNOWN_METABOLITE");
    assert_eq!(error.exit_code(), 2);
    assert!(options.output.join("options.json").is_file());
    assert!(!options.output.join("summary.csv").exists());

    let echo: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(options.output.join("options.json")).expect("options echo"),
    )
    .expect("options echo should be JSON");
    assert_eq!(echo["options"]["ignore"][0], "Lac");
    assert!(echo["version"].is_string());
}

#[test]
fn macromolecule_components_join_the_fit() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 2.0), ("Cr", 1.0), ("PCr", 1.0)], None);
    options.add_mm = true;

    let report = run_fit_pipeline(&options, LogConfig::default()).expect("pipeline should run");
    let names = report.result.basis_names();
    assert_eq!(names.len(), BASIS.len() + 5);
    assert_eq!(names[BASIS.len()], "MM09");
    assert_eq!(
        report.result.groups()[BASIS.len()..],
        [1, 2, 3, 4, 5]
    );
}

#[test]
fn sampling_strategy_writes_sample_tables() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut options = fixture(&temp, &[("NAA", 2.0), ("Cr", 1.0), ("PCr", 1.0)], None);
    options.fit = FitOptions {
        algorithm: FitAlgorithm::MetropolisHastings,
        lineshape: Lineshape::Lorentzian,
        sampler: SamplerOptions {
            samples: 40,
            burnin: 20,
            thin: 1,
            seed: 3,
        },
        ..FitOptions::default()
    };

    let report = run_fit_pipeline(&options, LogConfig::default()).expect("pipeline should run");
    assert!(report.result.estimates().is_sampled());

    let samples =
        fs::read_to_string(options.output.join("concentration_samples.csv")).expect("samples");
    assert_eq!(samples.lines().count(), 41);
    assert!(samples.starts_with("sample,Cr,"));
    let all = fs::read_to_string(options.output.join("all_samples.csv")).expect("all samples");
    assert_eq!(all.lines().count(), 41);
}
