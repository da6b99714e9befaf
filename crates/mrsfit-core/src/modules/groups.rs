//! Parameter-group construction and synthetic macromolecule components.

use crate::common::constants::{MACROMOLECULE_AMPLITUDES, MACROMOLECULE_PPM};
use crate::domain::{BasisSet, GroupAssignment, MrsError, MrsResult, SpectralGeometry};
use crate::numerics::l2_norm;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

pub const MACROMOLECULE_NAMES: [&str; 5] = ["MM09", "MM12", "MM14", "MM17", "MM21"];

/// User-level grouping request.
///
/// * `Count(n)`: every basis function in group 0.
/// * `Indices`: one group id per basis function, positionally.
/// * `Names`: each entry (a metabolite name, or several joined with `+`)
///   becomes its own group in order of first appearance; unnamed functions
///   stay in group 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupSpec {
    Count(i64),
    Indices(Vec<i64>),
    Names(Vec<String>),
}

impl Default for GroupSpec {
    fn default() -> Self {
        Self::Count(0)
    }
}

pub fn build_groups(spec: &GroupSpec, basis_names: &[String]) -> MrsResult<GroupAssignment> {
    match spec {
        GroupSpec::Count(count) => {
            if *count < 0 {
                return Err(MrsError::input_validation(
                    "INPUT.GROUP_SPEC",
                    format!("group count must be non-negative, got {count}"),
                ));
            }
            GroupAssignment::single_group(basis_names.len())
        }
        GroupSpec::Indices(indices) => {
            if indices.len() != basis_names.len() {
                return Err(MrsError::input_validation(
                    "INPUT.GROUP_SPEC",
                    format!(
                        "{} group indices given for {} basis functions",
                        indices.len(),
                        basis_names.len()
                    ),
                ));
            }
            let groups = indices
                .iter()
                .map(|index| {
                    usize::try_from(*index).map_err(|_| {
                        MrsError::input_validation(
                            "INPUT.GROUP_SPEC",
                            format!("group index must be non-negative, got {index}"),
                        )
                    })
                })
                .collect::<MrsResult<Vec<_>>>()?;
            GroupAssignment::new(groups)
        }
        GroupSpec::Names(entries) => groups_from_names(entries, basis_names),
    }
}

fn groups_from_names(entries: &[String], basis_names: &[String]) -> MrsResult<GroupAssignment> {
    let mut groups = vec![0_usize; basis_names.len()];
    let mut entry_ids: BTreeMap<&str, usize> = BTreeMap::new();
    let mut claimed: BTreeMap<usize, &str> = BTreeMap::new();

    for entry in entries {
        let next_id = entry_ids.len() + 1;
        let id = *entry_ids.entry(entry.as_str()).or_insert(next_id);
        for name in entry.split('+').map(str::trim) {
            let index = basis_names
                .iter()
                .position(|candidate| candidate == name)
                .ok_or_else(|| {
                    MrsError::input_validation(
                        "INPUT.UNKNOWN_METABOLITE",
                        format!("metabolite group names '{name}', which is not in the basis set"),
                    )
                })?;
            if let Some(previous) = claimed.insert(index, entry.as_str()) {
                if previous != entry.as_str() {
                    return Err(MrsError::input_validation(
                        "INPUT.GROUP_SPEC",
                        format!("'{name}' is listed in both '{previous}' and '{entry}'"),
                    ));
                }
            }
            groups[index] = id;
        }
    }

    GroupAssignment::new(compact(groups))
}

/// Relabel ids so they are contiguous from 0 while preserving their order.
fn compact(groups: Vec<usize>) -> Vec<usize> {
    let ranks: BTreeMap<usize, usize> = groups
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(rank, id)| (id, rank))
        .collect();
    groups.into_iter().map(|id| ranks[&id]).collect()
}

/// Basis set and grouping after appending synthetic macromolecule peaks.
#[derive(Debug, Clone, PartialEq)]
pub struct MacromoleculeExtension {
    pub basis: BasisSet,
    pub groups: GroupAssignment,
    pub added_names: Vec<String>,
    pub added_groups: Vec<usize>,
}

/// Appends one Voigt-broadened component per macromolecule resonance, each in
/// its own new group above the current maximum id. Peaks are normalised to
/// the mean norm of the existing basis functions. Inputs are left untouched.
pub fn add_macromolecule_peaks(
    basis: &BasisSet,
    groups: &GroupAssignment,
    geometry: &SpectralGeometry,
    gamma: f64,
    sigma: f64,
) -> MrsResult<MacromoleculeExtension> {
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
    if !(gamma.is_finite() && gamma >= 0.0 && sigma.is_finite() && sigma >= 0.0) {
        return Err(MrsError::input_validation(
            "INPUT.MM_LINEWIDTH",
            format!("macromolecule gamma and sigma must be finite and >= 0, got ({gamma}, {sigma})"),
        ));
    }

    let target_norm =
        basis.fids().iter().map(|fid| l2_norm(fid)).sum::<f64>() / basis.len() as f64;
    let time = geometry.time_axis();

    let mut extra = Vec::with_capacity(MACROMOLECULE_NAMES.len());
    for ((name, positions), amplitudes) in MACROMOLECULE_NAMES
        .iter()
        .zip(MACROMOLECULE_PPM)
        .zip(MACROMOLECULE_AMPLITUDES)
    {
        let mut fid: Vec<Complex64> = time
            .iter()
            .map(|t| {
                let envelope = (-(gamma + sigma * sigma * t) * t).exp();
                positions
                    .iter()
                    .zip(amplitudes)
                    .map(|(ppm, amplitude)| {
                        let hz = (ppm - geometry.ppm_shift) * geometry.spectrometer_frequency;
                        Complex64::from_polar(amplitude * envelope, 2.0 * PI * hz * t)
                    })
                    .sum()
            })
            .collect();
        let norm = l2_norm(&fid);
        if norm > 0.0 {
            fid.iter_mut().for_each(|value| *value *= target_norm / norm);
        }
        extra.push((name.to_string(), fid));
    }

    let first_new = groups.group_count();
    let added_groups: Vec<usize> = (first_new..first_new + extra.len()).collect();
    let added_names: Vec<String> = extra.iter().map(|(name, _)| name.clone()).collect();
    let extended = basis.extended(extra)?;
    let mut ids = groups.as_slice().to_vec();
    ids.extend(&added_groups);

    Ok(MacromoleculeExtension {
        basis: extended,
        groups: GroupAssignment::new(ids)?,
        added_names,
        added_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::{GroupSpec, MACROMOLECULE_NAMES, add_macromolecule_peaks, build_groups};
    use crate::domain::{BasisSet, GroupAssignment};
    use crate::modules::testing::{peak_fid, proton_signal};
    use crate::numerics::l2_norm;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn assert_contiguous(groups: &GroupAssignment, count: usize) {
        assert_eq!(groups.len(), count);
        let max = groups.as_slice().iter().copied().max().expect("non-empty");
        for id in 0..=max {
            assert!(groups.as_slice().contains(&id), "missing group {id}");
        }
    }

    #[test]
    fn count_spec_puts_everything_in_group_zero() {
        let basis = names(&["NAA", "Cr", "PCr"]);
        let groups = build_groups(&GroupSpec::Count(3), &basis).expect("groups");
        assert_eq!(groups.as_slice(), &[0, 0, 0]);
        assert!(build_groups(&GroupSpec::Count(-1), &basis).is_err());
    }

    #[test]
    fn index_spec_must_match_basis_count_and_be_contiguous() {
        let basis = names(&["NAA", "Cr", "PCr"]);
        let groups = build_groups(&GroupSpec::Indices(vec![0, 1, 1]), &basis).expect("groups");
        assert_eq!(groups.as_slice(), &[0, 1, 1]);

        let short = build_groups(&GroupSpec::Indices(vec![0, 1]), &basis).expect_err("short");
        assert_eq!(short.placeholder(), "INPUT.GROUP_SPEC");
        assert!(build_groups(&GroupSpec::Indices(vec![0, 2, 2]), &basis).is_err());
        assert!(build_groups(&GroupSpec::Indices(vec![0, -1, 0]), &basis).is_err());
    }

    #[test]
    fn name_spec_groups_in_order_of_first_appearance() {
        let basis = names(&["Cr", "NAA", "NAAG", "PCr", "Ins"]);
        let spec = GroupSpec::Names(names(&["NAA+NAAG", "Ins"]));
        let groups = build_groups(&spec, &basis).expect("groups");
        assert_eq!(groups.as_slice(), &[0, 1, 1, 0, 2]);
        assert_contiguous(&groups, basis.len());
    }

    #[test]
    fn name_spec_covering_every_function_is_compacted() {
        let basis = names(&["NAA", "Cr"]);
        let spec = GroupSpec::Names(names(&["Cr", "NAA"]));
        let groups = build_groups(&spec, &basis).expect("groups");
        assert_eq!(groups.as_slice(), &[1, 0]);
        assert_contiguous(&groups, basis.len());
    }

    #[test]
    fn name_spec_rejects_unknown_and_conflicting_names() {
        let basis = names(&["NAA", "Cr"]);
        let unknown = build_groups(&GroupSpec::Names(names(&["GABA"])), &basis)
            .expect_err("unknown");
        assert_eq!(unknown.placeholder(), "INPUT.UNKNOWN_METABOLITE");

        let conflict = build_groups(&GroupSpec::Names(names(&["NAA", "NAA+Cr"])), &basis)
            .expect_err("conflict");
        assert_eq!(conflict.placeholder(), "INPUT.GROUP_SPEC");
    }

    #[test]
    fn every_valid_spec_yields_contiguous_groups() {
        let basis = names(&["A", "B", "C", "D"]);
        let specs = [
            GroupSpec::Count(0),
            GroupSpec::Count(5),
            GroupSpec::Indices(vec![1, 0, 2, 1]),
            GroupSpec::Names(names(&["D"])),
            GroupSpec::Names(names(&["C+A", "B", "D", "B"])),
        ];
        for spec in &specs {
            let groups = build_groups(spec, &basis).expect("valid spec");
            assert_contiguous(&groups, basis.len());
        }
    }

    #[test]
    fn macromolecule_peaks_extend_without_mutating_inputs() {
        let geometry = proton_signal(peak_fid(&[(2.0, 1.0)], 5.0)).geometry();
        let basis = BasisSet::new(
            names(&["NAA", "Cr"]),
            vec![peak_fid(&[(2.01, 1.0)], 5.0), peak_fid(&[(3.03, 2.0)], 5.0)],
        )
        .expect("basis");
        let groups = GroupAssignment::new(vec![0, 1]).expect("groups");
        let before = basis.clone();

        let extension =
            add_macromolecule_peaks(&basis, &groups, &geometry, 40.0, 30.0).expect("mm");

        assert_eq!(basis, before);
        assert_eq!(extension.basis.len(), 7);
        assert_eq!(extension.added_names, names(&MACROMOLECULE_NAMES));
        assert_eq!(extension.added_groups, vec![2, 3, 4, 5, 6]);
        assert_eq!(extension.groups.as_slice(), &[0, 1, 2, 3, 4, 5, 6]);

        let mean_norm = (l2_norm(basis.fid(0)) + l2_norm(basis.fid(1))) / 2.0;
        for index in 2..7 {
            assert!((l2_norm(extension.basis.fid(index)) - mean_norm).abs() <= 1.0e-9 * mean_norm);
        }
    }

    #[test]
    fn macromolecule_peaks_reject_existing_names() {
        let geometry = proton_signal(peak_fid(&[(2.0, 1.0)], 5.0)).geometry();
        let basis = BasisSet::new(names(&["MM09"]), vec![peak_fid(&[(0.9, 1.0)], 5.0)])
            .expect("basis");
        let groups = GroupAssignment::single_group(1).expect("groups");
        let error = add_macromolecule_peaks(&basis, &groups, &geometry, 40.0, 30.0)
            .expect_err("duplicate name");
        assert_eq!(error.placeholder(), "INPUT.BASIS_DUPLICATE");
    }
}
