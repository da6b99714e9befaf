use super::constants::H1_GAMMA_MHZ_PER_T;
use serde::{Deserialize, Serialize};

/// Relaxation times (seconds) of the water compartments and of metabolites.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelaxationTimes {
    pub h2o_gm: f64,
    pub h2o_wm: f64,
    pub h2o_csf: f64,
    pub metab: f64,
}

pub const STANDARD_T2_3T: RelaxationTimes = RelaxationTimes {
    h2o_gm: 0.110,
    h2o_wm: 0.080,
    h2o_csf: 2.55,
    metab: 0.271,
};

pub const STANDARD_T2_7T: RelaxationTimes = RelaxationTimes {
    h2o_gm: 0.050,
    h2o_wm: 0.055,
    h2o_csf: 1.050,
    metab: 0.160,
};

pub const STANDARD_T1_3T: RelaxationTimes = RelaxationTimes {
    h2o_gm: 1.50,
    h2o_wm: 0.97,
    h2o_csf: 4.47,
    metab: 1.29,
};

pub const STANDARD_T1_7T: RelaxationTimes = RelaxationTimes {
    h2o_gm: 2.05,
    h2o_wm: 1.21,
    h2o_csf: 4.43,
    metab: 1.43,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelaxationTable {
    pub t1: RelaxationTimes,
    pub t2: RelaxationTimes,
}

pub fn field_strength_tesla(spectrometer_mhz: f64) -> f64 {
    spectrometer_mhz / H1_GAMMA_MHZ_PER_T
}

/// Standard relaxation constants for 3T and 7T scanners.
pub fn standard_relaxation(spectrometer_mhz: f64) -> Option<RelaxationTable> {
    let field = field_strength_tesla(spectrometer_mhz);
    if field > 2.5 && field < 3.5 {
        Some(RelaxationTable {
            t1: STANDARD_T1_3T,
            t2: STANDARD_T2_3T,
        })
    } else if field > 6.5 && field < 7.5 {
        Some(RelaxationTable {
            t1: STANDARD_T1_7T,
            t2: STANDARD_T2_7T,
        })
    } else {
        None
    }
}
