//! Spectral fitting and quantification of MR spectroscopy signals.

pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;
