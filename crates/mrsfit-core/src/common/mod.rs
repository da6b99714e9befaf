pub mod constants;
pub mod relaxation;

pub use relaxation::{RelaxationTable, RelaxationTimes, standard_relaxation};
