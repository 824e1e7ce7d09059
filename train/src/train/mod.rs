//! Training loop and experiment driver.

mod experiment;
mod trainer;

pub use experiment::*;
pub use trainer::*;
