//! Dataset processing toolkit.

mod dataset;
mod inspect;
mod partition;
mod record;
mod transform;
mod video;

pub use dataset::*;
pub use inspect::*;
pub use partition::*;
pub use record::*;
pub use transform::*;
pub use video::*;
