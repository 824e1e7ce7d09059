//! Misc utilities.

mod checkpoint;
mod lr_scheduler;
mod optimizer;
mod rate_counter;
mod shutdown;

pub use checkpoint::*;
pub use lr_scheduler::*;
pub use optimizer::*;
pub use rate_counter::*;
pub use shutdown::*;
