//! Dataset assembly toolkit for gripper interaction videos.
//!
//! The crate turns a class-labeled tree of video files into disjoint
//! train/test/validation trees, indexes those trees into labeled clip
//! datasets, and feeds fixed-shape clip batches to a training loop.

mod common;
pub mod augment;
pub mod codec;
pub mod dataset;
pub mod loader;
pub mod utils;
