//! Imagewright: builds directory images from a base environment and a
//! source tree, then runs a single verification command inside them.
//!
//! The CLI in `main.rs` is a thin layer over these modules; integration
//! tests drive them directly.

pub mod base;
pub mod builder;
pub mod clean;
pub mod config;
pub mod descriptor;
pub mod digest;
pub mod image;
pub mod preflight;
pub mod process;
pub mod stage;
pub mod timing;

pub use builder::{Backend, BuildError, BuildOutcome, BuildPlan, BuildResult};
pub use descriptor::Descriptor;
