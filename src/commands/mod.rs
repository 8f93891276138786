//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build an image and run its verification command
//! - `show` - Display configuration, bases, descriptors and images
//! - `clean` - Remove built images
//! - `preflight` - Run preflight checks

pub mod build;
pub mod clean;
mod preflight;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
