//! Clean command - removes built images.

use anyhow::Result;

use imagewright::clean;
use imagewright::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Remove the whole output directory (default)
    All,
    /// Remove one image
    Image(String),
    /// Remove leftover staging directories only
    Staging,
}

/// Execute the clean command.
pub fn cmd_clean(target: CleanTarget, config: &Config) -> Result<()> {
    match target {
        CleanTarget::All => clean::clean_all(&config.output)?,
        CleanTarget::Image(name) => clean::clean_image(&config.output, &name)?,
        CleanTarget::Staging => {
            let removed = clean::clean_staging(&config.output)?;
            println!("Removed {} staging director{}.", removed, if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
