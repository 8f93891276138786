//! Build artifact cleaning.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::image::{self, STAGING_PREFIX};

/// Remove one committed image and any staging leftovers for it.
pub fn clean_image(output: &Path, name: &str) -> Result<()> {
    let image_dir = image::image_dir(output, name);
    let staging = image::staging_dir(output, name);

    if !image_dir.exists() && !staging.exists() {
        bail!("No image named '{}' in {}", name, output.display());
    }

    for dir in [&image_dir, &staging] {
        if dir.exists() {
            println!("Removing {}...", dir.display());
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Remove staging directories left behind by `--keep-failed` or crashes.
/// Returns how many were removed.
pub fn clean_staging(output: &Path) -> Result<usize> {
    let Ok(entries) = fs::read_dir(output) else {
        return Ok(0);
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(STAGING_PREFIX) && entry.path().is_dir() {
            println!("Removing {}...", entry.path().display());
            fs::remove_dir_all(entry.path())
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove the whole output directory.
pub fn clean_all(output: &Path) -> Result<()> {
    if output.exists() {
        println!("Removing {}...", output.display());
        fs::remove_dir_all(output)
            .with_context(|| format!("Failed to remove {}", output.display()))?;
    }
    println!("Clean complete (base store preserved).");
    Ok(())
}
