//! Preflight command - runs preflight checks.

use anyhow::Result;

use imagewright::config::{BackendKind, Config};
use imagewright::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, backend: BackendKind, strict: bool) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(config, backend)?;
    } else {
        let report = preflight::run_preflight(config, backend);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to fail with a non-zero exit code.");
        }
    }
    Ok(())
}
