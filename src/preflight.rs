//! Preflight checks.
//!
//! Validates host tools and directories before starting a build.
//! Run with `imagewright preflight` to check everything is ready.

use anyhow::{bail, Result};

use crate::base::BaseStore;
use crate::config::{BackendKind, Config};
use crate::process;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - build will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: None,
        }
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Count of failed checks.
    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    /// Count of warnings.
    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let (icon, status_str) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
            };

            print!("  {} [{}] {}", icon, status_str, check.name);
            if let Some(details) = &check.details {
                println!(": {}", details);
            } else {
                println!();
            }
        }

        println!();
        let total = self.checks.len();
        let passed = self.count(CheckStatus::Pass);
        println!("Summary: {}/{} passed", passed, total);
        if self.fail_count() > 0 {
            println!("         {} FAILED - build will not succeed", self.fail_count());
        }
        if self.warn_count() > 0 {
            println!("         {} warnings", self.warn_count());
        }
    }
}

/// Run all preflight checks for the configured backend.
pub fn run_preflight(config: &Config, backend: BackendKind) -> PreflightReport {
    let mut checks = Vec::new();

    checks.push(check_program(&config.shell, "Verification shell", true));
    checks.push(check_program(
        &config.docker,
        "Docker CLI",
        backend == BackendKind::Docker,
    ));

    if backend == BackendKind::Local {
        checks.push(check_store(&BaseStore::new(&config.store)));
    }
    checks.push(check_output(config));

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config, backend: BackendKind) -> Result<()> {
    let report = run_preflight(config, backend);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

fn check_program(program: &str, label: &str, required: bool) -> CheckResult {
    match process::which(program) {
        Some(path) => CheckResult::pass_with(label, &path.display().to_string()),
        None if required => CheckResult::fail(label, &format!("'{}' not found in PATH", program)),
        None => CheckResult::warn(label, &format!("'{}' not found (only needed for --backend docker)", program)),
    }
}

fn check_store(store: &BaseStore) -> CheckResult {
    if !store.root().is_dir() {
        return CheckResult::fail(
            "Base store",
            &format!("{} does not exist", store.root().display()),
        );
    }
    let bases = store.list();
    if bases.is_empty() {
        CheckResult::warn(
            "Base store",
            &format!("{} holds no base environments", store.root().display()),
        )
    } else {
        let names: Vec<String> = bases.iter().map(|b| b.to_string()).collect();
        CheckResult::pass_with("Base store", &names.join(", "))
    }
}

fn check_output(config: &Config) -> CheckResult {
    // The closest existing ancestor must accept a new file.
    let mut dir = config.output.as_path();
    while !dir.exists() {
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
    if !dir.is_dir() {
        return CheckResult::fail(
            "Output directory",
            &format!("{} is not a directory", dir.display()),
        );
    }
    match tempfile::Builder::new().prefix(".imagewright-").tempfile_in(dir) {
        Ok(_file) => CheckResult::pass("Output directory"),
        Err(e) => CheckResult::fail(
            "Output directory",
            &format!("{} is not writable: {}", dir.display(), e),
        ),
    }
}
