//! Configuration management for imagewright.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::ValueEnum;

/// Which backend performs builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Directory images on the host
    Local,
    /// docker build + docker run
    Docker,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Docker => "docker",
        }
    }
}

/// Imagewright configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base environment store (IMAGEWRIGHT_STORE)
    pub store: PathBuf,
    /// Where built images go (IMAGEWRIGHT_OUTPUT, default: ./output)
    pub output: PathBuf,
    /// Default backend (IMAGEWRIGHT_BACKEND)
    pub backend: BackendKind,
    /// Shell for shell-form verification commands (IMAGEWRIGHT_SHELL)
    pub shell: String,
    /// Docker CLI program (IMAGEWRIGHT_DOCKER)
    pub docker: String,
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the process environment.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        let (key, value) = item?;
                        vars.insert(key, value);
                    }
                }
                Err(e) => eprintln!("[WARN] Ignoring {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file. Entries that aren't
        // valid UTF-8 can't be ours and are skipped.
        vars.extend(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }));

        Self::from_vars(base_dir, &vars)
    }

    /// Build configuration from a variable map, resolving relative paths
    /// against `base_dir`.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Result<Self> {
        let path_var = |key: &str| {
            vars.get(key).filter(|s| !s.is_empty()).map(|s| {
                let path = PathBuf::from(s);
                if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                }
            })
        };

        let store = path_var("IMAGEWRIGHT_STORE").unwrap_or_else(default_store);
        let output = path_var("IMAGEWRIGHT_OUTPUT").unwrap_or_else(|| base_dir.join("output"));

        let backend = match vars.get("IMAGEWRIGHT_BACKEND").map(String::as_str) {
            None | Some("") => BackendKind::Local,
            Some(value) => match BackendKind::from_str(value, true) {
                Ok(kind) => kind,
                Err(_) => bail!(
                    "IMAGEWRIGHT_BACKEND must be 'local' or 'docker', got '{}'",
                    value
                ),
            },
        };

        let shell = vars
            .get("IMAGEWRIGHT_SHELL")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "sh".to_string());

        let docker = vars
            .get("IMAGEWRIGHT_DOCKER")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "docker".to_string());

        Ok(Self {
            store,
            output,
            backend,
            shell,
            docker,
        })
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  IMAGEWRIGHT_STORE: {}", self.store.display());
        println!("  IMAGEWRIGHT_OUTPUT: {}", self.output.display());
        println!("  IMAGEWRIGHT_BACKEND: {}", self.backend.as_str());
        println!("  IMAGEWRIGHT_SHELL: {}", self.shell);
        println!("  IMAGEWRIGHT_DOCKER: {}", self.docker);
        if self.store.is_dir() {
            println!("  Base store: FOUND");
        } else {
            println!("  Base store: NOT FOUND (create it and add <name>/<tag>/rootfs/ trees)");
        }
    }
}

/// `<data dir>/imagewright/bases`, or `./bases` when there is no data dir.
fn default_store() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("imagewright").join("bases"))
        .unwrap_or_else(|| PathBuf::from("bases"))
}
