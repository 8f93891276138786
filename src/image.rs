//! Built image layout and manifest.
//!
//! A committed image lives at `<output>/<name>/` with the root filesystem in
//! `rootfs/` and an `image.json` manifest next to it. Images are assembled in
//! `<output>/.staging-<name>/` and renamed into place only after verification
//! passes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::base::BaseRef;
use crate::builder::BuildPlan;
use crate::digest;

pub const MANIFEST_FILE: &str = "image.json";
pub const ROOTFS_DIR: &str = "rootfs";
pub const STAGING_PREFIX: &str = ".staging-";

/// Committed image directory.
pub fn image_dir(output: &Path, name: &str) -> PathBuf {
    output.join(name)
}

/// Staging directory used while an image is assembled.
pub fn staging_dir(output: &Path, name: &str) -> PathBuf {
    output.join(format!("{}{}", STAGING_PREFIX, name))
}

/// What went into an image and how verification ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub name: String,
    pub backend: String,
    /// Base reference as written (normalized).
    pub base: String,
    pub base_digest: String,
    pub source_digest: String,
    /// Digest over base, source and normalized descriptor. Two builds with
    /// equal inputs digests are functionally equivalent.
    pub inputs_digest: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub verify: String,
    pub exit_code: i32,
    /// Seconds since the Unix epoch.
    pub built_at: u64,
}

impl ImageManifest {
    pub fn new(
        plan: &BuildPlan,
        backend: &str,
        base: &BaseRef,
        base_digest: &str,
        source_digest: &str,
        exit_code: i32,
    ) -> Self {
        let descriptor = &plan.descriptor;
        let rendered = descriptor.render(true);
        let inputs_digest = digest::combine(&[base_digest, source_digest, rendered.as_str()]);
        let built_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            name: plan.name.clone(),
            backend: backend.to_string(),
            base: base.to_string(),
            base_digest: base_digest.to_string(),
            source_digest: source_digest.to_string(),
            inputs_digest,
            target: descriptor.target().to_string(),
            maintainer: descriptor.maintainer.clone(),
            labels: descriptor.labels.clone(),
            verify: descriptor.verify.to_string(),
            exit_code,
            built_at,
        }
    }

    /// Save manifest to JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Load manifest from JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let manifest: Self = serde_json::from_str(&json)?;
        Ok(manifest)
    }

    /// Print a human-readable summary.
    pub fn print(&self) {
        println!("Image: {}", self.name);
        println!("  Backend:  {}", self.backend);
        println!("  Base:     {} (sha256:{})", self.base, self.base_digest);
        println!("  Source:   sha256:{}", self.source_digest);
        println!("  Inputs:   sha256:{}", self.inputs_digest);
        println!("  Target:   {}", self.target);
        if let Some(maintainer) = &self.maintainer {
            println!("  Maintainer: {}", maintainer);
        }
        for (key, value) in &self.labels {
            println!("  Label:    {}={}", key, value);
        }
        println!("  Verify:   {} (exit code {})", self.verify, self.exit_code);
    }
}

/// Load the manifest of a committed image.
pub fn load_image(output: &Path, name: &str) -> Result<ImageManifest> {
    let path = image_dir(output, name).join(MANIFEST_FILE);
    ImageManifest::load(&path)
        .with_context(|| format!("Failed to load image manifest {}", path.display()))
}

/// Names of committed images in an output directory, sorted.
pub fn list_images(output: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(output) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().join(MANIFEST_FILE).is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with(STAGING_PREFIX))
        .collect();
    names.sort();
    names
}
