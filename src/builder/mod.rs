//! Image builder.
//!
//! A build is a strictly sequential pipeline:
//!
//! 1. Resolve and pin the base environment
//! 2. Create the target directory
//! 3. Apply the descriptor's filesystem steps (copy the source tree)
//! 4. Run the verification command with the target as working directory
//! 5. Surface its exit status as the build result
//!
//! Any failure aborts the build and discards the staged image. Two backends
//! implement the pipeline: [`LocalBackend`] assembles directory images on the
//! host, [`DockerBackend`] drives the docker CLI.

mod docker;
mod error;
mod local;

use std::path::{Path, PathBuf};

use crate::descriptor::Descriptor;
use crate::digest;
use crate::image::ImageManifest;

pub use docker::DockerBackend;
pub use error::BuildError;
pub use local::LocalBackend;

/// Outcome of a build: the committed image, or the failure that aborted it.
pub type BuildResult = Result<BuildOutcome, BuildError>;

/// A successful build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Image location: a directory for the local backend, a tag for docker.
    pub image: String,
    pub manifest: ImageManifest,
}

/// Everything a backend needs to run one build.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub descriptor: Descriptor,
    /// Build context (source tree).
    pub context: PathBuf,
    /// Image name, used for the output directory or docker tag.
    pub name: String,
    /// Directory receiving built images.
    pub output: PathBuf,
    /// Shell used for shell-form verification commands on the host.
    pub shell: String,
    /// Keep the staged image when the build fails.
    pub keep_failed: bool,
}

impl BuildPlan {
    pub fn new(descriptor: Descriptor, context: &Path, name: &str, output: &Path) -> Self {
        Self {
            descriptor,
            context: context.to_path_buf(),
            name: name.to_string(),
            output: output.to_path_buf(),
            shell: "sh".to_string(),
            keep_failed: false,
        }
    }

    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }

    pub fn keep_failed(mut self, keep: bool) -> Self {
        self.keep_failed = keep;
        self
    }
}

/// A way of turning a [`BuildPlan`] into an image.
pub trait Backend {
    /// Short name recorded in image manifests.
    fn name(&self) -> &'static str;

    /// Run the whole pipeline.
    fn build(&self, plan: &BuildPlan) -> BuildResult;
}

/// Check an image name: lowercase alphanumerics plus `.`, `_` and `-`,
/// not starting with `.` or `-`.
pub fn validate_name(name: &str) -> Result<(), String> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with(['.', '-'])
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(format!(
            "invalid image name '{}' (use a-z 0-9 . _ -, not starting with . or -)",
            name
        ))
    }
}

/// Default image name derived from the context directory name.
pub fn default_name(context: &Path) -> String {
    let dir_name = context
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let name: String = dir_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let name = name.trim_start_matches(['.', '-']).to_string();

    if name.is_empty() {
        "image".to_string()
    } else {
        name
    }
}

/// Canonical paths and source digest shared by every backend.
pub(crate) struct Prepared {
    pub context: PathBuf,
    pub output: PathBuf,
    /// Output directory when it sits inside the context; never copied.
    pub exclude: Option<PathBuf>,
    pub source_digest: String,
}

impl Prepared {
    pub fn exclude(&self) -> Option<&Path> {
        self.exclude.as_deref()
    }
}

/// Canonicalize the context and output, and digest the source tree.
///
/// An unreadable source file surfaces here as a copy error, before anything
/// is written to the output directory besides creating it.
pub(crate) fn prepare(plan: &BuildPlan) -> Result<Prepared, BuildError> {
    let context = plan
        .context
        .canonicalize()
        .map_err(|source| BuildError::Copy {
            path: plan.context.clone(),
            source,
        })?;

    crate::stage::ensure_dir(&plan.output)?;
    let output = plan
        .output
        .canonicalize()
        .map_err(|source| BuildError::Io {
            context: format!("Failed to resolve output directory {}", plan.output.display()),
            source,
        })?;

    let exclude = output.starts_with(&context).then(|| output.clone());
    let source_digest =
        digest::hash_tree(&context, exclude.as_deref()).map_err(|source| BuildError::Copy {
            path: context.clone(),
            source,
        })?;

    Ok(Prepared {
        context,
        output,
        exclude,
        source_digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("rpn-calculator").is_ok());
        assert!(validate_name("v1.2_x").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("Upper").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_default_name_sanitizes_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let context = dir.path().join("My Project");
        std::fs::create_dir_all(&context).unwrap();
        assert_eq!(default_name(&context), "my-project");
        assert_eq!(default_name(Path::new("/nonexistent_12345")), "image");
    }

    #[test]
    fn test_prepare_excludes_nested_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        let plan = BuildPlan::new(
            Descriptor::parse("FROM base\nCMD true\n").unwrap(),
            dir.path(),
            "x",
            &dir.path().join("output"),
        );

        let prepared = prepare(&plan).unwrap();
        assert!(prepared.output.is_dir());
        assert_eq!(prepared.exclude(), Some(prepared.output.as_path()));

        let first = prepared.source_digest.clone();
        std::fs::write(prepared.output.join("leftover"), "x").unwrap();
        assert_eq!(prepare(&plan).unwrap().source_digest, first);
    }

    #[test]
    fn test_prepare_missing_context_is_copy_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BuildPlan::new(
            Descriptor::parse("FROM base\nCMD true\n").unwrap(),
            &dir.path().join("missing"),
            "x",
            &dir.path().join("output"),
        );
        assert!(matches!(prepare(&plan), Err(BuildError::Copy { .. })));
    }
}
