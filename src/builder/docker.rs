//! Docker backend: hands the filesystem steps to `docker build` and runs the
//! verification command in a throwaway container.
//!
//! The image is built under a staging tag and only retagged to the final tag
//! once verification passes, so a failed build never moves the tag of the
//! previous good image.

use std::fs;
use std::path::{Path, PathBuf};

use super::{prepare, Backend, BuildError, BuildOutcome, BuildPlan, BuildResult, Prepared};
use crate::base::BaseRef;
use crate::descriptor::{Descriptor, Step};
use crate::image::{self, ImageManifest};
use crate::process::{exit_code, Cmd};
use crate::stage;
use crate::timing::Timer;

/// Shell used for shell-form commands inside the container.
const CONTAINER_SHELL: &str = "/bin/sh";

pub struct DockerBackend {
    program: String,
}

impl DockerBackend {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// Tag given to the built image.
    pub fn tag(name: &str) -> String {
        format!("imagewright/{}:latest", name)
    }

    /// Tag the image carries until verification passes.
    pub fn staging_tag(name: &str) -> String {
        format!("imagewright/{}:staging-{}", name, std::process::id())
    }

    /// Resolve the base via `docker image inspect`, pulling it if absent.
    /// Returns the image id.
    fn resolve(&self, reference: &BaseRef) -> Result<String, BuildError> {
        let reference_str = reference.to_string();
        if let Some(id) = self.inspect(&reference_str) {
            return Ok(id);
        }

        println!("  Pulling {}...", reference_str);
        let pulled = Cmd::new(&self.program)
            .args(["pull", reference_str.as_str()])
            .allow_fail()
            .run_interactive()
            .map(|status| status.success())
            .unwrap_or(false);

        match pulled.then(|| self.inspect(&reference_str)).flatten() {
            Some(id) => Ok(id),
            None => Err(BuildError::BaseEnvironmentNotFound {
                reference: reference_str,
            }),
        }
    }

    fn inspect(&self, reference: &str) -> Option<String> {
        let result = Cmd::new(&self.program)
            .args(["image", "inspect", "--format", "{{.Id}}", reference])
            .allow_fail()
            .run()
            .ok()?;
        let id = result.stdout_trimmed();
        (result.success() && !id.is_empty()).then(|| id.trim_start_matches("sha256:").to_string())
    }

    /// Drop the staging tag of a failed build unless asked to keep it.
    fn discard(&self, plan: &BuildPlan, staging_tag: &str) {
        if plan.keep_failed {
            println!("[KEEP] Image {} left in place", staging_tag);
        } else {
            self.untag(staging_tag);
        }
    }

    fn untag(&self, tag: &str) {
        if let Err(e) = Cmd::new(&self.program).args(["rmi", tag]).run() {
            eprintln!("[WARN] Failed to remove {}: {:#}", tag, e);
        }
    }

    fn backend_error(&self, what: &str, e: anyhow::Error) -> BuildError {
        BuildError::Backend {
            message: format!("{} {}: {:#}", self.program, what, e),
        }
    }
}

fn remove_dir(path: &Path) -> Result<(), BuildError> {
    fs::remove_dir_all(path).map_err(|source| BuildError::Io {
        context: format!("Failed to remove {}", path.display()),
        source,
    })
}

/// Dockerfile for the filesystem part of a descriptor.
///
/// The verification command is left out; a trailing `WORKDIR` makes sure the
/// target directory exists even when no step created it.
pub fn dockerfile(descriptor: &Descriptor) -> String {
    let mut text = descriptor.render(false);
    let target = descriptor.target();
    let ends_in_target = matches!(descriptor.steps.last(), Some(Step::Workdir(path)) if path == target);
    if !ends_in_target {
        text.push_str(&format!("WORKDIR {}\n", target));
    }
    text
}

/// Copy the build context into `dir`, leaving out the output directory, and
/// write the Dockerfile next to it. Returns `(dockerfile, context)`.
pub(crate) fn stage_context(
    descriptor: &Descriptor,
    prepared: &Prepared,
    dir: &Path,
) -> Result<(PathBuf, PathBuf), BuildError> {
    let context = dir.join("context");
    stage::copy_tree(&prepared.context, &context, prepared.exclude())?;

    let dockerfile_path = dir.join("Dockerfile");
    fs::write(&dockerfile_path, dockerfile(descriptor)).map_err(|source| BuildError::Io {
        context: format!("Failed to write {}", dockerfile_path.display()),
        source,
    })?;
    Ok((dockerfile_path, context))
}

/// Arguments for `docker run` executing the verification command.
pub fn run_args(descriptor: &Descriptor, tag: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-w".to_string(),
        descriptor.target().to_string(),
    ];
    for (key, value) in &descriptor.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(tag.to_string());
    args.extend(descriptor.verify.argv(CONTAINER_SHELL));
    args
}

impl Backend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn build(&self, plan: &BuildPlan) -> BuildResult {
        println!("=== Building image '{}' with {} ===\n", plan.name, self.program);
        let descriptor = &plan.descriptor;

        let t = Timer::start("Resolve base");
        let base_id = self.resolve(&descriptor.base)?;
        t.finish();

        let prepared = prepare(plan)?;
        let image_dir = image::image_dir(&prepared.output, &plan.name);
        let staging = image::staging_dir(&prepared.output, &plan.name);
        if staging.exists() {
            remove_dir(&staging)?;
        }

        let staging_tag = Self::staging_tag(&plan.name);
        let t = Timer::start("docker build");
        let built = stage_context(descriptor, &prepared, &staging).and_then(|(file, context)| {
            Cmd::new(&self.program)
                .arg("build")
                .arg("-f")
                .arg_path(&file)
                .args(["-t", staging_tag.as_str()])
                .arg_path(&context)
                .allow_fail()
                .run_interactive()
                .map_err(|e| self.backend_error("build", e))
        });
        if staging.exists() {
            if let Err(e) = remove_dir(&staging) {
                eprintln!("[WARN] {}", e);
            }
        }
        let status = built?;
        if !status.success() {
            return Err(BuildError::Backend {
                message: format!("{} build failed (exit code {})", self.program, exit_code(status)),
            });
        }
        t.finish();

        println!("\nVerifying: {}", descriptor.verify);
        let t = Timer::start("Verify");
        let verified = Cmd::new(&self.program)
            .args(run_args(descriptor, &staging_tag))
            .allow_fail()
            .run_interactive()
            .map_err(|e| BuildError::VerificationSpawn {
                command: descriptor.verify.to_string(),
                message: format!("{:#}", e),
            });
        t.finish();

        let code = match verified {
            Ok(status) => exit_code(status),
            Err(e) => {
                self.discard(plan, &staging_tag);
                return Err(e);
            }
        };
        if code != 0 {
            println!("\n[FAIL] Verification exited with code {}", code);
            self.discard(plan, &staging_tag);
            return Err(BuildError::VerificationCommandFailed { exit_code: code });
        }

        let tag = Self::tag(&plan.name);
        Cmd::new(&self.program)
            .args(["tag", staging_tag.as_str(), tag.as_str()])
            .run()
            .map_err(|e| self.backend_error("tag", e))?;
        self.untag(&staging_tag);

        let manifest = ImageManifest::new(
            plan,
            self.name(),
            &descriptor.base,
            &base_id,
            &prepared.source_digest,
            code,
        );
        stage::ensure_dir(&image_dir)?;
        manifest
            .save(image_dir.join(image::MANIFEST_FILE))
            .map_err(|e| BuildError::Io {
                context: "Failed to write image manifest".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)),
            })?;

        println!("\n[OK] Image tagged: {}", tag);
        Ok(BuildOutcome {
            image: tag,
            manifest,
        })
    }
}
