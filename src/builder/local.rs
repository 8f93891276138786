//! Local backend: directory images assembled on the host.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{prepare, Backend, BuildError, BuildOutcome, BuildPlan, BuildResult, Prepared};
use crate::base::{BaseStore, PinnedBase};
use crate::descriptor::Step;
use crate::image::{self, ImageManifest};
use crate::process::{exit_code, Cmd};
use crate::stage;
use crate::timing::Timer;

/// Environment variable pointing the verification command at the image root.
pub const IMAGE_ROOT_ENV: &str = "IMAGE_ROOT";

/// Builds images as plain directories under the output directory.
///
/// The verification command runs on the host with its working directory set
/// to the target path inside the staged root.
pub struct LocalBackend {
    store: BaseStore,
}

impl LocalBackend {
    pub fn new(store: BaseStore) -> Self {
        Self { store }
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn build(&self, plan: &BuildPlan) -> BuildResult {
        println!("=== Building image '{}' ===\n", plan.name);

        // 1. Resolve before touching the output directory.
        let t = Timer::start("Resolve base");
        let base = self.store.resolve(&plan.descriptor.base)?;
        println!("  Base: {} (sha256:{})", base.reference, short(&base.digest));
        t.finish();

        let prepared = prepare(plan)?;
        let staging = image::staging_dir(&prepared.output, &plan.name);
        if staging.exists() {
            println!("  Removing stale staging directory...");
            remove_dir(&staging)?;
        }

        let rootfs = staging.join(image::ROOTFS_DIR);
        let staged = assemble(plan, &base, &prepared, &rootfs).and_then(|()| verify(plan, &rootfs));
        let code = match staged {
            Ok(code) => code,
            Err(e) => {
                discard(plan, &staging);
                return Err(e);
            }
        };

        if code != 0 {
            println!("\n[FAIL] Verification exited with code {}", code);
            discard(plan, &staging);
            return Err(BuildError::VerificationCommandFailed { exit_code: code });
        }

        let manifest = ImageManifest::new(
            plan,
            self.name(),
            &base.reference,
            &base.digest,
            &prepared.source_digest,
            code,
        );
        let image_dir = match commit(&prepared, plan, &staging, &manifest) {
            Ok(dir) => dir,
            Err(e) => {
                discard(plan, &staging);
                return Err(e);
            }
        };

        println!("\n[OK] Image committed: {}", image_dir.display());
        Ok(BuildOutcome {
            image: image_dir.display().to_string(),
            manifest,
        })
    }
}

/// Steps 2 and 3: base tree, target directory, descriptor operations.
fn assemble(
    plan: &BuildPlan,
    base: &PinnedBase,
    prepared: &Prepared,
    rootfs: &Path,
) -> Result<(), BuildError> {
    let t = Timer::start("Stage base");
    let count = stage::copy_tree(&base.root, rootfs, None)?;
    tracing::debug!(files = count, "staged base environment");
    t.finish();

    ensure_image_dir(rootfs, plan.descriptor.target())?;

    let t = Timer::start("Apply steps");
    for step in &plan.descriptor.steps {
        match step {
            Step::MakeDir(path) | Step::Workdir(path) => {
                ensure_image_dir(rootfs, path)?;
            }
            Step::Copy { sources, dest } => {
                let dest_path = stage::resolve_in_root(rootfs, dest).map_err(|source| {
                    BuildError::Copy {
                        path: PathBuf::from(dest),
                        source,
                    }
                })?;
                let dest_is_dir = dest.ends_with('/') || sources.len() > 1;
                for source in sources {
                    let src_path = if source == "." {
                        prepared.context.clone()
                    } else {
                        prepared.context.join(source)
                    };
                    let copied =
                        stage::copy_into(&src_path, &dest_path, dest_is_dir, prepared.exclude())?;
                    println!("  Copied {} -> {} ({} files)", source, dest, copied);
                }
            }
        }
    }
    t.finish();

    Ok(())
}

/// Steps 4 and 5: run the verification command from the target directory.
fn verify(plan: &BuildPlan, rootfs: &Path) -> Result<i32, BuildError> {
    let descriptor = &plan.descriptor;
    let workdir = ensure_image_dir(rootfs, descriptor.target())?;
    let command = descriptor.verify.to_string();
    let spawn_error = |message: String| BuildError::VerificationSpawn {
        command: command.clone(),
        message,
    };

    let mut cmd = Cmd::from_argv(&descriptor.verify.argv(&plan.shell))
        .map_err(|e| spawn_error(format!("{:#}", e)))?
        .dir(&workdir)
        .env(IMAGE_ROOT_ENV, rootfs.to_string_lossy())
        .allow_fail();
    for (key, value) in &descriptor.env {
        cmd = cmd.env(key, value);
    }

    println!("\nVerifying: {}", command);
    let t = Timer::start("Verify");
    let status = cmd
        .run_interactive()
        .map_err(|e| spawn_error(format!("{:#}", e)))?;
    t.finish();

    Ok(exit_code(status))
}

/// Resolve an in-image directory inside `rootfs` and make sure it exists.
fn ensure_image_dir(rootfs: &Path, path: &str) -> Result<PathBuf, BuildError> {
    let host = stage::resolve_in_root(rootfs, path).map_err(|source| {
        BuildError::DirectoryCreation {
            path: PathBuf::from(path),
            source,
        }
    })?;
    stage::ensure_dir(&host)?;
    Ok(host)
}

/// Write the manifest and move the staged image into place.
fn commit(
    prepared: &Prepared,
    plan: &BuildPlan,
    staging: &Path,
    manifest: &ImageManifest,
) -> Result<PathBuf, BuildError> {
    manifest
        .save(staging.join(image::MANIFEST_FILE))
        .map_err(|e| BuildError::Io {
            context: "Failed to write image manifest".to_string(),
            source: io::Error::new(io::ErrorKind::Other, format!("{:#}", e)),
        })?;

    let image_dir = image::image_dir(&prepared.output, &plan.name);
    if image_dir.exists() {
        remove_dir(&image_dir)?;
    }
    fs::rename(staging, &image_dir).map_err(|source| BuildError::Io {
        context: format!("Failed to commit image to {}", image_dir.display()),
        source,
    })?;
    Ok(image_dir)
}

fn discard(plan: &BuildPlan, staging: &Path) {
    if plan.keep_failed {
        println!("[KEEP] Staged image left at {}", staging.display());
        return;
    }
    if staging.exists() {
        if let Err(e) = fs::remove_dir_all(staging) {
            eprintln!(
                "[WARN] Failed to remove staging directory {}: {}",
                staging.display(),
                e
            );
        }
    }
}

fn remove_dir(path: &Path) -> Result<(), BuildError> {
    fs::remove_dir_all(path).map_err(|source| BuildError::Io {
        context: format!("Failed to remove {}", path.display()),
        source,
    })
}

fn short(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}
