//! Build command - builds an image and verifies it.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use imagewright::base::BaseStore;
use imagewright::builder::{self, Backend, BuildPlan, DockerBackend, LocalBackend};
use imagewright::config::{BackendKind, Config};
use imagewright::timing::{self, Timer};
use imagewright::Descriptor;

/// Options for the build command.
pub struct BuildArgs {
    /// Descriptor file (default: Buildfile or Dockerfile in the context)
    pub file: Option<PathBuf>,
    /// Build context (source tree)
    pub context: PathBuf,
    /// Image name (default: context directory name)
    pub name: Option<String>,
    pub backend: BackendKind,
    pub keep_failed: bool,
}

/// Execute the build command.
///
/// Errors from the builder are returned as-is inside the anyhow error so
/// `main` can recover the verification exit code.
pub fn cmd_build(args: BuildArgs, config: &Config) -> Result<()> {
    let descriptor_path = match args.file {
        Some(file) => file,
        None => Descriptor::locate(&args.context).ok_or_else(|| {
            anyhow!(
                "No Buildfile or Dockerfile in {}. Pass one with --file.",
                args.context.display()
            )
        })?,
    };
    let descriptor = Descriptor::load(&descriptor_path)?;

    let name = args
        .name
        .unwrap_or_else(|| builder::default_name(&args.context));
    builder::validate_name(&name).map_err(|e| anyhow!(e))?;

    let plan = BuildPlan::new(descriptor, &args.context, &name, &config.output)
        .with_shell(&config.shell)
        .keep_failed(args.keep_failed);

    let backend: Box<dyn Backend> = match args.backend {
        BackendKind::Local => Box::new(LocalBackend::new(BaseStore::new(&config.store))),
        BackendKind::Docker => Box::new(DockerBackend::new(&config.docker)),
    };

    let timer = Timer::start("Build");
    let outcome = backend.build(&plan)?;

    println!(
        "\n=== Build Complete ({}) ===",
        timing::format_duration(timer.elapsed())
    );
    println!("  Image:  {}", outcome.image);
    println!("  Inputs: sha256:{}", outcome.manifest.inputs_digest);
    Ok(())
}
