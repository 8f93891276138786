//! Imagewright - builds directory images and verifies them.
//!
//! A build resolves a base environment, copies a source tree into the
//! target directory, then runs one verification command from inside it.
//! The command's exit code becomes the process exit code.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::build::BuildArgs;
use commands::clean::CleanTarget;
use commands::show::ShowTarget;
use imagewright::config::{BackendKind, Config};
use imagewright::BuildError;

#[derive(Parser)]
#[command(name = "imagewright")]
#[command(about = "Build directory images from a base environment and a source tree")]
#[command(
    after_help = "QUICK START:\n  imagewright preflight     Check host tools and the base store\n  imagewright build         Build ./Buildfile and run its verification command\n  imagewright show bases    List available base environments\n  imagewright clean         Remove built images"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image and run its verification command
    Build {
        /// Descriptor file (default: Buildfile or Dockerfile in the context)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Build context copied into the image
        #[arg(short = 'C', long, default_value = ".")]
        context: PathBuf,

        /// Image name (default: context directory name)
        #[arg(long)]
        name: Option<String>,

        /// Backend to build with (default: IMAGEWRIGHT_BACKEND or local)
        #[arg(long, value_enum)]
        backend: Option<BackendKind>,

        /// Keep the staged image when the build fails
        #[arg(long)]
        keep_failed: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },

    /// Run preflight checks (verify host tools before building)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,

        /// Backend to check for (default: IMAGEWRIGHT_BACKEND or local)
        #[arg(long, value_enum)]
        backend: Option<BackendKind>,
    },

    /// Remove built images (default: the whole output directory)
    Clean {
        /// Only remove this image
        name: Option<String>,

        /// Only remove leftover staging directories
        #[arg(long, conflicts_with = "name")]
        staging: bool,
    },
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show current configuration
    Config,
    /// List base environments in the store
    Bases,
    /// Print the normalized descriptor
    Descriptor {
        /// Descriptor file (default: Buildfile or Dockerfile in the context)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Directory searched for a descriptor
        #[arg(short = 'C', long, default_value = ".")]
        context: PathBuf,
    },
    /// Show an image manifest (lists images when no name is given)
    Image { name: Option<String> },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<BuildError>()
            .map(BuildError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Build {
            file,
            context,
            name,
            backend,
            keep_failed,
        } => {
            let args = BuildArgs {
                file,
                context,
                name,
                backend: backend.unwrap_or(config.backend),
                keep_failed,
            };
            commands::cmd_build(args, &config)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowCommand::Config => ShowTarget::Config,
                ShowCommand::Bases => ShowTarget::Bases,
                ShowCommand::Descriptor { file, context } => {
                    ShowTarget::Descriptor { file, context }
                }
                ShowCommand::Image { name } => ShowTarget::Image { name },
            };
            commands::cmd_show(target, &config)?;
        }

        Commands::Preflight { strict, backend } => {
            commands::cmd_preflight(&config, backend.unwrap_or(config.backend), strict)?;
        }

        Commands::Clean { name, staging } => {
            let target = match (name, staging) {
                (Some(name), _) => CleanTarget::Image(name),
                (None, true) => CleanTarget::Staging,
                (None, false) => CleanTarget::All,
            };
            commands::cmd_clean(target, &config)?;
        }
    }

    Ok(())
}

/// Diagnostics go to stderr, filtered by IMAGEWRIGHT_LOG.
/// IMAGEWRIGHT_LOG_FORMAT=json switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("IMAGEWRIGHT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("imagewright=warn"));

    let json = std::env::var("IMAGEWRIGHT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
