//! Show command - displays information.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use imagewright::base::BaseStore;
use imagewright::config::Config;
use imagewright::image;
use imagewright::Descriptor;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// List base environments in the store
    Bases,
    /// Print the normalized descriptor
    Descriptor { file: Option<PathBuf>, context: PathBuf },
    /// Show one image manifest, or list images
    Image { name: Option<String> },
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Bases => {
            let store = BaseStore::new(&config.store);
            let bases = store.list();
            if bases.is_empty() {
                println!("No base environments in {}", store.root().display());
            }
            for base in bases {
                println!("{}", base);
            }
        }
        ShowTarget::Descriptor { file, context } => {
            let path = match file {
                Some(file) => file,
                None => Descriptor::locate(&context).ok_or_else(|| {
                    anyhow!("No Buildfile or Dockerfile in {}", context.display())
                })?,
            };
            let descriptor = Descriptor::load(&path)?;
            print!("{}", descriptor.render(true));
        }
        ShowTarget::Image { name: Some(name) } => {
            image::load_image(&config.output, &name)?.print();
        }
        ShowTarget::Image { name: None } => {
            let names = image::list_images(&config.output);
            if names.is_empty() {
                println!("No images in {}", config.output.display());
            }
            for name in names {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
