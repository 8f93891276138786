//! Build descriptors.
//!
//! A descriptor is a small Dockerfile subset: it names a base environment,
//! an informational maintainer, a sequence of filesystem operations and one
//! verification command that must be the last instruction.
//!
//! ```text
//! FROM andreroquem/rust-build
//! MAINTAINER Jane Doe <jane@example.com>
//! RUN mkdir /app
//! ADD . /app
//! WORKDIR /app
//! RUN cargo test
//! ```

mod parser;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::base::BaseRef;

pub use parser::ParseError;

/// Directory that receives the source tree when no `WORKDIR` is given.
pub const DEFAULT_TARGET: &str = "/app";

/// Descriptor file names searched in a build context, in order.
pub const DESCRIPTOR_NAMES: &[&str] = &["Buildfile", "Dockerfile"];

/// A filesystem operation applied to the image before verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Create a directory (and its parents). Succeeds if it already exists.
    MakeDir(String),
    /// Copy context paths into an image path.
    Copy { sources: Vec<String>, dest: String },
    /// Set the target path, creating it if absent.
    Workdir(String),
}

/// Which instruction introduced the verification command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyKind {
    Run,
    Cmd,
}

/// The single verification command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verify {
    /// Shell form, executed as `<shell> -c <text>`.
    Shell(String),
    /// Exec form, executed directly.
    Exec(Vec<String>),
}

impl Verify {
    /// Argument vector for running this command with the given shell.
    pub fn argv(&self, shell: &str) -> Vec<String> {
        match self {
            Verify::Shell(text) => vec![shell.to_string(), "-c".to_string(), text.clone()],
            Verify::Exec(argv) => argv.clone(),
        }
    }
}

impl fmt::Display for Verify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verify::Shell(text) => f.write_str(text),
            Verify::Exec(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

/// A parsed build descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub base: BaseRef,
    /// Informational only; never affects the build.
    pub maintainer: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Environment applied to the verification command, in declaration order.
    pub env: Vec<(String, String)>,
    pub steps: Vec<Step>,
    pub verify: Verify,
    pub verify_kind: VerifyKind,
}

impl Descriptor {
    /// Parse descriptor text.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        parser::parse(text)
    }

    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid descriptor {}", path.display()))
    }

    /// Find the descriptor file inside a build context.
    pub fn locate(context: &Path) -> Option<PathBuf> {
        DESCRIPTOR_NAMES
            .iter()
            .map(|name| context.join(name))
            .find(|path| path.is_file())
    }

    /// The verification working directory: the last `WORKDIR`, or `/app`.
    pub fn target(&self) -> &str {
        self.steps
            .iter()
            .rev()
            .find_map(|step| match step {
                Step::Workdir(path) => Some(path.as_str()),
                _ => None,
            })
            .unwrap_or(DEFAULT_TARGET)
    }

    /// Render normalized descriptor text.
    ///
    /// With `include_verify == false` the verification command is left out,
    /// which is what the docker backend feeds to `docker build`.
    pub fn render(&self, include_verify: bool) -> String {
        let mut out = format!("FROM {}\n", self.base);

        if let Some(maintainer) = &self.maintainer {
            out.push_str(&format!("LABEL maintainer={}\n", quote(maintainer)));
        }
        for (key, value) in &self.labels {
            out.push_str(&format!("LABEL {}={}\n", key, quote(value)));
        }
        for (key, value) in &self.env {
            out.push_str(&format!("ENV {}={}\n", key, quote(value)));
        }

        for step in &self.steps {
            match step {
                Step::MakeDir(path) => {
                    out.push_str(&format!("RUN mkdir -p {}\n", shell_word(path)))
                }
                Step::Copy { sources, dest } => {
                    if sources.iter().chain([dest]).all(|p| is_plain(p)) {
                        out.push_str(&format!("COPY {} {}\n", sources.join(" "), dest));
                    } else {
                        let mut argv = sources.clone();
                        argv.push(dest.clone());
                        out.push_str(&format!("COPY {}\n", exec_form(&argv)));
                    }
                }
                Step::Workdir(path) if is_plain(path) => {
                    out.push_str(&format!("WORKDIR {}\n", path))
                }
                Step::Workdir(path) => out.push_str(&format!("WORKDIR {}\n", quote(path))),
            }
        }

        if include_verify {
            let keyword = match self.verify_kind {
                VerifyKind::Run => "RUN",
                VerifyKind::Cmd => "CMD",
            };
            let body = match &self.verify {
                Verify::Shell(text) => text.clone(),
                Verify::Exec(argv) => exec_form(argv),
            };
            out.push_str(&format!("{} {}\n", keyword, body));
        }

        out
    }
}

/// Paths that read back unchanged without any quoting.
fn is_plain(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+@%:,=".contains(c))
}

/// Single-quote a word for `RUN mkdir` unless it is plain.
fn shell_word(word: &str) -> String {
    if is_plain(word) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn exec_form(argv: &[String]) -> String {
    serde_json::Value::from(argv.to_vec()).to_string()
}
