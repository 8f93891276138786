//! Base environment references and the local base store.
//!
//! A base environment is an existing root filesystem kept in the store as
//! `<store>/<name>/<tag>/rootfs/`. Resolving a reference pins it to the SHA-256
//! digest of that tree, so a build records exactly what it started from.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use walkdir::WalkDir;

use crate::builder::BuildError;
use crate::digest;

/// Tag used when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// Directory under `<name>/<tag>/` holding the root filesystem.
pub const ROOTFS_DIR: &str = "rootfs";

/// Reasons a base reference fails to parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("empty base reference")]
    Empty,
    #[error("invalid name component '{0}' (allowed: a-z 0-9 . _ -)")]
    InvalidName(String),
    #[error("invalid tag '{0}'")]
    InvalidTag(String),
    #[error("invalid digest '{0}' (expected sha256:<64 hex digits>)")]
    InvalidDigest(String),
}

/// `name[:tag][@sha256:<hex>]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseRef {
    pub name: String,
    pub tag: String,
    /// Hex digest without the `sha256:` prefix.
    pub digest: Option<String>,
}

impl FromStr for BaseRef {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RefError::Empty);
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => {
                let hex = digest
                    .strip_prefix("sha256:")
                    .filter(|hex| {
                        hex.len() == 64
                            && hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
                    })
                    .ok_or_else(|| RefError::InvalidDigest(digest.to_string()))?;
                (rest, Some(hex.to_string()))
            }
            None => (s, None),
        };

        // A colon after the last slash separates the tag.
        let (name, tag) = match rest.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (rest, DEFAULT_TAG),
        };

        if name.is_empty() {
            return Err(RefError::Empty);
        }
        for component in name.split('/') {
            let valid = !component.is_empty()
                && component != "."
                && component != ".."
                && component.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
                });
            if !valid {
                return Err(RefError::InvalidName(component.to_string()));
            }
        }

        let tag_valid = !tag.is_empty()
            && tag.len() <= 128
            && !tag.starts_with(['.', '-'])
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !tag_valid {
            return Err(RefError::InvalidTag(tag.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }
}

impl fmt::Display for BaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@sha256:{}", digest)?;
        }
        Ok(())
    }
}

/// A base environment resolved to a concrete tree and digest.
#[derive(Debug, Clone)]
pub struct PinnedBase {
    pub reference: BaseRef,
    pub root: PathBuf,
    pub digest: String,
}

/// Directory of base environments laid out as `<name>/<tag>/rootfs/`.
#[derive(Debug, Clone)]
pub struct BaseStore {
    root: PathBuf,
}

impl BaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root filesystem path of a reference (whether or not it exists).
    pub fn path_for(&self, reference: &BaseRef) -> PathBuf {
        self.root
            .join(&reference.name)
            .join(&reference.tag)
            .join(ROOTFS_DIR)
    }

    /// Resolve and pin a reference.
    ///
    /// Touches nothing outside the store, so a failed resolution leaves no
    /// trace in the output directory.
    pub fn resolve(&self, reference: &BaseRef) -> Result<PinnedBase, BuildError> {
        let root = self.path_for(reference);
        if !root.is_dir() {
            return Err(BuildError::BaseEnvironmentNotFound {
                reference: reference.to_string(),
            });
        }

        let digest = digest::hash_tree(&root, None).map_err(|source| BuildError::Io {
            context: format!("Failed to digest base environment {}", root.display()),
            source,
        })?;

        if let Some(expected) = &reference.digest {
            if *expected != digest {
                return Err(BuildError::BaseDigestMismatch {
                    reference: reference.to_string(),
                    actual: digest,
                });
            }
        }

        tracing::debug!(reference = %reference, digest = %digest, "pinned base environment");

        Ok(PinnedBase {
            reference: reference.clone(),
            root,
            digest,
        })
    }

    /// All base environments in the store, sorted by name then tag.
    pub fn list(&self) -> Vec<BaseRef> {
        let mut refs = Vec::new();
        let mut walker = WalkDir::new(&self.root)
            .min_depth(3)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_dir() || entry.file_name() != ROOTFS_DIR {
                continue;
            }
            let tag_dir = entry.path().parent().unwrap_or(entry.path());
            if let Ok(rel) = tag_dir.strip_prefix(&self.root) {
                let rel = rel.to_string_lossy();
                if let Some((name, tag)) = rel.rsplit_once('/') {
                    match format!("{}:{}", name, tag).parse::<BaseRef>() {
                        Ok(reference) => refs.push(reference),
                        Err(e) => tracing::warn!(path = %tag_dir.display(), error = %e, "skipping store entry"),
                    }
                }
            }
            walker.skip_current_dir();
        }
        refs
    }
}
