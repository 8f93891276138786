//! Content digests.
//!
//! Uses SHA256 over file contents, not mtimes, so two trees with the same
//! content hash equally regardless of when they were written.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// Digest a directory tree.
///
/// Covers relative paths, entry kinds, permission bits, file contents and
/// symlink targets, walked in sorted order. Sockets, FIFOs and device nodes
/// are never opened and don't contribute, matching what staging copies.
/// `exclude` prunes one subtree (the build output directory when it lives
/// inside the context).
pub fn hash_tree(root: &Path, exclude: Option<&Path>) -> io::Result<String> {
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| exclude != Some(e.path()));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let file_type = entry.file_type();

        if !(file_type.is_symlink() || file_type.is_dir() || file_type.is_file()) {
            continue;
        }

        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        if file_type.is_symlink() {
            hasher.update(b"L");
            let target = fs::read_link(entry.path())?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            let mode = entry.metadata().map_err(io::Error::from)?.permissions().mode();
            if file_type.is_dir() {
                hasher.update(b"D");
                hasher.update(mode.to_le_bytes());
            } else {
                hasher.update(b"F");
                hasher.update(mode.to_le_bytes());
                let content = fs::read(entry.path())?;
                hasher.update((content.len() as u64).to_le_bytes());
                hasher.update(&content);
            }
        }
        hasher.update([0u8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Combine several strings into one digest (length-prefixed, order matters).
pub fn combine(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
