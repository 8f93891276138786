//! Filesystem operations used to assemble an image root.
//!
//! In-image paths are resolved against the image root the way a chroot
//! would: absolute symlink targets restart at the root and `..` stops there,
//! so staging never writes outside the image.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::builder::BuildError;

/// Symlinks followed while resolving one path before giving up (as ELOOP).
const MAX_SYMLINKS: usize = 40;

/// Map an absolute in-image path onto the host, following symlinks inside
/// the image root.
///
/// Components that don't exist yet are appended as-is; the caller creates
/// them. The result always lies under `root`.
pub fn resolve_in_root(root: &Path, in_image: &str) -> io::Result<PathBuf> {
    let mut pending: VecDeque<OsString> = in_image
        .split('/')
        .filter(|part| !part.is_empty())
        .map(OsString::from)
        .collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == "." {
            continue;
        }
        if part == ".." {
            resolved.pop();
            continue;
        }

        let candidate = root.join(&resolved).join(&part);
        let is_link = fs::symlink_metadata(&candidate)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            resolved.push(&part);
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINKS {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("too many levels of symbolic links resolving {}", in_image),
            ));
        }
        let target = fs::read_link(&candidate)?;
        if target.is_absolute() {
            resolved = PathBuf::new();
        }
        for component in target.components().rev() {
            match component {
                Component::Normal(name) => pending.push_front(name.to_os_string()),
                Component::ParentDir => pending.push_front(OsString::from("..")),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
    }

    Ok(root.join(resolved))
}

/// Create a directory and its parents. Succeeds if it already exists.
pub fn ensure_dir(path: &Path) -> Result<(), BuildError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|source| BuildError::DirectoryCreation {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively copy the contents of `src` into `dst`, preserving relative
/// paths, permissions and symlinks.
///
/// Existing destination entries are overwritten, so copying the same tree
/// twice yields the same result. A destination symlink in the way of a
/// directory is replaced, never written through. Sockets, FIFOs and device
/// nodes are skipped without being opened. `exclude` prunes one subtree of
/// `src`. Returns the number of files and symlinks copied.
pub fn copy_tree(src: &Path, dst: &Path, exclude: Option<&Path>) -> Result<usize, BuildError> {
    ensure_dir(dst)?;
    let mut count = 0;
    // Applied after the walk so read-only source dirs don't block their own contents.
    let mut dir_modes = Vec::new();

    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| exclude != Some(e.path()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            copy_error(path, io::Error::from(e))
        })?;
        let src_path = entry.path();
        let rel = src_path
            .strip_prefix(src)
            .map_err(|e| copy_error(src_path.to_path_buf(), io::Error::new(io::ErrorKind::Other, e)))?;
        let dst_path = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if dst_path.is_symlink() {
                fs::remove_file(&dst_path).map_err(|e| copy_error(dst_path.clone(), e))?;
            }
            fs::create_dir_all(&dst_path).map_err(|e| copy_error(dst_path.clone(), e))?;
            let perms = entry
                .metadata()
                .map_err(|e| copy_error(src_path.to_path_buf(), io::Error::from(e)))?
                .permissions();
            dir_modes.push((dst_path, perms));
        } else if file_type.is_symlink() {
            copy_symlink(src_path, &dst_path)?;
            count += 1;
        } else if file_type.is_file() {
            copy_file(src_path, &dst_path)?;
            count += 1;
        } else {
            tracing::warn!(path = %src_path.display(), "skipping special file");
        }
    }

    for (path, perms) in dir_modes.into_iter().rev() {
        fs::set_permissions(&path, perms).map_err(|e| copy_error(path.clone(), e))?;
    }

    Ok(count)
}

/// Copy one context path into the image.
///
/// Directories have their contents merged into `dest`. A file lands inside
/// `dest` when `dest` ends with `/` or is an existing directory, otherwise
/// at `dest` itself.
pub fn copy_into(
    src: &Path,
    dest: &Path,
    dest_is_dir: bool,
    exclude: Option<&Path>,
) -> Result<usize, BuildError> {
    let meta = fs::symlink_metadata(src).map_err(|e| copy_error(src.to_path_buf(), e))?;

    if meta.is_dir() {
        return copy_tree(src, dest, exclude);
    }

    let target = if dest_is_dir || dest.is_dir() {
        ensure_dir(dest)?;
        match src.file_name() {
            Some(name) => dest.join(name),
            None => dest.to_path_buf(),
        }
    } else {
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        dest.to_path_buf()
    };

    if meta.file_type().is_symlink() {
        copy_symlink(src, &target)?;
    } else if meta.is_file() {
        copy_file(src, &target)?;
    } else {
        return Err(copy_error(
            src.to_path_buf(),
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file, directory or symlink"),
        ));
    }
    Ok(1)
}

fn copy_file(src: &Path, dst: &Path) -> Result<(), BuildError> {
    if dst.is_symlink() {
        fs::remove_file(dst).map_err(|e| copy_error(dst.to_path_buf(), e))?;
    }
    // fs::copy carries permission bits over.
    fs::copy(src, dst).map_err(|e| copy_error(src.to_path_buf(), e))?;
    Ok(())
}

fn copy_symlink(src: &Path, dst: &Path) -> Result<(), BuildError> {
    let target = fs::read_link(src).map_err(|e| copy_error(src.to_path_buf(), e))?;
    if dst.is_symlink() || dst.is_file() {
        fs::remove_file(dst).map_err(|e| copy_error(dst.to_path_buf(), e))?;
    }
    std::os::unix::fs::symlink(&target, dst).map_err(|e| copy_error(dst.to_path_buf(), e))
}

fn copy_error(path: PathBuf, source: io::Error) -> BuildError {
    BuildError::Copy { path, source }
}
