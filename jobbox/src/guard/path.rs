//! Path containment for the filesystem guard.
//!
//! Every path a handler hands to [`SandboxFs`](super::SandboxFs) is
//! normalized to an absolute realpath and rejected unless it falls under
//! the bundle root or, when configured, the host root. The host root also
//! acts as a translation prefix: an absolute path outside the bundle is
//! reinterpreted relative to it and re-validated, which lets a parent run
//! bundles against a chroot-style mirror of the host filesystem.

use std::io;
use std::path::{Component, Path, PathBuf};

use jobbox_shared::{JobboxError, JobboxResult};

/// Validates candidate paths against the bundle root and the optional
/// host-root remap.
#[derive(Debug, Clone)]
pub struct PathResolver {
    bundle_root: PathBuf,
    host_root: Option<PathBuf>,
}

impl PathResolver {
    /// Build a resolver for a bundle root. The root itself must exist;
    /// the host root is resolved lazily so it may appear later.
    pub fn new(bundle_root: &Path, host_root: Option<PathBuf>) -> JobboxResult<Self> {
        Ok(PathResolver {
            bundle_root: std::fs::canonicalize(bundle_root)?,
            host_root,
        })
    }

    /// The canonicalized bundle root.
    pub fn bundle_root(&self) -> &Path {
        &self.bundle_root
    }

    /// Normalize `candidate` and check containment.
    ///
    /// Relative candidates are joined to the current working directory
    /// first. Returns the normalized path (possibly translated under the
    /// host root) or [`JobboxError::PathEscape`].
    pub fn resolve(&self, candidate: &Path) -> JobboxResult<PathBuf> {
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            std::env::current_dir()?.join(candidate)
        };
        let normalized = realpath(&absolute)?;
        if contained(&self.bundle_root, &normalized) {
            return Ok(normalized);
        }

        if let Some(host_root_raw) = &self.host_root {
            let host_root = realpath(host_root_raw)?;
            if contained(&host_root, &normalized) {
                return Ok(normalized);
            }
            // Reinterpret the absolute path as relative to the host root.
            let relative: PathBuf = normalized
                .components()
                .filter(|component| matches!(component, Component::Normal(_)))
                .collect();
            let translated = realpath(&host_root.join(relative))?;
            if contained(&host_root, &translated) {
                return Ok(translated);
            }
        }

        Err(JobboxError::path_escape())
    }
}

/// `root` itself or a strict descendant, component-wise.
fn contained(root: &Path, candidate: &Path) -> bool {
    candidate == root || candidate.starts_with(root)
}

/// Canonicalize a path, tolerating a non-existent tail.
///
/// A fully existing path gets the symlink-accurate `fs::canonicalize`
/// treatment. When the tail does not exist yet (a file about to be
/// created), the deepest existing ancestor is canonicalized and the
/// lexically normalized remainder is appended.
pub(crate) fn realpath(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    match std::fs::canonicalize(&absolute) {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            soft_canonicalize(&lexical_normalize(&absolute))
        }
        Err(err) => Err(err),
    }
}

fn soft_canonicalize(normalized: &Path) -> io::Result<PathBuf> {
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    let mut base = normalized;
    loop {
        match std::fs::canonicalize(base) {
            Ok(resolved) => {
                let mut result = resolved;
                for name in tail.iter().rev() {
                    result.push(name);
                }
                return Ok(result);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                match (base.parent(), base.file_name()) {
                    (Some(parent), Some(name)) => {
                        tail.push(name.to_os_string());
                        base = parent;
                    }
                    _ => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem. Only used for
/// the non-existent tail, where there are no symlinks to preserve.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other),
        }
    }
    result
}
