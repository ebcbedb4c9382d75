//! Capability-mediating filesystem facade.
//!
//! [`SandboxFs`] is the entire filesystem surface a handler gets. Every
//! operation checks the `fs` capability before touching the filesystem
//! (descriptor-form calls included) and routes each path argument through
//! the [`PathResolver`](super::PathResolver). Two-path operations validate
//! both arguments independently.
//!
//! The guarded vocabulary is exactly the methods on this type; handler
//! code that reaches the filesystem some other way (a process it spawns,
//! a crate doing raw syscalls) is not mediated here — confining that is
//! the parent's OS-level sandbox.

use std::fs::{self, File, Metadata, OpenOptions, Permissions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use filetime::FileTime;
use flate2::Compression;
use flate2::write::GzEncoder;
use jobbox_shared::{JobboxError, JobboxResult};
use walkdir::WalkDir;

use super::{Capabilities, PathResolver};

/// Filesystem facade handed to handlers through the job context.
///
/// Cheap to clone; all clones share the same policy.
#[derive(Debug, Clone)]
pub struct SandboxFs {
    inner: Arc<FsGuard>,
}

#[derive(Debug)]
struct FsGuard {
    resolver: PathResolver,
    allow_fs: bool,
}

impl SandboxFs {
    pub fn new(resolver: PathResolver, capabilities: Capabilities) -> Self {
        SandboxFs {
            inner: Arc::new(FsGuard {
                resolver,
                allow_fs: capabilities.fs,
            }),
        }
    }

    fn check(&self) -> JobboxResult<()> {
        if self.inner.allow_fs {
            Ok(())
        } else {
            Err(JobboxError::fs_capability())
        }
    }

    /// Capability check plus path normalization, in that order: a denied
    /// call never touches the filesystem.
    fn resolve(&self, path: &Path) -> JobboxResult<PathBuf> {
        self.check()?;
        self.inner.resolver.resolve(path)
    }

    // ------------------------------------------------------------------
    // open
    // ------------------------------------------------------------------

    /// Open with explicit options (the general `open` form).
    pub fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> JobboxResult<File> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(options.open(resolved)?)
    }

    /// Open an existing file for reading.
    pub fn open_read(&self, path: impl AsRef<Path>) -> JobboxResult<File> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(File::open(resolved)?)
    }

    /// Create (or truncate) a file for writing.
    pub fn create(&self, path: impl AsRef<Path>) -> JobboxResult<File> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(File::create(resolved)?)
    }

    pub fn read(&self, path: impl AsRef<Path>) -> JobboxResult<Vec<u8>> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::read(resolved)?)
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> JobboxResult<String> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::read_to_string(resolved)?)
    }

    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::write(resolved, contents)?)
    }

    /// Descriptor-form open. The descriptor is passed through unmodified
    /// (no path to validate) but still requires the `fs` capability.
    #[cfg(unix)]
    pub fn open_fd(&self, fd: std::os::fd::RawFd) -> JobboxResult<File> {
        use std::os::fd::FromRawFd;

        self.check()?;
        // SAFETY: dup() either returns a fresh descriptor we then own, or
        // -1 which is handled before construction.
        let duplicate = unsafe { libc::dup(fd) };
        if duplicate < 0 {
            return Err(JobboxError::Io(io::Error::last_os_error()));
        }
        // SAFETY: `duplicate` is a valid descriptor owned by no one else.
        Ok(unsafe { File::from_raw_fd(duplicate) })
    }

    // ------------------------------------------------------------------
    // directory listing
    // ------------------------------------------------------------------

    /// Immediate children of a directory.
    pub fn read_dir(&self, path: impl AsRef<Path>) -> JobboxResult<Vec<PathBuf>> {
        let resolved = self.resolve(path.as_ref())?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(resolved)? {
            entries.push(entry?.path());
        }
        Ok(entries)
    }

    /// Recursive traversal rooted at `path`, the root itself included.
    pub fn walk(&self, path: impl AsRef<Path>) -> JobboxResult<Vec<PathBuf>> {
        let resolved = self.resolve(path.as_ref())?;
        let mut paths = Vec::new();
        for entry in WalkDir::new(resolved) {
            let entry = entry.map_err(|err| JobboxError::Io(io::Error::other(err)))?;
            paths.push(entry.into_path());
        }
        Ok(paths)
    }

    // ------------------------------------------------------------------
    // metadata
    // ------------------------------------------------------------------

    pub fn metadata(&self, path: impl AsRef<Path>) -> JobboxResult<Metadata> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::metadata(resolved)?)
    }

    /// `lstat`: metadata without following a trailing symlink.
    pub fn symlink_metadata(&self, path: impl AsRef<Path>) -> JobboxResult<Metadata> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::symlink_metadata(resolved)?)
    }

    pub fn read_link(&self, path: impl AsRef<Path>) -> JobboxResult<PathBuf> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::read_link(resolved)?)
    }

    /// `access`-style existence probe.
    pub fn exists(&self, path: impl AsRef<Path>) -> JobboxResult<bool> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(resolved.try_exists()?)
    }

    // ------------------------------------------------------------------
    // mutation
    // ------------------------------------------------------------------

    pub fn remove_file(&self, path: impl AsRef<Path>) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::remove_file(resolved)?)
    }

    pub fn remove_dir(&self, path: impl AsRef<Path>) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::remove_dir(resolved)?)
    }

    /// Recursive removal of a directory tree.
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::remove_dir_all(resolved)?)
    }

    pub fn create_dir(&self, path: impl AsRef<Path>) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::create_dir(resolved)?)
    }

    /// Create a directory and any missing parents; existing
    /// directories are tolerated.
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::create_dir_all(resolved)?)
    }

    /// `chdir`, confined like every other path operation.
    pub fn set_current_dir(&self, path: impl AsRef<Path>) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(std::env::set_current_dir(resolved)?)
    }

    /// Rename or move, replacing an existing destination. Both paths
    /// validated.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> JobboxResult<()> {
        let from = self.resolve(from.as_ref())?;
        let to = self.resolve(to.as_ref())?;
        Ok(fs::rename(from, to)?)
    }

    /// Create a symlink at `link` pointing at `original`. Both paths
    /// validated, so links cannot point outside the permitted roots.
    #[cfg(unix)]
    pub fn symlink(&self, original: impl AsRef<Path>, link: impl AsRef<Path>) -> JobboxResult<()> {
        let original = self.resolve(original.as_ref())?;
        let link = self.resolve(link.as_ref())?;
        Ok(std::os::unix::fs::symlink(original, link)?)
    }

    /// `utime`.
    pub fn set_file_times(
        &self,
        path: impl AsRef<Path>,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(filetime::set_file_times(
            resolved,
            FileTime::from_system_time(accessed),
            FileTime::from_system_time(modified),
        )?)
    }

    /// `chmod`.
    pub fn set_permissions(
        &self,
        path: impl AsRef<Path>,
        permissions: Permissions,
    ) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(fs::set_permissions(resolved, permissions)?)
    }

    /// `chown`.
    #[cfg(unix)]
    pub fn chown(
        &self,
        path: impl AsRef<Path>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> JobboxResult<()> {
        let resolved = self.resolve(path.as_ref())?;
        Ok(std::os::unix::fs::chown(resolved, uid, gid)?)
    }

    // ------------------------------------------------------------------
    // copy / move / archive
    // ------------------------------------------------------------------

    /// Copy a single file. Both paths validated.
    pub fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> JobboxResult<u64> {
        let from = self.resolve(from.as_ref())?;
        let to = self.resolve(to.as_ref())?;
        Ok(fs::copy(from, to)?)
    }

    /// Recursive copy of a directory tree. Symlinked entries
    /// are copied through (contents, not links).
    pub fn copy_tree(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> JobboxResult<()> {
        let from = self.resolve(from.as_ref())?;
        let to = self.resolve(to.as_ref())?;
        for entry in WalkDir::new(&from) {
            let entry = entry.map_err(|err| JobboxError::Io(io::Error::other(err)))?;
            let relative = entry
                .path()
                .strip_prefix(&from)
                .map_err(|err| JobboxError::Internal(err.to_string()))?;
            let target = to.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    /// Pack a directory into a gzip-compressed tarball.
    /// Both the source directory and the archive path are validated.
    pub fn make_archive(
        &self,
        source_dir: impl AsRef<Path>,
        archive: impl AsRef<Path>,
    ) -> JobboxResult<()> {
        let source = self.resolve(source_dir.as_ref())?;
        let archive = self.resolve(archive.as_ref())?;
        let file = File::create(archive)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("", &source)?;
        builder.into_inner()?.finish()?;
        Ok(())
    }
}
