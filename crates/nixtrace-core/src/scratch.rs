//! # Scratch directory tracking
//!
//! Nix creates `$TMPDIR/nix-<pid>-<n>` build directories and removes them
//! again before exiting. Their creation and removal are logged so that a
//! consumer can tell them apart from real inputs.
//!
//! Removal is observed through `unlinkat(dirfd, name, AT_REMOVEDIR)`, which
//! only carries a descriptor and a basename. The descriptor is turned back
//! into a path with [`ResolveDirPath`]; anything that cannot be matched is
//! assumed not to be ours and skipped.

use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use libc::c_int;
use nixtrace_config::{log_scratch_debug, ScratchLayout, MAX_SCRATCH_NAME_LEN};

/// Maps a directory descriptor back to the absolute path it was opened at.
pub trait ResolveDirPath {
    fn resolve_directory_path(&self, dirfd: RawFd) -> Option<Vec<u8>>;
}

fn current_dir_bytes() -> Option<Vec<u8>> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.as_os_str().as_bytes().to_vec())
}

/// Reads `/proc/self/fd/<n>`.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcFdResolver;

#[cfg(target_os = "linux")]
impl ResolveDirPath for ProcFdResolver {
    fn resolve_directory_path(&self, dirfd: RawFd) -> Option<Vec<u8>> {
        if dirfd == libc::AT_FDCWD {
            return current_dir_bytes();
        }
        if dirfd < 0 {
            return None;
        }
        let link = format!("/proc/self/fd/{}", dirfd);
        nix::fcntl::readlink(link.as_str())
            .ok()
            .map(|target| target.as_bytes().to_vec())
    }
}

/// Asks the kernel with `fcntl(F_GETPATH)`.
#[cfg(target_os = "macos")]
#[derive(Debug, Default, Clone, Copy)]
pub struct GetPathResolver;

#[cfg(target_os = "macos")]
impl ResolveDirPath for GetPathResolver {
    fn resolve_directory_path(&self, dirfd: RawFd) -> Option<Vec<u8>> {
        if dirfd == libc::AT_FDCWD {
            return current_dir_bytes();
        }
        let mut buf = [0u8; libc::PATH_MAX as usize];
        if unsafe { libc::fcntl(dirfd, libc::F_GETPATH, buf.as_mut_ptr()) } == -1 {
            return None;
        }
        let len = buf.iter().position(|&b| b == 0)?;
        Some(buf[..len].to_vec())
    }
}

#[cfg(target_os = "linux")]
pub type PlatformResolver = ProcFdResolver;
#[cfg(target_os = "macos")]
pub type PlatformResolver = GetPathResolver;

/// Recognizes creation and removal of this process's scratch directories.
#[derive(Debug, Clone)]
pub struct ScratchTracker {
    layout: ScratchLayout,
    /// `parent_dir` with symlinks resolved, when that differs. Descriptor
    /// resolution always reports the canonical form.
    canonical_parent: Option<Vec<u8>>,
}

impl ScratchTracker {
    pub fn new(layout: ScratchLayout) -> Self {
        let canonical_parent = std::fs::canonicalize(std::ffi::OsStr::from_bytes(
            layout.parent_dir(),
        ))
        .ok()
        .map(|p| p.as_os_str().as_bytes().to_vec())
        .filter(|p| p.as_slice() != layout.parent_dir());

        Self {
            layout,
            canonical_parent,
        }
    }

    pub fn layout(&self) -> &ScratchLayout {
        &self.layout
    }

    /// `path` names an entry directly inside the scratch namespace.
    fn in_namespace(&self, path: &[u8]) -> bool {
        path.strip_prefix(self.layout.prefix())
            .is_some_and(|rest| !rest.contains(&b'/'))
    }

    /// Whether a successful `mkdir(path)` created one of our scratch directories.
    pub fn is_scratch_creation(&self, path: &[u8]) -> bool {
        self.in_namespace(path)
    }

    /// Absolute path of the scratch directory a successful
    /// `unlinkat(dirfd, name, flags)` removed, if it was one.
    pub fn removed_scratch_path<R>(
        &self,
        resolver: &R,
        dirfd: RawFd,
        name: &[u8],
        flags: c_int,
    ) -> Option<PathBuf>
    where
        R: ResolveDirPath + ?Sized,
    {
        if flags != libc::AT_REMOVEDIR || name.len() > MAX_SCRATCH_NAME_LEN {
            return None;
        }
        let rest = name.strip_prefix(self.layout.basename())?;
        if rest.contains(&b'/') {
            return None;
        }

        let dir = resolver.resolve_directory_path(dirfd)?;
        let matches_parent = dir.as_slice() == self.layout.parent_dir()
            || self.canonical_parent.as_deref() == Some(dir.as_slice());
        if !matches_parent {
            log_scratch_debug!(
                "Removed directory is outside the scratch root",
                dir = String::from_utf8_lossy(&dir).into_owned()
            );
            return None;
        }

        Some(self.layout.join(name))
    }
}
