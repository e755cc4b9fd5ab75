//! # nixtrace-config
//!
//! Configuration for the trace-nix tracer.
//!
//! Everything is read from the environment exactly once, when the tracer is
//! loaded into the traced process:
//! 1. `TRACE_NIX` selects the trace log; without it every hook is a pass-through
//! 2. `TMPDIR` (default `/tmp`) roots the scratch directories `nix-<pid>-*`
//! 3. `TRACE_NIX_LOG` optionally enables the tracer's own diagnostics

pub mod logging;

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

/// Path of the trace log. Truncated on load.
pub const LOG_PATH_VAR: &str = "TRACE_NIX";
/// Scratch root used by the traced program.
pub const TMPDIR_VAR: &str = "TMPDIR";
/// `tracing` filter directive for the tracer's own diagnostics.
pub const DIAGNOSTICS_VAR: &str = "TRACE_NIX_LOG";
/// Variables the dynamic loader uses to inject the tracer.
pub const INJECTION_VARS: &[&str] = &["LD_PRELOAD", "DYLD_INSERT_LIBRARIES"];

pub const DEFAULT_TMP_ROOT: &str = "/tmp";

/// Upper bound for any path the tracer builds itself.
pub const PATH_MAX: usize = 4096;

/// Longest name a scratch directory can have: `nix-{u64::MAX}-{u64::MAX}`.
pub const MAX_SCRATCH_NAME_LEN: usize = 45;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TMPDIR too long ({len} bytes)")]
    TmpDirTooLong { len: usize },
}

/// Settings captured at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub log_path: Option<PathBuf>,
    pub tmp_root: OsString,
    pub diagnostics: Option<String>,
    pub pid: u32,
}

impl TraceConfig {
    /// Read the configuration of the current process.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key), std::process::id())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F, pid: u32) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let log_path = lookup(LOG_PATH_VAR).map(PathBuf::from);
        let tmp_root = lookup(TMPDIR_VAR).unwrap_or_else(|| OsString::from(DEFAULT_TMP_ROOT));
        let diagnostics = lookup(DIAGNOSTICS_VAR)
            .and_then(|v| v.into_string().ok())
            .filter(|v| !v.is_empty());

        Self {
            log_path,
            tmp_root,
            diagnostics,
            pid,
        }
    }

    pub fn tracing_enabled(&self) -> bool {
        self.log_path.is_some()
    }

    pub fn scratch_layout(&self) -> Result<ScratchLayout, ConfigError> {
        ScratchLayout::derive(self.tmp_root.as_bytes(), self.pid)
    }

    /// Remove the loader injection variables and `TRACE_NIX` so that children
    /// of the traced program run untraced.
    ///
    /// Must run while the process is still single-threaded.
    pub fn strip_injection_env() {
        for var in INJECTION_VARS {
            std::env::remove_var(var);
        }
        std::env::remove_var(LOG_PATH_VAR);
    }
}

/// The `<tmproot>/nix-<pid>-` namespace of scratch directories owned by this
/// process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchLayout {
    /// `<tmproot>` without trailing slashes.
    root: Vec<u8>,
    /// `nix-<pid>-`
    basename: Vec<u8>,
    /// `<tmproot>/nix-<pid>-`
    prefix: Vec<u8>,
}

impl ScratchLayout {
    pub fn derive(tmp_root: &[u8], pid: u32) -> Result<Self, ConfigError> {
        let trimmed = tmp_root.len() - tmp_root.iter().rev().take_while(|&&b| b == b'/').count();
        let root = tmp_root[..trimmed].to_vec();
        let basename = format!("nix-{}-", pid).into_bytes();

        let mut prefix = Vec::with_capacity(root.len() + 1 + basename.len());
        prefix.extend_from_slice(&root);
        prefix.push(b'/');
        prefix.extend_from_slice(&basename);

        if prefix.len() >= PATH_MAX {
            return Err(ConfigError::TmpDirTooLong { len: prefix.len() });
        }

        Ok(Self {
            root,
            basename,
            prefix,
        })
    }

    /// Directory that holds the scratch directories. `TMPDIR=/` yields `/`.
    pub fn parent_dir(&self) -> &[u8] {
        if self.root.is_empty() {
            b"/"
        } else {
            &self.root
        }
    }

    pub fn basename(&self) -> &[u8] {
        &self.basename
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Absolute path of the scratch entry `name` inside [`Self::parent_dir`].
    pub fn join(&self, name: &[u8]) -> PathBuf {
        let mut path = self.root.clone();
        path.push(b'/');
        path.extend_from_slice(name);
        PathBuf::from(OsString::from_vec(path))
    }
}
