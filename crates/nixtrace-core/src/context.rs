//! # Trace Context
//!
//! Process-wide tracer state, built once at load time and shared by reference
//! with every hook. After construction only two fields change: the log sink
//! and the symlink target buffer, each behind its own lock.
//!
//! Every `observe_*` method runs after the real call returned and only looks
//! at its result. None of them can change what the traced program sees;
//! fatal conditions end the process through [`fatal::abort_with`].

use std::ffi::CStr;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::fd::{BorrowedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::sync::{Mutex, PoisonError};

use libc::{c_char, c_int};
use nixtrace_config::{
    log_bootstrap_info, log_bootstrap_warn, log_digest_warn, log_sink_error, ScratchLayout,
    TraceConfig,
};

use crate::digest::{digest_directory, digest_file, DirectoryStream};
use crate::error::{DigestError, SinkError};
use crate::event_log::{EventLog, Observation, ObservationKind, Outcome};
use crate::fatal;
use crate::filter::PathFilter;
use crate::scratch::{ResolveDirPath, ScratchTracker};

/// Whether an `open` with these flags reads an existing file as input.
pub fn is_input_open(flags: c_int) -> bool {
    #[cfg(target_os = "linux")]
    const NOT_AN_INPUT: c_int = libc::O_CREAT | libc::O_TRUNC | libc::O_DIRECTORY | libc::O_PATH;
    #[cfg(not(target_os = "linux"))]
    const NOT_AN_INPUT: c_int = libc::O_CREAT | libc::O_TRUNC | libc::O_DIRECTORY;

    flags & libc::O_ACCMODE == libc::O_RDONLY && flags & NOT_AN_INPUT == 0
}

/// What a successful or failed `lstat` reported, reduced to what is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatSnapshot {
    Failed,
    Symlink { size: usize },
    Directory,
    Other,
}

impl StatSnapshot {
    pub fn from_mode(mode: libc::mode_t, size: i64) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFLNK => StatSnapshot::Symlink {
                size: usize::try_from(size).unwrap_or(0),
            },
            libc::S_IFDIR => StatSnapshot::Directory,
            _ => StatSnapshot::Other,
        }
    }
}

pub struct TraceContext<W: Write = BufWriter<File>> {
    filter: PathFilter,
    log: Option<EventLog<W>>,
    /// `None` when tracing is off or TMPDIR could not be used.
    scratch: Option<ScratchTracker>,
    /// Symlink targets are read here; grown on demand, never shrunk.
    link_buf: Mutex<Vec<u8>>,
}

impl TraceContext {
    /// Open the trace log and capture the load-time state.
    ///
    /// A log that cannot be opened disables tracing without failing the
    /// traced program. A working directory that cannot be read is fatal.
    pub fn from_config(config: &TraceConfig) -> Self {
        let Some(log_path) = config.log_path.as_ref() else {
            log_bootstrap_info!("TRACE_NIX not set, tracing disabled");
            return Self::disabled();
        };

        let sink = match File::create(log_path) {
            Ok(file) => BufWriter::new(file),
            Err(source) => {
                let err = SinkError::Open {
                    path: log_path.clone(),
                    source,
                };
                log_sink_error!("Tracing disabled", error = err.to_string());
                fatal::diagnostic(&err);
                return Self::disabled();
            }
        };

        let cwd = match std::env::current_dir() {
            Ok(dir) => dir.as_os_str().as_bytes().to_vec(),
            Err(e) => fatal::abort_with("getcwd", e),
        };

        let scratch = match config.scratch_layout() {
            Ok(layout) => Some(layout),
            Err(e) => {
                log_bootstrap_warn!("Scratch directories will not be tracked", error = e.to_string());
                fatal::diagnostic(&e);
                None
            }
        };

        log_bootstrap_info!(
            "Tracing enabled",
            log = log_path.display().to_string(),
            pid = config.pid
        );
        Self::with_sink(sink, cwd, scratch)
    }
}

impl<W: Write> TraceContext<W> {
    /// A context whose hooks are all pass-through.
    pub fn disabled() -> Self {
        Self {
            filter: PathFilter::new(false),
            log: None,
            scratch: None,
            link_buf: Mutex::new(Vec::new()),
        }
    }

    /// An enabled context writing to `sink`.
    pub fn with_sink(sink: W, cwd: Vec<u8>, scratch: Option<ScratchLayout>) -> Self {
        Self {
            filter: PathFilter::new(true),
            log: Some(EventLog::new(sink, cwd)),
            scratch: scratch.map(ScratchTracker::new),
            link_buf: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.log.is_some()
    }

    pub fn is_observable(&self, path: &[u8]) -> bool {
        self.log.is_some() && self.filter.is_observable(path)
    }

    pub fn scratch(&self) -> Option<&ScratchTracker> {
        self.scratch.as_ref()
    }

    /// Give back the sink, e.g. to inspect what was written.
    pub fn into_sink(self) -> Option<W> {
        self.log.map(EventLog::into_inner)
    }

    fn emit(&self, kind: ObservationKind, path: &[u8], outcome: Outcome<'_>) {
        if let Some(log) = &self.log {
            // A lost record is already reported by the log itself.
            let _ = log.emit(&Observation::new(kind, path, outcome));
        }
    }

    /// After `open(path, flags)` for an input file. `opened` is the returned
    /// descriptor, or `None` if the call failed.
    pub fn observe_open(&self, path: &[u8], opened: Option<BorrowedFd<'_>>) {
        if !self.is_observable(path) {
            return;
        }
        let outcome = match opened {
            None => Outcome::Failed,
            Some(fd) => match digest_file(fd) {
                Ok(fp) => Outcome::Digest(fp),
                Err(DigestError::Map(errno)) => {
                    log_digest_warn!("Input could not be mapped", error = errno.to_string());
                    Outcome::MapFailed
                }
                Err(e) => fatal::abort_with("open", e),
            },
        };
        self.emit(ObservationKind::File, path, outcome);
    }

    /// After `opendir(path)`. The stream is left rewound.
    pub fn observe_opendir(&self, path: &[u8], dir: Option<&mut dyn DirectoryStream>) {
        if !self.is_observable(path) {
            return;
        }
        let outcome = match dir {
            None => Outcome::Failed,
            Some(dir) => Outcome::Digest(digest_directory(dir)),
        };
        self.emit(ObservationKind::Directory, path, outcome);
    }

    /// After `lstat(path)`. Symlink targets are read back with `readlink`.
    pub fn observe_lstat(&self, path: &CStr, snapshot: StatSnapshot) {
        let bytes = path.to_bytes();
        if !self.is_observable(bytes) {
            return;
        }
        match snapshot {
            StatSnapshot::Failed => self.emit(ObservationKind::Stat, bytes, Outcome::Failed),
            StatSnapshot::Directory => {
                self.emit(ObservationKind::Stat, bytes, Outcome::IsDirectory)
            }
            StatSnapshot::Other => self.emit(ObservationKind::Stat, bytes, Outcome::Present),
            StatSnapshot::Symlink { size } => self.observe_symlink(path, size),
        }
    }

    fn observe_symlink(&self, path: &CStr, size: usize) {
        let mut buf = self.link_buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.clear();
        // One spare byte so that a target longer than `size` is detected.
        let wanted = size.saturating_add(1);
        if buf.try_reserve(wanted).is_err() {
            fatal::abort_with("lstat", DigestError::ScratchAlloc { requested: wanted });
        }

        // SAFETY: `buf` has room for `capacity()` bytes and readlink writes at
        // most that many.
        let read = unsafe {
            libc::readlink(
                path.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
                buf.capacity(),
            )
        };
        let bytes = path.to_bytes();
        if read < 0 || read as usize != size {
            self.emit(ObservationKind::Stat, bytes, Outcome::Failed);
            return;
        }
        // SAFETY: readlink initialized the first `read` bytes.
        unsafe { buf.set_len(read as usize) };

        self.emit(ObservationKind::Stat, bytes, Outcome::Symlink(&buf[..]));
    }

    /// After `mkdir(path)`.
    pub fn observe_mkdir(&self, path: &[u8], succeeded: bool) {
        if !succeeded || !self.is_enabled() {
            return;
        }
        if let Some(scratch) = &self.scratch {
            if scratch.is_scratch_creation(path) {
                self.emit(ObservationKind::Scratch, path, Outcome::Created);
            }
        }
    }

    /// After `unlinkat(dirfd, name, flags)`.
    pub fn observe_unlinkat<R>(
        &self,
        resolver: &R,
        dirfd: RawFd,
        name: &[u8],
        flags: c_int,
        succeeded: bool,
    ) where
        R: ResolveDirPath + ?Sized,
    {
        if !succeeded || !self.is_enabled() {
            return;
        }
        let Some(scratch) = &self.scratch else {
            return;
        };
        if let Some(removed) = scratch.removed_scratch_path(resolver, dirfd, name, flags) {
            self.emit(
                ObservationKind::Scratch,
                removed.as_os_str().as_bytes(),
                Outcome::Removed,
            );
        }
    }
}
