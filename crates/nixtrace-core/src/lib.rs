//! # nixtrace-core
//!
//! The observation engine behind trace-nix. Hooks in the preload library call
//! into a [`TraceContext`] after each intercepted call; the context filters
//! the path, fingerprints the object and appends a record to the trace log.
//!
//! ## Architecture
//!
//! ```text
//! hook ──► TraceContext ──► PathFilter
//!               │      ├──► digest (BLAKE3 of file bytes / directory listing)
//!               │      └──► ScratchTracker (nix-<pid>-* lifecycle)
//!               ▼
//!           EventLog ──► tag path NUL result NUL
//! ```

pub mod context;
pub mod digest;
pub mod error;
pub mod event_log;
pub mod fatal;
pub mod filter;
pub mod scratch;

pub use context::{is_input_open, StatSnapshot, TraceContext};
pub use digest::{
    digest_directory, digest_entry_set, digest_file, DirectoryStream, EntryKind, Fingerprint,
    RawDirStream,
};
pub use error::{DecodeError, DigestError, SinkError};
pub use event_log::{
    decode_records, EventLog, FileEventLog, Observation, ObservationKind, Outcome, Record,
};
pub use filter::PathFilter;
pub use scratch::{PlatformResolver, ResolveDirPath, ScratchTracker};
