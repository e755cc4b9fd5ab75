use nix::errno::Errno;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while fingerprinting an object the traced program already opened.
#[derive(Error, Debug)]
pub enum DigestError {
    /// The descriptor was just handed back by a successful open, so this
    /// means the tracer no longer knows what it is looking at.
    #[error("fstat: {0}")]
    Metadata(Errno),

    #[error("mmap: {0}")]
    Map(Errno),

    #[error("munmap: {0}")]
    Unmap(Errno),

    #[error("cannot grow scratch buffer to {requested} bytes")]
    ScratchAlloc { requested: usize },
}

impl DigestError {
    /// Whether the only sound response is to end the process.
    ///
    /// A failed mapping is reported in the log as `e`; everything else leaves
    /// the tracer with unknown state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DigestError::Map(_))
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("can't open file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[from] io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("unknown record tag {tag:#04x} at byte {offset}")]
    UnknownTag { tag: u8, offset: usize },
}
