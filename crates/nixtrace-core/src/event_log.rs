//! # Event Log
//!
//! Append-only trace records, one per observation:
//!
//! ```text
//! record := tag path NUL result NUL
//! ```
//!
//! `tag` is one ASCII byte (`f` file, `d` directory, `s` stat, `t` scratch
//! directory). Paths are absolute; relative ones are qualified with the
//! working directory captured at load time. There is no other delimiter, so
//! readers scan for NUL.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Mutex, PoisonError};

use nixtrace_config::log_sink_warn;

use crate::digest::Fingerprint;
use crate::error::{DecodeError, SinkError};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    File = b'f',
    Directory = b'd',
    Stat = b's',
    Scratch = b't',
}

impl ObservationKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'f' => Some(ObservationKind::File),
            b'd' => Some(ObservationKind::Directory),
            b's' => Some(ObservationKind::Stat),
            b't' => Some(ObservationKind::Scratch),
            _ => None,
        }
    }
}

/// The result field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<'a> {
    Digest(Fingerprint),
    /// The traced call itself failed.
    Failed,
    /// The file opened but could not be mapped.
    MapFailed,
    IsDirectory,
    /// Exists and is neither a directory nor a symlink.
    Present,
    /// Symlink with the given target.
    Symlink(&'a [u8]),
    Created,
    Removed,
}

impl Outcome<'_> {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Outcome::Digest(fp) => buf.extend_from_slice(fp.to_hex().as_bytes()),
            Outcome::Failed | Outcome::Removed => buf.push(b'-'),
            Outcome::MapFailed => buf.push(b'e'),
            Outcome::IsDirectory => buf.push(b'd'),
            Outcome::Present | Outcome::Created => buf.push(b'+'),
            Outcome::Symlink(target) => {
                buf.push(b'l');
                buf.extend_from_slice(target);
            }
        }
    }
}

/// One observation, alive only for the hook call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation<'a> {
    pub kind: ObservationKind,
    pub path: &'a [u8],
    pub outcome: Outcome<'a>,
}

impl<'a> Observation<'a> {
    pub fn new(kind: ObservationKind, path: &'a [u8], outcome: Outcome<'a>) -> Self {
        Self {
            kind,
            path,
            outcome,
        }
    }

    fn encode_into(&self, cwd: &[u8], buf: &mut Vec<u8>) {
        buf.push(self.kind.tag());
        if !self.path.starts_with(b"/") {
            buf.extend_from_slice(cwd);
            buf.push(b'/');
        }
        buf.extend_from_slice(self.path);
        buf.push(0);
        self.outcome.encode_into(buf);
        buf.push(0);
    }
}

struct SinkState<W> {
    sink: W,
    /// Reused for every record.
    record: Vec<u8>,
}

/// Serializes observations from any thread into one sink.
///
/// A single lock covers formatting, writing and flushing of a record, so
/// records never interleave.
pub struct EventLog<W: Write> {
    cwd: Vec<u8>,
    state: Mutex<SinkState<W>>,
}

/// The production sink.
pub type FileEventLog = EventLog<BufWriter<File>>;

impl<W: Write> EventLog<W> {
    pub fn new(sink: W, cwd: Vec<u8>) -> Self {
        Self {
            cwd,
            state: Mutex::new(SinkState {
                sink,
                record: Vec::with_capacity(256),
            }),
        }
    }

    /// Append one record and flush it.
    pub fn emit(&self, observation: &Observation<'_>) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let SinkState { sink, record } = &mut *state;

        record.clear();
        observation.encode_into(&self.cwd, record);

        let written = sink.write_all(record).and_then(|_| sink.flush());
        if let Err(e) = written {
            log_sink_warn!("Dropped trace record", error = e.to_string());
            return Err(SinkError::Write(e));
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .sink
    }
}

/// A record read back from a trace log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: ObservationKind,
    pub path: Vec<u8>,
    pub result: Vec<u8>,
}

/// Split a trace log into its records.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let tag = bytes[offset];
        let kind =
            ObservationKind::from_tag(tag).ok_or(DecodeError::UnknownTag { tag, offset })?;
        let (path, after_path) = take_nul_terminated(bytes, offset + 1)?;
        let (result, after_result) = take_nul_terminated(bytes, after_path)?;

        records.push(Record {
            kind,
            path: path.to_vec(),
            result: result.to_vec(),
        });
        offset = after_result;
    }

    Ok(records)
}

fn take_nul_terminated(bytes: &[u8], start: usize) -> Result<(&[u8], usize), DecodeError> {
    let rest = bytes
        .get(start..)
        .ok_or(DecodeError::Truncated { offset: start })?;
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::Truncated { offset: start })?;
    Ok((&rest[..end], start + end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn emit_one(observation: Observation<'_>) -> Vec<u8> {
        let log = EventLog::new(Vec::new(), b"/work".to_vec());
        log.emit(&observation).unwrap();
        log.into_inner()
    }

    #[test]
    fn test_wire_format_of_each_outcome() {
        let fp = Fingerprint::of_bytes(b"abc");
        let cases: Vec<(Observation<'_>, Vec<u8>)> = vec![
            (
                Observation::new(ObservationKind::File, b"/a", Outcome::Digest(fp)),
                [b"f/a\0".as_slice(), fp.to_hex().as_bytes(), b"\0".as_slice()].concat(),
            ),
            (
                Observation::new(ObservationKind::File, b"/a", Outcome::Failed),
                b"f/a\0-\0".to_vec(),
            ),
            (
                Observation::new(ObservationKind::File, b"/a", Outcome::MapFailed),
                b"f/a\0e\0".to_vec(),
            ),
            (
                Observation::new(ObservationKind::Stat, b"/a", Outcome::IsDirectory),
                b"s/a\0d\0".to_vec(),
            ),
            (
                Observation::new(ObservationKind::Stat, b"/a", Outcome::Present),
                b"s/a\0+\0".to_vec(),
            ),
            (
                Observation::new(ObservationKind::Stat, b"/a", Outcome::Symlink(b"../b")),
                b"s/a\0l../b\0".to_vec(),
            ),
            (
                Observation::new(ObservationKind::Scratch, b"/tmp/nix-1-0", Outcome::Created),
                b"t/tmp/nix-1-0\0+\0".to_vec(),
            ),
            (
                Observation::new(ObservationKind::Scratch, b"/tmp/nix-1-0", Outcome::Removed),
                b"t/tmp/nix-1-0\0-\0".to_vec(),
            ),
        ];

        for (observation, expected) in cases {
            assert_eq!(
                emit_one(observation),
                expected,
                "{:?}",
                observation
            );
        }
    }

    #[test]
    fn test_relative_path_is_qualified_with_cwd() {
        let bytes = emit_one(Observation::new(
            ObservationKind::File,
            b"shell.nix",
            Outcome::Failed,
        ));
        assert_eq!(bytes, b"f/work/shell.nix\0-\0");
    }

    #[test]
    fn test_decode_round_trip() {
        let log = EventLog::new(Vec::new(), b"/work".to_vec());
        log.emit(&Observation::new(ObservationKind::Stat, b"/x", Outcome::Symlink(b"y")))
            .unwrap();
        log.emit(&Observation::new(ObservationKind::Directory, b"/d", Outcome::Failed))
            .unwrap();
        let records = decode_records(&log.into_inner()).unwrap();

        assert_eq!(
            records,
            vec![
                Record {
                    kind: ObservationKind::Stat,
                    path: b"/x".to_vec(),
                    result: b"ly".to_vec(),
                },
                Record {
                    kind: ObservationKind::Directory,
                    path: b"/d".to_vec(),
                    result: b"-".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_records(b"").unwrap(), vec![]);
        assert_eq!(
            decode_records(b"x/a\0-\0"),
            Err(DecodeError::UnknownTag { tag: b'x', offset: 0 })
        );
        assert_eq!(
            decode_records(b"f/a\0-"),
            Err(DecodeError::Truncated { offset: 4 })
        );
        assert_eq!(
            decode_records(b"f/a\0-\0s/b"),
            Err(DecodeError::Truncated { offset: 7 })
        );
    }

    #[test]
    fn test_write_failure_is_reported() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let log = EventLog::new(Broken, b"/".to_vec());
        let err = log
            .emit(&Observation::new(ObservationKind::File, b"/a", Outcome::Failed))
            .unwrap_err();
        assert!(matches!(err, SinkError::Write(_)));
    }

    #[test]
    fn test_concurrent_records_never_interleave() {
        let log = Arc::new(EventLog::new(Vec::new(), b"/".to_vec()));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..200 {
                        let path = format!("/thread-{}/file-{}", t, i);
                        let fp = Fingerprint::of_bytes(path.as_bytes());
                        log.emit(&Observation::new(
                            ObservationKind::File,
                            path.as_bytes(),
                            Outcome::Digest(fp),
                        ))
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let bytes = Arc::try_unwrap(log).ok().unwrap().into_inner();
        let records = decode_records(&bytes).unwrap();
        assert_eq!(records.len(), 8 * 200);
        for record in records {
            let expected = Fingerprint::of_bytes(&record.path).to_hex();
            assert_eq!(record.result, expected.as_bytes());
        }
    }
}
