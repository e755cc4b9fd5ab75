//! # Digest Engine
//!
//! BLAKE3 fingerprints of file contents and of directory entry sets.
//!
//! A fingerprint is the first 16 bytes of the BLAKE3 output, written as 32
//! lowercase hex characters.
//!
//! Directory fingerprints hash the sorted `name=type\0` serializations of the
//! entries, so the result depends only on what the directory contains and not
//! on the order the filesystem enumerates it in.

use std::ffi::CStr;
use std::fmt;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::NonNull;

use nix::errno::Errno;
use nixtrace_config::log_digest_debug;

use crate::error::DigestError;

pub const FINGERPRINT_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(data);
        Self::finish(&hasher)
    }

    fn finish(hasher: &blake3::Hasher) -> Self {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&hasher.finalize().as_bytes()[..FINGERPRINT_LEN]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Entry type as it appears in a directory listing.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    Directory = b'd',
    Symlink = b'l',
    Regular = b'f',
    Other = b'u',
}

impl EntryKind {
    pub fn from_d_type(d_type: u8) -> Self {
        match d_type {
            libc::DT_DIR => EntryKind::Directory,
            libc::DT_LNK => EntryKind::Symlink,
            libc::DT_REG => EntryKind::Regular,
            _ => EntryKind::Other,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A directory listing that can be read through and rewound.
pub trait DirectoryStream {
    /// Next entry, `.` and `..` included. `None` at the end.
    fn next_entry(&mut self) -> Option<(&[u8], EntryKind)>;

    /// Return to the first entry.
    fn rewind(&mut self);
}

/// A `DIR*` borrowed from the traced program.
pub struct RawDirStream {
    dir: NonNull<libc::DIR>,
}

impl RawDirStream {
    /// # Safety
    ///
    /// `dir` must be an open directory stream that stays open, and is not
    /// read by anyone else, for the lifetime of the returned value.
    pub unsafe fn new(dir: NonNull<libc::DIR>) -> Self {
        Self { dir }
    }
}

impl DirectoryStream for RawDirStream {
    fn next_entry(&mut self) -> Option<(&[u8], EntryKind)> {
        // SAFETY: the stream is open per the constructor contract; the entry
        // stays valid until the next readdir on this stream, which needs
        // `&mut self` again.
        unsafe {
            let ent = libc::readdir(self.dir.as_ptr());
            if ent.is_null() {
                return None;
            }
            let name = CStr::from_ptr((*ent).d_name.as_ptr()).to_bytes();
            Some((name, EntryKind::from_d_type((*ent).d_type)))
        }
    }

    fn rewind(&mut self) {
        unsafe { libc::rewinddir(self.dir.as_ptr()) }
    }
}

/// Serialized form of one entry: `name=type`.
fn serialize_entry(name: &[u8], kind: EntryKind) -> Vec<u8> {
    let mut entry = Vec::with_capacity(name.len() + 2);
    entry.extend_from_slice(name);
    entry.push(b'=');
    entry.push(kind.tag());
    entry
}

/// Order-independent fingerprint of a set of `(name, kind)` entries.
///
/// `.` and `..` are skipped.
pub fn digest_entry_set<'a, I>(entries: I) -> Fingerprint
where
    I: IntoIterator<Item = (&'a [u8], EntryKind)>,
{
    let mut serialized: Vec<Vec<u8>> = entries
        .into_iter()
        .filter(|(name, _)| *name != b"." && *name != b"..")
        .map(|(name, kind)| serialize_entry(name, kind))
        .collect();
    serialized.sort_unstable();
    hash_serialized(&serialized)
}

fn hash_serialized(serialized: &[Vec<u8>]) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    for entry in serialized {
        hasher.update(entry);
        hasher.update(&[0]);
    }
    Fingerprint::finish(&hasher)
}

/// Fingerprint everything left in `dir`, then rewind it for the caller.
pub fn digest_directory<D: DirectoryStream + ?Sized>(dir: &mut D) -> Fingerprint {
    let mut serialized = Vec::new();
    while let Some((name, kind)) = dir.next_entry() {
        if name == b"." || name == b".." {
            continue;
        }
        serialized.push(serialize_entry(name, kind));
    }
    dir.rewind();

    serialized.sort_unstable();
    log_digest_debug!("Hashed directory listing", entries = serialized.len());
    hash_serialized(&serialized)
}

/// Fingerprint the full contents of an open file.
///
/// The bytes are mapped read-only; the descriptor's offset is untouched.
/// Empty files are hashed without mapping anything.
pub fn digest_file(fd: BorrowedFd<'_>) -> Result<Fingerprint, DigestError> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } != 0 {
        return Err(DigestError::Metadata(Errno::last()));
    }
    let size = stat.st_size as usize;
    if size == 0 {
        return Ok(Fingerprint::of_bytes(&[]));
    }

    // SAFETY: a fresh private read-only mapping; nothing else aliases it.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            fd.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        let errno = Errno::last();
        log_digest_debug!("mmap failed", size = size, errno = errno.desc());
        return Err(DigestError::Map(errno));
    }

    // SAFETY: `addr` maps exactly `size` readable bytes until the munmap below.
    let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, size) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    let fingerprint = Fingerprint::finish(&hasher);

    if unsafe { libc::munmap(addr, size) } != 0 {
        return Err(DigestError::Unmap(Errno::last()));
    }

    log_digest_debug!("Hashed file", size = size);
    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs::{self, File};
    use std::os::fd::AsFd;
    use tempfile::TempDir;

    /// In-memory listing that behaves like a `DIR*`.
    struct VecStream {
        entries: Vec<(Vec<u8>, EntryKind)>,
        position: usize,
        rewinds: usize,
    }

    impl VecStream {
        fn new(entries: &[(&str, EntryKind)]) -> Self {
            Self {
                entries: entries
                    .iter()
                    .map(|(name, kind)| (name.as_bytes().to_vec(), *kind))
                    .collect(),
                position: 0,
                rewinds: 0,
            }
        }
    }

    impl DirectoryStream for VecStream {
        fn next_entry(&mut self) -> Option<(&[u8], EntryKind)> {
            let (name, kind) = self.entries.get(self.position)?;
            self.position += 1;
            Some((name.as_slice(), *kind))
        }

        fn rewind(&mut self) {
            self.position = 0;
            self.rewinds += 1;
        }
    }

    fn reference_digest(serialized: &[&[u8]]) -> String {
        let mut hasher = blake3::Hasher::new();
        for entry in serialized {
            hasher.update(entry);
        }
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }

    #[test]
    fn test_fingerprint_is_truncated_blake3() {
        let fp = Fingerprint::of_bytes(b"abc");
        let full = blake3::hash(b"abc").to_hex();
        assert_eq!(fp.to_hex(), &full.as_str()[..32]);
        assert_eq!(fp.to_string().len(), 32);
        assert!(fp
            .to_string()
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }

    #[test]
    fn test_entry_kind_from_d_type() {
        assert_eq!(EntryKind::from_d_type(libc::DT_DIR), EntryKind::Directory);
        assert_eq!(EntryKind::from_d_type(libc::DT_LNK), EntryKind::Symlink);
        assert_eq!(EntryKind::from_d_type(libc::DT_REG), EntryKind::Regular);
        assert_eq!(EntryKind::from_d_type(libc::DT_FIFO), EntryKind::Other);
        assert_eq!(EntryKind::from_d_type(libc::DT_UNKNOWN), EntryKind::Other);
    }

    #[test]
    fn test_directory_digest_matches_serialized_form() {
        let mut stream = VecStream::new(&[
            (".", EntryKind::Directory),
            ("y", EntryKind::Directory),
            ("..", EntryKind::Directory),
            ("x", EntryKind::Regular),
        ]);
        let fp = digest_directory(&mut stream);
        assert_eq!(fp.to_hex(), reference_digest(&[b"x=f\0".as_slice(), b"y=d\0".as_slice()]));
    }

    #[test]
    fn test_directory_stream_is_rewound() {
        let mut stream = VecStream::new(&[("a", EntryKind::Regular), ("b", EntryKind::Symlink)]);
        let first = digest_directory(&mut stream);
        assert_eq!(stream.rewinds, 1);
        assert_eq!(stream.position, 0);
        assert_eq!(digest_directory(&mut stream), first);
    }

    #[test]
    fn test_empty_directory() {
        let mut stream = VecStream::new(&[(".", EntryKind::Directory), ("..", EntryKind::Directory)]);
        assert_eq!(digest_directory(&mut stream), Fingerprint::of_bytes(b""));
    }

    #[test]
    fn test_sort_is_by_serialized_entry() {
        // "a-b=f" < "a=f" bytewise ('-' < '='), though "a" < "a-b" as names.
        let fp = digest_entry_set([
            (b"a".as_slice(), EntryKind::Regular),
            (b"a-b".as_slice(), EntryKind::Regular),
        ]);
        assert_eq!(fp.to_hex(), reference_digest(&[b"a-b=f\0".as_slice(), b"a=f\0".as_slice()]));
    }

    #[test]
    fn test_real_directory_digest() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("x"), b"").unwrap();
        fs::create_dir(temp.path().join("y")).unwrap();

        let path = std::ffi::CString::new(temp.path().to_str().unwrap()).unwrap();
        let dir = NonNull::new(unsafe { libc::opendir(path.as_ptr()) }).unwrap();
        let mut stream = unsafe { RawDirStream::new(dir) };
        let fp = digest_directory(&mut stream);

        // The stream was rewound: a second pass still sees both entries.
        let mut names = BTreeSet::new();
        while let Some((name, _)) = stream.next_entry() {
            names.insert(name.to_vec());
        }
        unsafe { libc::closedir(dir.as_ptr()) };

        assert!(names.contains(b"x".as_slice()));
        assert!(names.contains(b"y".as_slice()));
        assert_eq!(fp.to_hex(), reference_digest(&[b"x=f\0".as_slice(), b"y=d\0".as_slice()]));
    }

    #[test]
    fn test_file_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("abc");
        fs::write(&path, b"abc").unwrap();

        let file = File::open(&path).unwrap();
        let fp = digest_file(file.as_fd()).unwrap();
        assert_eq!(fp, Fingerprint::of_bytes(b"abc"));
    }

    #[test]
    fn test_empty_file_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(digest_file(file.as_fd()).unwrap(), Fingerprint::of_bytes(b""));
        assert_eq!(digest_file(file.as_fd()).unwrap(), Fingerprint::of_bytes(b""));
    }

    #[test]
    fn test_file_offset_is_untouched() {
        use std::io::{Read, Seek, SeekFrom};

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data");
        fs::write(&path, b"0123456789").unwrap();

        let mut file = File::open(&path).unwrap();
        file.seek(SeekFrom::Start(4)).unwrap();
        digest_file(file.as_fd()).unwrap();

        let mut rest = String::new();
        file.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "456789");
    }

    #[test]
    fn test_one_byte_change_changes_file_digest() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"hello world").unwrap();
        fs::write(&b, b"hello worle").unwrap();

        let fa = digest_file(File::open(&a).unwrap().as_fd()).unwrap();
        let fb = digest_file(File::open(&b).unwrap().as_fd()).unwrap();
        assert_ne!(fa, fb);
    }

    fn kind_strategy() -> impl Strategy<Value = EntryKind> {
        prop_oneof![
            Just(EntryKind::Directory),
            Just(EntryKind::Symlink),
            Just(EntryKind::Regular),
            Just(EntryKind::Other),
        ]
    }

    fn listing_strategy() -> impl Strategy<Value = Vec<(String, EntryKind)>> {
        // Names never start with a dot, so `.` and `..` cannot be generated.
        prop::collection::btree_map("[a-z0-9_-][a-z0-9._-]{0,11}", kind_strategy(), 1..24)
            .prop_map(|m| m.into_iter().collect())
    }

    fn digest_of(listing: &[(String, EntryKind)]) -> Fingerprint {
        digest_entry_set(listing.iter().map(|(n, k)| (n.as_bytes(), *k)))
    }

    proptest! {
        #[test]
        fn directory_digest_ignores_enumeration_order(
            (listing, shuffled) in listing_strategy()
                .prop_flat_map(|l| (Just(l.clone()), Just(l).prop_shuffle()))
        ) {
            prop_assert_eq!(digest_of(&listing), digest_of(&shuffled));
        }

        #[test]
        fn removing_an_entry_changes_directory_digest(
            listing in listing_strategy(),
            index in any::<prop::sample::Index>(),
        ) {
            let mut smaller = listing.clone();
            smaller.remove(index.index(listing.len()));
            prop_assert_ne!(digest_of(&listing), digest_of(&smaller));
        }

        #[test]
        fn retyping_an_entry_changes_directory_digest(
            listing in listing_strategy(),
            index in any::<prop::sample::Index>(),
            kind in kind_strategy(),
        ) {
            let i = index.index(listing.len());
            prop_assume!(listing[i].1 != kind);
            let mut retyped = listing.clone();
            retyped[i].1 = kind;
            prop_assert_ne!(digest_of(&listing), digest_of(&retyped));
        }

        #[test]
        fn renaming_an_entry_changes_directory_digest(
            listing in listing_strategy(),
            index in any::<prop::sample::Index>(),
            suffix in "[A-Z]{1,4}",
        ) {
            let i = index.index(listing.len());
            let mut renamed = listing.clone();
            renamed[i].0.push_str(&suffix);
            prop_assert_ne!(digest_of(&listing), digest_of(&renamed));
        }

        #[test]
        fn adding_an_entry_changes_directory_digest(
            listing in listing_strategy(),
            kind in kind_strategy(),
        ) {
            let mut larger = listing.clone();
            larger.push(("NEW-ENTRY".to_string(), kind));
            prop_assert_ne!(digest_of(&listing), digest_of(&larger));
        }
    }
}
