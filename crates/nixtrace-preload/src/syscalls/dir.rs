use std::ffi::CStr;
use std::ptr::NonNull;

use libc::{c_char, DIR};
use nixtrace_core::RawDirStream;

use crate::reals::*;
use crate::state::{context, ErrnoGuard};

/// The returned stream is read to the end for its fingerprint and then
/// rewound, so the caller still sees every entry.
pub unsafe extern "C" fn opendir_hook(path: *const c_char) -> *mut DIR {
    let dir = real_opendir(path);
    if path.is_null() {
        return dir;
    }

    let _errno = ErrnoGuard::save();
    let Some(ctx) = context() else {
        return dir;
    };
    let path = CStr::from_ptr(path).to_bytes();
    match NonNull::new(dir) {
        Some(handle) => {
            // SAFETY: the stream was just opened and is not yet visible to
            // the caller.
            let mut stream = RawDirStream::new(handle);
            ctx.observe_opendir(path, Some(&mut stream));
        }
        None => ctx.observe_opendir(path, None),
    }
    dir
}
