//! The original implementations behind every replaced entry point.
//!
//! On Linux each one is looked up with `dlsym(RTLD_NEXT)` on first use and
//! cached. On macOS the interpose table leaves this library's own references
//! unbound, so calling the libc function directly reaches the original.

use libc::{c_char, c_int, mode_t, DIR};
#[cfg(target_os = "linux")]
use libc::c_void;
#[cfg(target_os = "linux")]
use std::sync::atomic::{AtomicPtr, Ordering};

#[cfg(target_os = "linux")]
use crate::state::set_errno;

/// Lazily resolved pointer to the next definition of a symbol.
#[cfg(target_os = "linux")]
pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    /// NUL-terminated.
    name: &'static str,
}

#[cfg(target_os = "linux")]
impl RealSymbol {
    pub const fn new(name: &'static str) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    /// Null if no later object defines the symbol.
    pub unsafe fn get(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        // Racing threads resolve to the same address; last store wins.
        let f = libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr() as *const c_char);
        self.ptr.store(f, Ordering::Release);
        f
    }
}

/// Defines `$name(args) -> ret` calling the original `$sym`. A symbol that
/// cannot be resolved yields `$fail` with errno `ENOSYS`.
#[cfg(target_os = "linux")]
macro_rules! real_fn {
    ($name:ident, $sym:literal, fn($($arg:ident: $ty:ty),*) -> $ret:ty, $fail:expr) => {
        pub unsafe fn $name($($arg: $ty),*) -> $ret {
            static REAL: RealSymbol = RealSymbol::new(concat!($sym, "\0"));
            let f = REAL.get();
            if f.is_null() {
                set_errno(libc::ENOSYS);
                return $fail;
            }
            let f = std::mem::transmute::<*mut c_void, unsafe extern "C" fn($($ty),*) -> $ret>(f);
            f($($arg),*)
        }
    };
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    real_fn!(real_lstat, "lstat", fn(path: *const c_char, buf: *mut libc::stat) -> c_int, -1);
    real_fn!(real_lstat64, "lstat64", fn(path: *const c_char, buf: *mut libc::stat64) -> c_int, -1);
    real_fn!(
        real_lxstat,
        "__lxstat",
        fn(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int,
        -1
    );
    real_fn!(
        real_lxstat64,
        "__lxstat64",
        fn(ver: c_int, path: *const c_char, buf: *mut libc::stat64) -> c_int,
        -1
    );
    real_fn!(real_open, "open", fn(path: *const c_char, flags: c_int, mode: mode_t) -> c_int, -1);
    real_fn!(real_open64, "open64", fn(path: *const c_char, flags: c_int, mode: mode_t) -> c_int, -1);
    real_fn!(real_opendir, "opendir", fn(path: *const c_char) -> *mut DIR, std::ptr::null_mut());
    real_fn!(real_mkdir, "mkdir", fn(path: *const c_char, mode: mode_t) -> c_int, -1);
    real_fn!(
        real_unlinkat,
        "unlinkat",
        fn(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int,
        -1
    );
}

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(target_os = "macos")]
mod macos {
    use super::*;

    pub unsafe fn real_lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
        libc::lstat(path, buf)
    }

    pub unsafe fn real_open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        libc::open(path, flags, libc::c_uint::from(mode))
    }

    pub unsafe fn real_opendir(path: *const c_char) -> *mut DIR {
        libc::opendir(path)
    }

    pub unsafe fn real_mkdir(path: *const c_char, mode: mode_t) -> c_int {
        libc::mkdir(path, mode)
    }

    pub unsafe fn real_unlinkat(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int {
        libc::unlinkat(dirfd, path, flags)
    }
}

#[cfg(target_os = "macos")]
pub use macos::*;
