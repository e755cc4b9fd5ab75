//! Symbol replacement.
//!
//! Linux: exported definitions that shadow libc through LD_PRELOAD.
//! macOS: a `__DATA,__interpose` table read by dyld.
#![allow(clippy::missing_safety_doc)]

use libc::{c_char, c_int};
#[cfg(target_os = "linux")]
use libc::{mode_t, DIR};

use crate::syscalls::dir::opendir_hook;
use crate::syscalls::misc::{mkdir_hook, unlinkat_hook};
use crate::syscalls::stat::lstat_hook;
#[cfg(target_os = "linux")]
use crate::syscalls::{
    open::{open64_hook, trace_nix_open_hook},
    stat::{lstat64_hook, lxstat64_hook, lxstat_hook},
};

// =============================================================================
// Linux LD_PRELOAD Symbol Exports
// =============================================================================

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    lstat_hook(path, buf)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn lstat64(path: *const c_char, buf: *mut libc::stat64) -> c_int {
    lstat64_hook(path, buf)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn __lxstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    lxstat_hook(ver, path, buf)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn __lxstat64(
    ver: c_int,
    path: *const c_char,
    buf: *mut libc::stat64,
) -> c_int {
    lxstat64_hook(ver, path, buf)
}

// `mode` is only meaningful with O_CREAT; it is forwarded as received.
#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    trace_nix_open_hook(path, flags, mode)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    open64_hook(path, flags, mode)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn opendir(path: *const c_char) -> *mut DIR {
    opendir_hook(path)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn mkdir(path: *const c_char, mode: mode_t) -> c_int {
    mkdir_hook(path, mode)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn unlinkat(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int {
    unlinkat_hook(dirfd, path, flags)
}

// =============================================================================
// macOS interpose table
// =============================================================================

#[cfg(target_os = "macos")]
#[repr(C)]
pub struct Interpose {
    pub new_func: *const (),
    pub old_func: *const (),
}

#[cfg(target_os = "macos")]
unsafe impl Sync for Interpose {}

#[cfg(target_os = "macos")]
extern "C" {
    // src/c/variadic_open.c
    fn trace_nix_open_variadic(path: *const c_char, flags: c_int, ...) -> c_int;
}

#[cfg(target_os = "macos")]
#[link_section = "__DATA,__interpose"]
#[used]
pub static IT_LSTAT: Interpose = Interpose {
    new_func: lstat_hook as *const (),
    old_func: libc::lstat as *const (),
};

#[cfg(target_os = "macos")]
#[link_section = "__DATA,__interpose"]
#[used]
pub static IT_OPEN: Interpose = Interpose {
    new_func: trace_nix_open_variadic as *const (),
    old_func: libc::open as *const (),
};

#[cfg(target_os = "macos")]
#[link_section = "__DATA,__interpose"]
#[used]
pub static IT_OPENDIR: Interpose = Interpose {
    new_func: opendir_hook as *const (),
    old_func: libc::opendir as *const (),
};

#[cfg(target_os = "macos")]
#[link_section = "__DATA,__interpose"]
#[used]
pub static IT_MKDIR: Interpose = Interpose {
    new_func: mkdir_hook as *const (),
    old_func: libc::mkdir as *const (),
};

#[cfg(target_os = "macos")]
#[link_section = "__DATA,__interpose"]
#[used]
pub static IT_UNLINKAT: Interpose = Interpose {
    new_func: unlinkat_hook as *const (),
    old_func: libc::unlinkat as *const (),
};
