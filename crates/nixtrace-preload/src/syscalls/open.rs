use std::ffi::CStr;
use std::os::fd::BorrowedFd;

use libc::{c_char, c_int, mode_t};
use nixtrace_core::is_input_open;

use crate::reals::*;
use crate::state::{context, ErrnoGuard};

unsafe fn observe_open(path: *const c_char, flags: c_int, fd: c_int) {
    if path.is_null() || !is_input_open(flags) {
        return;
    }
    let _errno = ErrnoGuard::save();
    let Some(ctx) = context() else {
        return;
    };
    // SAFETY: `fd` was just returned by the real open and the caller cannot
    // have closed it yet.
    let opened = (fd >= 0).then(|| BorrowedFd::borrow_raw(fd));
    ctx.observe_open(CStr::from_ptr(path).to_bytes(), opened);
}

#[cfg_attr(target_os = "macos", no_mangle)]
pub unsafe extern "C" fn trace_nix_open_hook(
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    let fd = real_open(path, flags, mode);
    observe_open(path, flags, fd);
    fd
}

#[cfg(target_os = "linux")]
pub unsafe extern "C" fn open64_hook(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let fd = real_open64(path, flags, mode);
    observe_open(path, flags, fd);
    fd
}
