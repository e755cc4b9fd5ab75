use std::ffi::CStr;

use libc::{c_char, c_int};
use nixtrace_core::StatSnapshot;

use crate::reals::*;
use crate::state::{context, ErrnoGuard};

/// Record an `lstat`-family call that returned `ret`. `snapshot` is only
/// evaluated when the call succeeded and the buffer is filled in.
unsafe fn observe_lstat<F>(path: *const c_char, ret: c_int, snapshot: F)
where
    F: FnOnce() -> StatSnapshot,
{
    if path.is_null() {
        return;
    }
    let _errno = ErrnoGuard::save();
    let Some(ctx) = context() else {
        return;
    };
    let snapshot = if ret == 0 {
        snapshot()
    } else {
        StatSnapshot::Failed
    };
    ctx.observe_lstat(CStr::from_ptr(path), snapshot);
}

pub unsafe extern "C" fn lstat_hook(path: *const c_char, buf: *mut libc::stat) -> c_int {
    let ret = real_lstat(path, buf);
    observe_lstat(path, ret, || {
        StatSnapshot::from_mode((*buf).st_mode, (*buf).st_size as i64)
    });
    ret
}

#[cfg(target_os = "linux")]
pub unsafe extern "C" fn lstat64_hook(path: *const c_char, buf: *mut libc::stat64) -> c_int {
    let ret = real_lstat64(path, buf);
    observe_lstat(path, ret, || {
        StatSnapshot::from_mode((*buf).st_mode, (*buf).st_size as i64)
    });
    ret
}

/// glibc before 2.33 routes `lstat` through `__lxstat`.
#[cfg(target_os = "linux")]
pub unsafe extern "C" fn lxstat_hook(
    ver: c_int,
    path: *const c_char,
    buf: *mut libc::stat,
) -> c_int {
    let ret = real_lxstat(ver, path, buf);
    observe_lstat(path, ret, || {
        StatSnapshot::from_mode((*buf).st_mode, (*buf).st_size as i64)
    });
    ret
}

#[cfg(target_os = "linux")]
pub unsafe extern "C" fn lxstat64_hook(
    ver: c_int,
    path: *const c_char,
    buf: *mut libc::stat64,
) -> c_int {
    let ret = real_lxstat64(ver, path, buf);
    observe_lstat(path, ret, || {
        StatSnapshot::from_mode((*buf).st_mode, (*buf).st_size as i64)
    });
    ret
}
