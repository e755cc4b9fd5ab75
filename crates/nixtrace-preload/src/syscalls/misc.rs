//! Scratch directory lifecycle: `mkdir` and `unlinkat(AT_REMOVEDIR)`.

use std::ffi::CStr;

use libc::{c_char, c_int, mode_t};
use nixtrace_config::log_hook_debug;
use nixtrace_core::PlatformResolver;

use crate::reals::*;
use crate::state::{context, ErrnoGuard};

pub unsafe extern "C" fn mkdir_hook(path: *const c_char, mode: mode_t) -> c_int {
    let ret = real_mkdir(path, mode);
    if ret != 0 || path.is_null() {
        return ret;
    }

    let _errno = ErrnoGuard::save();
    if let Some(ctx) = context() {
        ctx.observe_mkdir(CStr::from_ptr(path).to_bytes(), true);
    }
    ret
}

pub unsafe extern "C" fn unlinkat_hook(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int {
    let ret = real_unlinkat(dirfd, path, flags);
    if ret != 0 || path.is_null() {
        return ret;
    }

    let _errno = ErrnoGuard::save();
    if let Some(ctx) = context() {
        let name = CStr::from_ptr(path).to_bytes();
        log_hook_debug!("unlinkat", dirfd = dirfd, flags = flags);
        ctx.observe_unlinkat(&PlatformResolver::default(), dirfd, name, flags, true);
    }
    ret
}
