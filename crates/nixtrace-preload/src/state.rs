//! Load-time bootstrap, the shared trace context, and errno handling.

use std::sync::atomic::{AtomicU8, Ordering};

use libc::c_int;
use nixtrace_config::logging::init_logging;
use nixtrace_config::{log_bootstrap_info, TraceConfig};
use nixtrace_core::TraceContext;
use once_cell::sync::OnceCell;

// ============================================================================
// Bootstrap state machine
// ============================================================================
//
// UNINIT -> BUSY -> READY. Hooks entered while BUSY, including the ones that
// bootstrap itself reaches (opening the log), pass straight through.

const UNINIT: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINIT);
static CONTEXT: OnceCell<TraceContext> = OnceCell::new();

/// Build the process-wide context. Idempotent; only the first caller does
/// any work.
pub fn initialize_once() {
    if STATE
        .compare_exchange(UNINIT, BUSY, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let _ = CONTEXT.set(bootstrap());
    STATE.store(READY, Ordering::Release);
}

fn bootstrap() -> TraceContext {
    let config = TraceConfig::from_env();
    TraceConfig::strip_injection_env();

    if let Some(directive) = config.diagnostics.as_deref() {
        init_logging(directive);
    }
    log_bootstrap_info!("Loaded", pid = config.pid);

    TraceContext::from_config(&config)
}

/// The context to record into, or `None` if this call should pass through.
#[inline]
pub fn context() -> Option<&'static TraceContext> {
    initialize_once();
    if STATE.load(Ordering::Acquire) != READY {
        return None;
    }
    CONTEXT.get().filter(|ctx| ctx.is_enabled())
}

// ============================================================================
// errno
// ============================================================================

#[cfg(target_os = "linux")]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(target_os = "macos")]
unsafe fn errno_location() -> *mut c_int {
    libc::__error()
}

pub fn errno() -> c_int {
    unsafe { *errno_location() }
}

pub fn set_errno(value: c_int) {
    unsafe { *errno_location() = value }
}

/// Puts back the errno of the real call when instrumentation is done.
pub struct ErrnoGuard(c_int);

impl ErrnoGuard {
    pub fn save() -> Self {
        Self(errno())
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        set_errno(self.0);
    }
}
