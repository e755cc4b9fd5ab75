//! # trace-nix
//!
//! LD_PRELOAD / DYLD_INSERT_LIBRARIES library that records every file,
//! directory and symlink a Nix evaluation looks at, with a fingerprint of its
//! state at that moment, into the file named by `TRACE_NIX`.
//!
//! Each replaced entry point forwards to the real implementation first and
//! returns its result and errno untouched; the observation happens afterwards.

// Replacement entry points are C ABI by nature.
#![allow(clippy::missing_safety_doc)]

pub mod interpose;
pub mod reals;
pub mod state;
pub mod syscalls;

/// Runs bootstrap when the library is loaded, before `main` of the traced
/// program. Hooks still call `initialize_once` in case another library's
/// constructor reaches them first.
#[used]
#[cfg_attr(target_os = "linux", link_section = ".init_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static INIT: extern "C" fn() = {
    extern "C" fn init() {
        crate::state::initialize_once();
    }
    init
};
