//! The single exit path for violated tracer invariants.

use std::fmt::Display;
use std::io::Write;

/// Exit status of a traced process killed by the tracer.
pub const FATAL_EXIT_STATUS: i32 = 2;

/// Report an unrecoverable condition on stderr and end the process.
///
/// Continuing would risk logging a fingerprint the downstream cache trusts
/// for an object whose state is unknown.
pub fn abort_with(site: &str, err: impl Display) -> ! {
    tracing::error!(component = "FATAL", site, error = %err, "unrecoverable tracer error");
    let _ = writeln!(std::io::stderr().lock(), "trace-nix: {}: {}", site, err);
    std::process::exit(FATAL_EXIT_STATUS)
}

/// Write a one-line diagnostic that must be visible even without a subscriber.
pub fn diagnostic(msg: impl Display) {
    let _ = writeln!(std::io::stderr().lock(), "trace-nix: {}", msg);
}
