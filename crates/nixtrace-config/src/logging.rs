//! Structured diagnostics for the tracer itself.
//!
//! These never reach the trace log; they go to stderr, and only when
//! `TRACE_NIX_LOG` installed a subscriber.
//!
//! # Usage
//!
//! ```ignore
//! use nixtrace_config::log_digest_debug;
//!
//! log_digest_debug!("Mapped file", size = 4096);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const BOOTSTRAP: &'static str = "BOOTSTRAP";
    pub const HOOK: &'static str = "HOOK";
    pub const DIGEST: &'static str = "DIGEST";
    pub const SINK: &'static str = "SINK";
    pub const SCRATCH: &'static str = "SCRATCH";
}

// === BOOTSTRAP logging macros ===

#[macro_export]
macro_rules! log_bootstrap_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "BOOTSTRAP", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_bootstrap_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "BOOTSTRAP", $($key = $value,)* $msg)
    };
}

// === HOOK logging macros ===

#[macro_export]
macro_rules! log_hook_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "HOOK", $($key = $value,)* $msg)
    };
}

// === DIGEST logging macros ===

#[macro_export]
macro_rules! log_digest_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "DIGEST", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_digest_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "DIGEST", $($key = $value,)* $msg)
    };
}

// === SINK logging macros ===

#[macro_export]
macro_rules! log_sink_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "SINK", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sink_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "SINK", $($key = $value,)* $msg)
    };
}

// === SCRATCH logging macros ===

#[macro_export]
macro_rules! log_scratch_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "SCRATCH", $($key = $value,)* $msg)
    };
}

/// Install a stderr subscriber filtered by `directive`.
///
/// Returns false when the host program already installed its own global
/// subscriber; that one is left alone.
pub fn init_logging(directive: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
