//! Build script for nixtrace-preload
//!
//! On macOS the `open` replacement is a C function so that the optional
//! `mode` argument is read with `va_arg`; Apple arm64 passes variadic
//! arguments on the stack, where a fixed-arity Rust function cannot see them.

fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "macos" {
        println!("cargo:rerun-if-changed=src/c/variadic_open.c");

        cc::Build::new()
            .file("src/c/variadic_open.c")
            .opt_level(2)
            .compile("variadic_open");
    }
}
