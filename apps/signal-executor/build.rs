//! Build Script for Signal Executor
//!
//! Emits the `coverage` cfg so code can be excluded from instrumented runs
//! with `#[cfg(not(coverage))]`.

use std::env;

fn main() {
    // Set profile file pattern for coverage runs
    // This ensures unique profile files per process/module
    #[cfg(coverage)]
    {
        println!("cargo:rustc-env=LLVM_PROFILE_FILE=coverage-%p-%m.profraw");
    }

    // Rerun build script if it changes
    println!("cargo:rerun-if-changed=build.rs");

    // Emit cfg for coverage detection
    // Usage: #[cfg(coverage)] or #[cfg(not(coverage))]
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }
}
