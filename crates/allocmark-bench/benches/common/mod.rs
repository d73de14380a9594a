//! Shared start-up for the timed benches.

use allocmark_core::{INSTRUMENTED, times_instrumented_barrier};

/// Exits with status 2 when the barrier under measurement carries the
/// diagnostic probe hook.
pub fn refuse_instrumented_build(bench: &str) {
    let args: Vec<String> = std::env::args().collect();
    if times_instrumented_barrier(INSTRUMENTED, &args) {
        eprintln!(
            "{bench}: allocmark-core was built with the `diagnostics` feature, \
             which puts a probe hook on the measured path; run `cargo bench -p allocmark-bench`"
        );
        std::process::exit(2);
    }
}
