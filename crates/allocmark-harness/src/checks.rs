//! Execution-contract checks for individual cases.
//!
//! Each case runs once unobserved (warming the pool and any lazily
//! initialized state), then `iterations` times behind a recording probe that
//! overwrites every buffer with a canary after inspecting it. The probe sees
//! exactly what the use-barrier sees, so the checks cover:
//! - one barrier pass per cycle, over exactly `size` bytes
//! - the requested alignment
//! - zero-fill for zeroing strategies, including after a canary was written
//!   into the previous buffer
//! - full addressability for everything else (the canary write)
//! - allocate/release balance, counted where the strategy's memory comes
//!   from: raw blocks for the C heap, `System` and loaded instances, the pool
//!   counters for pooled buffers, and the global allocator (only when a
//!   counting allocator is registered) for everything else

use std::time::Instant;

use allocmark_core::diagnostics::{self, RawBlockStats};
use allocmark_core::strategy::{Accounting, AllocStrategy, Family, Zeroing};
use allocmark_core::tracking::{self, AllocStats};
use allocmark_core::{AllocError, BufferPool, SIZES, StrategyRegistry};
use serde::{Deserialize, Serialize};

use crate::structured_log::Outcome;

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub iterations: usize,
    pub sizes: Vec<usize>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            iterations: 100,
            sizes: SIZES.to_vec(),
        }
    }
}

/// Outcome and observations of one (strategy, size) case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub strategy: String,
    pub family: Family,
    pub zeroing: Zeroing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<usize>,
    pub size: usize,
    pub iterations: usize,
    pub outcome: Outcome,
    /// Mean time per cycle, probe included. Not a benchmark figure.
    pub latency_ns: u64,
    /// Smallest power of two dividing every observed address.
    pub observed_alignment: usize,
    /// Cycles that saw a canary left by an earlier cycle.
    pub canary_hits: usize,
    pub accounting: Accounting,
    /// Global allocator traffic; zero unless a counting allocator is registered.
    pub allocations: AllocStats,
    pub raw_blocks: RawBlockStats,
    /// False when no counter covers the strategy's allocator.
    pub leak_checked: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl CaseResult {
    fn new(strategy: &dyn AllocStrategy, size: usize, iterations: usize) -> Self {
        let profile = strategy.profile();
        Self {
            strategy: strategy.name().to_owned(),
            family: profile.family,
            zeroing: profile.zeroing,
            alignment: profile.alignment,
            size,
            iterations,
            outcome: Outcome::Pass,
            latency_ns: 0,
            observed_alignment: 0,
            canary_hits: 0,
            accounting: profile.family.accounting(),
            allocations: AllocStats::default(),
            raw_blocks: RawBlockStats::default(),
            leak_checked: false,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, reason: String) {
        if self.outcome == Outcome::Pass {
            self.outcome = Outcome::Fail;
        }
        self.failures.push(reason);
    }

    fn error(mut self, err: &AllocError) -> Self {
        self.outcome = Outcome::Error;
        self.failures.push(err.to_string());
        self
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Pass | Outcome::Skip)
    }
}

/// Runs one case and checks it.
#[must_use]
pub fn verify_case(strategy: &dyn AllocStrategy, size: usize, iterations: usize) -> CaseResult {
    let mut result = CaseResult::new(strategy, size, iterations);
    if iterations == 0 {
        result.outcome = Outcome::Skip;
        return result;
    }
    if let Err(err) = strategy.run(size) {
        return result.error(&err);
    }

    let profile = strategy.profile();
    let pool = BufferPool::shared();
    let available_before = pool.available(size);
    let outstanding_before = pool.outstanding();

    let (guard, tally) = diagnostics::record(true);
    let raw_before = diagnostics::raw_blocks();
    let start = Instant::now();
    let (run, stats) = tracking::measure(|| {
        for _ in 0..iterations {
            strategy.run(size)?;
        }
        Ok::<_, AllocError>(())
    });
    let elapsed = start.elapsed();
    let raw = diagnostics::raw_blocks().since(raw_before);
    drop(guard);

    if let Err(err) = run {
        return result.error(&err);
    }

    let seen = tally.get();
    result.latency_ns = u64::try_from(elapsed.as_nanos() / iterations as u128).unwrap_or(u64::MAX);
    result.observed_alignment = seen.min_alignment;
    result.canary_hits = seen.canary_hits;
    result.allocations = stats;
    result.raw_blocks = raw;

    if seen.calls != iterations {
        result.fail(format!(
            "use-barrier saw {} calls for {iterations} cycles",
            seen.calls
        ));
    }
    if seen.min_len != size || seen.max_len != size {
        result.fail(format!(
            "use-barrier saw {}..={} bytes, expected {size}",
            seen.min_len, seen.max_len
        ));
    }
    let required = profile.required_alignment();
    if seen.min_alignment < required {
        result.fail(format!(
            "address aligned to {} bytes, expected {required}",
            seen.min_alignment
        ));
    }
    if profile.zeroing == Zeroing::Zeroed {
        if seen.uninitialized > 0 {
            result.fail(format!(
                "{} buffers handed over without initialized contents",
                seen.uninitialized
            ));
        }
        if seen.nonzero > 0 {
            result.fail(format!(
                "{} of {} buffers were not zero-filled",
                seen.nonzero, seen.calls
            ));
        }
        if seen.canary_hits > 0 {
            result.fail(format!(
                "canary from an earlier cycle observed {} times",
                seen.canary_hits
            ));
        }
    }
    match result.accounting {
        Accounting::RawBlock => {
            result.leak_checked = true;
            if raw.adopted != iterations as u64 {
                result.fail(format!(
                    "{} raw blocks adopted for {iterations} cycles",
                    raw.adopted
                ));
            }
            if !raw.is_balanced() {
                result.fail(format!(
                    "{} raw blocks adopted against {} released",
                    raw.adopted, raw.released
                ));
            }
        }
        Accounting::Pool => {
            result.leak_checked = true;
            let available_after = pool.available(size);
            if available_after != available_before {
                result.fail(format!(
                    "pool bucket held {available_before} buffers before and {available_after} after"
                ));
            }
            if pool.outstanding() != outstanding_before {
                result.fail(format!(
                    "{} pooled buffers left outstanding",
                    pool.outstanding().saturating_sub(outstanding_before)
                ));
            }
        }
        Accounting::GlobalAllocator | Accounting::Frame => {
            result.leak_checked = tracking::is_active();
        }
    }
    if tracking::is_active() && !stats.is_balanced() {
        result.fail(format!(
            "{} allocations ({} bytes) against {} frees ({} bytes)",
            stats.allocations, stats.bytes_allocated, stats.deallocations, stats.bytes_freed
        ));
    }
    result
}

/// Verifies every strategy of `registry` at every size of `options`, in
/// registry order. `on_case` sees each result as soon as it is available.
pub fn verify_registry(
    registry: &StrategyRegistry,
    options: &VerifyOptions,
    mut on_case: impl FnMut(&CaseResult),
) -> Vec<CaseResult> {
    let mut results = Vec::with_capacity(registry.len() * options.sizes.len());
    for strategy in registry.iter() {
        for &size in &options.sizes {
            let result = verify_case(strategy, size, options.iterations);
            on_case(&result);
            results.push(result);
        }
    }
    results
}
