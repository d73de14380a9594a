//! Full verification pass over the built-in registry with leak accounting.

use allocmark_core::strategy::{AllocStrategy, Family, StrategyProfile, Zeroing};
use allocmark_core::{
    AllocError, BufferPool, BufferView, CountingAllocator, SIZES, StrategyRegistry, use_buffer,
};
use allocmark_harness::structured_log::{
    LogEmitter, LogEntry, LogLevel, Outcome, validate_log_line,
};
use allocmark_harness::{VerifyOptions, VerifyReport, verify_case, verify_registry};

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator::system();

// Single test: the shared pool must not see concurrent renters.
#[test]
fn builtin_registry_passes_verification() {
    let registry = StrategyRegistry::builtin();
    let options = VerifyOptions {
        iterations: 64,
        ..VerifyOptions::default()
    };
    let mut emitter = LogEmitter::to_buffer("it", "verify");

    let cases = verify_registry(&registry, &options, |case| {
        emitter
            .emit_entry(
                LogEntry::new(String::new(), LogLevel::Info, "case_result")
                    .with_strategy(case.strategy.as_str(), case.family.as_str())
                    .with_size(case.size)
                    .with_outcome(case.outcome),
            )
            .expect("in-memory log");
    });

    assert_eq!(cases.len(), registry.len() * SIZES.len());
    for case in &cases {
        assert_eq!(
            case.outcome,
            Outcome::Pass,
            "{} {}: {:?}",
            case.strategy,
            case.size,
            case.failures
        );
        assert!(case.leak_checked, "{}", case.strategy);
    }

    let pooled: Vec<_> = cases
        .iter()
        .filter(|c| c.strategy == "pool_rent_return")
        .collect();
    assert_eq!(pooled.len(), SIZES.len());
    assert_eq!(BufferPool::shared().outstanding(), 0);
    assert!(BufferPool::shared().available(4) >= 1);

    let aligned = cases
        .iter()
        .find(|c| c.strategy == "libc_aligned" && c.size == 1024)
        .expect("libc_aligned/1024");
    assert!(aligned.observed_alignment >= 64);

    let report = VerifyReport::new("it", &options, cases);
    assert!(report.passed());
    assert!(report.counting_allocator);

    let log = String::from_utf8(emitter.into_inner()).expect("utf-8 log");
    assert_eq!(log.lines().count(), report.summary.total);
    for (i, line) in log.lines().enumerate() {
        let entry = validate_log_line(line, i + 1).expect("valid log line");
        assert!(entry.trace_id.starts_with("it::verify::"));
    }
}

/// Runtime-array strategy that never frees its buffer.
struct LeakyVec;

impl AllocStrategy for LeakyVec {
    fn name(&self) -> &str {
        "leaky_vec"
    }

    fn profile(&self) -> StrategyProfile {
        StrategyProfile::new(Family::RuntimeArray, Zeroing::Zeroed, None)
    }

    fn run(&self, size: usize) -> Result<(), AllocError> {
        let buffer: &'static mut [u8] = Box::leak(vec![0u8; size].into_boxed_slice());
        use_buffer(BufferView::new(buffer));
        Ok(())
    }
}

#[test]
fn leaking_runtime_array_fails_under_the_counting_allocator() {
    let result = verify_case(&LeakyVec, 4096, 20);
    assert_eq!(result.outcome, Outcome::Fail);
    assert!(result.leak_checked);
    assert_eq!(result.allocations.allocations, 20);
    assert_eq!(result.allocations.deallocations, 0);
    assert!(
        result.failures.iter().any(|f| f.contains("20 allocations")),
        "{:?}",
        result.failures
    );
}
