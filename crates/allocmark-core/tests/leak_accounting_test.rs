//! Allocation balance of every strategy under a counting global allocator.

use allocmark_core::tracking::{self, AllocStats};
use allocmark_core::{BufferPool, CountingAllocator, SIZES, StrategyRegistry};

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator::system();

const ITERATIONS: usize = 200;

// One test so that nothing else touches the shared pool concurrently.
#[test]
fn every_strategy_frees_what_it_allocates() {
    let registry = StrategyRegistry::builtin();

    // Warm-up: fills the pool buckets and any lazy runtime state.
    for case in registry.cases() {
        case.run().expect("warm-up");
    }

    let mut counted = AllocStats::default();
    for case in registry.cases() {
        let available = BufferPool::shared().available(case.size);
        let (result, stats) = tracking::measure(|| {
            for _ in 0..ITERATIONS {
                case.run()?;
            }
            Ok::<_, allocmark_core::AllocError>(())
        });
        result.expect("strategy run");
        assert!(stats.is_balanced(), "{case:?}: {stats:?}");
        assert_eq!(
            BufferPool::shared().available(case.size),
            available,
            "{case:?} changed the pool"
        );
        counted.allocations += stats.allocations;
    }
    assert_eq!(BufferPool::shared().outstanding(), 0);
    assert!(tracking::is_active());

    // Only global-allocator traffic shows up here. The C heap, `System` and
    // allocator instances are balanced per raw block in diagnostic builds.
    let (_, global) = tracking::measure(|| registry.run("global_alloc", SIZES[0]));
    assert_eq!(global.allocations, 1);
    assert_eq!(global.deallocations, 1);
    let (_, native) = tracking::measure(|| registry.run("libc_malloc", SIZES[0]));
    assert_eq!(native.allocations, 0);
    assert!(counted.allocations >= (ITERATIONS * SIZES.len()) as u64);
}
