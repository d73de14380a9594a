//! Observations on how independent the three allocator instances are.
//!
//! Nothing here passes or fails. The report prints whether live blocks of
//! different instances ever share an address range, and the timings compare
//! one instance serving every cycle against the three taking turns.

mod common;

use std::ffi::c_void;

use allocmark_core::{AllocatorInstance, InstanceConfig, InstanceSet, SIZES};
use criterion::{BenchmarkId, Criterion, criterion_group};

const LIVE_BLOCKS: usize = 64;

fn instances() -> Option<InstanceSet> {
    let config = match InstanceConfig::from_env() {
        Ok(Some(config)) => config,
        Ok(None) => {
            eprintln!("instance_isolation: no allocator instances configured, skipping");
            return None;
        }
        Err(err) => {
            eprintln!("instance_isolation: {err}");
            std::process::exit(2);
        }
    };
    match InstanceSet::load(&config) {
        Ok(set) => Some(set),
        Err(err) => {
            eprintln!("instance_isolation: {err}");
            std::process::exit(2);
        }
    }
}

/// Address span `[min, max)` covered by `LIVE_BLOCKS` live blocks of `size`.
fn live_span(instance: &AllocatorInstance, size: usize) -> (usize, usize) {
    let entry = instance.entry_points();
    let mut blocks: Vec<*mut c_void> = Vec::with_capacity(LIVE_BLOCKS);
    for _ in 0..LIVE_BLOCKS {
        // SAFETY: released below with the same instance's `free`.
        let ptr = unsafe { (entry.malloc)(size) };
        assert!(!ptr.is_null(), "{}: malloc({size}) failed", instance.label());
        blocks.push(ptr);
    }
    let lo = blocks.iter().map(|p| *p as usize).min().unwrap_or(0);
    let hi = blocks.iter().map(|p| *p as usize + size).max().unwrap_or(0);
    for ptr in blocks {
        // SAFETY: allocated above by this instance and not yet freed.
        unsafe { (entry.free)(ptr) };
    }
    (lo, hi)
}

fn report_overlap(set: &InstanceSet) {
    for &size in &SIZES {
        let spans: Vec<_> = set
            .iter()
            .map(|instance| (instance.label().to_owned(), live_span(instance, size)))
            .collect();
        for (i, (a, (a_lo, a_hi))) in spans.iter().enumerate() {
            for (b, (b_lo, b_hi)) in &spans[i + 1..] {
                let overlap = a_lo < b_hi && b_lo < a_hi;
                eprintln!(
                    "instance_isolation: size={size} {a}=[{a_lo:#x},{a_hi:#x}) {b}=[{b_lo:#x},{b_hi:#x}) overlap={overlap}"
                );
            }
        }
    }
}

fn cycle(instance: &AllocatorInstance, size: usize) {
    let entry = instance.entry_points();
    // SAFETY: `malloc` / `free` of one instance, paired.
    unsafe {
        let ptr = (entry.malloc)(size);
        assert!(!ptr.is_null());
        criterion::black_box(ptr);
        (entry.free)(ptr);
    }
}

fn bench_instance_isolation(c: &mut Criterion) {
    let Some(set) = instances() else {
        return;
    };
    report_overlap(&set);

    let mut group = c.benchmark_group("instance_isolation");
    for &size in &SIZES {
        if let Some(first) = set.get(0) {
            group.bench_with_input(BenchmarkId::new("single", size), &size, |b, &sz| {
                b.iter(|| cycle(first, sz));
            });
        }
        group.bench_with_input(BenchmarkId::new("round_robin", size), &size, |b, &sz| {
            b.iter(|| {
                for instance in set.iter() {
                    cycle(instance, sz);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_instance_isolation);

fn main() {
    common::refuse_instrumented_build("instance_isolation");
    benches();
    Criterion::default().configure_from_args().final_summary();
}
