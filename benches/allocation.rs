#![feature(test)]
extern crate test;
use test::Bencher;

use std::alloc::{GlobalAlloc as _, Layout};

mod repeated_allocation_deallocation {
    use super::*;

    /// Run a benchmark, which repeatedly allocates and deallocates the same
    /// block. The benchmark will allocate the given amount of blocks beforehand
    /// (before running the actual benchmark) in order to fill up the heap with
    /// unrelated allocations.
    ///
    /// # Panics
    /// This will panic, if the requested pre-allocations will fill up the whole
    /// heap (so the actual benchmark cannot allocate blocks anymore).
    fn benchmark_with_preallocation(b: &mut Bencher, pre_allocations: usize) {
        let allocator = bestfit::Allocator::<{ 64 * 1024 }>::new();
        // pre-allocate much memory to see the real impact of the linear search
        for _ in 0..pre_allocations {
            unsafe { allocator.alloc(Layout::new::<u8>()) };
        }

        let layout = Layout::new::<u8>();

        // make sure, that there is enough room for the next allocation
        let ptr = unsafe { allocator.alloc(layout) };
        assert_ne!(ptr, std::ptr::null_mut::<u8>());
        unsafe { allocator.dealloc(ptr, layout) };

        // run actual benchmark: allocate & deallocate the same block repeatedly
        b.iter(|| {
            let ptr = unsafe { allocator.alloc(layout) };
            let ptr = test::black_box(ptr);
            unsafe { allocator.dealloc(ptr, layout) };
        });
    }

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 510);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 1020);
    }
}

mod fragmented_pool {
    use super::*;

    /// Allocate from a pool, where every other block is free, so the best-fit
    /// search has to look at many candidates.
    #[bench]
    fn best_fit_search(b: &mut Bencher) {
        let mut pool = bestfit::RawAllocator::new(vec![0u8; 256 * 1024]).unwrap();
        let payloads: Vec<_> = (0..1000).map(|_| pool.alloc(64).unwrap()).collect();
        for payload in payloads.iter().step_by(2) {
            pool.free(*payload).unwrap();
        }

        b.iter(|| {
            let payload = pool.alloc(test::black_box(16)).unwrap();
            pool.free(payload).unwrap();
        });
    }
}
