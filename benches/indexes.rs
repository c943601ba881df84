//! Benchmarks for the transactional indexes using Divan.
//!
//! Run with: `cargo bench --bench indexes`

use divan::{Bencher, black_box};

use occtable::params::OpaqueRmw;
use occtable::{HashIndex, OrderedIndex, ThreadContext, Transaction};

fn main() {
    divan::main();
}

const PRELOAD: u64 = 10_000;

// =============================================================================
// Hash index
// =============================================================================

#[divan::bench_group]
mod hash {
    use super::*;

    fn preloaded() -> HashIndex<u64, u64, OpaqueRmw> {
        let index: HashIndex<u64, u64, OpaqueRmw> = HashIndex::new(4_096);

        for i in 0..PRELOAD {
            index.nontrans_put(&i, i);
        }

        index
    }

    #[divan::bench]
    fn select_hit(bencher: Bencher) {
        let index = preloaded();
        let mut thread = ThreadContext::new();
        let mut key: u64 = 0;

        bencher.bench_local(|| {
            key = (key + 7) % PRELOAD;

            Transaction::run(&mut thread, |txn| {
                Ok(black_box(index.select_row(txn, &key, false)?.is_some()))
            })
        });
    }

    #[divan::bench]
    fn select_miss(bencher: Bencher) {
        let index = preloaded();
        let mut thread = ThreadContext::new();
        let mut key: u64 = PRELOAD;

        bencher.bench_local(|| {
            key += 1;

            Transaction::run(&mut thread, |txn| {
                Ok(black_box(index.select_row(txn, &key, false)?.is_none()))
            })
        });
    }

    #[divan::bench]
    fn insert_fresh(bencher: Bencher) {
        let index: HashIndex<u64, u64, OpaqueRmw> = HashIndex::new(4_096);
        let mut thread = ThreadContext::new();
        let mut key: u64 = 0;

        bencher.bench_local(|| {
            key += 1;

            Transaction::run(&mut thread, |txn| {
                index.insert_row(txn, &key, key, false).map(black_box)
            })
        });
    }

    #[divan::bench]
    fn update_roundtrip(bencher: Bencher) {
        let index = preloaded();
        let mut thread = ThreadContext::new();
        let mut key: u64 = 0;

        bencher.bench_local(|| {
            key = (key + 13) % PRELOAD;

            Transaction::run(&mut thread, |txn| {
                let (row, v) = index.select_row(txn, &key, true)?.expect("preloaded");
                index.update_row(txn, row, v + 1);
                Ok(())
            });
        });
    }
}

// =============================================================================
// Ordered index
// =============================================================================

#[divan::bench_group]
mod ordered {
    use super::*;

    fn preloaded() -> OrderedIndex<u64, u64, OpaqueRmw> {
        let index: OrderedIndex<u64, u64, OpaqueRmw> = OrderedIndex::new();

        for i in 0..PRELOAD {
            index.nontrans_put(&i, i);
        }

        index
    }

    #[divan::bench]
    fn select_hit(bencher: Bencher) {
        let index = preloaded();
        let mut thread = ThreadContext::new();
        let mut key: u64 = 0;

        bencher.bench_local(|| {
            key = (key + 7) % PRELOAD;

            Transaction::run(&mut thread, |txn| {
                Ok(black_box(index.select_row(txn, &key, false)?.is_some()))
            })
        });
    }

    #[divan::bench]
    fn insert_sequential(bencher: Bencher) {
        let index: OrderedIndex<u64, u64, OpaqueRmw> = OrderedIndex::new();
        let mut thread = ThreadContext::new();
        let mut key: u64 = 0;

        bencher.bench_local(|| {
            key += 1;

            Transaction::run(&mut thread, |txn| {
                index.insert_row(txn, &key, key, false).map(black_box)
            })
        });
    }

    #[divan::bench(args = [16, 256])]
    fn range_scan(bencher: Bencher, span: u64) {
        let index = preloaded();
        let mut thread = ThreadContext::new();
        let mut lo: u64 = 0;

        bencher.bench_local(|| {
            lo = (lo + 97) % (PRELOAD - span);

            Transaction::run(&mut thread, |txn| {
                let mut count: u64 = 0;

                index.range_scan(txn, &lo, &(lo + span), false, |_, _| {
                    count += 1;
                    true
                })?;

                Ok(black_box(count))
            })
        });
    }
}
