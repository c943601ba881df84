//! Multithreaded stress tests for the transactional indexes.
//!
//! These aim at the raciest paths: bucket splicing under concurrent
//! inserts, leaf splits under concurrent readers, commit-time validation
//! under contention, and reclamation churn. Every transaction runs through
//! the retry loop, so the assertions are about the committed outcome, never
//! about which interleaving happened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use occtable::params::{Adaptive, OpaqueRmw};
use occtable::{HashIndex, OrderedIndex, ThreadContext, Transaction, advance_epoch};

const THREADS: u64 = 8;

#[test]
fn hash_concurrent_disjoint_inserts() {
    let index: HashIndex<u64, u64, OpaqueRmw> = HashIndex::new(256);
    let per_thread: u64 = 500;

    thread::scope(|scope| {
        for t in 0..THREADS {
            let index = &index;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for i in 0..per_thread {
                    let key: u64 = t * per_thread + i;

                    Transaction::run(&mut thread_cx, |txn| {
                        index.insert_row(txn, &key, key * 2, false).map(|_| ())
                    });
                }
            });
        }
    });

    let mut thread_cx = ThreadContext::new();

    for key in 0..THREADS * per_thread {
        let value: Option<u64> = Transaction::run(&mut thread_cx, |txn| {
            Ok(index.select_row(txn, &key, false)?.map(|(_, v)| v))
        });

        assert_eq!(value, Some(key * 2), "key {key}");
    }
}

#[test]
fn ordered_concurrent_disjoint_inserts() {
    let index: OrderedIndex<u64, u64, OpaqueRmw> = OrderedIndex::new();
    let per_thread: u64 = 500;

    thread::scope(|scope| {
        for t in 0..THREADS {
            let index = &index;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for i in 0..per_thread {
                    // Interleaved key space: every thread splits leaves
                    // everywhere.
                    let key: u64 = i * THREADS + t;

                    Transaction::run(&mut thread_cx, |txn| {
                        index.insert_row(txn, &key, key + 1, false).map(|_| ())
                    });
                }
            });
        }
    });

    // Everything is present, in order, exactly once.
    let mut thread_cx = ThreadContext::new();
    let keys: Vec<u64> = Transaction::run(&mut thread_cx, |txn| {
        let mut keys: Vec<u64> = Vec::new();

        index.range_scan(txn, &0, &u64::MAX, false, |_, v| {
            keys.push(*v - 1);
            true
        })?;

        Ok(keys)
    });

    assert_eq!(keys, (0..THREADS * per_thread).collect::<Vec<u64>>());
}

#[test]
fn contended_counter_increments_are_all_applied() {
    let index: HashIndex<u64, u64, OpaqueRmw> = HashIndex::new(4);
    let per_thread: u64 = 200;

    {
        let mut thread_cx = ThreadContext::new();
        Transaction::run(&mut thread_cx, |txn| {
            index.insert_row(txn, &0, 0, false).map(|_| ())
        });
    }

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let index = &index;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for _ in 0..per_thread {
                    Transaction::run(&mut thread_cx, |txn| {
                        let (row, v) = index
                            .select_row(txn, &0, true)?
                            .expect("counter row exists");

                        index.update_row(txn, row, v + 1);
                        Ok(())
                    });
                }
            });
        }
    });

    assert_eq!(index.nontrans_get(&0), Some(THREADS * per_thread));
}

#[test]
fn adaptive_contended_counter() {
    let index: HashIndex<u64, u64, Adaptive> = HashIndex::new(4);
    let per_thread: u64 = 100;

    {
        let mut thread_cx = ThreadContext::new();
        Transaction::run(&mut thread_cx, |txn| {
            index.insert_row(txn, &0, 0, false).map(|_| ())
        });
    }

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let index = &index;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for _ in 0..per_thread {
                    Transaction::run(&mut thread_cx, |txn| {
                        let (row, v) = index
                            .select_row(txn, &0, true)?
                            .expect("counter row exists");

                        index.update_row(txn, row, v + 1);
                        Ok(())
                    });
                }
            });
        }
    });

    assert_eq!(index.nontrans_get(&0), Some(THREADS * per_thread));
}

#[test]
fn scans_race_inserts_without_tearing() {
    let index: OrderedIndex<u64, u64, OpaqueRmw> = OrderedIndex::new();
    let writers_done = AtomicU64::new(0);

    thread::scope(|scope| {
        // Writers fill even keys.
        for t in 0..4_u64 {
            let index = &index;
            let writers_done = &writers_done;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for i in 0..250_u64 {
                    let key: u64 = (i * 4 + t) * 2;

                    Transaction::run(&mut thread_cx, |txn| {
                        index.insert_row(txn, &key, key, false).map(|_| ())
                    });
                }

                let _ = writers_done.fetch_add(1, Ordering::Release);
            });
        }

        // Readers keep scanning; every committed snapshot must be sorted
        // and even-keyed.
        for _ in 0..2 {
            let index = &index;
            let writers_done = &writers_done;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                while writers_done.load(Ordering::Acquire) < 4 {
                    let snapshot: Vec<u64> = Transaction::run(&mut thread_cx, |txn| {
                        let mut seen: Vec<u64> = Vec::new();

                        index.range_scan(txn, &0, &u64::MAX, false, |_, v| {
                            seen.push(*v);
                            true
                        })?;

                        Ok(seen)
                    });

                    assert!(snapshot.windows(2).all(|w| w[0] < w[1]), "unsorted snapshot");
                    assert!(snapshot.iter().all(|v| v % 2 == 0), "odd value leaked");
                }
            });
        }
    });
}

#[test]
fn delete_churn_with_reclamation() {
    let index: HashIndex<u64, u64, OpaqueRmw> = HashIndex::new(64);
    let rounds: u64 = 50;

    thread::scope(|scope| {
        for t in 0..4_u64 {
            let index = &index;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for round in 0..rounds {
                    for i in 0..20_u64 {
                        let key: u64 = t * 1_000 + i;

                        Transaction::run(&mut thread_cx, |txn| {
                            index.insert_row(txn, &key, round, false).map(|_| ())
                        });
                    }

                    for i in 0..20_u64 {
                        let key: u64 = t * 1_000 + i;

                        Transaction::run(&mut thread_cx, |txn| {
                            index.delete_row(txn, &key).map(|_| ())
                        });
                    }

                    let _ = advance_epoch();
                    thread_cx.quiesce();
                }

                // Whatever is still pending flushes when the context drops.
            });
        }
    });

    let mut thread_cx = ThreadContext::new();

    for t in 0..4_u64 {
        for i in 0..20_u64 {
            let key: u64 = t * 1_000 + i;
            let found: bool = Transaction::run(&mut thread_cx, |txn| {
                Ok(index.select_row(txn, &key, false)?.is_some())
            });

            assert!(!found, "key {key} should have been deleted");
        }
    }
}

#[test]
fn ordered_insert_delete_interleaved_with_point_reads() {
    let index: OrderedIndex<u64, u64, OpaqueRmw> = OrderedIndex::new();

    // Stable keys that never move.
    {
        let mut thread_cx = ThreadContext::new();

        for i in 0..100_u64 {
            Transaction::run(&mut thread_cx, |txn| {
                index.insert_row(txn, &(i * 10), 7, false).map(|_| ())
            });
        }
    }

    thread::scope(|scope| {
        // Churn thread: inserts and deletes odd keys.
        let churn = {
            let index = &index;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for round in 0..30_u64 {
                    for i in 0..50_u64 {
                        let key: u64 = i * 20 + 1;

                        Transaction::run(&mut thread_cx, |txn| {
                            index.insert_row(txn, &key, round, true).map(|_| ())
                        });
                    }

                    for i in 0..50_u64 {
                        let key: u64 = i * 20 + 1;

                        Transaction::run(&mut thread_cx, |txn| {
                            index.delete_row(txn, &key).map(|_| ())
                        });
                    }

                    let _ = advance_epoch();
                    thread_cx.quiesce();
                }
            })
        };

        // Reader threads: the stable keys never waver.
        for _ in 0..3 {
            let index = &index;

            scope.spawn(move || {
                let mut thread_cx = ThreadContext::new();

                for _ in 0..2_000 {
                    let value: Option<u64> = Transaction::run(&mut thread_cx, |txn| {
                        Ok(index.select_row(txn, &500, false)?.map(|(_, v)| v))
                    });

                    assert_eq!(value, Some(7));
                }
            });
        }

        churn.join().expect("churn thread");
    });
}
