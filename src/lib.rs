//! # occtable
//!
//! The transactional indexing core of an in-memory OLTP storage engine:
//! two serializable row-oriented index structures over an optimistic
//! concurrency control substrate, plus the epoch-based reclamation that
//! makes concurrent unlinking safe.
//!
//! - [`HashIndex`]: bucketed chained hashtable; bucket versions guard
//!   absence proofs against phantoms.
//! - [`OrderedIndex`]: wraps a concurrent ordered trie ([`tree`]); trie
//!   node versions guard point misses and range scans.
//! - [`Transaction`]: read/write sets keyed by tagged item keys and the
//!   four-phase commit protocol (lock, check, install, unlock) the indexes
//!   plug into as resource managers.
//! - [`rcu::RcuSet`]: per-thread epoch-bucketed deferred frees for records
//!   whose removal committed while optimistic readers may still hold them.
//!
//! ## Concurrency Model
//!
//! Readers never block: they sample version words, read, and revalidate at
//! commit. Writers lock individual records (and bucket/leaf structures)
//! only across pointer splicing and installation. A transaction that loses
//! a race observes `Err(Aborted)` and re-runs; [`Transaction::run`] is the
//! retry loop.
//!
//! ## Example
//!
//! ```rust
//! use occtable::params::OpaqueRmw;
//! use occtable::{OrderedIndex, ThreadContext, Transaction};
//!
//! let index: OrderedIndex<u64, u64, OpaqueRmw> = OrderedIndex::new();
//! let mut thread = ThreadContext::new();
//!
//! Transaction::run(&mut thread, |txn| {
//!     index.insert_row(txn, &1, 100, false)?;
//!     index.insert_row(txn, &2, 200, false)?;
//!     Ok(())
//! });
//!
//! let total = Transaction::run(&mut thread, |txn| {
//!     let mut total = 0;
//!     index.range_scan(txn, &0, &10, false, |_, v| {
//!         total += *v;
//!         true
//!     })?;
//!     Ok(total)
//! });
//!
//! assert_eq!(total, 300);
//! ```

pub mod hash;
pub mod key;
pub mod ordered;
pub mod params;
pub mod rcu;
pub mod tree;
pub mod txn;
pub mod version;

mod trace;

pub use hash::HashIndex;
pub use key::{IndexKey, KeyBuf};
pub use ordered::OrderedIndex;
pub use txn::{
    AbortReason, Aborted, ItemKey, RowId, ThreadContext, Tid, TransItem, Transaction, TxnObject,
    TxnResult, advance_epoch, global_epoch,
};
