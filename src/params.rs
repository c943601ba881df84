//! Filepath: src/params.rs
//!
//! Compile-time index configuration.
//!
//! The indexes are parameterized over an [`IndexParams`] implementation the
//! same way the tree nodes are parameterized over their width: the choice of
//! version words (opacity), whether `select_row(.., for_update)` acquires
//! the record lock eagerly (adaptivity), and whether a transaction reads its
//! own pending writes back are all fixed at compile time.

use crate::version::{NonopaqueVersion, OpaqueVersion, RowVersion};

/// Configuration knobs shared by the hash and ordered indexes.
pub trait IndexParams: 'static {
    /// Version word carried by every record.
    type RowVer: RowVersion;

    /// Version word guarding absence proofs (hash-bucket versions).
    type GuardVer: RowVersion;

    /// If true, `select_row(.., for_update = true)` takes the record lock
    /// immediately instead of observing and locking at commit.
    ///
    /// Range scans ignore this and always observe: a scan cannot take write
    /// locks speculatively.
    const ADAPTIVE: bool;

    /// If true, operations see the transaction's own pending inserts,
    /// writes, and deletes.
    const READ_MY_WRITE: bool;
}

/// Opaque timestamps, plain OCC. The default configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct Opaque;

impl IndexParams for Opaque {
    type RowVer = OpaqueVersion;
    type GuardVer = OpaqueVersion;

    const ADAPTIVE: bool = false;
    const READ_MY_WRITE: bool = false;
}

/// Opaque timestamps, plain OCC, read-my-writes enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueRmw;

impl IndexParams for OpaqueRmw {
    type RowVer = OpaqueVersion;
    type GuardVer = OpaqueVersion;

    const ADAPTIVE: bool = false;
    const READ_MY_WRITE: bool = true;
}

/// Local-counter timestamps: cheaper, no snapshot guarantee during
/// execution, conflicts still caught at commit.
#[derive(Debug, Default, Clone, Copy)]
pub struct Nonopaque;

impl IndexParams for Nonopaque {
    type RowVer = NonopaqueVersion;
    type GuardVer = NonopaqueVersion;

    const ADAPTIVE: bool = false;
    const READ_MY_WRITE: bool = true;
}

/// Opaque timestamps with eager write locking on select-for-update.
///
/// Trades read-only scalability for fewer aborts on write-heavy paths with
/// hot records.
#[derive(Debug, Default, Clone, Copy)]
pub struct Adaptive;

impl IndexParams for Adaptive {
    type RowVer = OpaqueVersion;
    type GuardVer = OpaqueVersion;

    const ADAPTIVE: bool = true;
    const READ_MY_WRITE: bool = true;
}
