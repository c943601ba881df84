//! Filepath: src/version.rs
//!
//! Versioned-record primitive for optimistic concurrency control.
//!
//! Every record (and every hash bucket) carries a 64-bit version word
//! combining a lock bit, validity and opacity flags, and a timestamp.
//! Readers sample the word, do their work, and revalidate at commit;
//! writers acquire the lock bit and republish the timestamp at install.
//!
//! # Word Layout
//!
//! Bit 0: `locked` | Bit 1: `nonopaque` | Bit 2: `invalid` | Bits 3-63: timestamp
//!
//! The *invalid* bit marks a record whose insert has not committed yet; such
//! a record is a phantom to every transaction except its inserter. The
//! *nonopaque* bit marks a timestamp drawn from a local counter rather than
//! the commit-TID clock; opaque readers skip the snapshot check for those.
//!
//! # Variants
//!
//! [`OpaqueVersion`] timestamps are commit TIDs, giving transactions a
//! consistent snapshot (observing a TID newer than the transaction's start
//! aborts immediately). [`NonopaqueVersion`] timestamps are per-record
//! counters: cheaper, inconsistency is detected at commit instead.

use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
//  Bit Constants
// ============================================================================

/// Lock bit: the record is locked for installation.
pub const LOCK_BIT: u64 = 1 << 0;

/// Nonopaque bit: the timestamp is a local counter, not a commit TID.
pub const NONOPAQUE_BIT: u64 = 1 << 1;

/// Invalid bit: the inserting transaction has not committed yet.
pub const INVALID_BIT: u64 = 1 << 2;

/// Low bit of the timestamp field; versions advance in units of this.
pub const TID_INCREMENT: u64 = 1 << 3;

/// All non-timestamp bits.
pub const FLAGS_MASK: u64 = LOCK_BIT | NONOPAQUE_BIT | INVALID_BIT;

/// Timestamp of a freshly created record.
pub const INITIAL_TID: u64 = 0;

/// Check the lock bit of a sampled version value.
#[inline]
#[must_use]
pub const fn is_locked(v: u64) -> bool {
    (v & LOCK_BIT) != 0
}

/// Check the nonopaque bit of a sampled version value.
#[inline]
#[must_use]
pub const fn is_nonopaque(v: u64) -> bool {
    (v & NONOPAQUE_BIT) != 0
}

/// Check the invalid bit of a sampled version value.
///
/// An invalid record is a phantom: its insert has not committed.
#[inline]
#[must_use]
pub const fn is_invalid(v: u64) -> bool {
    (v & INVALID_BIT) != 0
}

/// Extract the timestamp field of a sampled version value.
#[inline]
#[must_use]
pub const fn timestamp(v: u64) -> u64 {
    v & !FLAGS_MASK
}

// ============================================================================
//  RowVersion Trait
// ============================================================================

/// The operations the indexes and the commit protocol need from a version
/// word.
///
/// The contract for [`check_version`](RowVersion::check_version): returns
/// true iff the non-lock bits equal the previously sampled value and no
/// other transaction currently holds the lock.
pub trait RowVersion: Default + Send + Sync + std::fmt::Debug + 'static {
    /// Whether timestamps are commit TIDs (opacity) or local counters.
    const OPAQUE: bool;

    /// Create a version word with the given initial value.
    fn new(value: u64) -> Self;

    /// Load the raw value (relaxed).
    fn value(&self) -> u64;

    /// Sample the value for an optimistic observation (acquire).
    fn sample(&self) -> u64;

    /// Try to acquire the lock bit once.
    fn try_lock(&self) -> bool;

    /// Try to acquire the lock bit, spinning up to `attempts` times.
    fn try_lock_spin(&self, attempts: u32) -> bool;

    /// Acquire the lock bit, spinning until it succeeds.
    fn lock(&self);

    /// Release the lock bit.
    fn unlock(&self);

    /// Replace the word while keeping it locked.
    ///
    /// The caller must hold the lock. The stored value is `new | LOCK_BIT`;
    /// a later [`unlock`](RowVersion::unlock) publishes the final value.
    fn set_version_locked(&self, new: u64);

    /// Bump the timestamp by one increment and set the nonopaque bit.
    ///
    /// The caller must hold the lock. Used for bucket versions, whose
    /// increments are local counter bumps rather than commit TIDs.
    fn inc_nonopaque(&self);

    /// Revalidate a previous observation.
    fn check_version(&self, prev: u64, locked_by_us: bool) -> bool;

    /// Compute the value a committed write installs.
    ///
    /// Opaque words take the commit TID; nonopaque words bump their local
    /// counter. Either way the invalid bit is cleared.
    fn install_value(&self, commit_tid: u64) -> u64;
}

// ============================================================================
//  VersionWord
// ============================================================================

/// A 64-bit version word, parameterized by opacity.
///
/// # Example
///
/// ```rust
/// use occtable::version::{OpaqueVersion, RowVersion};
///
/// let v = OpaqueVersion::default();
/// let before: u64 = v.sample();
///
/// assert!(v.try_lock());
/// v.set_version_locked(1 << 3);
/// v.unlock();
///
/// assert!(!v.check_version(before, false));
/// ```
#[derive(Debug)]
pub struct VersionWord<const OPAQUE: bool> {
    value: AtomicU64,
}

/// Version word whose timestamps are commit TIDs.
pub type OpaqueVersion = VersionWord<true>;

/// Version word whose timestamps are local counters.
pub type NonopaqueVersion = VersionWord<false>;

impl<const OPAQUE: bool> Default for VersionWord<OPAQUE> {
    fn default() -> Self {
        Self::new(INITIAL_TID)
    }
}

impl<const OPAQUE: bool> RowVersion for VersionWord<OPAQUE> {
    const OPAQUE: bool = OPAQUE;

    fn new(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    #[inline]
    fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    fn sample(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        let v: u64 = self.value.load(Ordering::Relaxed);

        if is_locked(v) {
            return false;
        }

        self.value
            .compare_exchange_weak(v, v | LOCK_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn try_lock_spin(&self, attempts: u32) -> bool {
        for _ in 0..attempts {
            if self.try_lock() {
                return true;
            }

            std::hint::spin_loop();
        }

        false
    }

    fn lock(&self) {
        while !self.try_lock() {
            std::hint::spin_loop();
        }
    }

    #[inline]
    fn unlock(&self) {
        let v: u64 = self.value.load(Ordering::Relaxed);

        debug_assert!(is_locked(v), "unlock() called on an unlocked version");

        self.value.store(v & !LOCK_BIT, Ordering::Release);
    }

    #[inline]
    fn set_version_locked(&self, new: u64) {
        debug_assert!(
            is_locked(self.value.load(Ordering::Relaxed)),
            "set_version_locked() requires the lock"
        );

        self.value.store(new | LOCK_BIT, Ordering::Release);
    }

    #[inline]
    fn inc_nonopaque(&self) {
        let v: u64 = self.value.load(Ordering::Relaxed);

        debug_assert!(is_locked(v), "inc_nonopaque() requires the lock");

        self.value
            .store((v + TID_INCREMENT) | NONOPAQUE_BIT, Ordering::Release);
    }

    #[inline]
    fn check_version(&self, prev: u64, locked_by_us: bool) -> bool {
        let cur: u64 = self.value.load(Ordering::Acquire);

        ((cur ^ prev) & !LOCK_BIT) == 0 && (!is_locked(cur) || locked_by_us)
    }

    #[inline]
    fn install_value(&self, commit_tid: u64) -> u64 {
        if OPAQUE {
            commit_tid
        } else {
            (timestamp(self.value()) + TID_INCREMENT) | NONOPAQUE_BIT
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
