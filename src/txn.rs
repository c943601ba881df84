//! Filepath: src/txn.rs
//!
//! Minimal STM substrate: transaction items, read/write sets, and the
//! four-phase commit protocol the indexes participate in as resource
//! managers.
//!
//! A [`Transaction`] accumulates [`TransItem`]s keyed by [`ItemKey`] — a sum
//! type over the three disjoint namespaces (records, hash buckets, trie
//! internodes). At commit, write items are locked in `ItemKey` order (which
//! makes the lock acquisition deadlock-free), reads are validated, writes
//! are installed under a freshly drawn commit TID, locks are released, and
//! every item gets a cleanup callback. Aborts unwind the same way with
//! `committed = false`.
//!
//! The indexes implement [`TxnObject`]; the substrate never interprets item
//! keys itself.
//!
//! # Concurrency Model
//!
//! One [`ThreadContext`] per thread. Transactions are created against a
//! context, run to completion on that thread, and hand unlinked records to
//! that thread's [`RcuSet`] at cleanup time. Suspension only ever happens by
//! spinning on a version word's lock bit.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use crate::rcu::{Epoch, RcuCallback, RcuSet};
use crate::trace::trace_log;
use crate::version::{self, RowVersion, TID_INCREMENT};

/// Transaction timestamp. Advances in units of
/// [`TID_INCREMENT`](crate::version::TID_INCREMENT).
pub type Tid = u64;

/// Spin attempts before a commit-time lock acquisition gives up.
pub(crate) const LOCK_SPIN_ATTEMPTS: u32 = 128;

// ============================================================================
//  Global Clocks
// ============================================================================

static TID_CLOCK: AtomicU64 = AtomicU64::new(0);

static EPOCH_CLOCK: AtomicU64 = AtomicU64::new(1);

/// Draw a fresh commit TID, strictly greater than every TID drawn before.
#[inline]
fn next_commit_tid() -> Tid {
    TID_CLOCK.fetch_add(TID_INCREMENT, Ordering::AcqRel) + TID_INCREMENT
}

/// Current reclamation epoch.
#[inline]
#[must_use]
pub fn global_epoch() -> Epoch {
    EPOCH_CLOCK.load(Ordering::Acquire)
}

/// Advance the reclamation epoch and return the new value.
///
/// Called by the embedding driver once all threads have crossed a quiescent
/// point.
#[inline]
pub fn advance_epoch() -> Epoch {
    EPOCH_CLOCK.fetch_add(1, Ordering::AcqRel) + 1
}

// ============================================================================
//  Abort
// ============================================================================

/// Why a transaction must retry.
///
/// These are transient conditions, not errors: the caller aborts the
/// transaction and re-runs it from its retry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A previously observed version changed before commit.
    VersionMismatch,

    /// The operation reached a record whose insert has not committed.
    Phantom,

    /// An observed record was deleted after the observation.
    Deleted,

    /// A commit-time or eager lock acquisition gave up.
    LockContention,

    /// An opaque observation saw a timestamp newer than the transaction's
    /// start.
    Opacity,

    /// A range scan failed to observe a record or leaf.
    ScanFailed,
}

/// A transaction-level abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted(pub AbortReason);

impl std::fmt::Display for Aborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            AbortReason::VersionMismatch => write!(f, "version changed since observation"),
            AbortReason::Phantom => write!(f, "observed an uncommitted insert"),
            AbortReason::Deleted => write!(f, "record deleted after observation"),
            AbortReason::LockContention => write!(f, "lock acquisition gave up"),
            AbortReason::Opacity => write!(f, "observation broke the snapshot"),
            AbortReason::ScanFailed => write!(f, "range scan observation failed"),
        }
    }
}

impl std::error::Error for Aborted {}

/// Result of a transactional index operation.
pub type TxnResult<T> = Result<T, Aborted>;

// ============================================================================
//  Item Keys and Flags
// ============================================================================

/// Key of a transaction item.
///
/// Three disjoint namespaces over machine addresses. The derived `Ord` is
/// the global lock-acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKey {
    /// A record: the address of the index's record allocation.
    Record(usize),

    /// A hash bucket, keyed by the bucket's address.
    Bucket(usize),

    /// A trie internal node, keyed by the node's address.
    Internode(usize),
}

/// Flag bits on a [`TransItem`].
pub mod flags {
    /// The item carries an observation to validate at commit.
    pub const READ: u32 = 1 << 0;

    /// The item carries write intent.
    pub const WRITE: u32 = 1 << 1;

    /// The record was inserted by this transaction.
    pub const INSERT: u32 = 1 << 2;

    /// The record is deleted by this transaction.
    pub const DELETE: u32 = 1 << 3;

    /// This transaction currently holds the record's lock bit.
    pub const LOCKED: u32 = 1 << 4;
}

/// An opaque handle to a row returned by `select_row`.
///
/// Valid for the duration of the transaction that obtained it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowId(pub(crate) usize);

// ============================================================================
//  TransItem
// ============================================================================

/// One entry of a transaction's read/write set.
pub struct TransItem<'t> {
    owner: &'t dyn TxnObject,
    key: ItemKey,
    flags: u32,
    read: Option<u64>,

    /// Staged write value, if the write carries one. Owned by the item:
    /// dropping the transaction drops pending staged values.
    write: Option<Box<dyn Any + Send>>,
}

impl<'t> TransItem<'t> {
    fn new(owner: &'t dyn TxnObject, key: ItemKey) -> Self {
        Self {
            owner,
            key,
            flags: 0,
            read: None,
            write: None,
        }
    }

    /// The item's key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> ItemKey {
        self.key
    }

    /// Check whether every bit of `mask` is set.
    #[inline]
    #[must_use]
    pub fn has_flags(&self, mask: u32) -> bool {
        (self.flags & mask) == mask
    }

    /// Set flag bits.
    #[inline]
    pub fn add_flags(&mut self, mask: u32) {
        self.flags |= mask;
    }

    /// Clear flag bits.
    #[inline]
    pub fn clear_flags(&mut self, mask: u32) {
        self.flags &= !mask;
    }

    /// True if the item carries an observation.
    #[inline]
    #[must_use]
    pub fn has_read(&self) -> bool {
        self.has_flags(flags::READ)
    }

    /// True if the item carries write intent.
    #[inline]
    #[must_use]
    pub fn has_write(&self) -> bool {
        self.has_flags(flags::WRITE)
    }

    /// The observed version value, if any.
    #[inline]
    #[must_use]
    pub fn read_value(&self) -> Option<u64> {
        self.read
    }

    /// Record an observation. The first observation wins; later ones keep
    /// the original value so commit validates against what was actually
    /// seen.
    #[inline]
    pub fn add_read(&mut self, value: u64) {
        if self.read.is_none() {
            self.read = Some(value);
        }

        self.flags |= flags::READ;
    }

    /// Drop the observation.
    #[inline]
    pub fn clear_read(&mut self) {
        self.read = None;
        self.flags &= !flags::READ;
    }

    /// Stage a write value, replacing any previous one.
    #[inline]
    pub fn add_write<T: Send + 'static>(&mut self, value: T) {
        self.write = Some(Box::new(value));
        self.flags |= flags::WRITE;
    }

    /// Mark write intent without staging a value.
    #[inline]
    pub fn add_write_intent(&mut self) {
        self.flags |= flags::WRITE;
    }

    /// Drop the staged value but keep other state.
    #[inline]
    pub fn clear_write(&mut self) {
        self.write = None;
        self.flags &= !flags::WRITE;
    }

    /// Borrow the staged write value, if one of type `T` is present.
    #[inline]
    #[must_use]
    pub fn write_value<T: 'static>(&self) -> Option<&T> {
        self.write.as_deref().and_then(|v| v.downcast_ref())
    }
}

impl std::fmt::Debug for TransItem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransItem")
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("read", &self.read)
            .field("has_write_value", &self.write.is_some())
            .finish()
    }
}

// ============================================================================
//  TxnObject
// ============================================================================

/// The resource-manager callbacks an index provides to the commit protocol.
///
/// `lock`, `check`, `install`, and `unlock` run in the four commit phases;
/// `cleanup` runs last for every item, on commit and on abort. Items reach
/// each callback with the flags and values the index's own operations put
/// there.
pub trait TxnObject: Send + Sync {
    /// Acquire the write lock for a record item. Phase 1.
    fn lock(&self, item: &mut TransItem<'_>) -> bool;

    /// Revalidate an observation. Phase 2.
    fn check(&self, item: &TransItem<'_>) -> bool;

    /// Apply a write under the commit TID. Phase 3.
    fn install(&self, item: &mut TransItem<'_>, commit_tid: Tid);

    /// Release a record lock. Phase 4.
    fn unlock(&self, item: &mut TransItem<'_>);

    /// Post-commit / post-abort processing.
    ///
    /// Runs on the transaction's home thread; unlinked records must be
    /// handed to `thread`'s reclamation set.
    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, thread: &mut ThreadContext);
}

#[inline]
fn owner_addr(owner: &dyn TxnObject) -> usize {
    std::ptr::from_ref(owner).cast::<()>() as usize
}

// ============================================================================
//  ThreadContext
// ============================================================================

/// Per-thread transaction state: the thread's RCU reclamation set.
#[derive(Default)]
pub struct ThreadContext {
    rcu: RcuSet,
}

impl ThreadContext {
    /// Create a context for the current thread.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The thread's reclamation set.
    #[inline]
    pub fn rcu(&mut self) -> &mut RcuSet {
        &mut self.rcu
    }

    /// Declare a quiescent point: reclaim everything retired before the
    /// current global epoch.
    pub fn quiesce(&mut self) {
        let epoch: Epoch = global_epoch();
        self.rcu.clean_until(epoch);
    }
}

// ============================================================================
//  Transaction
// ============================================================================

/// Transaction execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// An in-flight transaction.
///
/// Index operations register items here; [`try_commit`](Self::try_commit)
/// runs the four-phase protocol. A transaction must be finished with
/// `try_commit` or [`abort`](Self::abort) — index state (uncommitted
/// inserts, eager locks) is only unwound by those paths.
///
/// # Example
///
/// ```rust,ignore
/// let mut thread = ThreadContext::new();
/// let found = Transaction::run(&mut thread, |txn| {
///     Ok(index.select_row(txn, &key, false)?.is_some())
/// });
/// ```
pub struct Transaction<'t> {
    start_tid: Tid,
    items: Vec<TransItem<'t>>,

    /// Records unlinked mid-transaction, handed to the home thread's
    /// reclamation set when the transaction finishes.
    retired: Vec<(RcuCallback, *mut u8)>,

    state: TxnState,
}

impl<'t> Transaction<'t> {
    /// Begin a transaction at the current TID clock.
    #[must_use]
    pub fn begin() -> Self {
        Self {
            start_tid: TID_CLOCK.load(Ordering::Acquire),
            state: TxnState::Active,
            items: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// The timestamp this transaction started at.
    #[inline]
    #[must_use]
    pub fn start_tid(&self) -> Tid {
        self.start_tid
    }

    fn position(&self, owner: &dyn TxnObject, key: ItemKey) -> Option<usize> {
        let addr: usize = owner_addr(owner);

        self.items
            .iter()
            .position(|it| it.key == key && owner_addr(it.owner) == addr)
    }

    /// Find or create the item for `(owner, key)`.
    pub fn item(&mut self, owner: &'t dyn TxnObject, key: ItemKey) -> &mut TransItem<'t> {
        debug_assert_eq!(self.state, TxnState::Active);

        let at: usize = match self.position(owner, key) {
            Some(i) => i,
            None => {
                self.items.push(TransItem::new(owner, key));
                self.items.len() - 1
            }
        };

        &mut self.items[at]
    }

    /// Find the item for `(owner, key)` if the transaction already has one.
    pub fn get_item(&mut self, owner: &dyn TxnObject, key: ItemKey) -> Option<&mut TransItem<'t>> {
        self.position(owner, key).map(move |i| &mut self.items[i])
    }

    /// Remove the item entirely (used when a transaction deletes its own
    /// uncommitted insert).
    pub fn discard_item(&mut self, owner: &dyn TxnObject, key: ItemKey) {
        if let Some(i) = self.position(owner, key) {
            self.items.swap_remove(i);
        }
    }

    /// Register an observation of a record or bucket version.
    ///
    /// Fails if the sampled word is locked by another transaction, or — for
    /// opaque words carrying a commit TID — if the timestamp postdates this
    /// transaction's start (the snapshot is already broken).
    pub fn observe<W: RowVersion>(
        &mut self,
        owner: &'t dyn TxnObject,
        key: ItemKey,
        sample: u64,
    ) -> bool {
        let start: Tid = self.start_tid;
        let item: &mut TransItem<'t> = self.item(owner, key);

        if version::is_locked(sample) && !item.has_flags(flags::LOCKED) {
            return false;
        }

        if W::OPAQUE
            && !version::is_nonopaque(sample)
            && version::timestamp(sample) > start
        {
            return false;
        }

        item.add_read(sample & !version::LOCK_BIT);
        true
    }

    /// Register an observation of a trie node version.
    ///
    /// Node versions are structure counters, not commit TIDs, so there is no
    /// snapshot check; the value is validated as-is at commit.
    pub fn observe_node(&mut self, owner: &'t dyn TxnObject, key: ItemKey, sample: u32) -> bool {
        self.item(owner, key).add_read(u64::from(sample));
        true
    }

    /// Schedule a deferred free for an allocation this transaction just
    /// unlinked (an insert it is taking back mid-flight).
    ///
    /// The callback reaches the home thread's reclamation set when the
    /// transaction finishes, commit or abort.
    ///
    /// # Safety
    ///
    /// Same contract as [`RcuSet::add`]: `argument` must stay valid until
    /// the callback runs, exactly once, and must be unreachable by any
    /// reader starting after the current epoch.
    pub unsafe fn defer_free(&mut self, function: RcuCallback, argument: *mut u8) {
        debug_assert_eq!(self.state, TxnState::Active);

        self.retired.push((function, argument));
    }

    /// Patch an observation this transaction itself invalidated.
    ///
    /// If the item's read equals `prev` it becomes `new`; otherwise nothing
    /// changes. This is the only mechanism keeping a transaction from
    /// aborting against its own inserts.
    pub fn update_read(&mut self, owner: &dyn TxnObject, key: ItemKey, prev: u64, new: u64) {
        if let Some(item) = self.get_item(owner, key) {
            if item.read == Some(prev) {
                item.read = Some(new);
            }
        }
    }

    // ========================================================================
    //  Commit Protocol
    // ========================================================================

    /// Run the four-phase commit.
    ///
    /// On failure the transaction has already been aborted: locks released
    /// and cleanup callbacks run with `committed = false`.
    pub fn try_commit(&mut self, thread: &mut ThreadContext) -> TxnResult<()> {
        assert_eq!(self.state, TxnState::Active, "commit of a finished transaction");

        // Phase 1: lock write items in global item order.
        let mut order: Vec<usize> = (0..self.items.len())
            .filter(|&i| self.items[i].has_write())
            .collect();

        order.sort_by_key(|&i| (owner_addr(self.items[i].owner), self.items[i].key));

        for &i in &order {
            if self.items[i].has_flags(flags::LOCKED) {
                continue;
            }

            let owner: &dyn TxnObject = self.items[i].owner;

            if !owner.lock(&mut self.items[i]) {
                self.finish(false, thread);
                return Err(Aborted(AbortReason::LockContention));
            }

            self.items[i].add_flags(flags::LOCKED);
        }

        fence(Ordering::SeqCst);

        // Phase 2: validate the read set.
        for i in 0..self.items.len() {
            if !self.items[i].has_read() {
                continue;
            }

            let owner: &dyn TxnObject = self.items[i].owner;

            if !owner.check(&self.items[i]) {
                trace_log!(key = ?self.items[i].key(), "commit check failed");
                self.finish(false, thread);
                return Err(Aborted(AbortReason::VersionMismatch));
            }
        }

        // Phase 3: install writes under the commit TID.
        let commit_tid: Tid = next_commit_tid();

        for &i in &order {
            let owner: &dyn TxnObject = self.items[i].owner;
            owner.install(&mut self.items[i], commit_tid);
        }

        // Phase 4: release locks, then cleanup.
        trace_log!(commit_tid, nitems = self.items.len(), "commit");
        self.finish(true, thread);
        Ok(())
    }

    /// Abort the transaction: release locks, unlink uncommitted inserts,
    /// drop staged values.
    pub fn abort(&mut self, thread: &mut ThreadContext) {
        assert_eq!(self.state, TxnState::Active, "abort of a finished transaction");

        trace_log!(nitems = self.items.len(), "abort");
        self.finish(false, thread);
    }

    fn finish(&mut self, committed: bool, thread: &mut ThreadContext) {
        self.release_locks();
        fence(Ordering::SeqCst);

        let mut items: Vec<TransItem<'t>> = std::mem::take(&mut self.items);

        for item in &mut items {
            let owner: &dyn TxnObject = item.owner;
            owner.cleanup(item, committed, thread);
        }

        let epoch: Epoch = global_epoch();

        for (function, argument) in self.retired.drain(..) {
            // SAFETY: defer_free's caller guaranteed the RcuSet::add
            // contract; the allocation was unlinked before it got here.
            unsafe { thread.rcu().add(epoch, function, argument) };
        }

        self.state = if committed {
            TxnState::Committed
        } else {
            TxnState::Aborted
        };
    }

    fn release_locks(&mut self) {
        for i in 0..self.items.len() {
            if !self.items[i].has_flags(flags::LOCKED) {
                continue;
            }

            let owner: &dyn TxnObject = self.items[i].owner;
            owner.unlock(&mut self.items[i]);
            self.items[i].clear_flags(flags::LOCKED);
        }
    }

    /// Run `body` in a fresh transaction until one commits, returning the
    /// committed execution's result.
    ///
    /// An `Err` from `body` aborts and retries; an `Ok` whose commit fails
    /// validation retries as well.
    pub fn run<R>(
        thread: &mut ThreadContext,
        mut body: impl FnMut(&mut Transaction<'t>) -> TxnResult<R>,
    ) -> R {
        loop {
            let mut txn: Transaction<'t> = Transaction::begin();

            match body(&mut txn) {
                Ok(result) => {
                    if txn.try_commit(thread).is_ok() {
                        return result;
                    }
                }

                Err(_) => txn.abort(thread),
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        // Index state (phantom records, eager locks, retired allocations)
        // is only unwound by try_commit/abort, which need the thread
        // context.
        debug_assert!(
            self.state != TxnState::Active || (self.items.is_empty() && self.retired.is_empty()),
            "transaction dropped without commit or abort"
        );
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::OpaqueVersion;

    /// A one-word resource manager: a single versioned u64 cell.
    #[derive(Debug, Default)]
    struct Cell {
        version: OpaqueVersion,
        value: AtomicU64,
    }

    impl Cell {
        fn key(&self) -> ItemKey {
            ItemKey::Record(owner_addr(self))
        }

        fn read<'t>(&'t self, txn: &mut Transaction<'t>) -> TxnResult<u64> {
            let sample: u64 = self.version.sample();
            fence(Ordering::SeqCst);
            let value: u64 = self.value.load(Ordering::Acquire);

            if !txn.observe::<OpaqueVersion>(self, self.key(), sample) {
                return Err(Aborted(AbortReason::Opacity));
            }

            Ok(value)
        }

        fn write<'t>(&'t self, txn: &mut Transaction<'t>, value: u64) {
            txn.item(self, self.key()).add_write(value);
        }
    }

    impl TxnObject for Cell {
        fn lock(&self, _item: &mut TransItem<'_>) -> bool {
            self.version.try_lock_spin(LOCK_SPIN_ATTEMPTS)
        }

        fn check(&self, item: &TransItem<'_>) -> bool {
            let prev: u64 = item.read_value().expect("checked items carry a read");
            self.version.check_version(prev, item.has_write())
        }

        fn install(&self, item: &mut TransItem<'_>, commit_tid: Tid) {
            if let Some(v) = item.write_value::<u64>() {
                self.value.store(*v, Ordering::Release);
            }

            self.version
                .set_version_locked(self.version.install_value(commit_tid));
        }

        fn unlock(&self, _item: &mut TransItem<'_>) {
            self.version.unlock();
        }

        fn cleanup(&self, _item: &mut TransItem<'_>, _committed: bool, _thread: &mut ThreadContext) {}
    }

    #[test]
    fn test_read_write_commit() {
        let mut thread = ThreadContext::new();
        let cell = Cell::default();

        let mut txn = Transaction::begin();
        cell.write(&mut txn, 42);
        txn.try_commit(&mut thread).expect("no conflicts");

        let mut txn = Transaction::begin();
        let v: u64 = cell.read(&mut txn).expect("clean read");
        assert_eq!(v, 42);
        txn.try_commit(&mut thread).expect("read-only commit");
    }

    #[test]
    fn test_stale_read_aborts() {
        let mut thread = ThreadContext::new();
        let cell = Cell::default();

        // T1 observes the cell.
        let mut t1 = Transaction::begin();
        let _ = cell.read(&mut t1).expect("clean read");

        // T2 writes and commits in between.
        let mut t2 = Transaction::begin();
        cell.write(&mut t2, 7);
        t2.try_commit(&mut thread).expect("no conflicts");

        // T1 fails validation.
        assert!(t1.try_commit(&mut thread).is_err());
    }

    #[test]
    fn test_opacity_rejects_newer_timestamp() {
        let mut thread = ThreadContext::new();
        let cell = Cell::default();

        let mut t1 = Transaction::begin();

        // T2 commits a write after T1 began.
        let mut t2 = Transaction::begin();
        cell.write(&mut t2, 1);
        t2.try_commit(&mut thread).expect("no conflicts");

        // T1's observation now postdates its start: immediate abort signal.
        assert!(cell.read(&mut t1).is_err());
        t1.abort(&mut thread);
    }

    #[test]
    fn test_write_skew_blocked_by_validation() {
        let mut thread = ThreadContext::new();
        let a = Cell::default();
        let b = Cell::default();

        // T1 reads a, writes b; T2 reads b, writes a. At most one commits.
        let mut t1 = Transaction::begin();
        let mut t2 = Transaction::begin();

        let _ = a.read(&mut t1).expect("clean read");
        b.write(&mut t1, 1);

        let _ = b.read(&mut t2).expect("clean read");
        a.write(&mut t2, 1);

        let ok1: bool = t1.try_commit(&mut thread).is_ok();
        let ok2: bool = t2.try_commit(&mut thread).is_ok();

        assert!(ok1);
        assert!(!ok2, "second committer must fail validation");
    }

    #[test]
    fn test_update_read_patches_matching_observation() {
        let mut thread = ThreadContext::new();
        let cell = Cell::default();

        let mut txn = Transaction::begin();
        let _ = cell.read(&mut txn).expect("clean read");

        let prev: u64 = txn
            .get_item(&cell, cell.key())
            .and_then(|it| it.read_value())
            .expect("read registered");

        // Patch as if this transaction had bumped the version itself.
        txn.update_read(&cell, cell.key(), prev, prev + TID_INCREMENT);

        let patched: u64 = txn
            .get_item(&cell, cell.key())
            .and_then(|it| it.read_value())
            .expect("read registered");

        assert_eq!(patched, prev + TID_INCREMENT);

        // A non-matching patch leaves the read alone.
        txn.update_read(&cell, cell.key(), prev, prev + 2 * TID_INCREMENT);
        assert_eq!(
            txn.get_item(&cell, cell.key()).and_then(|it| it.read_value()),
            Some(prev + TID_INCREMENT)
        );

        txn.abort(&mut thread);
    }

    #[test]
    fn test_lock_contention_aborts() {
        let mut thread = ThreadContext::new();
        let cell = Cell::default();

        // Someone else holds the cell's lock.
        cell.version.lock();

        let mut txn = Transaction::begin();
        cell.write(&mut txn, 3);
        assert_eq!(
            txn.try_commit(&mut thread),
            Err(Aborted(AbortReason::LockContention))
        );

        cell.version.unlock();
    }

    #[test]
    fn test_run_retries_until_commit() {
        let mut thread = ThreadContext::new();
        let cell = Cell::default();
        let mut attempts: u32 = 0;

        let v: u64 = Transaction::run(&mut thread, |txn| {
            attempts += 1;

            if attempts == 1 {
                return Err(Aborted(AbortReason::VersionMismatch));
            }

            cell.read(txn)
        });

        assert_eq!(v, 0);
        assert_eq!(attempts, 2);
    }
}
