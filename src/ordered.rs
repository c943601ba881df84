//! Filepath: src/ordered.rs
//!
//! The ordered index.
//!
//! Stores record pointers inside the concurrent ordered trie
//! ([`crate::tree`]) keyed by the serialized key, and layers the same
//! transactional row semantics over it as the hash index — with trie **node
//! versions** playing the phantom-guard role bucket versions play there.
//!
//! Point misses register the visited leaf's version under the internode
//! item namespace; range scans register every leaf they cross. Any
//! structural change to one of those leaves between observation and
//! validation aborts the observer — unless the observer made the change
//! itself, in which case its read entry is patched to the new version.

use std::cell::{RefCell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering, fence};

use crate::key::{IndexKey, KeyBuf};
use crate::params::IndexParams;
use crate::trace::trace_log;
use crate::tree::{FinishMark, InsertCursor, LeafNode, ScanVisit, Tree, UnlockedFind};
use crate::txn::{
    AbortReason, Aborted, ItemKey, LOCK_SPIN_ATTEMPTS, RowId, ThreadContext, Tid, TransItem,
    Transaction, TxnObject, TxnResult, flags, global_epoch,
};
use crate::version::{self, INITIAL_TID, INVALID_BIT, RowVersion, TID_INCREMENT};

// ============================================================================
//  Record
// ============================================================================

/// A row of the ordered index. The trie maps the serialized key to this
/// allocation.
struct Record<K, V, P: IndexParams> {
    version: P::RowVer,
    key: K,

    /// Row payload; see the hash index's record for the access protocol.
    value: UnsafeCell<V>,

    /// Tombstone installed by a committed delete.
    deleted: AtomicBool,
}

impl<K, V, P: IndexParams> Record<K, V, P>
where
    V: Copy,
{
    fn alloc(key: K, value: V, mark_valid: bool) -> *mut Self {
        let initial: u64 = if mark_valid {
            INITIAL_TID
        } else {
            INITIAL_TID | INVALID_BIT
        };

        Box::into_raw(Box::new(Self {
            version: P::RowVer::new(initial),
            key,
            value: UnsafeCell::new(value),
            deleted: AtomicBool::new(false),
        }))
    }

    #[inline]
    fn valid(&self) -> bool {
        !version::is_invalid(self.version.value())
    }

    /// See `hash::Record::read_value`.
    ///
    /// # Safety
    ///
    /// Caller validates the record version afterwards or holds its lock.
    #[inline]
    unsafe fn read_value(&self) -> V {
        unsafe { std::ptr::read_volatile(self.value.get()) }
    }

    /// See `hash::Record::write_value`.
    ///
    /// # Safety
    ///
    /// Caller holds the record lock or is the record's uncommitted inserter.
    #[inline]
    unsafe fn write_value(&self, value: &V) {
        unsafe { std::ptr::write_volatile(self.value.get(), *value) };
    }
}

unsafe fn drop_record<K, V, P: IndexParams>(p: *mut u8) {
    // SAFETY: enqueued by cleanup with a pointer from Record::alloc; single
    // invocation after all readers quiesced.
    drop(unsafe { Box::from_raw(p.cast::<Record<K, V, P>>()) });
}

// ============================================================================
//  OrderedIndex
// ============================================================================

/// A transactional ordered index with phantom-safe point and range
/// operations.
///
/// # Example
///
/// ```rust
/// use occtable::{OrderedIndex, ThreadContext, Transaction};
/// use occtable::params::OpaqueRmw;
///
/// let index: OrderedIndex<u64, u64, OpaqueRmw> = OrderedIndex::new();
/// let mut thread = ThreadContext::new();
///
/// let sum = Transaction::run(&mut thread, |txn| {
///     for i in 0..10 {
///         index.insert_row(txn, &i, i * i, false)?;
///     }
///
///     let mut sum = 0;
///     index.range_scan(txn, &2, &5, false, |_, v| {
///         sum += *v;
///         true
///     })?;
///     Ok(sum)
/// });
///
/// assert_eq!(sum, 4 + 9 + 16);
/// ```
pub struct OrderedIndex<K, V, P: IndexParams = crate::params::Opaque> {
    tree: Tree,
    key_gen: AtomicU64,
    _marker: PhantomData<fn() -> (K, V, P)>,
}

impl<K, V, P> Default for OrderedIndex<K, V, P>
where
    K: IndexKey + Clone + Send + Sync + 'static,
    V: Copy + Send + Sync + 'static,
    P: IndexParams,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, P> OrderedIndex<K, V, P>
where
    K: IndexKey + Clone + Send + Sync + 'static,
    V: Copy + Send + Sync + 'static,
    P: IndexParams,
{
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: Tree::new(),
            key_gen: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    /// Draw a fresh surrogate key.
    #[inline]
    pub fn gen_key(&self) -> u64 {
        self.key_gen.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    fn node_item_key(node: *mut LeafNode) -> ItemKey {
        ItemKey::Internode(node as usize)
    }

    /// Register a leaf version observation (the phantom guard for misses
    /// and scans).
    fn register_node_version<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        node: *mut LeafNode,
        version: u32,
    ) -> bool {
        txn.observe_node(self, Self::node_item_key(node), version)
    }

    /// Patch this transaction's own observation of `node` across a
    /// structural change it just made.
    ///
    /// True if there was nothing to patch or the patch applied; false if
    /// the transaction holds an older observation that cannot be patched
    /// (someone else changed the node in between), which must abort.
    fn update_node_version<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        mark: &FinishMark,
    ) -> bool {
        let key: ItemKey = Self::node_item_key(mark.node);

        let prior: Option<u64> = match txn.get_item(self, key) {
            None => return true,
            Some(item) => item.read_value(),
        };

        match prior {
            None => true,

            Some(prev) if prev == u64::from(mark.prev_version) => {
                txn.update_read(self, key, prev, u64::from(mark.next_version));
                true
            }

            Some(_) => false,
        }
    }

    #[inline]
    fn is_phantom(e: &Record<K, V, P>, item: &TransItem<'_>) -> bool {
        !e.valid() && !item.has_flags(flags::INSERT)
    }

    /// Express write intent; see the hash index for the adaptive split.
    fn add_write_intent<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        e: &Record<K, V, P>,
        item_key: ItemKey,
    ) -> TxnResult<()> {
        if P::ADAPTIVE {
            let item: &mut TransItem<'t> = txn.item(self, item_key);

            if !item.has_flags(flags::LOCKED) {
                if !e.version.try_lock_spin(LOCK_SPIN_ATTEMPTS) {
                    return Err(Aborted(AbortReason::LockContention));
                }

                item.add_flags(flags::LOCKED);
            }

            item.add_write_intent();
            return Ok(());
        }

        let sample: u64 = e.version.sample();
        fence(Ordering::SeqCst);

        if !txn.observe::<P::RowVer>(self, item_key, sample) {
            return Err(Aborted(AbortReason::VersionMismatch));
        }

        txn.item(self, item_key).add_write_intent();
        Ok(())
    }

    // ========================================================================
    //  Transactional Operations
    // ========================================================================

    /// Transactional point lookup.
    pub fn select_row<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        key: &K,
        for_update: bool,
    ) -> TxnResult<Option<(RowId, V)>> {
        let kb: KeyBuf = key.encode();
        let hit: UnlockedFind = self.tree.find_unlocked(&kb);

        if !hit.found {
            // Absence proof: the leaf's version guards it.
            if !self.register_node_version(txn, hit.node, hit.version) {
                return Err(Aborted(AbortReason::VersionMismatch));
            }

            return Ok(None);
        }

        // The cursor stabilized the leaf version before reading the value
        // slot, so the pointer predates any unlink that could still
        // reclaim it this epoch.
        let e: *mut Record<K, V, P> = hit.value as *mut Record<K, V, P>;

        self.select_row_at(txn, e, for_update)
    }

    fn select_row_at<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        e: *mut Record<K, V, P>,
        for_update: bool,
    ) -> TxnResult<Option<(RowId, V)>> {
        // SAFETY: see select_row; records outlive the epoch of any reader
        // that could have reached them.
        let e_ref: &Record<K, V, P> = unsafe { &*e };
        let item_key: ItemKey = ItemKey::Record(e as usize);

        {
            let item: &mut TransItem<'t> = txn.item(self, item_key);

            if Self::is_phantom(e_ref, item) {
                return Err(Aborted(AbortReason::Phantom));
            }

            if P::READ_MY_WRITE {
                if item.has_flags(flags::DELETE) {
                    return Ok(None);
                }

                if item.has_flags(flags::INSERT) {
                    // SAFETY: we are the record's inserter.
                    let value: V = unsafe { e_ref.read_value() };
                    return Ok(Some((RowId(e as usize), value)));
                }

                if let Some(value) = item.write_value::<V>() {
                    let value: V = *value;
                    return Ok(Some((RowId(e as usize), value)));
                }
            }
        }

        if for_update {
            self.add_write_intent(txn, e_ref, item_key)?;
        } else {
            let sample: u64 = e_ref.version.sample();

            if !txn.observe::<P::RowVer>(self, item_key, sample) {
                return Err(Aborted(AbortReason::VersionMismatch));
            }
        }

        // SAFETY: validated at commit against the observation.
        let value: V = unsafe { e_ref.read_value() };

        Ok(Some((RowId(e as usize), value)))
    }

    /// Stage a new payload for a row selected with `for_update`.
    ///
    /// # Panics
    ///
    /// Panics if the row was not selected for update by this transaction,
    /// or was inserted by it.
    pub fn update_row<'t>(&'t self, txn: &mut Transaction<'t>, row: RowId, value: V) {
        let item: &mut TransItem<'t> = txn.item(self, ItemKey::Record(row.0));

        assert!(
            item.has_write() && !item.has_flags(flags::INSERT),
            "update_row without a prior select-for-update"
        );

        item.add_write(value);
    }

    /// Transactional insert; returns whether the key already existed.
    pub fn insert_row<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        key: &K,
        value: V,
        overwrite: bool,
    ) -> TxnResult<bool> {
        let kb: KeyBuf = key.encode();
        let mut cursor: InsertCursor<'_> = self.tree.find_insert(&kb);

        if cursor.found() {
            let e: *mut Record<K, V, P> = cursor.value() as *mut Record<K, V, P>;
            let _ = cursor.finish(0);

            // SAFETY: the slot held a live record while the leaf was locked.
            let e_ref: &Record<K, V, P> = unsafe { &*e };
            let item_key: ItemKey = ItemKey::Record(e as usize);

            {
                let item: &mut TransItem<'t> = txn.item(self, item_key);

                if Self::is_phantom(e_ref, item) {
                    return Err(Aborted(AbortReason::Phantom));
                }

                if P::READ_MY_WRITE && item.has_flags(flags::DELETE) {
                    // A pending delete always targets a committed row
                    // (deletes of own inserts unlink on the spot), so
                    // install copies the staged value in.
                    debug_assert!(!item.has_flags(flags::INSERT));

                    item.clear_flags(flags::DELETE);
                    item.clear_write();
                    item.add_write(value);
                    return Ok(false);
                }
            }

            if overwrite {
                if P::ADAPTIVE {
                    self.add_write_intent(txn, e_ref, item_key)?;
                }

                let own_insert: bool = {
                    let item: &mut TransItem<'t> = txn.item(self, item_key);
                    item.add_write(value);
                    item.has_flags(flags::INSERT)
                };

                if P::READ_MY_WRITE && own_insert {
                    // SAFETY: we are the record's inserter.
                    unsafe { e_ref.write_value(&value) };
                }
            } else {
                let sample: u64 = e_ref.version.sample();

                if !txn.observe::<P::RowVer>(self, item_key, sample) {
                    return Err(Aborted(AbortReason::VersionMismatch));
                }
            }

            return Ok(true);
        }

        // New key: link a phantom record and publish the slot.
        let e: *mut Record<K, V, P> = Record::alloc(key.clone(), value, false);

        cursor.set_value(e as usize);
        let mark: FinishMark = cursor.finish(1);

        fence(Ordering::SeqCst);

        trace_log!(prev = mark.prev_version, next = mark.next_version, "ordered insert");

        let item: &mut TransItem<'t> = txn.item(self, ItemKey::Record(e as usize));
        item.add_write_intent();
        item.add_flags(flags::INSERT);

        // We bumped the leaf version ourselves; patch our own absence
        // proof, or abort if an older observation exists that cannot be
        // patched. The item is registered first so the abort path unlinks
        // the phantom record.
        if !self.update_node_version(txn, &mark) {
            return Err(Aborted(AbortReason::VersionMismatch));
        }

        Ok(false)
    }

    /// Transactional delete; returns whether the key existed.
    pub fn delete_row<'t>(&'t self, txn: &mut Transaction<'t>, key: &K) -> TxnResult<bool> {
        let kb: KeyBuf = key.encode();
        let hit: UnlockedFind = self.tree.find_unlocked(&kb);

        if !hit.found {
            if !self.register_node_version(txn, hit.node, hit.version) {
                return Err(Aborted(AbortReason::VersionMismatch));
            }

            return Ok(false);
        }

        let e: *mut Record<K, V, P> = hit.value as *mut Record<K, V, P>;
        // SAFETY: see select_row.
        let e_ref: &Record<K, V, P> = unsafe { &*e };
        let item_key: ItemKey = ItemKey::Record(e as usize);
        let valid: bool = e_ref.valid();

        {
            let item: &mut TransItem<'t> = txn.item(self, item_key);

            if Self::is_phantom(e_ref, item) {
                return Err(Aborted(AbortReason::Phantom));
            }

            if P::READ_MY_WRITE && item.has_flags(flags::DELETE) {
                return Ok(false);
            }
        }

        if P::READ_MY_WRITE && !valid {
            // Deleting our own uncommitted insert (the phantom check above
            // rules out anyone else's): unlink it right away and erase
            // every pending item state for it.
            txn.discard_item(self, item_key);

            if let Some(mark) = self.tree.remove(&kb, e as usize) {
                // SAFETY: unlinked above; readers that reached the phantom
                // may still hold the pointer, so the free waits out the
                // epoch.
                unsafe { txn.defer_free(drop_record::<K, V, P>, e.cast()) };

                // The unlink bumped the leaf version; patch our own
                // observation across it, as the insert did.
                if !self.update_node_version(txn, &mark) {
                    return Err(Aborted(AbortReason::VersionMismatch));
                }
            }

            // The key is absent again; keep the absence proof alive.
            let proof: UnlockedFind = self.tree.find_unlocked(&kb);

            if !self.register_node_version(txn, proof.node, proof.version) {
                return Err(Aborted(AbortReason::VersionMismatch));
            }

            return Ok(true);
        }

        self.add_write_intent(txn, e_ref, item_key)?;

        // The tombstone check must follow the observation; the version bump
        // accompanying a committed delete happens before the flip becomes
        // decisive.
        fence(Ordering::SeqCst);

        if e_ref.deleted.load(Ordering::Acquire) {
            return Err(Aborted(AbortReason::Deleted));
        }

        txn.item(self, item_key).add_flags(flags::DELETE);

        Ok(true)
    }

    /// Transactional bounded range scan.
    ///
    /// Forward scans visit committed keys in `[begin, end)` ascending;
    /// reverse scans visit `(begin, end]` descending. The callback receives
    /// the serialized key and the row payload and returns whether to keep
    /// scanning. Every leaf crossed is registered as a phantom guard; any
    /// failed observation aborts the transaction.
    pub fn range_scan<'t, F>(
        &'t self,
        txn: &mut Transaction<'t>,
        begin: &K,
        end: &K,
        reverse: bool,
        mut callback: F,
    ) -> TxnResult<()>
    where
        F: FnMut(&KeyBuf, &V) -> bool,
    {
        let begin_kb: KeyBuf = begin.encode();
        let end_kb: KeyBuf = end.encode();
        let origin: KeyBuf = if reverse { end_kb } else { begin_kb };

        // The two visit callbacks run strictly sequentially; the RefCell
        // lets them share the transaction borrow.
        let txn_cell: RefCell<&mut Transaction<'t>> = RefCell::new(txn);

        let ok: bool = self.tree.scan(
            &origin,
            reverse,
            |node, node_version| {
                let mut txn = txn_cell.borrow_mut();
                self.register_node_version(&mut txn, node, node_version)
            },
            |k, raw| {
                // Range bound first: the boundary entry itself decides
                // termination.
                if reverse {
                    if *k <= begin_kb {
                        return ScanVisit::Stop;
                    }
                } else if *k >= end_kb {
                    return ScanVisit::Stop;
                }

                let e: *mut Record<K, V, P> = raw as *mut Record<K, V, P>;
                // SAFETY: the scan snapshot was version-validated; see
                // select_row for the reclamation argument.
                let e_ref: &Record<K, V, P> = unsafe { &*e };
                let item_key: ItemKey = ItemKey::Record(raw);

                let mut txn = txn_cell.borrow_mut();

                if P::READ_MY_WRITE {
                    let item: &mut TransItem<'t> = txn.item(self, item_key);

                    if item.has_flags(flags::DELETE) {
                        return ScanVisit::Continue;
                    }

                    if item.has_flags(flags::INSERT) {
                        // SAFETY: own insert.
                        let value: V = unsafe { e_ref.read_value() };
                        return if callback(k, &value) {
                            ScanVisit::Continue
                        } else {
                            ScanVisit::Stop
                        };
                    }

                    if let Some(value) = item.write_value::<V>() {
                        let value: V = *value;
                        return if callback(k, &value) {
                            ScanVisit::Continue
                        } else {
                            ScanVisit::Stop
                        };
                    }
                }

                // Plain observation, even under the adaptive configuration:
                // a scan cannot take write locks speculatively.
                let sample: u64 = e_ref.version.sample();

                if !txn.observe::<P::RowVer>(self, item_key, sample) {
                    return ScanVisit::Fail;
                }

                if !e_ref.valid() {
                    // An uncommitted insert by someone else: a phantom to
                    // skip, not an error.
                    return ScanVisit::Continue;
                }

                // SAFETY: validated at commit against the observation.
                let value: V = unsafe { e_ref.read_value() };

                if callback(k, &value) {
                    ScanVisit::Continue
                } else {
                    ScanVisit::Stop
                }
            },
        );

        if ok { Ok(()) } else { Err(Aborted(AbortReason::ScanFailed)) }
    }

    // ========================================================================
    //  Non-Transactional Operations
    // ========================================================================

    /// Bootstrap lookup; safe only without conflicting transactions.
    #[must_use]
    pub fn nontrans_get(&self, key: &K) -> Option<V> {
        let hit: UnlockedFind = self.tree.find_unlocked(&key.encode());

        if !hit.found {
            return None;
        }

        // SAFETY: bootstrap contract; no concurrent installer.
        Some(unsafe { (*(hit.value as *mut Record<K, V, P>)).read_value() })
    }

    /// Bootstrap upsert under the leaf lock.
    pub fn nontrans_put(&self, key: &K, value: V) {
        let mut cursor: InsertCursor<'_> = self.tree.find_insert(&key.encode());

        if cursor.found() {
            let e: *mut Record<K, V, P> = cursor.value() as *mut Record<K, V, P>;

            // SAFETY: leaf lock held; bootstrap contract.
            unsafe { (*e).write_value(&value) };
            let _ = cursor.finish(0);
            return;
        }

        let e: *mut Record<K, V, P> = Record::alloc(key.clone(), value, true);
        cursor.set_value(e as usize);
        let _ = cursor.finish(1);
    }

    /// Bootstrap remove by key, freeing the record immediately.
    ///
    /// Does not interact with the RCU set: safe only while no concurrent
    /// transactions are active.
    pub fn nontrans_remove(&self, key: &K) -> bool {
        let kb: KeyBuf = key.encode();
        let hit: UnlockedFind = self.tree.find_unlocked(&kb);

        if !hit.found {
            return false;
        }

        if self.tree.remove(&kb, hit.value).is_none() {
            return false;
        }

        // SAFETY: unlinked above; the bootstrap contract rules out
        // concurrent readers.
        drop(unsafe { Box::from_raw(hit.value as *mut Record<K, V, P>) });

        true
    }

    fn record_of(item: &TransItem<'_>) -> *mut Record<K, V, P> {
        match item.key() {
            ItemKey::Record(addr) => addr as *mut Record<K, V, P>,
            other => unreachable!("record callback on non-record item {other:?}"),
        }
    }
}

// ============================================================================
//  STM Adapter
// ============================================================================

impl<K, V, P> TxnObject for OrderedIndex<K, V, P>
where
    K: IndexKey + Clone + Send + Sync + 'static,
    V: Copy + Send + Sync + 'static,
    P: IndexParams,
{
    fn lock(&self, item: &mut TransItem<'_>) -> bool {
        let e: *mut Record<K, V, P> = Self::record_of(item);

        // SAFETY: records in the write set are live.
        unsafe { &*e }.version.try_lock_spin(LOCK_SPIN_ATTEMPTS)
    }

    fn check(&self, item: &TransItem<'_>) -> bool {
        let prev: u64 = item.read_value().expect("checked items carry a read");

        match item.key() {
            ItemKey::Internode(addr) => {
                // SAFETY: tree nodes live as long as the index.
                let node: &LeafNode = unsafe { &*(addr as *const LeafNode) };

                !node.version_has_changed(prev as u32)
            }

            ItemKey::Record(addr) => {
                // SAFETY: records in the read set are live.
                let e: &Record<K, V, P> = unsafe { &*(addr as *const Record<K, V, P>) };

                e.version.check_version(prev, item.has_write())
            }

            ItemKey::Bucket(_) => unreachable!("ordered index has no bucket items"),
        }
    }

    fn install(&self, item: &mut TransItem<'_>, commit_tid: Tid) {
        let e: *mut Record<K, V, P> = Self::record_of(item);
        // SAFETY: locked record in the write set.
        let e_ref: &Record<K, V, P> = unsafe { &*e };

        if item.has_flags(flags::DELETE) {
            e_ref.deleted.store(true, Ordering::Release);
            fence(Ordering::SeqCst);
            e_ref
                .version
                .set_version_locked(e_ref.version.value() + TID_INCREMENT);
            return;
        }

        if !item.has_flags(flags::INSERT) {
            if let Some(value) = item.write_value::<V>() {
                // SAFETY: record lock held.
                unsafe { e_ref.write_value(value) };
            }
        }

        e_ref
            .version
            .set_version_locked(e_ref.version.install_value(commit_tid));
    }

    fn unlock(&self, item: &mut TransItem<'_>) {
        let e: *mut Record<K, V, P> = Self::record_of(item);

        // SAFETY: locked record in the write set.
        unsafe { &*e }.version.unlock();
    }

    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, thread: &mut ThreadContext) {
        let retire: bool = if committed {
            item.has_flags(flags::DELETE)
        } else {
            item.has_flags(flags::INSERT)
        };

        if !retire {
            return;
        }

        let e: *mut Record<K, V, P> = Self::record_of(item);
        // SAFETY: the record is still linked; we unlink it here.
        let e_ref: &Record<K, V, P> = unsafe { &*e };

        debug_assert!(!e_ref.valid() || e_ref.deleted.load(Ordering::Acquire));

        let _ = self.tree.remove(&e_ref.key.encode(), e as usize);

        // SAFETY: unlinked above; readers holding the pointer are covered
        // by the reclamation epoch.
        unsafe {
            thread
                .rcu()
                .add(global_epoch(), drop_record::<K, V, P>, e.cast());
        }
    }
}

impl<K, V, P: IndexParams> Drop for OrderedIndex<K, V, P> {
    fn drop(&mut self) {
        // Free the records before the tree frees its nodes.
        self.tree.drain_values(|raw| {
            // SAFETY: exclusive access; every published slot holds a record
            // allocated by this index.
            drop(unsafe { Box::from_raw(raw as *mut Record<K, V, P>) });
        });
    }
}

// ============================================================================
//  Tests
// ============================================================================
