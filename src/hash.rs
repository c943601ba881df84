//! Filepath: src/hash.rs
//!
//! The unordered (hash) index.
//!
//! A bucketed chained hashtable with serializable transactional row
//! operations. Each bucket's version word is the **phantom guard** for
//! negative lookups: it is incremented on every insert into the bucket, so
//! a transaction that proved a key absent registers the bucket version and
//! fails validation if anyone inserted there before it committed.
//!
//! Records enter the chain as phantoms (`valid = false`) under the bucket
//! lock and become visible when their inserter commits. Deletes install a
//! tombstone flag plus a version bump and are physically unlinked at
//! cleanup, with the record handed to the committing thread's RCU set.
//!
//! The index participates in the commit protocol through its [`TxnObject`]
//! implementation at the bottom of this file.

use std::cell::UnsafeCell;
use std::hash::{BuildHasher, Hash, RandomState};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering, fence};

use crate::params::IndexParams;
use crate::trace::trace_log;
use crate::txn::{
    AbortReason, Aborted, ItemKey, LOCK_SPIN_ATTEMPTS, RowId, ThreadContext, Tid, TransItem,
    Transaction, TxnObject, TxnResult, flags, global_epoch,
};
use crate::version::{self, INITIAL_TID, INVALID_BIT, RowVersion, TID_INCREMENT};

// ============================================================================
//  Record
// ============================================================================

/// A row of the hash index: one node of a bucket's chain.
struct Record<K, V, P: IndexParams> {
    next: AtomicPtr<Record<K, V, P>>,
    key: K,
    version: P::RowVer,

    /// Row payload. Mutated only at install time under the record lock;
    /// optimistic readers copy it out and rely on version validation.
    value: UnsafeCell<V>,

    /// Tombstone, set at install time of a committed delete. Readers that
    /// observed the record before the flip fail validation on the version
    /// bump that accompanies it.
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
            next: AtomicPtr::new(std::ptr::null_mut()),
            key,
            version: P::RowVer::new(initial),
            value: UnsafeCell::new(value),
            deleted: AtomicBool::new(false),
        }))
    }

    /// False while the inserting transaction has not committed.
    #[inline]
    fn valid(&self) -> bool {
        !version::is_invalid(self.version.value())
    }

    /// Copy the payload out.
    ///
    /// # Safety
    ///
    /// May race a concurrent install; the caller must validate the record
    /// version afterwards (or already hold the record lock) before trusting
    /// the copy. `V: Copy` keeps the racy copy free of ownership effects.
    #[inline]
    unsafe fn read_value(&self) -> V {
        unsafe { std::ptr::read_volatile(self.value.get()) }
    }

    /// Overwrite the payload.
    ///
    /// # Safety
    ///
    /// Caller must either hold the record lock or be the record's inserter
    /// before the insert committed (no other writer can exist either way).
    #[inline]
    unsafe fn write_value(&self, value: &V) {
        unsafe { std::ptr::write_volatile(self.value.get(), *value) };
    }
}

unsafe fn drop_record<K, V, P: IndexParams>(p: *mut u8) {
    // SAFETY: enqueued by cleanup with a pointer from Record::alloc; the
    // RCU contract guarantees single invocation after all readers quiesced.
    drop(unsafe { Box::from_raw(p.cast::<Record<K, V, P>>()) });
}

// ============================================================================
//  Bucket
// ============================================================================

/// Chain head plus the bucket's phantom-guard version.
///
/// The version's lock bit is the bucket lock: held only across chain
/// splicing and the version increment.
struct Bucket<K, V, P: IndexParams> {
    head: AtomicPtr<Record<K, V, P>>,
    version: P::GuardVer,
}

impl<K, V, P: IndexParams> Bucket<K, V, P> {
    fn new() -> Self {
        Self {
            head: AtomicPtr::new(std::ptr::null_mut()),
            version: P::GuardVer::new(0),
        }
    }
}

// ============================================================================
//  HashIndex
// ============================================================================

/// A transactional hash index.
///
/// `K` is the row key (hashable), `V` the POD-like row payload, `P` the
/// concurrency configuration.
///
/// # Example
///
/// ```rust
/// use occtable::{HashIndex, ThreadContext, Transaction};
/// use occtable::params::OpaqueRmw;
///
/// let index: HashIndex<u64, [u8; 8], OpaqueRmw> = HashIndex::new(256);
/// let mut thread = ThreadContext::new();
///
/// let found = Transaction::run(&mut thread, |txn| {
///     index.insert_row(txn, &7, *b"payload!", false)?;
///     Ok(index.select_row(txn, &7, false)?.is_some())
/// });
///
/// assert!(found);
/// ```
pub struct HashIndex<K, V, P: IndexParams = crate::params::Opaque> {
    buckets: Box<[Bucket<K, V, P>]>,
    hasher: RandomState,
    key_gen: AtomicU64,
}

// SAFETY: records are shared through raw pointers but every mutation goes
// through the version-lock protocol; the RCU contract keeps unlinked
// records alive for concurrent readers.
unsafe impl<K: Send + Sync, V: Send + Sync, P: IndexParams> Send for HashIndex<K, V, P> {}
unsafe impl<K: Send + Sync, V: Send + Sync, P: IndexParams> Sync for HashIndex<K, V, P> {}

impl<K, V, P> HashIndex<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Copy + Send + Sync + 'static,
    P: IndexParams,
{
    /// Create an index with a fixed bucket count.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is zero.
    #[must_use]
    pub fn new(bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "bucket_count must be positive");

        Self {
            buckets: (0..bucket_count).map(|_| Bucket::new()).collect(),
            hasher: RandomState::new(),
            key_gen: AtomicU64::new(0),
        }
    }

    /// Number of buckets.
    #[inline]
    #[must_use]
    pub fn nbuckets(&self) -> usize {
        self.buckets.len()
    }

    /// Draw a fresh surrogate key.
    #[inline]
    pub fn gen_key(&self) -> u64 {
        self.key_gen.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    fn bucket_for(&self, key: &K) -> &Bucket<K, V, P> {
        let idx: usize = (self.hasher.hash_one(key) as usize) % self.buckets.len();

        &self.buckets[idx]
    }

    #[inline]
    fn bucket_item_key(bucket: &Bucket<K, V, P>) -> ItemKey {
        ItemKey::Bucket(std::ptr::from_ref(bucket) as usize)
    }

    fn find_in_bucket(bucket: &Bucket<K, V, P>, key: &K) -> *mut Record<K, V, P> {
        let mut cur: *mut Record<K, V, P> = bucket.head.load(Ordering::Acquire);

        while !cur.is_null() {
            // SAFETY: chained records stay dereferenceable for at least one
            // reclamation epoch past unlinking.
            let cur_ref: &Record<K, V, P> = unsafe { &*cur };

            if cur_ref.key == *key {
                return cur;
            }

            cur = cur_ref.next.load(Ordering::Acquire);
        }

        std::ptr::null_mut()
    }

    #[inline]
    fn is_phantom(e: &Record<K, V, P>, item: &TransItem<'_>) -> bool {
        !e.valid() && !item.has_flags(flags::INSERT)
    }

    /// Express write intent on a record, eagerly locking it under the
    /// adaptive configuration.
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
    ///
    /// With `for_update`, the returned [`RowId`] may be passed to
    /// [`update_row`](Self::update_row).
    pub fn select_row<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        key: &K,
        for_update: bool,
    ) -> TxnResult<Option<(RowId, V)>> {
        let bucket: &Bucket<K, V, P> = self.bucket_for(key);
        let bucket_vers: u64 = bucket.version.sample();

        // The bucket version must be sampled before the chain is walked;
        // an insert between the two is caught at validation.
        fence(Ordering::SeqCst);

        let e: *mut Record<K, V, P> = Self::find_in_bucket(bucket, key);

        if e.is_null() {
            // Absence proof: future inserts into this bucket invalidate it.
            if !txn.observe::<P::GuardVer>(self, Self::bucket_item_key(bucket), bucket_vers) {
                return Err(Aborted(AbortReason::VersionMismatch));
            }

            return Ok(None);
        }

        // SAFETY: found in the chain above; see find_in_bucket.
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
                    // SAFETY: we are the record's inserter; nobody else
                    // writes it before our commit.
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

        // SAFETY: validated at commit against the observation (or guarded
        // by the lock we just took).
        let value: V = unsafe { e_ref.read_value() };

        Ok(Some((RowId(e as usize), value)))
    }

    /// Stage a new payload for a row selected with `for_update`.
    ///
    /// # Panics
    ///
    /// Panics if the row was not selected for update by this transaction,
    /// or was inserted by it (its payload is written directly).
    pub fn update_row<'t>(&'t self, txn: &mut Transaction<'t>, row: RowId, value: V) {
        let item: &mut TransItem<'t> = txn.item(self, ItemKey::Record(row.0));

        assert!(
            item.has_write() && !item.has_flags(flags::INSERT),
            "update_row without a prior select-for-update"
        );

        item.add_write(value);
    }

    /// Transactional insert.
    ///
    /// Returns whether the key already existed. With `overwrite`, an
    /// existing row is re-staged with the new payload; without it, the
    /// existing row is merely observed.
    pub fn insert_row<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        key: &K,
        value: V,
        overwrite: bool,
    ) -> TxnResult<bool> {
        let bucket: &Bucket<K, V, P> = self.bucket_for(key);

        bucket.version.lock();

        let e: *mut Record<K, V, P> = Self::find_in_bucket(bucket, key);

        if !e.is_null() {
            bucket.version.unlock();

            // SAFETY: see find_in_bucket.
            let e_ref: &Record<K, V, P> = unsafe { &*e };
            let item_key: ItemKey = ItemKey::Record(e as usize);

            {
                let item: &mut TransItem<'t> = txn.item(self, item_key);

                if Self::is_phantom(e_ref, item) {
                    return Err(Aborted(AbortReason::Phantom));
                }

                if P::READ_MY_WRITE && item.has_flags(flags::DELETE) {
                    // Insert over our own pending delete: revive the row
                    // with the new payload. A pending delete always targets
                    // a committed row (deletes of own inserts unlink on the
                    // spot), so install copies the staged value in.
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

        // Key absent: link a phantom record at the chain head and bump the
        // bucket version, all under the bucket lock.
        let v0: u64 = bucket.version.value() & !version::LOCK_BIT;

        let new_rec: *mut Record<K, V, P> = Record::alloc(key.clone(), value, false);

        // SAFETY: freshly allocated, unpublished.
        unsafe {
            (*new_rec)
                .next
                .store(bucket.head.load(Ordering::Relaxed), Ordering::Relaxed);
        }

        bucket.head.store(new_rec, Ordering::Release);
        bucket.version.inc_nonopaque();

        let v1: u64 = bucket.version.value() & !version::LOCK_BIT;

        bucket.version.unlock();

        trace_log!(bucket_v0 = v0, bucket_v1 = v1, "hash insert");

        // We changed the bucket version ourselves: patch our own absence
        // proof so the commit check does not see a foreign-looking bump.
        txn.update_read(self, Self::bucket_item_key(bucket), v0, v1);

        let item: &mut TransItem<'t> = txn.item(self, ItemKey::Record(new_rec as usize));
        item.add_write_intent();
        item.add_flags(flags::INSERT);

        Ok(false)
    }

    /// Transactional delete.
    ///
    /// Returns whether the key existed. For committed rows the physical
    /// unlink happens at cleanup time after commit; the transaction's own
    /// uncommitted inserts are unlinked on the spot.
    pub fn delete_row<'t>(&'t self, txn: &mut Transaction<'t>, key: &K) -> TxnResult<bool> {
        let bucket: &Bucket<K, V, P> = self.bucket_for(key);
        let bucket_vers: u64 = bucket.version.sample();

        fence(Ordering::SeqCst);

        let e: *mut Record<K, V, P> = Self::find_in_bucket(bucket, key);

        if e.is_null() {
            // Not found: the absence itself is what commits.
            if !txn.observe::<P::GuardVer>(self, Self::bucket_item_key(bucket), bucket_vers) {
                return Err(Aborted(AbortReason::VersionMismatch));
            }

            return Ok(false);
        }

        // SAFETY: see find_in_bucket.
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
            // rules out anyone else's): unlink it right away, erase every
            // pending item state for it, and keep the absence proof alive.
            txn.discard_item(self, item_key);

            bucket.version.lock();
            Self::splice_out(bucket, e);
            bucket.version.unlock();

            // SAFETY: unlinked above; readers that reached the phantom may
            // still hold the pointer, so the free waits out the epoch.
            unsafe { txn.defer_free(drop_record::<K, V, P>, e.cast()) };

            if !txn.observe::<P::GuardVer>(self, Self::bucket_item_key(bucket), bucket_vers) {
                return Err(Aborted(AbortReason::VersionMismatch));
            }

            return Ok(true);
        }

        self.add_write_intent(txn, e_ref, item_key)?;

        // The tombstone check must come after the observation: a delete
        // committing in between flips `deleted` only after bumping the
        // version we will validate.
        fence(Ordering::SeqCst);

        if e_ref.deleted.load(Ordering::Acquire) {
            return Err(Aborted(AbortReason::Deleted));
        }

        txn.item(self, item_key).add_flags(flags::DELETE);

        Ok(true)
    }

    // ========================================================================
    //  Non-Transactional Operations
    // ========================================================================

    /// Bootstrap lookup. Takes no observations; safe only without
    /// conflicting concurrent transactions on this key.
    #[must_use]
    pub fn nontrans_get(&self, key: &K) -> Option<V> {
        let bucket: &Bucket<K, V, P> = self.bucket_for(key);
        let e: *mut Record<K, V, P> = Self::find_in_bucket(bucket, key);

        if e.is_null() {
            return None;
        }

        // SAFETY: bootstrap contract; no concurrent installer.
        Some(unsafe { (*e).read_value() })
    }

    /// Bootstrap upsert under the bucket lock.
    pub fn nontrans_put(&self, key: &K, value: V) {
        let bucket: &Bucket<K, V, P> = self.bucket_for(key);

        bucket.version.lock();

        let e: *mut Record<K, V, P> = Self::find_in_bucket(bucket, key);

        if e.is_null() {
            let new_rec: *mut Record<K, V, P> = Record::alloc(key.clone(), value, true);

            // SAFETY: freshly allocated, unpublished.
            unsafe {
                (*new_rec)
                    .next
                    .store(bucket.head.load(Ordering::Relaxed), Ordering::Relaxed);
            }

            bucket.head.store(new_rec, Ordering::Release);
        } else {
            // SAFETY: bucket lock held; bootstrap contract.
            unsafe { (*e).write_value(&value) };
        }

        bucket.version.unlock();
    }

    /// Bootstrap remove by key, freeing the record immediately.
    ///
    /// Does not interact with the RCU set: safe only while no concurrent
    /// transactions are active.
    pub fn nontrans_remove(&self, key: &K) -> bool {
        let bucket: &Bucket<K, V, P> = self.bucket_for(key);

        bucket.version.lock();

        let e: *mut Record<K, V, P> = Self::find_in_bucket(bucket, key);

        if e.is_null() {
            bucket.version.unlock();
            return false;
        }

        Self::splice_out(bucket, e);
        bucket.version.unlock();

        // SAFETY: unlinked under the bucket lock, and the bootstrap
        // contract rules out concurrent readers.
        drop(unsafe { Box::from_raw(e) });

        true
    }

    /// Unlink `e` from its bucket chain. The bucket lock must be held.
    fn splice_out(bucket: &Bucket<K, V, P>, e: *mut Record<K, V, P>) {
        let mut prev: *mut Record<K, V, P> = std::ptr::null_mut();
        let mut cur: *mut Record<K, V, P> = bucket.head.load(Ordering::Acquire);

        while !cur.is_null() && cur != e {
            prev = cur;
            // SAFETY: see find_in_bucket.
            cur = unsafe { &*cur }.next.load(Ordering::Acquire);
        }

        assert!(!cur.is_null(), "record not in its bucket chain");

        // SAFETY: cur == e is a live record.
        let next: *mut Record<K, V, P> = unsafe { &*cur }.next.load(Ordering::Acquire);

        if prev.is_null() {
            bucket.head.store(next, Ordering::Release);
        } else {
            // SAFETY: prev is a live record in the same chain.
            unsafe { &*prev }.next.store(next, Ordering::Release);
        }
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

impl<K, V, P> TxnObject for HashIndex<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
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
            ItemKey::Bucket(addr) => {
                // SAFETY: buckets live as long as the index.
                let bucket: &Bucket<K, V, P> = unsafe { &*(addr as *const Bucket<K, V, P>) };

                bucket.version.check_version(prev, false)
            }

            ItemKey::Record(addr) => {
                // SAFETY: records in the read set are live.
                let e: &Record<K, V, P> = unsafe { &*(addr as *const Record<K, V, P>) };

                e.version.check_version(prev, item.has_write())
            }

            ItemKey::Internode(_) => unreachable!("hash index has no internode items"),
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
            // Plain update: copy the staged payload in.
            if let Some(value) = item.write_value::<V>() {
                // SAFETY: record lock held.
                unsafe { e_ref.write_value(value) };
            }
        }

        e_ref
            .version
            .set_version_locked(e_ref.version.install_value(commit_tid));

        if P::GuardVer::OPAQUE && item.has_flags(flags::INSERT) {
            // The insert bumped the bucket version with a local counter;
            // promote it to the commit TID so opaque readers can keep
            // using it for snapshot checks.
            let bucket: &Bucket<K, V, P> = self.bucket_for(&e_ref.key);

            bucket.version.lock();

            if version::is_nonopaque(bucket.version.value()) {
                bucket.version.set_version_locked(commit_tid);
            }

            bucket.version.unlock();
        }
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

        let bucket: &Bucket<K, V, P> = self.bucket_for(&e_ref.key);

        bucket.version.lock();
        Self::splice_out(bucket, e);
        bucket.version.unlock();

        // SAFETY: unlinked above; readers holding the pointer are covered
        // by the reclamation epoch.
        unsafe {
            thread
                .rcu()
                .add(global_epoch(), drop_record::<K, V, P>, e.cast());
        }
    }
}

impl<K, V, P: IndexParams> Drop for HashIndex<K, V, P> {
    fn drop(&mut self) {
        for bucket in &self.buckets {
            let mut cur: *mut Record<K, V, P> = bucket.head.load(Ordering::Relaxed);

            while !cur.is_null() {
                // SAFETY: exclusive access; each record is owned by exactly
                // one chain link.
                let boxed: Box<Record<K, V, P>> = unsafe { Box::from_raw(cur) };
                cur = boxed.next.load(Ordering::Relaxed);
            }
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
