//! Filepath: src/tree/mod.rs
//!
//! The concurrent ordered trie the ordered index wraps.
//!
//! Keys are serialized [`KeyBuf`]s; values are machine words (the ordered
//! index stores record pointers). The structure is a B-link tree of
//! fixed-width nodes:
//!
//! - **Readers** are lock-free: they descend internodes under version
//!   validation, then repair against concurrent splits by walking the leaf
//!   chain while their key is at or past the next leaf's lower bound.
//! - **Slot writers** take a single leaf's version lock, stage the new entry
//!   in a free slot, and publish it with one permutation store.
//! - **Structural writers** (splits, router inserts, root growth) are
//!   serialized by one structure mutex; they still take the affected nodes'
//!   version locks so readers observe the split counters.
//!
//! The cursor API is the contract the ordered index builds on:
//! [`Tree::find_unlocked`] returns the visited leaf and its stable version
//! with a hit or a miss (the miss sample is the caller's absence proof),
//! [`Tree::find_insert`] returns a locking [`InsertCursor`] whose
//! [`finish`](InsertCursor::finish) reports the previous and next version
//! values of the modified leaf, and [`Tree::scan`] drives leaf- and
//! value-visit callbacks over a bounded traversal.
//!
//! Leaves are never merged or freed while the tree is live; every node is
//! freed on drop, when access is exclusive.

mod internode;
mod leaf;
mod nodeversion;
mod permuter;

pub use leaf::LeafNode;
pub use nodeversion::{LockGuard, NodeVersion};
pub(crate) use permuter::WIDTH;

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::key::KeyBuf;
use crate::trace::trace_log;

use internode::Internode;
use permuter::Permuter;

// ============================================================================
//  Node References
// ============================================================================

/// Low pointer-tag bit marking a leaf root.
const LEAF_TAG: usize = 1;

enum NodeRef {
    Leaf(*mut LeafNode),
    Inter(*mut Internode),
}

#[inline]
fn encode_leaf(leaf: *mut LeafNode) -> usize {
    leaf as usize | LEAF_TAG
}

#[inline]
fn encode_inter(node: *mut Internode) -> usize {
    node as usize
}

#[inline]
fn decode(raw: usize) -> NodeRef {
    if raw & LEAF_TAG != 0 {
        NodeRef::Leaf((raw & !LEAF_TAG) as *mut LeafNode)
    } else {
        NodeRef::Inter(raw as *mut Internode)
    }
}

// ============================================================================
//  Tree
// ============================================================================

/// Result of an unlocked point lookup.
#[derive(Debug, Clone, Copy)]
pub struct UnlockedFind {
    /// Whether the key was present.
    pub found: bool,

    /// The value word, if found.
    pub value: usize,

    /// The leaf visited. On a miss this is the leaf whose version guards
    /// the absence proof.
    pub node: *mut LeafNode,

    /// The leaf's stable version at the time of the read.
    pub version: u32,
}

/// Verdict of a scan's value callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVisit {
    /// Keep scanning.
    Continue,

    /// Stop; the scan succeeded.
    Stop,

    /// Abort; an observation failed.
    Fail,
}

/// A concurrent ordered map from serialized keys to machine words.
pub struct Tree {
    /// Tagged pointer to the root node (leaf while the tree has one node).
    root: AtomicUsize,

    /// Serializes splits and router propagation.
    structure: Mutex<()>,
}

// SAFETY: all shared node state is atomic, mutated under the node version
// locks and the structure mutex per the protocol above.
unsafe impl Send for Tree {}
unsafe impl Sync for Tree {}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree with a single empty root leaf.
    #[must_use]
    pub fn new() -> Self {
        let root: *mut LeafNode = Box::into_raw(LeafNode::new(KeyBuf::new()));

        Self {
            root: AtomicUsize::new(encode_leaf(root)),
            structure: Mutex::new(()),
        }
    }

    // ========================================================================
    //  Descent
    // ========================================================================

    /// Descend to the leaf responsible for `key`.
    fn reach_leaf(&self, key: &KeyBuf) -> *mut LeafNode {
        'restart: loop {
            let mut raw: usize = self.root.load(Ordering::Acquire);

            loop {
                match decode(raw) {
                    NodeRef::Leaf(leaf) => return self.advance(leaf, key),

                    NodeRef::Inter(node) => {
                        // SAFETY: nodes are freed only on drop, with
                        // exclusive access.
                        let node_ref: &Internode = unsafe { &*node };

                        let v: u32 = node_ref.version.stable();
                        let nkeys: usize = node_ref.nkeys();
                        let child: *mut u8 = node_ref.child_for(key, nkeys);

                        if node_ref.version.has_changed(v) {
                            continue 'restart;
                        }

                        raw = if node_ref.height() == 1 {
                            encode_leaf(child.cast())
                        } else {
                            encode_inter(child.cast())
                        };
                    }
                }
            }
        }
    }

    /// Walk the B-link chain while `key` belongs to a right sibling.
    ///
    /// Routers may lag behind splits; this is where a descent catches up.
    fn advance(&self, mut leaf: *mut LeafNode, key: &KeyBuf) -> *mut LeafNode {
        loop {
            // SAFETY: see reach_leaf.
            let next: *mut LeafNode = unsafe { &*leaf }.next_leaf();

            if next.is_null() || *key < *unsafe { &*next }.low_key() {
                return leaf;
            }

            leaf = next;
        }
    }

    // SAFETY: callers pass leaves reachable from this tree; the returned
    // borrow keeps `self` (and therefore the node) alive.
    unsafe fn leaf_version(&self, leaf: *mut LeafNode) -> &NodeVersion {
        unsafe { &(*leaf).version }
    }

    // ========================================================================
    //  Unlocked Cursor
    // ========================================================================

    /// OCC point lookup.
    ///
    /// The leaf version is stabilized *before* the value slot is read, so a
    /// caller may dereference the returned word knowing the leaf did not
    /// change in between; validation against the returned sample detects
    /// everything after.
    pub fn find_unlocked(&self, key: &KeyBuf) -> UnlockedFind {
        loop {
            let leaf: *mut LeafNode = self.reach_leaf(key);
            // SAFETY: see reach_leaf.
            let leaf_ref: &LeafNode = unsafe { &*leaf };

            let v: u32 = leaf_ref.version.stable();

            // A split may have raced the descent; if the key now belongs to
            // a right sibling, start over.
            let next: *mut LeafNode = leaf_ref.next_leaf();
            if !next.is_null() && *key >= *unsafe { &*next }.low_key() {
                continue;
            }

            let perm: Permuter = leaf_ref.permutation();

            let out: UnlockedFind = match leaf_ref.search(key, perm) {
                Ok(pos) => UnlockedFind {
                    found: true,
                    value: leaf_ref.value_at(perm.get(pos)),
                    node: leaf,
                    version: v,
                },

                Err(_) => UnlockedFind {
                    found: false,
                    value: 0,
                    node: leaf,
                    version: v,
                },
            };

            if leaf_ref.version.has_changed(v) {
                continue;
            }

            return out;
        }
    }

    // ========================================================================
    //  Locking Cursor
    // ========================================================================

    /// Locate `key` for insertion, locking its leaf.
    ///
    /// If the key is absent, a free slot is staged with the key already
    /// written; the caller sets the value and calls
    /// [`InsertCursor::finish`] with delta 1 to publish it.
    pub fn find_insert(&self, key: &KeyBuf) -> InsertCursor<'_> {
        loop {
            let leaf: *mut LeafNode = self.reach_leaf(key);
            // SAFETY: see reach_leaf.
            let guard: LockGuard<'_> = unsafe { self.leaf_version(leaf) }.lock();
            let leaf_ref: &LeafNode = unsafe { &*leaf };

            // Re-check the bound under the lock; a split may have moved the
            // key's range right before we acquired it.
            let next: *mut LeafNode = leaf_ref.next_leaf();
            if !next.is_null() && *key >= *unsafe { &*next }.low_key() {
                drop(guard);
                continue;
            }

            let perm: Permuter = leaf_ref.permutation();

            match leaf_ref.search(key, perm) {
                Ok(pos) => {
                    return InsertCursor {
                        leaf,
                        guard: Some(guard),
                        found: true,
                        slot: perm.get(pos),
                        pos,
                    };
                }

                Err(pos) => {
                    if perm.size() == WIDTH {
                        drop(guard);
                        self.split_leaf(key);
                        continue;
                    }

                    let slot: usize = perm.back();
                    leaf_ref.write_key(slot, key);

                    return InsertCursor {
                        leaf,
                        guard: Some(guard),
                        found: false,
                        slot,
                        pos,
                    };
                }
            }
        }
    }

    /// Unlink the binding `key -> value` from its leaf. Used by transaction
    /// cleanup and the non-transactional remove; the slot is recycled, the
    /// leaf stays.
    ///
    /// On success, reports the leaf's version transition (as
    /// [`InsertCursor::finish`] does) so a remover can patch its own
    /// observation. Returns `None` if the key is absent or bound to a
    /// different value.
    pub fn remove(&self, key: &KeyBuf, value: usize) -> Option<FinishMark> {
        loop {
            let leaf: *mut LeafNode = self.reach_leaf(key);
            // SAFETY: see reach_leaf.
            let mut guard: LockGuard<'_> = unsafe { self.leaf_version(leaf) }.lock();
            let leaf_ref: &LeafNode = unsafe { &*leaf };

            let next: *mut LeafNode = leaf_ref.next_leaf();
            if !next.is_null() && *key >= *unsafe { &*next }.low_key() {
                drop(guard);
                continue;
            }

            let perm: Permuter = leaf_ref.permutation();

            return match leaf_ref.search(key, perm) {
                Ok(pos) => {
                    if leaf_ref.value_at(perm.get(pos)) != value {
                        return None;
                    }

                    let prev_version: u32 = guard.pre_lock_value();

                    guard.mark_insert();

                    let mut p: Permuter = perm;
                    let _ = p.remove(pos);
                    leaf_ref.set_permutation(p);

                    let next_version: u32 = guard.post_unlock_value();

                    drop(guard);

                    Some(FinishMark {
                        node: leaf,
                        prev_version,
                        next_version,
                    })
                }

                Err(_) => None,
            };
        }
    }

    // ========================================================================
    //  Splits
    // ========================================================================

    /// Split the full leaf covering `key`. The caller retries its insert
    /// afterwards; by then the covering leaf has room (or was split again by
    /// someone else, which is just as good).
    fn split_leaf(&self, key: &KeyBuf) {
        let _structure = self.structure.lock();

        let leaf: *mut LeafNode = self.reach_leaf(key);
        // SAFETY: see reach_leaf.
        let mut guard: LockGuard<'_> = unsafe { self.leaf_version(leaf) }.lock();
        let leaf_ref: &LeafNode = unsafe { &*leaf };

        let perm: Permuter = leaf_ref.permutation();

        if perm.size() < WIDTH {
            // Someone made room before we took the mutex.
            return;
        }

        let half: usize = WIDTH / 2;
        let split_key: KeyBuf = leaf_ref.key_at(perm.get(half));

        trace_log!(split_key = ?split_key, "leaf split");
        guard.mark_split();

        // Build the right sibling from the upper half.
        let right: Box<LeafNode> = LeafNode::new(split_key);
        let mut rperm: Permuter = Permuter::empty();

        for i in half..WIDTH {
            let slot: usize = rperm.insert_from_back(i - half);
            right.copy_entry_from(slot, leaf_ref, perm.get(i));
        }

        right.set_permutation(rperm);

        let right_ptr: *mut LeafNode = Box::into_raw(right);
        // SAFETY: freshly allocated above.
        let right_ref: &LeafNode = unsafe { &*right_ptr };

        let old_next: *mut LeafNode = leaf_ref.next_leaf();
        right_ref.set_next(old_next);
        right_ref.set_prev(leaf);
        right_ref
            .parent
            .store(leaf_ref.parent.load(Ordering::Acquire), Ordering::Release);

        if !old_next.is_null() {
            // SAFETY: chained leaves live as long as the tree.
            unsafe { &*old_next }.set_prev(right_ptr);
        }

        // Publish: readers now reach the sibling through the chain even
        // before the router lands.
        leaf_ref.set_next(right_ptr);

        let mut lperm: Permuter = perm;
        while lperm.size() > half {
            let _ = lperm.remove(half);
        }
        leaf_ref.set_permutation(lperm);

        drop(guard);

        // SAFETY: under the structure mutex; left and right are live nodes.
        unsafe {
            self.insert_router_above(leaf.cast::<u8>(), right_ptr.cast::<u8>(), split_key, 0);
        }
    }

    /// Link a freshly split-off right sibling into the level above.
    ///
    /// `level` is the height of `left`/`right` (0 for leaves). Must run
    /// under the structure mutex.
    unsafe fn insert_router_above(
        &self,
        left: *mut u8,
        right: *mut u8,
        split_key: KeyBuf,
        level: u32,
    ) {
        let parent: *mut Internode = unsafe { node_parent(left, level) };

        if parent.is_null() {
            // Root split: grow the tree by one level.
            let newroot: Box<Internode> = Internode::new(level + 1);
            newroot.set_child(0, left);

            {
                let guard: LockGuard<'_> = newroot.version.lock();
                newroot.insert_router(&split_key, right);
                drop(guard);
            }

            let newroot_ptr: *mut Internode = Box::into_raw(newroot);

            unsafe {
                set_node_parent(left, level, newroot_ptr);
                set_node_parent(right, level, newroot_ptr);
            }

            trace_log!(height = level + 1, "root split");
            self.root.store(encode_inter(newroot_ptr), Ordering::Release);
            return;
        }

        // SAFETY: internodes are freed only on drop.
        let parent_ref: &Internode = unsafe { &*parent };

        if !parent_ref.is_full() {
            let mut guard: LockGuard<'_> = parent_ref.version.lock();
            guard.mark_insert();
            parent_ref.insert_router(&split_key, right);
            unsafe { set_node_parent(right, level, parent) };
            drop(guard);
            return;
        }

        // The parent is full: split it, then place the pending router into
        // whichever half now covers it, then recurse with the promoted key.
        let mut guard: LockGuard<'_> = parent_ref.version.lock();
        guard.mark_split();

        let n: usize = parent_ref.nkeys();
        let mid: usize = n / 2;
        let mid_key: KeyBuf = parent_ref.key_at(mid);

        let rnode_ptr: *mut Internode = Box::into_raw(Internode::new(parent_ref.height()));
        // SAFETY: freshly allocated above.
        let rnode_ref: &Internode = unsafe { &*rnode_ptr };

        for (j, i) in (mid + 1..n).enumerate() {
            let moved: KeyBuf = parent_ref.key_at(i);
            rnode_ref.write_key(j, &moved);
        }

        for (j, i) in (mid + 1..=n).enumerate() {
            let child: *mut u8 = parent_ref.child_at(i);
            rnode_ref.set_child(j, child);
            unsafe { set_node_parent(child, parent_ref.height() - 1, rnode_ptr) };
        }

        rnode_ref.set_nkeys(n - mid - 1);
        rnode_ref
            .parent
            .store(parent_ref.parent.load(Ordering::Acquire), Ordering::Release);

        // Shrink the left half. Keys >= mid_key reaching it through stale
        // routers recover via the leaf chain.
        parent_ref.set_nkeys(mid);

        drop(guard);

        let target: *mut Internode = if split_key < mid_key { parent } else { rnode_ptr };
        {
            // SAFETY: both candidates are live.
            let target_ref: &Internode = unsafe { &*target };
            let mut guard: LockGuard<'_> = target_ref.version.lock();
            guard.mark_insert();
            target_ref.insert_router(&split_key, right);
            unsafe { set_node_parent(right, level, target) };
            drop(guard);
        }

        unsafe {
            self.insert_router_above(parent.cast::<u8>(), rnode_ptr.cast::<u8>(), mid_key, parent_ref.height());
        }
    }

    // ========================================================================
    //  Scan
    // ========================================================================

    /// Ordered traversal from `origin`.
    ///
    /// Forward scans visit keys `>= origin` in ascending order; reverse
    /// scans visit keys `<= origin` in descending order. Each visited leaf
    /// is snapshotted under version validation and reported to `visit_leaf`
    /// (leaf, stable version) before any of its values; `visit_leaf`
    /// returning false fails the scan. Termination and range bounds beyond
    /// `origin` are the value callback's business.
    ///
    /// Returns true unless a callback failed.
    pub fn scan<NF, VF>(
        &self,
        origin: &KeyBuf,
        reverse: bool,
        mut visit_leaf: NF,
        mut visit_value: VF,
    ) -> bool
    where
        NF: FnMut(*mut LeafNode, u32) -> bool,
        VF: FnMut(&KeyBuf, usize) -> ScanVisit,
    {
        let mut leaf: *mut LeafNode = self.reach_leaf(origin);
        let mut first: bool = true;

        loop {
            // SAFETY: see reach_leaf.
            let leaf_ref: &LeafNode = unsafe { &*leaf };

            let mut entries: [(KeyBuf, usize); WIDTH] = [(KeyBuf::new(), 0); WIDTH];
            let mut count: usize;
            let mut link: *mut LeafNode;
            let mut v: u32;

            // Snapshot the leaf and its chain link consistently.
            loop {
                v = leaf_ref.version.stable();
                let perm: Permuter = leaf_ref.permutation();
                count = perm.size();

                for pos in 0..count {
                    let slot: usize = perm.get(pos);
                    entries[pos] = (leaf_ref.key_at(slot), leaf_ref.value_at(slot));
                }

                link = if reverse {
                    self.ordered_prev(leaf)
                } else {
                    leaf_ref.next_leaf()
                };

                if !leaf_ref.version.has_changed(v) {
                    break;
                }
            }

            if !visit_leaf(leaf, v) {
                return false;
            }

            let in_range = |k: &KeyBuf| -> bool {
                if !first {
                    return true;
                }

                if reverse { *k <= *origin } else { *k >= *origin }
            };

            let positions: Box<dyn Iterator<Item = usize>> = if reverse {
                Box::new((0..count).rev())
            } else {
                Box::new(0..count)
            };

            for pos in positions {
                let (k, value) = entries[pos];

                if !in_range(&k) {
                    continue;
                }

                match visit_value(&k, value) {
                    ScanVisit::Continue => {}
                    ScanVisit::Stop => return true,
                    ScanVisit::Fail => return false,
                }
            }

            if link.is_null() {
                return true;
            }

            leaf = link;
            first = false;
        }
    }

    /// The leaf directly preceding `leaf` in key order.
    ///
    /// `prev` pointers can lag a concurrent split (the new sibling sits
    /// between `prev` and its old successor), so walk `next` links from the
    /// stale predecessor until they meet `leaf`.
    fn ordered_prev(&self, leaf: *mut LeafNode) -> *mut LeafNode {
        'outer: loop {
            // SAFETY: see reach_leaf.
            let start: *mut LeafNode = unsafe { &*leaf }.prev_leaf();

            if start.is_null() {
                return std::ptr::null_mut();
            }

            let mut cur: *mut LeafNode = start;

            loop {
                let next: *mut LeafNode = unsafe { &*cur }.next_leaf();

                if next == leaf {
                    return cur;
                }

                if next.is_null() {
                    continue 'outer;
                }

                cur = next;
            }
        }
    }

    // ========================================================================
    //  Teardown
    // ========================================================================

    /// Visit every stored value word. Exclusive access; used by the owning
    /// index to free its records before the nodes go away.
    pub fn drain_values(&mut self, mut f: impl FnMut(usize)) {
        let mut leaf: *mut LeafNode = self.first_leaf();

        while !leaf.is_null() {
            // SAFETY: exclusive access via &mut self.
            let leaf_ref: &LeafNode = unsafe { &*leaf };
            let perm: Permuter = leaf_ref.permutation();

            for pos in 0..perm.size() {
                f(leaf_ref.value_at(perm.get(pos)));
            }

            leaf = leaf_ref.next_leaf();
        }
    }

    fn first_leaf(&self) -> *mut LeafNode {
        let mut raw: usize = self.root.load(Ordering::Acquire);

        loop {
            match decode(raw) {
                NodeRef::Leaf(leaf) => return leaf,

                NodeRef::Inter(node) => {
                    // SAFETY: see reach_leaf.
                    let node_ref: &Internode = unsafe { &*node };
                    let child: *mut u8 = node_ref.child_at(0);

                    raw = if node_ref.height() == 1 {
                        encode_leaf(child.cast())
                    } else {
                        encode_inter(child.cast())
                    };
                }
            }
        }
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        // SAFETY: &mut self gives exclusive access; every node is reachable
        // from the root exactly once through child pointers.
        unsafe { free_subtree(self.root.load(Ordering::Relaxed)) };
    }
}

/// Helpers to read/write the parent pointer of a node erased to `*mut u8`.
///
/// # Safety
///
/// `node` must point to a live leaf (`level == 0`) or internode.
unsafe fn node_parent(node: *mut u8, level: u32) -> *mut Internode {
    unsafe {
        if level == 0 {
            (*node.cast::<LeafNode>()).parent.load(Ordering::Acquire)
        } else {
            (*node.cast::<Internode>()).parent.load(Ordering::Acquire)
        }
    }
}

/// See [`node_parent`].
unsafe fn set_node_parent(node: *mut u8, level: u32, parent: *mut Internode) {
    unsafe {
        if level == 0 {
            (*node.cast::<LeafNode>()).parent.store(parent, Ordering::Release);
        } else {
            (*node.cast::<Internode>()).parent.store(parent, Ordering::Release);
        }
    }
}

unsafe fn free_subtree(raw: usize) {
    match decode(raw) {
        NodeRef::Leaf(leaf) => {
            // SAFETY: caller guarantees exclusive access and single visit.
            drop(unsafe { Box::from_raw(leaf) });
        }

        NodeRef::Inter(node) => {
            // SAFETY: as above.
            let node: Box<Internode> = unsafe { Box::from_raw(node) };

            for i in 0..=node.nkeys() {
                let child: *mut u8 = node.child_at(i);

                let child_raw: usize = if node.height() == 1 {
                    encode_leaf(child.cast())
                } else {
                    encode_inter(child.cast())
                };

                // SAFETY: children are distinct live subtrees.
                unsafe { free_subtree(child_raw) };
            }
        }
    }
}

// ============================================================================
//  InsertCursor
// ============================================================================

/// Version transition published by a finished locking cursor.
///
/// `prev_version` is what an absence proof taken before the modification
/// observed; `next_version` is what the leaf reports afterwards. The
/// ordered index uses the pair to patch its own observation.
#[derive(Debug, Clone, Copy)]
pub struct FinishMark {
    /// The modified leaf.
    pub node: *mut LeafNode,

    /// Stable version before the modification.
    pub prev_version: u32,

    /// Stable version after the modification.
    pub next_version: u32,
}

/// A locking cursor positioned on a key's slot.
///
/// Holds the leaf's version lock until [`finish`](Self::finish) (or drop,
/// which abandons a staged slot without publishing it).
pub struct InsertCursor<'a> {
    leaf: *mut LeafNode,
    guard: Option<LockGuard<'a>>,
    found: bool,
    slot: usize,
    pos: usize,
}

impl InsertCursor<'_> {
    /// Whether the key was already present.
    #[inline]
    #[must_use]
    pub fn found(&self) -> bool {
        self.found
    }

    /// The value word in the cursor's slot.
    #[inline]
    #[must_use]
    pub fn value(&self) -> usize {
        // SAFETY: the leaf is live and we hold its lock.
        unsafe { &*self.leaf }.value_at(self.slot)
    }

    /// Store a value word into the cursor's slot.
    #[inline]
    pub fn set_value(&mut self, value: usize) {
        // SAFETY: the leaf is live and we hold its lock.
        unsafe { &*self.leaf }.set_value(self.slot, value);
    }

    /// Publish the staged structural change and release the lock.
    ///
    /// `delta` is 1 when a new slot was filled (the permutation gains it
    /// and the leaf's insert counter bumps), 0 when nothing structural
    /// happened.
    pub fn finish(mut self, delta: i32) -> FinishMark {
        let mut guard: LockGuard<'_> = self.guard.take().expect("cursor finished twice");
        // SAFETY: the leaf is live and we hold its lock.
        let leaf_ref: &LeafNode = unsafe { &*self.leaf };

        let prev_version: u32 = guard.pre_lock_value();

        if delta > 0 {
            debug_assert!(!self.found, "delta 1 on an existing key");

            guard.mark_insert();

            let mut p: Permuter = leaf_ref.permutation();
            let slot: usize = p.insert_from_back(self.pos);
            debug_assert_eq!(slot, self.slot);
            leaf_ref.set_permutation(p);
        }

        let next_version: u32 = guard.post_unlock_value();
        let node: *mut LeafNode = self.leaf;

        drop(guard);

        FinishMark {
            node,
            prev_version,
            next_version,
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
