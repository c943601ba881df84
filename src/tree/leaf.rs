//! Filepath: src/tree/leaf.rs
//!
//! Leaf nodes.
//!
//! A leaf holds up to [`WIDTH`] key/value entries. Keys live as big-endian
//! slices in atomic cells, values as machine words; the logical order is
//! the leaf's [`Permuter`] word. Writers hold the leaf's version lock,
//! prepare free slots invisibly, and publish with one permutation store;
//! readers validate their version sample afterwards, so every load here is
//! an atomic with no torn-read hazard.
//!
//! Leaves form a doubly linked chain in key order. Each leaf carries an
//! immutable **lower bound**: every key stored in the leaf is `>= low`, and
//! `< next.low` whenever a right sibling exists. Readers that raced a split
//! restore themselves by walking `next` while their key is `>= next.low`.

use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::key::{KEY_SLICES, KeyBuf};

use super::internode::Internode;
use super::nodeversion::NodeVersion;
use super::permuter::{Permuter, WIDTH};

// ============================================================================
//  LeafNode
// ============================================================================

/// A leaf of the ordered trie.
pub struct LeafNode {
    /// OCC version word; doubles as the leaf's phantom guard.
    pub(crate) version: NodeVersion,

    /// Logical slot order ([`Permuter`] encoding).
    perm: AtomicU64,

    /// Key slices per slot.
    ikey: [[AtomicU64; KEY_SLICES]; WIDTH],

    /// Key lengths per slot.
    klen: [AtomicU32; WIDTH],

    /// Value words per slot.
    value: [AtomicUsize; WIDTH],

    /// Lower bound of this leaf's key range. Immutable after creation.
    low: KeyBuf,

    /// Right sibling in key order.
    next: AtomicPtr<LeafNode>,

    /// Left sibling in key order.
    prev: AtomicPtr<LeafNode>,

    /// Parent internode; null while the leaf is the root.
    pub(crate) parent: AtomicPtr<Internode>,
}

impl LeafNode {
    /// Allocate an empty leaf with the given lower bound.
    #[must_use]
    pub(crate) fn new(low: KeyBuf) -> Box<Self> {
        Box::new(Self {
            version: NodeVersion::new(),
            perm: AtomicU64::new(Permuter::empty().value()),
            ikey: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            klen: std::array::from_fn(|_| AtomicU32::new(0)),
            value: std::array::from_fn(|_| AtomicUsize::new(0)),
            low,
            next: AtomicPtr::new(std::ptr::null_mut()),
            prev: AtomicPtr::new(std::ptr::null_mut()),
            parent: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    /// The leaf's lower bound.
    #[inline]
    pub(crate) fn low_key(&self) -> &KeyBuf {
        &self.low
    }

    /// Revalidate a previously sampled stable version.
    #[inline]
    #[must_use]
    pub fn version_has_changed(&self, prev: u32) -> bool {
        self.version.has_changed(prev)
    }

    /// Load the permutation word.
    #[inline]
    pub(crate) fn permutation(&self) -> Permuter {
        Permuter::from_value(self.perm.load(Ordering::Acquire))
    }

    /// Publish a new permutation. Requires the version lock.
    #[inline]
    pub(crate) fn set_permutation(&self, p: Permuter) {
        self.perm.store(p.value(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn next_leaf(&self) -> *mut LeafNode {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: *mut LeafNode) {
        self.next.store(next, Ordering::Release);
    }

    #[inline]
    pub(crate) fn prev_leaf(&self) -> *mut LeafNode {
        self.prev.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: *mut LeafNode) {
        self.prev.store(prev, Ordering::Release);
    }

    /// Reassemble the key stored in `slot`.
    #[inline]
    pub(crate) fn key_at(&self, slot: usize) -> KeyBuf {
        let slices: [u64; KEY_SLICES] =
            std::array::from_fn(|i| self.ikey[slot][i].load(Ordering::Acquire));
        let len: usize = self.klen[slot].load(Ordering::Acquire) as usize;

        KeyBuf::from_slices(slices, len)
    }

    /// The value word stored in `slot`.
    #[inline]
    pub(crate) fn value_at(&self, slot: usize) -> usize {
        self.value[slot].load(Ordering::Acquire)
    }

    /// Store a value word. Requires the version lock for published slots.
    #[inline]
    pub(crate) fn set_value(&self, slot: usize, value: usize) {
        self.value[slot].store(value, Ordering::Release);
    }

    /// Write a key into a free slot. Requires the version lock; the slot
    /// becomes visible when a permutation containing it is published.
    pub(crate) fn write_key(&self, slot: usize, key: &KeyBuf) {
        let slices: [u64; KEY_SLICES] = key.slices();

        for (i, s) in slices.iter().enumerate() {
            self.ikey[slot][i].store(*s, Ordering::Release);
        }

        self.klen[slot].store(key.len() as u32, Ordering::Release);
    }

    /// Copy the entry in `slot` of `src` into `slot_dst` of `self`.
    pub(crate) fn copy_entry_from(&self, slot_dst: usize, src: &LeafNode, slot_src: usize) {
        let key: KeyBuf = src.key_at(slot_src);

        self.write_key(slot_dst, &key);
        self.set_value(slot_dst, src.value_at(slot_src));
    }

    /// Search the leaf under permutation `perm`.
    ///
    /// `Ok(pos)` is the logical position of the key; `Err(pos)` is where it
    /// would be inserted.
    pub(crate) fn search(&self, key: &KeyBuf, perm: Permuter) -> Result<usize, usize> {
        for pos in 0..perm.size() {
            let stored: KeyBuf = self.key_at(perm.get(pos));

            match stored.cmp(key) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => return Ok(pos),
                std::cmp::Ordering::Greater => return Err(pos),
            }
        }

        Err(perm.size())
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(keys: &[&[u8]]) -> Box<LeafNode> {
        let leaf: Box<LeafNode> = LeafNode::new(KeyBuf::new());
        let mut perm: Permuter = leaf.permutation();

        for (i, k) in keys.iter().enumerate() {
            let key = KeyBuf::from_bytes(k);
            let pos: usize = leaf.search(&key, perm).expect_err("fresh key");
            let slot: usize = perm.insert_from_back(pos);

            leaf.write_key(slot, &key);
            leaf.set_value(slot, i + 100);
        }

        leaf.set_permutation(perm);
        leaf
    }

    #[test]
    fn test_search_hit_and_miss() {
        let leaf = leaf_with(&[b"bb", b"dd", b"ff"]);
        let perm: Permuter = leaf.permutation();

        assert_eq!(leaf.search(&KeyBuf::from_bytes(b"bb"), perm), Ok(0));
        assert_eq!(leaf.search(&KeyBuf::from_bytes(b"dd"), perm), Ok(1));
        assert_eq!(leaf.search(&KeyBuf::from_bytes(b"ff"), perm), Ok(2));

        assert_eq!(leaf.search(&KeyBuf::from_bytes(b"aa"), perm), Err(0));
        assert_eq!(leaf.search(&KeyBuf::from_bytes(b"cc"), perm), Err(1));
        assert_eq!(leaf.search(&KeyBuf::from_bytes(b"zz"), perm), Err(3));
    }

    #[test]
    fn test_entries_come_back_in_key_order() {
        let leaf = leaf_with(&[b"m", b"c", b"x", b"a"]);
        let perm: Permuter = leaf.permutation();

        let keys: Vec<KeyBuf> = (0..perm.size())
            .map(|pos| leaf.key_at(perm.get(pos)))
            .collect();

        let mut sorted: Vec<KeyBuf> = keys.clone();
        sorted.sort();

        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_values_follow_their_keys() {
        let leaf = leaf_with(&[b"b", b"a"]);
        let perm: Permuter = leaf.permutation();

        // "a" was inserted second (value 101) but sorts first.
        assert_eq!(leaf.value_at(perm.get(0)), 101);
        assert_eq!(leaf.value_at(perm.get(1)), 100);
    }

    #[test]
    fn test_unpublished_slot_is_invisible() {
        let leaf = leaf_with(&[b"a"]);
        let perm: Permuter = leaf.permutation();

        // Write a key without publishing a permutation containing it.
        let free: usize = perm.back();
        leaf.write_key(free, &KeyBuf::from_bytes(b"zz"));

        assert!(leaf.search(&KeyBuf::from_bytes(b"zz"), leaf.permutation()).is_err());
    }
}
