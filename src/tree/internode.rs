//! Filepath: src/tree/internode.rs
//!
//! Internal nodes.
//!
//! An internode holds up to [`WIDTH`] full-key routers and one more child
//! pointer than routers: child `i` covers keys in `[key[i-1], key[i])`,
//! with the first child covering everything below `key[0]` and the last
//! everything at or above the final router.
//!
//! Routers may lag behind leaf-level splits; descent tolerates that because
//! leaves repair the position through their B-link chain. All router and
//! child cells are atomics, so a reader racing a shift sees stale values,
//! never torn ones, and its version validation forces a retry.

use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::key::{KEY_SLICES, KeyBuf};

use super::nodeversion::NodeVersion;
use super::permuter::WIDTH;

// ============================================================================
//  Internode
// ============================================================================

/// An internal node of the ordered trie.
pub struct Internode {
    /// OCC version word.
    pub(crate) version: NodeVersion,

    /// Number of routers in use.
    nkeys: AtomicUsize,

    /// Router key slices.
    key: [[AtomicU64; KEY_SLICES]; WIDTH],

    /// Router key lengths.
    klen: [AtomicU32; WIDTH],

    /// Child pointers; `height == 1` children are leaves, otherwise
    /// internodes.
    child: [AtomicPtr<u8>; WIDTH + 1],

    /// Parent internode; null while this node is the root.
    pub(crate) parent: AtomicPtr<Internode>,

    /// Distance to the leaves: 1 means children are leaves.
    height: u32,
}

impl Internode {
    /// Allocate an internode at the given height.
    #[must_use]
    pub(crate) fn new(height: u32) -> Box<Self> {
        debug_assert!(height >= 1);

        Box::new(Self {
            version: NodeVersion::new(),
            nkeys: AtomicUsize::new(0),
            key: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            klen: std::array::from_fn(|_| AtomicU32::new(0)),
            child: std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut())),
            parent: AtomicPtr::new(std::ptr::null_mut()),
            height,
        })
    }

    #[inline]
    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub(crate) fn nkeys(&self) -> usize {
        self.nkeys.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_nkeys(&self, n: usize) {
        debug_assert!(n <= WIDTH);

        self.nkeys.store(n, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.nkeys() == WIDTH
    }

    /// Reassemble the router key at `idx`.
    #[inline]
    pub(crate) fn key_at(&self, idx: usize) -> KeyBuf {
        let slices: [u64; KEY_SLICES] =
            std::array::from_fn(|i| self.key[idx][i].load(Ordering::Acquire));
        let len: usize = self.klen[idx].load(Ordering::Acquire) as usize;

        KeyBuf::from_slices(slices, len)
    }

    /// Write the router key at `idx`. Requires the version lock.
    pub(crate) fn write_key(&self, idx: usize, key: &KeyBuf) {
        let slices: [u64; KEY_SLICES] = key.slices();

        for (i, s) in slices.iter().enumerate() {
            self.key[idx][i].store(*s, Ordering::Release);
        }

        self.klen[idx].store(key.len() as u32, Ordering::Release);
    }

    #[inline]
    pub(crate) fn child_at(&self, idx: usize) -> *mut u8 {
        self.child[idx].load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_child(&self, idx: usize, child: *mut u8) {
        self.child[idx].store(child, Ordering::Release);
    }

    /// The child to descend into for `key`, given a consistent `nkeys`
    /// sample.
    pub(crate) fn child_for(&self, key: &KeyBuf, nkeys: usize) -> *mut u8 {
        let mut idx: usize = 0;

        while idx < nkeys && self.key_at(idx) <= *key {
            idx += 1;
        }

        self.child_at(idx)
    }

    /// Insert a router and its right child. Requires the version lock with
    /// the inserting mark set, and a non-full node.
    pub(crate) fn insert_router(&self, key: &KeyBuf, right: *mut u8) {
        debug_assert!(self.version.is_locked());

        let n: usize = self.nkeys();

        debug_assert!(n < WIDTH);

        let mut idx: usize = 0;
        while idx < n && self.key_at(idx) <= *key {
            idx += 1;
        }

        // Shift top-down so a racing reader sees duplicates, not holes.
        let mut i: usize = n;
        while i > idx {
            let moved: KeyBuf = self.key_at(i - 1);
            self.write_key(i, &moved);
            self.set_child(i + 1, self.child_at(i));
            i -= 1;
        }

        self.write_key(idx, key);
        self.set_child(idx + 1, right);
        self.set_nkeys(n + 1);
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn k(bytes: &[u8]) -> KeyBuf {
        KeyBuf::from_bytes(bytes)
    }

    fn fake_child(tag: usize) -> *mut u8 {
        // Aligned sentinel pointers; never dereferenced.
        std::ptr::without_provenance_mut::<u8>(tag * 16)
    }

    fn node_with(routers: &[&[u8]]) -> Box<Internode> {
        let node: Box<Internode> = Internode::new(1);

        node.set_child(0, fake_child(1));

        let guard = node.version.lock();
        for (i, r) in routers.iter().enumerate() {
            node.insert_router(&k(r), fake_child(i + 2));
        }
        drop(guard);

        node
    }

    #[test]
    fn test_child_for_routes_by_range() {
        let node = node_with(&[b"g", b"p"]);
        let n: usize = node.nkeys();

        assert_eq!(node.child_for(&k(b"a"), n), fake_child(1));
        assert_eq!(node.child_for(&k(b"g"), n), fake_child(2));
        assert_eq!(node.child_for(&k(b"m"), n), fake_child(2));
        assert_eq!(node.child_for(&k(b"p"), n), fake_child(3));
        assert_eq!(node.child_for(&k(b"z"), n), fake_child(3));
    }

    #[test]
    fn test_insert_router_keeps_order() {
        let node = node_with(&[b"m", b"c", b"x"]);

        assert_eq!(node.nkeys(), 3);
        assert_eq!(node.key_at(0), k(b"c"));
        assert_eq!(node.key_at(1), k(b"m"));
        assert_eq!(node.key_at(2), k(b"x"));

        // Children follow their routers: "c" came second (fake 3),
        // so child index 1 must be fake 3.
        assert_eq!(node.child_at(1), fake_child(3));
        assert_eq!(node.child_at(2), fake_child(2));
        assert_eq!(node.child_at(3), fake_child(4));
    }
}
