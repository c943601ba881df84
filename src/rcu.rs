//! Filepath: src/rcu.rs
//!
//! Epoch-bucketed deferred reclamation.
//!
//! An [`RcuSet`] is a single-thread-owned list of deferred free callbacks,
//! bucketed by the epoch at which the unlink was committed. A record handed
//! to the set remains dereferenceable by concurrent optimistic readers until
//! the set is cleaned past that epoch.
//!
//! # Layout
//!
//! Entries live in fixed-capacity **groups**. Within a group, runs of
//! entries sharing an epoch are delimited by a sentinel slot carrying the
//! epoch of the run that follows, so the common case (many retirements per
//! epoch) costs one extra slot per epoch rather than one per entry. Drained
//! groups are recycled through a small pool.
//!
//! # Contract
//!
//! A caller handing `arg` to [`RcuSet::add`] at epoch `e` guarantees that no
//! reader starting at an epoch `> e` can reach `arg`. [`RcuSet::clean_until`]
//! then frees everything retired strictly before its argument; calls with an
//! unchanged epoch are no-ops. Dropping the set runs every pending callback
//! unconditionally.

use std::collections::VecDeque;

use crate::trace::trace_log;

/// Reclamation epoch counter type.
pub type Epoch = u64;

/// A deferred free routine.
///
/// Invoked exactly once with the argument it was enqueued with.
pub type RcuCallback = unsafe fn(*mut u8);

/// Slots per group. Two slots (epoch sentinel + entry) must always fit.
const GROUP_CAPACITY: usize = 1024;

/// Drained groups kept for reuse.
const POOL_LIMIT: usize = 2;

// ============================================================================
//  RcuGroup
// ============================================================================

/// One slot of a group: either an epoch sentinel opening a run, or a
/// pending callback.
#[derive(Clone, Copy)]
enum RcuSlot {
    /// Entries that follow (until the next sentinel) were retired at this
    /// epoch.
    Epoch(Epoch),

    /// A pending free.
    Pending(RcuCallback, *mut u8),
}

/// A fixed-capacity run of reclamation slots.
struct RcuGroup {
    /// Index of the first slot not yet cleaned.
    head: usize,

    /// Appended slots; never exceeds [`GROUP_CAPACITY`].
    slots: Vec<RcuSlot>,

    /// Epoch of the most recently appended run.
    epoch: Epoch,
}

impl RcuGroup {
    fn new() -> Self {
        Self {
            head: 0,
            slots: Vec::with_capacity(GROUP_CAPACITY),
            epoch: 0,
        }
    }

    /// True if an epoch-plus-entry pair no longer fits.
    #[inline]
    fn is_full(&self) -> bool {
        self.slots.len() + 2 > GROUP_CAPACITY
    }

    /// True if every slot has been cleaned.
    #[inline]
    fn is_drained(&self) -> bool {
        self.head == self.slots.len()
    }

    fn push(&mut self, epoch: Epoch, function: RcuCallback, argument: *mut u8) {
        debug_assert!(!self.is_full());

        if self.slots.is_empty() || self.epoch != epoch {
            self.slots.push(RcuSlot::Epoch(epoch));
            self.epoch = epoch;
        }

        self.slots.push(RcuSlot::Pending(function, argument));
    }

    /// Run callbacks retired strictly before `max_epoch`.
    ///
    /// Returns true if the group was fully drained.
    fn clean_until(&mut self, max_epoch: Epoch) -> bool {
        while self.head < self.slots.len() {
            match self.slots[self.head] {
                RcuSlot::Epoch(epoch) => {
                    if epoch >= max_epoch {
                        return false;
                    }
                }

                RcuSlot::Pending(function, argument) => {
                    // SAFETY: the enqueuer guaranteed `argument` stays valid
                    // until its epoch is cleaned, and each slot is visited
                    // exactly once (head only advances).
                    unsafe { function(argument) };
                }
            }

            self.head += 1;
        }

        true
    }

    fn reset(&mut self) {
        self.head = 0;
        self.slots.clear();
        self.epoch = 0;
    }
}

impl Drop for RcuGroup {
    fn drop(&mut self) {
        // Unconditional flush: the owning thread is going away, so nothing
        // can still observe the retired pointers.
        while self.head < self.slots.len() {
            if let RcuSlot::Pending(function, argument) = self.slots[self.head] {
                // SAFETY: same single-invocation argument as in clean_until.
                unsafe { function(argument) };
            }

            self.head += 1;
        }
    }
}

// ============================================================================
//  RcuSet
// ============================================================================

/// A per-thread deferred-free list bucketed by epoch.
///
/// Strictly single-owner: records unlinked by a transaction are enqueued on
/// the transaction's home-thread set, and callbacks run on that thread.
///
/// # Example
///
/// ```rust
/// use occtable::rcu::RcuSet;
///
/// unsafe fn free_box(p: *mut u8) {
///     drop(unsafe { Box::from_raw(p.cast::<u64>()) });
/// }
///
/// let mut set = RcuSet::new();
/// let p = Box::into_raw(Box::new(7_u64)).cast::<u8>();
///
/// // SAFETY: `p` is unreachable by any reader.
/// unsafe { set.add(3, free_box, p) };
///
/// set.clean_until(3); // epoch 3 is not < 3: nothing freed yet
/// set.clean_until(4); // frees the box
/// ```
pub struct RcuSet {
    /// Oldest group at the front; appends go to the back.
    groups: VecDeque<RcuGroup>,

    /// Drained groups ready for reuse.
    pool: Vec<RcuGroup>,

    /// High-water mark of the last clean.
    clean_epoch: Epoch,
}

// SAFETY: the set is single-owner by contract; the raw arguments it stores
// are unreachable from anywhere else, so moving the set between threads
// moves sole ownership of them.
unsafe impl Send for RcuSet {}

impl Default for RcuSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RcuSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: VecDeque::new(),
            pool: Vec::new(),
            clean_epoch: 0,
        }
    }

    /// The epoch most recently passed to [`clean_until`](Self::clean_until).
    #[inline]
    #[must_use]
    pub fn clean_epoch(&self) -> Epoch {
        self.clean_epoch
    }

    /// Number of pending callbacks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.groups
            .iter()
            .map(|g| {
                g.slots[g.head..]
                    .iter()
                    .filter(|s| matches!(s, RcuSlot::Pending(..)))
                    .count()
            })
            .sum()
    }

    /// Enqueue a deferred free for the given epoch.
    ///
    /// Epochs must be passed in non-decreasing order.
    ///
    /// # Safety
    ///
    /// `argument` must remain valid until its callback runs, the callback
    /// must be safe to invoke with it exactly once on the owning thread, and
    /// no reader starting at an epoch greater than `epoch` may reach it.
    pub unsafe fn add(&mut self, epoch: Epoch, function: RcuCallback, argument: *mut u8) {
        if self.groups.back().is_none_or(RcuGroup::is_full) {
            self.grow();
        }

        // The group is never full here, so the entry (and its sentinel, if
        // the epoch changed) always fits.
        self.groups
            .back_mut()
            .expect("grow() pushed a group")
            .push(epoch, function, argument);
    }

    /// Run every callback retired at an epoch strictly less than `max_epoch`.
    ///
    /// A call with the same `max_epoch` as the previous one is a no-op.
    pub fn clean_until(&mut self, max_epoch: Epoch) {
        if self.clean_epoch == max_epoch {
            return;
        }

        self.hard_clean_until(max_epoch);
        self.clean_epoch = max_epoch;
    }

    fn hard_clean_until(&mut self, max_epoch: Epoch) {
        trace_log!(max_epoch, "rcu clean");

        while let Some(front) = self.groups.front_mut() {
            if !front.clean_until(max_epoch) {
                return;
            }

            let mut drained: RcuGroup = self
                .groups
                .pop_front()
                .expect("front_mut() saw a group");

            if self.pool.len() < POOL_LIMIT {
                drained.reset();
                self.pool.push(drained);
            }
        }
    }

    fn grow(&mut self) {
        let group: RcuGroup = self.pool.pop().unwrap_or_else(RcuGroup::new);

        debug_assert!(group.is_drained() && group.slots.is_empty());

        self.groups.push_back(group);
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static FREED: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
    }

    unsafe fn record_free(p: *mut u8) {
        let id: Box<u64> = unsafe { Box::from_raw(p.cast::<u64>()) };
        FREED.with(|f| f.borrow_mut().push(*id));
    }

    fn enqueue(set: &mut RcuSet, epoch: Epoch, id: u64) {
        let p: *mut u8 = Box::into_raw(Box::new(id)).cast();

        // SAFETY: the box is owned by the set from here on.
        unsafe { set.add(epoch, record_free, p) };
    }

    fn take_freed() -> Vec<u64> {
        FREED.with(|f| std::mem::take(&mut *f.borrow_mut()))
    }

    #[test]
    fn test_clean_is_exclusive_of_max_epoch() {
        let _ = take_freed();
        let mut set = RcuSet::new();

        enqueue(&mut set, 5, 1);
        set.clean_until(5);
        assert_eq!(take_freed(), Vec::<u64>::new());
        assert_eq!(set.pending(), 1);

        set.clean_until(6);
        assert_eq!(take_freed(), vec![1]);
        assert_eq!(set.pending(), 0);
    }

    #[test]
    fn test_epoch_runs_clean_in_order() {
        let _ = take_freed();
        let mut set = RcuSet::new();

        enqueue(&mut set, 1, 10);
        enqueue(&mut set, 1, 11);
        enqueue(&mut set, 2, 20);
        enqueue(&mut set, 3, 30);

        set.clean_until(3);
        assert_eq!(take_freed(), vec![10, 11, 20]);

        set.clean_until(4);
        assert_eq!(take_freed(), vec![30]);
    }

    #[test]
    fn test_repeated_clean_is_noop() {
        let _ = take_freed();
        let mut set = RcuSet::new();

        enqueue(&mut set, 1, 1);
        set.clean_until(2);
        assert_eq!(take_freed(), vec![1]);

        // Same max epoch again: nothing to do, nothing double-freed.
        set.clean_until(2);
        assert_eq!(take_freed(), Vec::<u64>::new());
        assert_eq!(set.clean_epoch(), 2);
    }

    #[test]
    fn test_growth_past_one_group() {
        let _ = take_freed();
        let mut set = RcuSet::new();
        let n: u64 = (GROUP_CAPACITY as u64) * 2;

        for i in 0..n {
            enqueue(&mut set, 1, i);
        }

        assert!(set.groups.len() > 1);

        set.clean_until(2);
        let freed: Vec<u64> = take_freed();

        assert_eq!(freed.len(), n as usize);
        assert_eq!(freed, (0..n).collect::<Vec<u64>>());
        assert!(set.groups.is_empty());
        assert!(!set.pool.is_empty());
    }

    #[test]
    fn test_drop_flushes_everything() {
        let _ = take_freed();

        {
            let mut set = RcuSet::new();
            enqueue(&mut set, 7, 70);
            enqueue(&mut set, 9, 90);
        }

        assert_eq!(take_freed(), vec![70, 90]);
    }

    #[test]
    fn test_partial_group_drain_resumes() {
        let _ = take_freed();
        let mut set = RcuSet::new();

        enqueue(&mut set, 1, 1);
        enqueue(&mut set, 5, 5);
        set.clean_until(3);
        assert_eq!(take_freed(), vec![1]);

        enqueue(&mut set, 6, 6);
        set.clean_until(7);
        assert_eq!(take_freed(), vec![5, 6]);
    }
}
