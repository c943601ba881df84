//! Property-based tests for the version words, key encoding, and the
//! reclamation set.

use proptest::prelude::*;

use occtable::key::{IndexKey, KeyBuf, MAX_KEY_LEN};
use occtable::rcu::RcuSet;
use occtable::tree::NodeVersion;
use occtable::version::{
    self, NonopaqueVersion, OpaqueVersion, RowVersion, TID_INCREMENT,
};

// ============================================================================
//  Strategies
// ============================================================================

/// Unlocked version values with arbitrary flags and a bounded timestamp.
fn clean_word() -> impl Strategy<Value = u64> {
    (any::<bool>(), any::<bool>(), 0_u64..1_000_000).prop_map(|(nonopaque, invalid, ts)| {
        let mut v: u64 = ts * TID_INCREMENT;

        if nonopaque {
            v |= version::NONOPAQUE_BIT;
        }

        if invalid {
            v |= version::INVALID_BIT;
        }

        v
    })
}

proptest! {
    // ========================================================================
    //  Row version words
    // ========================================================================

    #[test]
    fn check_version_is_reflexive(word in clean_word()) {
        let v = OpaqueVersion::new(word);
        let sample: u64 = v.sample();

        prop_assert!(v.check_version(sample, false));
    }

    #[test]
    fn lock_cycle_preserves_observations(word in clean_word()) {
        let v = NonopaqueVersion::new(word);
        let sample: u64 = v.sample();

        v.lock();
        prop_assert!(!v.check_version(sample, false));
        prop_assert!(v.check_version(sample, true));
        v.unlock();

        prop_assert!(v.check_version(sample, false));
    }

    #[test]
    fn install_always_invalidates(word in clean_word(), tid in 1_u64..1_000_000) {
        let v = OpaqueVersion::new(word);
        let sample: u64 = v.sample();
        let commit_tid: u64 = (1_000_000 + tid) * TID_INCREMENT;

        v.lock();
        v.set_version_locked(v.install_value(commit_tid));
        v.unlock();

        prop_assert!(!v.check_version(sample, false));
        prop_assert!(!version::is_invalid(v.value()));
        prop_assert!(!version::is_locked(v.value()));
    }

    #[test]
    fn nonopaque_install_ignores_commit_tid(word in clean_word(), tid in 1_u64..1_000_000) {
        let v = NonopaqueVersion::new(word);
        let before: u64 = version::timestamp(v.value());

        v.lock();
        v.set_version_locked(v.install_value(tid * TID_INCREMENT));
        v.unlock();

        prop_assert_eq!(version::timestamp(v.value()), before + TID_INCREMENT);
        prop_assert!(version::is_nonopaque(v.value()));
    }

    // ========================================================================
    //  Key encoding
    // ========================================================================

    #[test]
    fn keybuf_roundtrips_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..=MAX_KEY_LEN)) {
        let k = KeyBuf::from_bytes(&bytes);

        prop_assert_eq!(k.as_bytes(), &bytes[..]);
        prop_assert_eq!(KeyBuf::from_slices(k.slices(), k.len()), k);
    }

    #[test]
    fn keybuf_order_matches_byte_order(
        a in proptest::collection::vec(any::<u8>(), 0..=MAX_KEY_LEN),
        b in proptest::collection::vec(any::<u8>(), 0..=MAX_KEY_LEN),
    ) {
        let ka = KeyBuf::from_bytes(&a);
        let kb = KeyBuf::from_bytes(&b);

        prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
    }

    #[test]
    fn u64_encoding_is_order_preserving(a in any::<u64>(), b in any::<u64>()) {
        prop_assert_eq!(a.encode().cmp(&b.encode()), a.cmp(&b));
    }

    #[test]
    fn composite_encoding_is_order_preserving(
        a in any::<(u64, u64)>(),
        b in any::<(u64, u64)>(),
    ) {
        prop_assert_eq!(a.encode().cmp(&b.encode()), a.cmp(&b));
    }

    // ========================================================================
    //  Node version words
    // ========================================================================

    #[test]
    fn node_version_changes_iff_marked(ops in proptest::collection::vec(any::<bool>(), 1..20)) {
        let v = NodeVersion::new();
        let mut expect_changed: bool = false;
        let before: u32 = v.stable();

        for mark in ops {
            let mut guard = v.lock();

            if mark {
                guard.mark_insert();
                expect_changed = true;
            } else {
                // Lock cycles without marks leave the version alone.
                let _ = guard.locked_value();
            }
        }

        prop_assert_eq!(v.has_changed(before), expect_changed);
    }

    #[test]
    fn node_split_implies_change(splits in 1_u32..10) {
        let v = NodeVersion::new();
        let before: u32 = v.stable();

        for _ in 0..splits {
            let mut guard = v.lock();
            guard.mark_split();
            drop(guard);
        }

        prop_assert!(v.has_changed(before));
        prop_assert!(v.has_split(before));
    }

    // ========================================================================
    //  Reclamation set
    // ========================================================================

    #[test]
    fn rcu_frees_exactly_below_the_bound(
        epochs in proptest::collection::vec(1_u64..20, 1..200),
        bound in 1_u64..25,
    ) {
        let mut sorted: Vec<u64> = epochs.clone();
        sorted.sort_unstable();

        unsafe fn noop(_p: *mut u8) {}

        let mut set = RcuSet::new();

        for &e in &sorted {
            // SAFETY: the callback is a no-op and the argument is never
            // dereferenced.
            unsafe { set.add(e, noop, std::ptr::null_mut()) };
        }

        set.clean_until(bound);

        let kept: usize = sorted.iter().filter(|&&e| e >= bound).count();
        prop_assert_eq!(set.pending(), kept);

        set.clean_until(u64::MAX);
        prop_assert_eq!(set.pending(), 0);
    }
}
