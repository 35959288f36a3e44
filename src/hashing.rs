//! Pluggable hash and key-equality functions.
//!
//! Both are called without any lock held and from many threads at once, so
//! implementations must be pure: the same key must always produce the same
//! hash, and equality must not depend on anything but its two arguments.

use core::hash::BuildHasher;
use core::hash::Hash;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Hash builder used when no hash function is supplied.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else {
        /// Hash builder used when no hash function is supplied.
        pub type DefaultHashBuilder = std::hash::RandomState;
    }
}

/// Maps a key to a 64-bit hash.
///
/// The high bits select the segment and the low bits select the base bucket,
/// so both ends of the hash should be well mixed.
///
/// Any `Fn(&K) -> u64` is a `KeyHasher<K>`:
///
/// ```rust
/// use chop_hash::KeyHasher;
///
/// let identity = |k: &u64| *k;
/// assert_eq!(identity.hash_key(&42), 42);
/// ```
pub trait KeyHasher<K: ?Sized> {
    /// Computes the hash of `key`.
    fn hash_key(&self, key: &K) -> u64;
}

impl<K: ?Sized, F> KeyHasher<K> for F
where
    F: Fn(&K) -> u64,
{
    #[inline(always)]
    fn hash_key(&self, key: &K) -> u64 {
        self(key)
    }
}

/// Decides whether two keys are the same key.
///
/// Any `Fn(&K, &K) -> bool` is a `KeyEquivalent<K>`.
pub trait KeyEquivalent<K: ?Sized> {
    /// Returns `true` when `stored` and `probe` denote the same key.
    fn equivalent(&self, stored: &K, probe: &K) -> bool;
}

impl<K: ?Sized, F> KeyEquivalent<K> for F
where
    F: Fn(&K, &K) -> bool,
{
    #[inline(always)]
    fn equivalent(&self, stored: &K, probe: &K) -> bool {
        self(stored, probe)
    }
}

/// Adapts a [`BuildHasher`] into a [`KeyHasher`] for any `K: Hash`.
#[derive(Debug, Clone, Default)]
pub struct BuildKeyHasher<S>(pub S);

impl<K, S> KeyHasher<K> for BuildKeyHasher<S>
where
    K: Hash + ?Sized,
    S: BuildHasher,
{
    #[inline]
    fn hash_key(&self, key: &K) -> u64 {
        self.0.hash_one(key)
    }
}

/// Key equality through [`Eq`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyEq;

impl<K: Eq + ?Sized> KeyEquivalent<K> for KeyEq {
    #[inline]
    fn equivalent(&self, stored: &K, probe: &K) -> bool {
        stored == probe
    }
}

#[cfg(test)]
mod tests {
    use core::hash::Hasher;

    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Default)]
    struct SipState;

    impl BuildHasher for SipState {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(7, 11)
        }
    }

    #[test]
    fn build_key_hasher_is_deterministic() {
        let hasher = BuildKeyHasher(SipState);
        let a = hasher.hash_key("John Doe");
        let b = hasher.hash_key("John Doe");
        assert_eq!(a, b);
        assert_ne!(a, hasher.hash_key("Ola Normann"));

        let mut manual = SipHasher::new_with_keys(7, 11);
        "John Doe".hash(&mut manual);
        assert_eq!(a, manual.finish());
    }

    #[test]
    fn closures_are_hashers_and_comparators() {
        let len_hash = |s: &str| s.len() as u64;
        assert_eq!(len_hash.hash_key("abc"), 3);

        let case_insensitive = |a: &str, b: &str| a.eq_ignore_ascii_case(b);
        assert!(case_insensitive.equivalent("Foo", "fOO"));
        assert!(!KeyEq.equivalent("Foo", "fOO"));
    }

    #[test]
    fn default_builder_hashes_consistently() {
        let hasher = BuildKeyHasher(DefaultHashBuilder::default());
        assert_eq!(hasher.hash_key(&17u64), hasher.hash_key(&17u64));
    }
}
