//! Ordering capabilities injected into the skiplist, memtable and block reader.

use std::cmp::Ordering;

/// A total order over keys of type `K`.
///
/// Implementations must be consistent: equivalence (`Equal`) is treated as
/// key identity by the skiplist, which never stores two equivalent keys.
pub trait Comparator<K: ?Sized>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

impl<K, F> Comparator<K> for F
where
    K: ?Sized,
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}

/// Orders keys by their `Ord` implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Lexicographic byte order, the default for user keys and blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytewiseComparator;

impl Comparator<[u8]> for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
