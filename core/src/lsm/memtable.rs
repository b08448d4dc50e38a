//! In-memory sorted table for fast writes.
//!
//! Every write becomes one arena-backed byte string:
//!
//! ```text
//! entry := varstring(internal_key) varstring(value)
//! ```
//!
//! The entries live in a [`SkipListWriter`] ordered by their internal key, so
//! keys are ascending and, for the same key, newer entries (higher sequence
//! numbers) come first.

use std::cmp::Ordering;

use bytes::Bytes;
use tracing::trace;

use crate::coding::{get_length_prefixed_slice, put_length_prefixed_slice, put_varint32, varint32_len};
use crate::error::Result;

use super::arena::{Arena, DEFAULT_BLOCK_SIZE};
use super::comparator::{BytewiseComparator, Comparator};
use super::skiplist::{Cursor, SkipListReader, SkipListWriter};
use super::types::{
    InternalKeyComparator, LookupKey, ParsedInternalKey, SeqNum, TAG_LEN, ValueKind, append_internal_key,
};

/// Configuration for a memtable.
#[derive(Clone, Debug)]
pub struct MemTableConfig {
    /// Size of each arena block backing the entries.
    pub arena_block_size: usize,
    /// Seed for skiplist level generation. `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for MemTableConfig {
    fn default() -> Self {
        Self {
            arena_block_size: DEFAULT_BLOCK_SIZE,
            seed: None,
        }
    }
}

/// Orders memtable entries by the internal key at their head.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemTableKeyComparator<U = BytewiseComparator> {
    internal: InternalKeyComparator<U>,
}

impl<U: Comparator<[u8]>> MemTableKeyComparator<U> {
    pub fn new(internal: InternalKeyComparator<U>) -> Self {
        Self { internal }
    }
}

/// Internal key at the front of an encoded entry or lookup key.
fn entry_internal_key(entry: &[u8]) -> &[u8] {
    let mut input = entry;
    match get_length_prefixed_slice(&mut input) {
        Ok(key) => key,
        Err(_) => unreachable!("memtable entries are length prefixed when built"),
    }
}

impl<U: Comparator<[u8]>> Comparator<Bytes> for MemTableKeyComparator<U> {
    fn compare(&self, a: &Bytes, b: &Bytes) -> Ordering {
        self.internal.compare(entry_internal_key(a), entry_internal_key(b))
    }
}

/// Outcome of a point lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupResult {
    /// The newest visible version is a put.
    Value(Bytes),
    /// The newest visible version is a deletion marker.
    Deleted,
}

/// A decoded memtable entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemTableEntry {
    pub user_key: Bytes,
    pub sequence: SeqNum,
    pub kind: ValueKind,
    pub value: Bytes,
}

impl MemTableEntry {
    fn decode(entry: &Bytes) -> Result<Self> {
        let mut input: &[u8] = entry;
        let internal = get_length_prefixed_slice(&mut input)?;
        let parsed = ParsedInternalKey::parse(internal)?;
        let value = get_length_prefixed_slice(&mut input)?;
        Ok(Self {
            user_key: entry.slice_ref(parsed.user_key),
            sequence: parsed.sequence,
            kind: parsed.kind,
            value: entry.slice_ref(value),
        })
    }

    /// Returns true if this is a tombstone (delete marker).
    pub fn is_tombstone(&self) -> bool {
        self.kind == ValueKind::Deletion
    }
}

type Table<U> = SkipListReader<Bytes, MemTableKeyComparator<U>>;

/// The write side of a memtable. Only one exists per table.
///
/// Dereferences to [`MemTableReader`] for lookups from the writing thread.
pub struct MemTable<U = BytewiseComparator> {
    table: SkipListWriter<Bytes, MemTableKeyComparator<U>>,
    reader: MemTableReader<U>,
    arena: Arena,
}

impl<U: Comparator<[u8]>> MemTable<U> {
    pub fn new(cmp: InternalKeyComparator<U>) -> Self {
        Self::with_config(cmp, MemTableConfig::default())
    }

    pub fn with_config(cmp: InternalKeyComparator<U>, config: MemTableConfig) -> Self {
        let cmp = MemTableKeyComparator::new(cmp);
        let table = match config.seed {
            Some(seed) => SkipListWriter::with_seed(cmp, seed),
            None => SkipListWriter::new(cmp),
        };
        let reader = MemTableReader { table: table.reader() };
        Self {
            table,
            reader,
            arena: Arena::with_block_size(config.arena_block_size),
        }
    }

    /// Records a write of `value` (or a deletion marker) for `user_key` at
    /// `sequence`.
    ///
    /// Adding the exact same `(user_key, sequence, kind)` twice keeps the first
    /// entry.
    pub fn add(&mut self, sequence: SeqNum, kind: ValueKind, user_key: &[u8], value: &[u8]) {
        let internal_len = user_key.len() + TAG_LEN;
        let encoded_len = varint32_len(internal_len as u32)
            + internal_len
            + varint32_len(value.len() as u32)
            + value.len();

        let mut buf = Vec::with_capacity(encoded_len);
        put_varint32(&mut buf, internal_len as u32);
        append_internal_key(&mut buf, user_key, sequence, kind);
        put_length_prefixed_slice(&mut buf, value);
        debug_assert_eq!(buf.len(), encoded_len);

        let entry = self.arena.allocate_copy(&buf);
        self.table.insert(entry);
        trace!(sequence, ?kind, key_len = user_key.len(), value_len = value.len(), "memtable add");
    }

    /// Put a key-value pair at `sequence`.
    pub fn put(&mut self, sequence: SeqNum, user_key: &[u8], value: &[u8]) {
        self.add(sequence, ValueKind::Value, user_key, value);
    }

    /// Delete a key at `sequence`.
    pub fn delete(&mut self, sequence: SeqNum, user_key: &[u8]) {
        self.add(sequence, ValueKind::Deletion, user_key, &[]);
    }

    /// A read handle that can move to other threads.
    pub fn reader(&self) -> MemTableReader<U> {
        self.reader.clone()
    }

    /// Bytes held by the arena plus skiplist bookkeeping.
    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.memory_usage() + self.table.len() * std::mem::size_of::<Bytes>()
    }
}

impl<U> std::ops::Deref for MemTable<U> {
    type Target = MemTableReader<U>;

    fn deref(&self) -> &Self::Target {
        &self.reader
    }
}

/// Read handle onto a memtable. Lookups never block the writer.
pub struct MemTableReader<U = BytewiseComparator> {
    table: Table<U>,
}

impl<U> Clone for MemTableReader<U> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<U: Comparator<[u8]>> MemTableReader<U> {
    /// Latest version of `user_key` with sequence at or below `snapshot`.
    /// Returns `None` if no such version exists.
    pub fn get(&self, user_key: &[u8], snapshot: SeqNum) -> Option<LookupResult> {
        let lookup = LookupKey::new(user_key, snapshot);
        let probe = Bytes::copy_from_slice(lookup.memtable_key());
        let found = self.table.lower_bound(&probe).key()?;

        let entry = match MemTableEntry::decode(found) {
            Ok(entry) => entry,
            Err(_) => unreachable!("memtable entries are well formed when built"),
        };
        let user = self.table.comparator().internal.user_comparator();
        if user.compare(&entry.user_key, user_key) != Ordering::Equal {
            return None;
        }
        Some(match entry.kind {
            ValueKind::Value => LookupResult::Value(entry.value),
            ValueKind::Deletion => LookupResult::Deleted,
        })
    }

    /// Iterate over all entries in sorted order.
    pub fn iter(&self) -> MemTableIter<'_, U> {
        MemTableIter {
            cursor: self.table.begin(),
        }
    }

    /// Entries starting at the newest version of `user_key` visible at
    /// `snapshot`, or the first entry after it.
    pub fn seek(&self, user_key: &[u8], snapshot: SeqNum) -> MemTableIter<'_, U> {
        let lookup = LookupKey::new(user_key, snapshot);
        let probe = Bytes::copy_from_slice(lookup.memtable_key());
        MemTableIter {
            cursor: self.table.lower_bound(&probe),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Ordered scan over decoded memtable entries.
pub struct MemTableIter<'a, U> {
    cursor: Cursor<'a, Bytes, MemTableKeyComparator<U>>,
}

impl<U: Comparator<[u8]>> Iterator for MemTableIter<'_, U> {
    type Item = MemTableEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.cursor.next()?;
        match MemTableEntry::decode(raw) {
            Ok(entry) => Some(entry),
            Err(_) => unreachable!("memtable entries are well formed when built"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsm::MAX_SEQUENCE;

    fn new_memtable() -> MemTable {
        MemTable::with_config(
            InternalKeyComparator::new(BytewiseComparator),
            MemTableConfig {
                seed: Some(42),
                ..MemTableConfig::default()
            },
        )
    }

    #[test]
    fn test_put_and_get() {
        let mut mem = new_memtable();
        mem.put(1, b"key1", b"value1");
        mem.put(2, b"key2", b"value2");

        assert_eq!(
            mem.get(b"key1", 10),
            Some(LookupResult::Value(Bytes::from_static(b"value1")))
        );
        assert_eq!(
            mem.get(b"key2", 10),
            Some(LookupResult::Value(Bytes::from_static(b"value2")))
        );
        assert_eq!(mem.get(b"key3", 10), None);
        // Not yet visible at an older snapshot.
        assert_eq!(mem.get(b"key2", 1), None);
    }

    #[test]
    fn test_newer_version_first() {
        let mut mem = new_memtable();
        mem.add(5, ValueKind::Value, b"a", b"x");
        mem.add(3, ValueKind::Value, b"a", b"y");

        let entries: Vec<_> = mem.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 5);
        assert_eq!(&entries[0].value[..], b"x");
        assert_eq!(entries[1].sequence, 3);
        assert_eq!(&entries[1].value[..], b"y");
    }

    #[test]
    fn test_snapshot_reads() {
        let mut mem = new_memtable();
        mem.put(1, b"key", b"v1");
        mem.put(4, b"key", b"v2");
        mem.delete(7, b"key");

        assert_eq!(mem.get(b"key", 0), None);
        assert_eq!(mem.get(b"key", 1), Some(LookupResult::Value(Bytes::from_static(b"v1"))));
        assert_eq!(mem.get(b"key", 5), Some(LookupResult::Value(Bytes::from_static(b"v2"))));
        assert_eq!(mem.get(b"key", 7), Some(LookupResult::Deleted));
        assert_eq!(mem.get(b"key", 100), Some(LookupResult::Deleted));
    }

    #[test]
    fn test_read_latest_with_max_snapshot() {
        let mut mem = new_memtable();
        mem.put(1, b"k", b"v1");
        mem.put(MAX_SEQUENCE, b"k", b"v2");

        assert_eq!(
            mem.get(b"k", SeqNum::MAX),
            Some(LookupResult::Value(Bytes::from_static(b"v2")))
        );
        assert_eq!(mem.get(b"missing", SeqNum::MAX), None);
        let sequences: Vec<_> = mem.seek(b"k", SeqNum::MAX).map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![MAX_SEQUENCE, 1]);
    }

    #[test]
    fn test_iter_order() {
        let mut mem = new_memtable();
        mem.put(1, b"c", b"3");
        mem.put(2, b"a", b"1");
        mem.put(3, b"b", b"2");
        mem.delete(4, b"a");

        let keys: Vec<(Vec<u8>, SeqNum, bool)> = mem
            .iter()
            .map(|e| (e.user_key.to_vec(), e.sequence, e.is_tombstone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (b"a".to_vec(), 4, true),
                (b"a".to_vec(), 2, false),
                (b"b".to_vec(), 3, false),
                (b"c".to_vec(), 1, false),
            ]
        );
    }

    #[test]
    fn test_seek() {
        let mut mem = new_memtable();
        mem.put(1, b"apple", b"1");
        mem.put(2, b"banana", b"2");
        mem.put(3, b"banana", b"3");
        mem.put(4, b"cherry", b"4");

        let from_banana: Vec<_> = mem.seek(b"banana", 2).map(|e| e.sequence).collect();
        assert_eq!(from_banana, vec![2, 4]);

        let from_gap: Vec<_> = mem.seek(b"b", 100).map(|e| e.user_key.to_vec()).collect();
        assert_eq!(from_gap, vec![b"banana".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);

        assert_eq!(mem.seek(b"zebra", 100).count(), 0);
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let mut mem = new_memtable();
        mem.put(9, b"k", b"first");
        mem.put(9, b"k", b"second");
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.get(b"k", 9), Some(LookupResult::Value(Bytes::from_static(b"first"))));
    }

    #[test]
    fn test_empty_key_and_value() {
        let mut mem = new_memtable();
        mem.put(1, b"", b"");
        assert_eq!(mem.get(b"", 1), Some(LookupResult::Value(Bytes::new())));
        assert!(!mem.is_empty());
    }

    #[test]
    fn test_memory_usage_grows() {
        let mut mem = new_memtable();
        assert_eq!(mem.approximate_memory_usage(), 0);
        let value = vec![7u8; 100];
        for i in 0..200u64 {
            mem.put(i + 1, format!("key{:05}", i).as_bytes(), &value);
        }
        assert!(mem.approximate_memory_usage() >= 200 * 100);
    }

    #[test]
    fn test_reader_on_other_thread() {
        let mut mem = new_memtable();
        let reader = mem.reader();

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..1000u64 {
                    mem.put(i + 1, format!("k{:04}", i).as_bytes(), b"v");
                }
            });
            s.spawn(|| {
                let mut last: Option<MemTableEntry> = None;
                for entry in reader.iter() {
                    if let Some(prev) = &last {
                        assert!(prev.user_key < entry.user_key);
                    }
                    last = Some(entry);
                }
            });
        });

        assert_eq!(reader.len(), 1000);
        assert_eq!(reader.get(b"k0999", 1000), Some(LookupResult::Value(Bytes::from_static(b"v"))));
    }
}
