//! Write buffer and block reader of the LSM engine.
//!
//! Architecture:
//! - SkipList: lock-free ordered index, one writer and many readers
//! - MemTable: versioned writes encoded as internal keys in a skiplist
//! - Block: prefix-compressed sorted run read back from a persisted table
//!
//! The two read paths share no state; both order keys through a
//! [`Comparator`].

mod arena;
mod block;
mod comparator;
mod memtable;
mod skiplist;
mod types;

pub use arena::{Arena, NodeArena};
pub use block::{Block, BlockIter, replay_preceding_key};
pub use comparator::{BytewiseComparator, Comparator, NaturalOrder};
pub use memtable::{
    LookupResult, MemTable, MemTableConfig, MemTableEntry, MemTableIter, MemTableKeyComparator, MemTableReader,
};
pub use skiplist::{Cursor, MAX_HEIGHT, NodeId, SkipListReader, SkipListWriter};
pub use types::{
    InternalKey, InternalKeyComparator, LookupKey, MAX_SEQUENCE, ParsedInternalKey, SeqNum, TAG_LEN, ValueKind,
    append_internal_key, pack_sequence_and_kind,
};
