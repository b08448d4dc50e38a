//! Append-only memory for the write buffer.
//!
//! Two allocators live here:
//! - [`Arena`]: a byte bump allocator. Memtable entries are carved out of
//!   shared blocks and handed out as `Bytes`, so an entry keeps its block
//!   alive and never moves.
//! - [`NodeArena`]: an index-addressed pool for skiplist nodes. Storage grows
//!   in doubling chunks that are allocated once and never relocated, which
//!   lets readers resolve an index without taking a lock while the writer
//!   keeps appending.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use tracing::debug;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Bump allocator over `BytesMut` blocks.
pub struct Arena {
    current: BytesMut,
    block_size: usize,
    memory_usage: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            current: BytesMut::new(),
            block_size: block_size.max(64),
            memory_usage: 0,
        }
    }

    /// Carves out an exclusive, zero-filled span of `len` bytes.
    ///
    /// Requests larger than a quarter block get a block of their own so the
    /// remainder of the current block is not wasted.
    pub fn allocate(&mut self, len: usize) -> BytesMut {
        if len > self.current.capacity() {
            if len > self.block_size / 4 {
                self.memory_usage += len;
                debug!(len, "arena dedicated block");
                return BytesMut::zeroed(len);
            }
            self.current = BytesMut::with_capacity(self.block_size);
            self.memory_usage += self.block_size;
            debug!(block_size = self.block_size, "arena new block");
        }

        // Stays within capacity, so the block is never reallocated.
        self.current.resize(len, 0);
        self.current.split_to(len)
    }

    /// Copies `src` into arena memory and freezes it.
    pub fn allocate_copy(&mut self, src: &[u8]) -> Bytes {
        let mut span = self.allocate(src.len());
        span.copy_from_slice(src);
        span.freeze()
    }

    /// Bytes reserved from the system so far.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// Capacity of the first chunk, as a power of two.
const FIRST_CHUNK_BITS: u32 = 6;
/// Chunk `c` holds `1 << (FIRST_CHUNK_BITS + c)` slots; 27 chunks cover the
/// whole `u32` index space.
const CHUNK_COUNT: usize = 27;

/// Append-only pool of `T` addressed by dense `u32` indices.
///
/// Slots are write-once. `push` is meant for a single writer; readers may
/// call `get` concurrently and see any slot whose index was published to
/// them through a release/acquire pair.
pub struct NodeArena<T> {
    chunks: [OnceLock<Box<[OnceLock<T>]>>; CHUNK_COUNT],
    len: AtomicUsize,
}

/// Maps a pool index to `(chunk, offset within chunk)`.
fn locate(index: usize) -> (usize, usize) {
    let biased = index + (1 << FIRST_CHUNK_BITS);
    let log2 = usize::BITS - 1 - biased.leading_zeros();
    let chunk = (log2 - FIRST_CHUNK_BITS) as usize;
    (chunk, biased - (1 << log2))
}

impl<T> NodeArena<T> {
    /// Largest index the pool will hand out; `u32::MAX` is reserved as a null link.
    pub const MAX_INDEX: u32 = u32::MAX - 1;

    pub fn new() -> Self {
        Self {
            chunks: std::array::from_fn(|_| OnceLock::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Stores `value` in the next free slot and returns its index.
    pub fn push(&self, value: T) -> u32 {
        let index = self.len.load(Ordering::Relaxed);
        assert!(index <= Self::MAX_INDEX as usize, "node arena exhausted");

        let (chunk, offset) = locate(index);
        let slots = self.chunks[chunk].get_or_init(|| {
            let capacity = 1usize << (FIRST_CHUNK_BITS as usize + chunk);
            debug!(chunk, capacity, "node arena chunk");
            (0..capacity).map(|_| OnceLock::new()).collect()
        });
        assert!(slots[offset].set(value).is_ok(), "node arena slot {} written twice", index);

        self.len.store(index + 1, Ordering::Release);
        index as u32
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        let (chunk, offset) = locate(index as usize);
        self.chunks.get(chunk)?.get()?.get(offset)?.get()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots reserved so far, in units of `T`.
    pub fn capacity(&self) -> usize {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.get().is_some())
            .map(|(c, _)| 1usize << (FIRST_CHUNK_BITS as usize + c))
            .sum()
    }
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
