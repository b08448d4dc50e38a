//! Read side of immutable, prefix-compressed blocks.
//!
//! Layout:
//!
//! ```text
//! block := entry* restart_offset(fixed32)* restart_count(fixed32)
//! entry := shared_len(varint32) unshared_len(varint32) value_len(varint32)
//!          unshared_key_bytes value_bytes
//! ```
//!
//! Each key is stored as the length of the prefix it shares with the previous
//! key plus the remaining suffix. Entries listed in the restart array store
//! their key in full (`shared_len == 0`), which lets a lookup binary-search
//! the restart keys and then scan at most one restart interval.

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::fmt;

use tracing::{debug, warn};

use crate::coding::{decode_fixed32, get_varint32};
use crate::error::{Error, Result};

use super::comparator::{BytewiseComparator, Comparator};

const RESTART_ENTRY_LEN: usize = 4;

/// A decoded view over one block's bytes.
pub struct Block<'a, C = BytewiseComparator> {
    data: &'a [u8],
    /// End of the entry region, where the restart array begins.
    data_end: usize,
    num_restarts: u32,
    cmp: C,
}

impl<'a, C: Comparator<[u8]>> Block<'a, C> {
    /// Validates the restart trailer of `data`.
    pub fn new(data: &'a [u8], cmp: C) -> Result<Self> {
        if data.len() < RESTART_ENTRY_LEN {
            debug!(len = data.len(), "block too small for restart count");
            return Err(Error::corruption(format!(
                "block of {} bytes has no restart count",
                data.len()
            )));
        }

        let num_restarts = decode_fixed32(&data[data.len() - RESTART_ENTRY_LEN..])?;
        let max_restarts = (data.len() - RESTART_ENTRY_LEN) / RESTART_ENTRY_LEN;
        if num_restarts as usize > max_restarts {
            debug!(len = data.len(), num_restarts, "block too small for restart array");
            return Err(Error::corruption(format!(
                "block of {} bytes cannot hold {} restart points",
                data.len(),
                num_restarts
            )));
        }

        let data_end = data.len() - RESTART_ENTRY_LEN * (num_restarts as usize + 1);
        Ok(Self {
            data,
            data_end,
            num_restarts,
            cmp,
        })
    }

    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    /// Size of the entry region in bytes.
    pub fn data_len(&self) -> usize {
        self.data_end
    }

    /// Byte offset of restart point `index`.
    pub fn restart_point(&self, index: u32) -> Result<usize> {
        assert!(index < self.num_restarts, "restart {} out of {}", index, self.num_restarts);
        let at = self.data_end + RESTART_ENTRY_LEN * index as usize;
        let offset = decode_fixed32(&self.data[at..])? as usize;
        if offset > self.data_end {
            return Err(Error::corruption(format!(
                "restart point {} at offset {} is past the entry region ({} bytes)",
                index, offset, self.data_end
            )));
        }
        Ok(offset)
    }

    /// Full key stored at restart point `index`.
    pub fn restart_key(&self, index: u32) -> Result<&'a [u8]> {
        let offset = self.restart_point(index)?;
        let header = decode_entry(self.data, offset, self.data_end)?;
        if header.shared != 0 {
            return Err(Error::corruption(format!(
                "restart point {} shares {} bytes with its predecessor",
                index, header.shared
            )));
        }
        Ok(&self.data[header.key_offset..header.key_offset + header.unshared])
    }

    pub fn begin(&self) -> BlockIter<'_, C> {
        BlockIter::at(self, 0, 0)
    }

    pub fn end(&self) -> BlockIter<'_, C> {
        BlockIter::at(self, self.data_end, 0)
    }

    /// Cursor over the whole block.
    pub fn iter(&self) -> BlockIter<'_, C> {
        self.begin()
    }

    /// Cursor constructed directly at the entry starting at `offset`.
    ///
    /// The governing restart point is found from the restart array; the key
    /// is rebuilt from it on first access.
    pub fn seek_to_offset(&self, offset: usize) -> BlockIter<'_, C> {
        match self.restart_for(offset) {
            Ok(restart) => BlockIter::at(self, offset, restart),
            Err(err) => BlockIter::failed(self, err),
        }
    }

    /// Offset of the last restart point at or before `offset`.
    fn restart_for(&self, offset: usize) -> Result<usize> {
        let (mut lo, mut hi) = (0u32, self.num_restarts);
        let mut found = 0;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let point = self.restart_point(mid)?;
            if point <= offset {
                found = point;
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(found)
    }

    /// First entry whose key does not compare less than `target`.
    pub fn lower_bound(&self, target: &[u8]) -> BlockIter<'_, C> {
        if self.num_restarts == 0 {
            return self.end();
        }

        // Narrow to the last restart whose key is below `target`.
        let (mut lo, mut hi) = (0u32, self.num_restarts);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            match self.restart_key(mid) {
                Ok(key) if self.cmp.compare(key, target) != Ordering::Less => hi = mid,
                Ok(_) => lo = mid,
                Err(err) => return BlockIter::failed(self, err),
            }
        }

        let restart = match self.restart_point(lo) {
            Ok(restart) => restart,
            Err(err) => return BlockIter::failed(self, err),
        };

        let mut it = BlockIter::at(self, restart, restart);
        while it.is_valid() {
            match it.key().map(|key| self.cmp.compare(key, target)) {
                Ok(Ordering::Less) => it.increment(),
                Ok(_) => break,
                Err(err) => {
                    it.fail(err);
                    break;
                }
            }
        }
        it
    }

    /// Entry whose key equals `target`, or the end cursor.
    ///
    /// A cursor that hit corruption on the way is returned as is so the
    /// caller can see its status.
    pub fn find(&self, target: &[u8]) -> BlockIter<'_, C> {
        let it = self.lower_bound(target);
        if it.status().is_err() {
            return it;
        }
        let matched = it
            .key()
            .is_ok_and(|key| self.cmp.compare(key, target) == Ordering::Equal);
        if matched { it } else { self.end() }
    }
}

impl<C> fmt::Debug for Block<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.data.len())
            .field("data_end", &self.data_end)
            .field("num_restarts", &self.num_restarts)
            .finish()
    }
}

/// Decoded `(shared, unshared, value_len)` triple of one entry.
#[derive(Clone, Copy, Debug, Default)]
struct EntryHeader {
    shared: usize,
    unshared: usize,
    value_len: usize,
    /// Start of the unshared key bytes.
    key_offset: usize,
}

impl EntryHeader {
    fn next_offset(&self) -> usize {
        self.key_offset + self.unshared + self.value_len
    }
}

/// Decodes the entry header at `offset`, checking that its key and value
/// bytes fit before `limit`.
fn decode_entry(data: &[u8], offset: usize, limit: usize) -> Result<EntryHeader> {
    let region = &data[offset..limit];
    let mut input = region;
    let shared = get_varint32(&mut input)? as usize;
    let unshared = get_varint32(&mut input)? as usize;
    let value_len = get_varint32(&mut input)? as usize;
    if unshared + value_len > input.len() {
        return Err(Error::corruption(format!(
            "entry at offset {} needs {} bytes, {} remain",
            offset,
            unshared + value_len,
            input.len()
        )));
    }
    Ok(EntryHeader {
        shared,
        unshared,
        value_len,
        key_offset: offset + (region.len() - input.len()),
    })
}

/// Rebuilds the full key of the entry preceding `offset` by decoding forward
/// from the restart point at `restart`.
///
/// Returns an empty key when `offset` is the restart point itself.
pub fn replay_preceding_key<C: Comparator<[u8]>>(
    block: &Block<'_, C>,
    restart: usize,
    offset: usize,
) -> Result<Vec<u8>> {
    if offset > block.data_end {
        return Err(Error::corruption(format!(
            "offset {} is past the entry region ({} bytes)",
            offset, block.data_end
        )));
    }
    if restart > offset {
        return Err(Error::corruption(format!(
            "restart point {} is past entry {}",
            restart, offset
        )));
    }

    let mut previous = Vec::new();
    let mut at = restart;
    while at < offset {
        let header = decode_entry(block.data, at, block.data_end)?;
        if header.shared > previous.len() {
            return Err(Error::corruption(format!(
                "entry at offset {} shares {} bytes with a {} byte key",
                at,
                header.shared,
                previous.len()
            )));
        }
        previous.truncate(header.shared);
        previous.extend_from_slice(&block.data[header.key_offset..header.key_offset + header.unshared]);
        at = header.next_offset();
    }

    if at != offset {
        return Err(Error::corruption(format!(
            "offset {} is not an entry boundary after restart {}",
            offset, restart
        )));
    }
    Ok(previous)
}

/// A position inside a [`Block`].
///
/// The key is materialized lazily and cached. A cursor reached by
/// [`increment`](Self::increment) carries the previous full key; one built
/// directly at an offset rebuilds it from its governing restart point.
///
/// Decode failures are recorded on the cursor and reported by
/// [`status`](Self::status); `key` and `value` return them as errors.
pub struct BlockIter<'a, C> {
    block: &'a Block<'a, C>,
    offset: usize,
    header: EntryHeader,
    /// Offset of the nearest preceding entry stored with a full key.
    restart: usize,
    last_key: Option<Vec<u8>>,
    key: OnceCell<Vec<u8>>,
    status: Result<()>,
    /// Set once the iterator has yielded its failure.
    exhausted: bool,
}

impl<'a, C: Comparator<[u8]>> BlockIter<'a, C> {
    fn at(block: &'a Block<'a, C>, offset: usize, restart: usize) -> Self {
        let mut it = Self {
            block,
            offset,
            header: EntryHeader::default(),
            restart,
            last_key: None,
            key: OnceCell::new(),
            status: Ok(()),
            exhausted: false,
        };
        it.decode_at(offset);
        it
    }

    fn failed(block: &'a Block<'a, C>, err: Error) -> Self {
        let mut it = Self::at(block, block.data_end, 0);
        it.fail(err);
        it
    }

    fn fail(&mut self, err: Error) {
        warn!(offset = self.offset, error = %err, "block cursor corrupted");
        if self.status.is_ok() {
            self.status = Err(err);
        }
    }

    fn decode_at(&mut self, offset: usize) {
        self.offset = offset;
        self.key = OnceCell::new();
        if offset >= self.block.data_end {
            self.offset = self.block.data_end;
            self.header = EntryHeader {
                key_offset: self.block.data_end,
                ..EntryHeader::default()
            };
            return;
        }

        match decode_entry(self.block.data, offset, self.block.data_end) {
            Ok(header) => {
                self.header = header;
                // A full key can seed a replay as well as a listed restart.
                if header.shared == 0 {
                    self.restart = offset;
                }
            }
            Err(err) => self.fail(err),
        }
    }

    /// Byte offset of the current entry.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_end(&self) -> bool {
        self.offset >= self.block.data_end
    }

    /// Positioned on an entry and free of decode failures.
    pub fn is_valid(&self) -> bool {
        !self.is_end() && self.status.is_ok()
    }

    /// First decode failure this cursor ran into, if any.
    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    fn check_readable(&self) -> Result<()> {
        self.status.clone()?;
        if self.is_end() {
            return Err(Error::invalid_argument("cursor is at the end of the block"));
        }
        Ok(())
    }

    /// Full key of the current entry.
    pub fn key(&self) -> Result<&[u8]> {
        self.check_readable()?;
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let full = self.materialize_key()?;
        Ok(self.key.get_or_init(|| full))
    }

    fn materialize_key(&self) -> Result<Vec<u8>> {
        let header = &self.header;
        let unshared = &self.block.data[header.key_offset..header.key_offset + header.unshared];
        if header.shared == 0 {
            return Ok(unshared.to_vec());
        }

        let replayed;
        let previous = match &self.last_key {
            Some(previous) => previous,
            None => {
                replayed = replay_preceding_key(self.block, self.restart, self.offset)?;
                &replayed
            }
        };
        if header.shared > previous.len() {
            return Err(Error::corruption(format!(
                "entry at offset {} shares {} bytes with a {} byte key",
                self.offset,
                header.shared,
                previous.len()
            )));
        }

        let mut full = Vec::with_capacity(header.shared + header.unshared);
        full.extend_from_slice(&previous[..header.shared]);
        full.extend_from_slice(unshared);
        Ok(full)
    }

    /// Value bytes of the current entry.
    pub fn value(&self) -> Result<&'a [u8]> {
        self.check_readable()?;
        let start = self.header.key_offset + self.header.unshared;
        Ok(&self.block.data[start..start + self.header.value_len])
    }

    /// Moves to the next entry. The current key becomes the one the next key
    /// is decoded against. No-op at the end or after a failure.
    pub fn increment(&mut self) {
        if !self.is_valid() {
            return;
        }
        if let Err(err) = self.key().map(|_| ()) {
            self.fail(err);
            return;
        }
        self.last_key = self.key.take();
        self.decode_at(self.header.next_offset());
    }
}

impl<'a, C: Comparator<[u8]>> Iterator for BlockIter<'a, C> {
    type Item = Result<(Vec<u8>, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        // Report a failure once, then stop.
        if let Err(err) = self.status.clone() {
            self.exhausted = true;
            return Some(Err(err));
        }
        if self.is_end() {
            return None;
        }

        let item = self
            .key()
            .map(<[u8]>::to_vec)
            .and_then(|key| self.value().map(|value| (key, value)));
        match &item {
            Ok(_) => self.increment(),
            Err(err) => {
                self.fail(err.clone());
                self.exhausted = true;
            }
        }
        Some(item)
    }
}

/// Cursors are equal when they sit at the same entry of the same block and
/// agree on whether they hit corruption. A failed cursor never equals `end()`.
impl<C> PartialEq for BlockIter<'_, C> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.block, other.block)
            && self.offset == other.offset
            && self.status.is_ok() == other.status.is_ok()
    }
}

impl<C> fmt::Debug for BlockIter<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockIter")
            .field("offset", &self.offset)
            .field("restart", &self.restart)
            .field("status", &self.status)
            .finish()
    }
}
