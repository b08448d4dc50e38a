//! Internal keys: a user key tagged with a sequence number and value kind.
//!
//! Encoding: `user_key ++ fixed64_le((sequence << 8) | kind)`.
//!
//! Internal keys order by user key ascending, then by the packed tag
//! descending, so the newest version of a key sorts first.

use std::cmp::Ordering;

use crate::coding::{decode_fixed64, put_fixed64, put_length_prefixed_slice, varint32_len};
use crate::error::{Error, Result};

use super::comparator::{BytewiseComparator, Comparator};

/// Sequence number for ordering entries with the same key.
/// Higher sequence numbers are newer.
pub type SeqNum = u64;

/// Sequence numbers share a u64 with the kind byte, leaving 56 bits.
pub const MAX_SEQUENCE: SeqNum = (1 << 56) - 1;

/// Length of the packed sequence/kind trailer.
pub const TAG_LEN: usize = 8;

/// Distinguishes a normal write from a deletion marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Deletion = 0,
    Value = 1,
}

impl ValueKind {
    /// Kind used when building seek keys. It must be the highest kind so a
    /// seek for `(key, seq)` lands on the first entry at or below `seq`.
    pub const FOR_SEEK: ValueKind = ValueKind::Value;

    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ValueKind::Deletion),
            1 => Ok(ValueKind::Value),
            other => Err(Error::corruption(format!("unknown value kind {}", other))),
        }
    }
}

pub fn pack_sequence_and_kind(sequence: SeqNum, kind: ValueKind) -> u64 {
    assert!(sequence <= MAX_SEQUENCE, "sequence number {} out of range", sequence);
    (sequence << 8) | kind as u64
}

/// Appends the internal key encoding of `(user_key, sequence, kind)`.
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], sequence: SeqNum, kind: ValueKind) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_kind(sequence, kind));
}

/// Owned, encoded internal key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InternalKey(Vec<u8>);

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SeqNum, kind: ValueKind) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + TAG_LEN);
        append_internal_key(&mut rep, user_key, sequence, kind);
        Self(rep)
    }

    pub fn encoded(&self) -> &[u8] {
        &self.0
    }

    pub fn user_key(&self) -> &[u8] {
        &self.0[..self.0.len() - TAG_LEN]
    }

    pub fn parse(&self) -> ParsedInternalKey<'_> {
        // Always well formed: built by `new`.
        let tag = self.0.len() - TAG_LEN;
        let packed = u64::from_le_bytes(std::array::from_fn(|i| self.0[tag + i]));
        ParsedInternalKey {
            user_key: &self.0[..tag],
            sequence: packed >> 8,
            kind: if packed & 0xFF == 0 {
                ValueKind::Deletion
            } else {
                ValueKind::Value
            },
        }
    }
}

/// Borrowed view of a decoded internal key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SeqNum,
    pub kind: ValueKind,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(encoded: &'a [u8]) -> Result<Self> {
        if encoded.len() < TAG_LEN {
            return Err(Error::corruption(format!(
                "internal key of {} bytes is shorter than its tag",
                encoded.len()
            )));
        }
        let split = encoded.len() - TAG_LEN;
        let packed = decode_fixed64(&encoded[split..])?;
        Ok(Self {
            user_key: &encoded[..split],
            sequence: packed >> 8,
            kind: ValueKind::from_u8((packed & 0xFF) as u8)?,
        })
    }
}

/// Orders encoded internal keys: user key ascending under `U`, then the
/// packed sequence/kind tag descending.
#[derive(Clone, Copy, Debug, Default)]
pub struct InternalKeyComparator<U = BytewiseComparator> {
    user: U,
}

impl<U: Comparator<[u8]>> InternalKeyComparator<U> {
    pub fn new(user: U) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &U {
        &self.user
    }
}

impl<U: Comparator<[u8]>> Comparator<[u8]> for InternalKeyComparator<U> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert!(a.len() >= TAG_LEN && b.len() >= TAG_LEN);
        let (a_user, a_tag) = a.split_at(a.len().saturating_sub(TAG_LEN));
        let (b_user, b_tag) = b.split_at(b.len().saturating_sub(TAG_LEN));
        match self.user.compare(a_user, b_user) {
            Ordering::Equal => {
                let a_tag = decode_fixed64(a_tag).unwrap_or(0);
                let b_tag = decode_fixed64(b_tag).unwrap_or(0);
                b_tag.cmp(&a_tag)
            }
            ord => ord,
        }
    }
}

/// Search key for "latest version of `user_key` visible at `snapshot`".
///
/// Encoded as a length-prefixed internal key, the same shape as the head of
/// a memtable entry, so it can be handed to the memtable's skiplist as is.
#[derive(Clone, Debug)]
pub struct LookupKey {
    rep: Vec<u8>,
    key_start: usize,
}

impl LookupKey {
    /// Snapshots above [`MAX_SEQUENCE`] read the latest version.
    pub fn new(user_key: &[u8], snapshot: SeqNum) -> Self {
        let snapshot = snapshot.min(MAX_SEQUENCE);
        let internal_len = user_key.len() + TAG_LEN;
        let mut rep = Vec::with_capacity(varint32_len(internal_len as u32) + internal_len);
        let mut internal = Vec::with_capacity(internal_len);
        append_internal_key(&mut internal, user_key, snapshot, ValueKind::FOR_SEEK);
        put_length_prefixed_slice(&mut rep, &internal);
        let key_start = rep.len() - internal_len;
        Self { rep, key_start }
    }

    /// The length-prefixed form used to probe a memtable.
    pub fn memtable_key(&self) -> &[u8] {
        &self.rep
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.rep[self.key_start..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.rep[self.key_start..self.rep.len() - TAG_LEN]
    }
}
