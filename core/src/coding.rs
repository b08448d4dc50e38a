//! Varint, fixed-width and length-prefixed encodings.
//!
//! All multi-byte integers are little endian. Decoders take a byte slice and
//! report how much they consumed, or advance a `&mut &[u8]` cursor.

use crate::error::{Error, Result};

/// Longest encoding of a 32-bit varint.
pub const MAX_VARINT32_LEN: usize = 5;

pub fn varint32_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        len += 1;
        value >>= 7;
    }
    len
}

pub fn put_varint32(dst: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        dst.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Decodes a varint32 from the front of `bytes`, returning the value and the
/// number of bytes it occupied.
pub fn decode_varint32(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut value = 0u32;

    for (i, &byte) in bytes.iter().take(MAX_VARINT32_LEN).enumerate() {
        let shift = 7 * i as u32;
        let bits = (byte & 0x7F) as u32;
        if i == MAX_VARINT32_LEN - 1 && bits > 0x0F {
            return Err(Error::corruption("varint32 overflows 32 bits"));
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    if bytes.len() >= MAX_VARINT32_LEN {
        Err(Error::corruption("varint32 too long"))
    } else {
        Err(Error::corruption("varint32 not terminated"))
    }
}

/// Decodes a varint32 and advances `input` past it.
pub fn get_varint32(input: &mut &[u8]) -> Result<u32> {
    let (value, len) = decode_varint32(input)?;
    *input = &input[len..];
    Ok(value)
}

pub fn put_fixed32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_le_bytes());
}

pub fn decode_fixed32(bytes: &[u8]) -> Result<u32> {
    match bytes.get(..4) {
        Some(raw) => Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        None => Err(Error::corruption("buffer too small for fixed32")),
    }
}

pub fn put_fixed64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_le_bytes());
}

pub fn decode_fixed64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .get(..8)
        .and_then(|raw| raw.try_into().ok())
        .ok_or_else(|| Error::corruption("buffer too small for fixed64"))?;
    Ok(u64::from_le_bytes(raw))
}

/// Appends `value` preceded by its varint32 length.
pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.extend_from_slice(value);
}

/// Reads a varint32-length-prefixed slice and advances `input` past it.
pub fn get_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Result<&'a [u8]> {
    let mut rest: &'a [u8] = input;
    let len = get_varint32(&mut rest)? as usize;
    if rest.len() < len {
        return Err(Error::corruption(format!(
            "length prefix {} exceeds remaining {} bytes",
            len,
            rest.len()
        )));
    }
    let (value, tail) = rest.split_at(len);
    *input = tail;
    Ok(value)
}
