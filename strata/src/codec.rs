//! Column encodings used by version 2 segments.
//!
//! - Timestamps and integer values are stored as deltas of deltas, zigzag
//!   mapped and written as LEB128 varints. A regularly spaced column costs
//!   one byte per entry.
//! - Floats are XORed with the previous value. Each result is written as a
//!   one-byte descriptor followed by its significant bytes only.
//!
//! Both decoders check the entry count and reject trailing bytes.

use thiserror::Error;

/// A malformed encoded column.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The column ended before every entry was read.
    #[error("column truncated after {decoded} of {expected} entries")]
    Truncated {
        /// Entries decoded before the end of input.
        decoded: usize,
        /// Entries the header promised.
        expected: usize,
    },

    /// A varint does not fit in 64 bits.
    #[error("varint overflows 64 bits at byte {offset}")]
    VarintOverflow {
        /// Offset of the offending byte.
        offset: usize,
    },

    /// A float descriptor names an impossible byte layout.
    #[error("invalid float descriptor {descriptor:#04x} at byte {offset}")]
    InvalidDescriptor {
        /// The descriptor byte.
        descriptor: u8,
        /// Offset of the descriptor.
        offset: usize,
    },

    /// Bytes remain after the last entry.
    #[error("{0} trailing byte(s) after the last entry")]
    TrailingBytes(usize),
}

/// Appends the delta-of-delta encoding of `values` to `out`.
pub fn encode_deltas(values: &[u64], out: &mut Vec<u8>) {
    let mut prev = 0u64;
    let mut prev_delta = 0i64;
    for &value in values {
        let delta = signed_bits(value.wrapping_sub(prev));
        write_varint(zigzag_encode(delta.wrapping_sub(prev_delta)), out);
        prev = value;
        prev_delta = delta;
    }
}

/// Decodes exactly `count` entries written by [`encode_deltas`].
///
/// # Errors
///
/// Returns a [`CodecError`] if `bytes` is truncated, malformed or longer
/// than `count` entries.
pub fn decode_deltas(bytes: &[u8], count: usize) -> Result<Vec<u64>, CodecError> {
    let mut values = Vec::with_capacity(count);
    let mut pos = 0;
    let mut prev = 0u64;
    let mut prev_delta = 0i64;
    while values.len() < count {
        let raw = read_varint(bytes, &mut pos)
            .ok_or_else(|| truncated_or_overflow(bytes, pos, values.len(), count))?;
        let delta = prev_delta.wrapping_add(zigzag_decode(raw));
        let value = prev.wrapping_add(unsigned_bits(delta));
        values.push(value);
        prev = value;
        prev_delta = delta;
    }
    finish(bytes, pos, values)
}

/// Appends the XOR encoding of the float bit patterns in `values` to `out`.
pub fn encode_xor(values: &[u64], out: &mut Vec<u8>) {
    let mut prev = 0u64;
    for &value in values {
        let xor = value ^ prev;
        prev = value;
        if xor == 0 {
            out.push(0);
            continue;
        }
        let shift = xor.trailing_zeros() / 8;
        let len = 8 - shift - xor.leading_zeros() / 8;
        #[allow(clippy::cast_possible_truncation)] // both are at most 8
        out.push(((len as u8) << 4) | shift as u8);
        let significant = (xor >> (shift * 8)).to_le_bytes();
        out.extend_from_slice(&significant[..len as usize]);
    }
}

/// Decodes exactly `count` entries written by [`encode_xor`].
///
/// # Errors
///
/// Returns a [`CodecError`] if `bytes` is truncated, malformed or longer
/// than `count` entries.
pub fn decode_xor(bytes: &[u8], count: usize) -> Result<Vec<u64>, CodecError> {
    let mut values = Vec::with_capacity(count);
    let mut pos = 0;
    let mut prev = 0u64;
    while values.len() < count {
        let truncated = CodecError::Truncated {
            decoded: values.len(),
            expected: count,
        };
        let descriptor = *bytes.get(pos).ok_or(truncated)?;
        let len = usize::from(descriptor >> 4);
        let shift = usize::from(descriptor & 0x0f);
        if len + shift > 8 || (len == 0 && shift != 0) {
            return Err(CodecError::InvalidDescriptor {
                descriptor,
                offset: pos,
            });
        }
        pos += 1;

        let significant = bytes.get(pos..pos + len).ok_or(truncated)?;
        pos += len;
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(significant);
        let xor = u64::from_le_bytes(buf) << (shift * 8);

        prev ^= xor;
        values.push(prev);
    }
    finish(bytes, pos, values)
}

fn finish(bytes: &[u8], pos: usize, values: Vec<u64>) -> Result<Vec<u64>, CodecError> {
    if pos != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - pos));
    }
    Ok(values)
}

#[allow(clippy::cast_possible_wrap)] // bit-preserving reinterpretation
fn signed_bits(value: u64) -> i64 {
    value as i64
}

#[allow(clippy::cast_sign_loss)]
fn unsigned_bits(value: i64) -> u64 {
    value as u64
}

#[allow(clippy::cast_sign_loss)]
fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[allow(clippy::cast_possible_wrap)]
fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[allow(clippy::cast_possible_truncation)]
fn write_varint(mut n: u64, out: &mut Vec<u8>) {
    while n >= 0x80 {
        out.push((n as u8) | 0x80);
        n >>= 7;
    }
    out.push(n as u8);
}

/// Reads one varint at `pos`, advancing it. `None` on truncation or
/// overflow; `pos` is left at the offending byte.
fn read_varint(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos)?;
        // the tenth byte may only carry the top bit
        if shift == 63 && byte > 1 {
            return None;
        }
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
    }
}

fn truncated_or_overflow(bytes: &[u8], pos: usize, decoded: usize, expected: usize) -> CodecError {
    if pos < bytes.len() {
        CodecError::VarintOverflow { offset: pos }
    } else {
        CodecError::Truncated { decoded, expected }
    }
}
