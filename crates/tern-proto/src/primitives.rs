//! Low-level wire primitives shared by the payload codecs.
//!
//! The format uses two compound primitives beyond plain little-endian
//! integers: a length-prefixed, 4-aligned byte string, and an id vector
//! tagged with the generic vector constructor.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    ids::constructors,
};

/// Fail with [`ProtocolError::Truncated`] unless `buf` holds `needed` bytes.
pub(crate) fn ensure(buf: &impl Buf, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated { needed, remaining: buf.remaining() });
    }
    Ok(())
}

/// Read a length-prefixed byte string.
///
/// Short strings (< 254 bytes) carry a single length byte; longer ones an
/// `0xfe` marker followed by a 3-byte little-endian length. Both forms are
/// padded with zero bytes to the next 4-byte boundary, padding included in
/// what this function consumes.
pub fn read_bytes(buf: &mut impl Buf) -> Result<Bytes> {
    ensure(buf, 1)?;
    let first = buf.get_u8();

    let (len, consumed) = if first < 254 {
        (first as usize, 1)
    } else {
        ensure(buf, 3)?;
        let mut len = buf.get_u8() as usize;
        len |= (buf.get_u8() as usize) << 8;
        len |= (buf.get_u8() as usize) << 16;
        (len, 4)
    };

    ensure(buf, len)?;
    let data = buf.copy_to_bytes(len);

    let padding = (4 - (consumed + len) % 4) % 4;
    ensure(buf, padding)?;
    buf.advance(padding);

    Ok(data)
}

/// Write a length-prefixed byte string (inverse of [`read_bytes`]).
pub fn write_bytes(buf: &mut impl BufMut, data: &[u8]) {
    let consumed = if data.len() < 254 {
        buf.put_u8(data.len() as u8);
        1
    } else {
        buf.put_u8(0xfe);
        buf.put_u8((data.len() & 0xff) as u8);
        buf.put_u8(((data.len() >> 8) & 0xff) as u8);
        buf.put_u8(((data.len() >> 16) & 0xff) as u8);
        4
    };
    buf.put_slice(data);

    let padding = (4 - (consumed + data.len()) % 4) % 4;
    buf.put_bytes(0, padding);
}

/// Read a UTF-8 string stored as a byte string.
pub(crate) fn read_string(buf: &mut impl Buf) -> Result<String> {
    let bytes = read_bytes(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Read a `vector<long>`: the generic vector constructor, a count, then
/// `count` little-endian `i64` values.
pub fn read_i64_vector(buf: &mut impl Buf) -> Result<Vec<i64>> {
    ensure(buf, 8)?;
    let constructor = buf.get_u32_le();
    if constructor != constructors::VECTOR {
        return Err(ProtocolError::UnexpectedConstructor {
            expected: constructors::VECTOR,
            actual: constructor,
        });
    }

    let count = buf.get_i32_le();
    if count < 0 {
        return Err(ProtocolError::InvalidLength(count));
    }
    let count = count as usize;

    ensure(buf, count.saturating_mul(8))?;
    let mut out = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        out.push(buf.get_i64_le());
    }
    Ok(out)
}

/// Write a `vector<long>` (inverse of [`read_i64_vector`]).
pub fn write_i64_vector(buf: &mut impl BufMut, ids: &[i64]) {
    buf.put_u32_le(constructors::VECTOR);
    buf.put_i32_le(ids.len() as i32);
    for id in ids {
        buf.put_i64_le(*id);
    }
}
