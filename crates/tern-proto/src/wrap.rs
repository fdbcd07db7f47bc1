//! Body wrappers: gzip compression and the dependency prefix.
//!
//! Compression is a transparent wrapper: a body may arrive gzip-packed and
//! must be unwrapped before classification. Outgoing bodies are compressed
//! only when it actually pays (see [`gzip_if_smaller`]).

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::{
    errors::{ProtocolError, Result},
    ids::constructors,
    primitives::{read_bytes, write_bytes},
};

/// Bodies at or below this size are never compressed; the wrapper overhead
/// outweighs any plausible gain.
pub const COMPRESS_MIN: usize = 512;

/// Wrap `body` in a gzip-packed constructor.
///
/// # Errors
///
/// Returns [`ProtocolError::Compression`] if the deflate stream fails,
/// which for an in-memory sink means an internal zlib error.
pub fn gzip_pack(body: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(body)
        .and_then(|()| encoder.finish())
        .map_err(|e| ProtocolError::Compression(e.to_string()))
        .map(|packed| {
            let mut out = Vec::with_capacity(packed.len() + 8);
            out.put_u32_le(constructors::GZIP_PACKED);
            write_bytes(&mut out, &packed);
            Bytes::from(out)
        })
}

/// Unwrap a gzip-packed body (constructor id already consumed).
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] on a malformed byte string and
/// [`ProtocolError::Compression`] if the payload does not inflate.
pub fn gzip_unpack(buf: &mut impl Buf) -> Result<Bytes> {
    let packed = read_bytes(buf)?;
    let mut out = Vec::new();
    GzDecoder::new(&packed[..])
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// Compress a content-related body when it is large enough to bother and
/// compression strictly shrinks it; otherwise return the body unchanged.
#[must_use]
pub fn gzip_if_smaller(content_related: bool, body: Bytes) -> Bytes {
    if !content_related || body.len() <= COMPRESS_MIN {
        return body;
    }
    match gzip_pack(&body) {
        Ok(packed) if packed.len() < body.len() => packed,
        _ => body,
    }
}

/// Prefix `query` with the dependency wrapper so the server executes it
/// only after the message identified by `after_msg_id` has completed.
#[must_use]
pub fn invoke_after(after_msg_id: i64, query: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(12 + query.len());
    out.put_u32_le(constructors::INVOKE_AFTER);
    out.put_i64_le(after_msg_id);
    out.put_slice(query);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MessageKind;

    #[test]
    fn pack_unpack_round_trip() {
        let body: Vec<u8> = (0..2048u32).flat_map(|i| (i % 7).to_le_bytes()).collect();
        let packed = gzip_pack(&body).expect("should pack");
        assert_eq!(MessageKind::of_body(&packed).unwrap(), MessageKind::GzipPacked);

        let mut buf = &packed[4..];
        let unpacked = gzip_unpack(&mut buf).expect("should unpack");
        assert_eq!(&unpacked[..], &body[..]);
    }

    #[test]
    fn small_body_left_alone() {
        let body = Bytes::from_static(&[1, 2, 3, 4]);
        assert_eq!(gzip_if_smaller(true, body.clone()), body);
    }

    #[test]
    fn incompressible_body_left_alone() {
        // Random-ish bytes don't shrink under gzip
        let body: Bytes = (0..1024u32)
            .flat_map(|i| i.wrapping_mul(2_654_435_761).to_le_bytes())
            .collect::<Vec<u8>>()
            .into();
        assert_eq!(gzip_if_smaller(true, body.clone()), body);
    }

    #[test]
    fn repetitive_body_compressed() {
        let body = Bytes::from(vec![0x20u8; 4096]);
        let out = gzip_if_smaller(true, body.clone());
        assert!(out.len() < body.len());
        assert_eq!(MessageKind::of_body(&out).unwrap(), MessageKind::GzipPacked);
    }

    #[test]
    fn non_content_never_compressed() {
        let body = Bytes::from(vec![0u8; 4096]);
        assert_eq!(gzip_if_smaller(false, body.clone()), body);
    }

    #[test]
    fn invoke_after_prefix() {
        let wrapped = invoke_after(0x42, &[9, 9, 9, 9]);
        let mut buf = &wrapped[..];
        assert_eq!(buf.get_u32_le(), constructors::INVOKE_AFTER);
        assert_eq!(buf.get_i64_le(), 0x42);
        assert_eq!(buf, [9u8, 9, 9, 9]);
    }

    #[test]
    fn unpack_garbage_rejected() {
        let mut garbage = Vec::new();
        write_bytes(&mut garbage, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = garbage.as_slice();
        assert!(matches!(gzip_unpack(&mut buf), Err(ProtocolError::Compression(_))));
    }
}
