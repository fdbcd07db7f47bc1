//! Pass-through schema for simulation.

use bytes::Bytes;
use tern_core::{Schema, SchemaError};

/// Constructor id the harness treats as update-shaped.
pub const UPDATE_MARKER: u32 = 0x9f8e_0001;

/// Schema that echoes result bodies and recognizes [`UPDATE_MARKER`]
/// bodies as updates.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoSchema;

impl Schema for EchoSchema {
    fn is_update(&self, body: &[u8]) -> bool {
        body.len() >= 4
            && u32::from_le_bytes([body[0], body[1], body[2], body[3]]) == UPDATE_MARKER
    }

    fn decode_result(&self, _request: &[u8], result: &[u8]) -> Result<Bytes, SchemaError> {
        Ok(Bytes::copy_from_slice(result))
    }
}
