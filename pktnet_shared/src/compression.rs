//! Deflate framing for compressed packet bodies.
//!
//! A compressed body is written as `[u32 BE length][deflate bytes]` right
//! after the type header.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{NetError, NetResult};
use crate::wire::{WireReader, WireWriter};

/// Refuse to inflate bodies beyond this size.
pub const MAX_INFLATED_LEN: u64 = 16 * 1024 * 1024;

pub fn deflate(body: &[u8]) -> NetResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(body.len() / 2 + 16), Compression::default());
    encoder.write_all(body).map_err(NetError::Compression)?;
    encoder.finish().map_err(NetError::Compression)
}

pub fn inflate(compressed: &[u8]) -> NetResult<Vec<u8>> {
    let mut out = Vec::with_capacity(compressed.len() * 2);
    DeflateDecoder::new(compressed)
        .take(MAX_INFLATED_LEN)
        .read_to_end(&mut out)
        .map_err(NetError::Compression)?;
    Ok(out)
}

/// Writes `body` as a length-framed deflate block.
pub fn write_framed(w: &mut WireWriter, body: &[u8]) -> NetResult<()> {
    let compressed = deflate(body)?;
    let len = u32::try_from(compressed.len()).map_err(|_| NetError::TooLong {
        what: "compressed body",
        len: compressed.len(),
    })?;
    w.put_u32(len);
    w.put_slice(&compressed);
    Ok(())
}

/// Reads a length-framed deflate block and returns the inflated body.
pub fn read_framed(r: &mut WireReader<'_>) -> NetResult<Vec<u8>> {
    let len = r.get_u32()? as usize;
    let compressed = r.take(len)?;
    inflate(compressed)
}
