//! Streaming compression for response bodies: raw-deflate for
//! `compressed_stream` bodies and gzip framing for `gzip_file` bodies.
//!
//! `flate2`'s `read::DeflateEncoder` and `read::GzEncoder` implement the
//! chunked, interleaved-I/O state machine this needs behind a plain `Read`
//! adapter, so this module is a thin wrapper that adds the one thing they
//! don't: enforcing an optional `max_size` on the uncompressed input and
//! reporting how many input bytes were read.

use crate::error::{Error, Result};
use flate2::read::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::{self, Read};

/// Caps how many bytes are read from the inner source before treating it
/// as exhausted. Zero means unbounded.
pub struct BoundedReader<R> {
    inner: R,
    read_so_far: u64,
    max_size: u64,
}

impl<R: Read> BoundedReader<R> {
    pub fn new(inner: R, max_size: u64) -> Self {
        Self {
            inner,
            read_so_far: 0,
            max_size,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read_so_far
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.max_size > 0 && self.read_so_far >= self.max_size {
            return Ok(0);
        }
        let cap = if self.max_size > 0 {
            let remaining = self.max_size - self.read_so_far;
            buf.len().min(remaining as usize)
        } else {
            buf.len()
        };
        let n = self.inner.read(&mut buf[..cap])?;
        self.read_so_far += n as u64;
        Ok(n)
    }
}

/// Wraps any byte source in raw-deflate compression (no zlib wrapper, since
/// the response itself advertises `Content-Encoding: deflate`), used for
/// `Response::compressed_stream` bodies.
pub fn deflate_reader<R: Read + 'static>(
    source: R,
    max_size: u64,
    level: u32,
) -> impl Read {
    DeflateEncoder::new(
        BoundedReader::new(source, max_size),
        Compression::new(level),
    )
}

/// Wraps a file (or any byte source) in gzip framing, used for
/// `Response::gzip_file` bodies.
pub fn gzip_reader<R: Read + 'static>(source: R, max_size: u64, level: u32) -> impl Read {
    GzEncoder::new(BoundedReader::new(source, max_size), Compression::new(level))
}

/// Default compression level used by the one-argument
/// `zsendstream`/`zsendfile`/`zsendbinary` convenience calls.
pub const DEFAULT_LEVEL: u32 = 1;

/// One-shot buffer compression for `Response::zsend_binary`: compress, and
/// if the result isn't smaller than the input, fall back to sending the
/// input uncompressed.
pub fn zcompress_buffer(buf: &[u8], level: u32) -> Result<CompressedBuffer> {
    if buf.is_empty() {
        return Ok(CompressedBuffer {
            bytes: Vec::new(),
            compressed: false,
        });
    }
    let mut encoder = DeflateEncoder::new(buf, Compression::new(level));
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| Error::CompressionError(e.raw_os_error().unwrap_or(-1)))?;
    if out.len() >= buf.len() {
        Ok(CompressedBuffer {
            bytes: buf.to_vec(),
            compressed: false,
        })
    } else {
        Ok(CompressedBuffer {
            bytes: out,
            compressed: true,
        })
    }
}

pub struct CompressedBuffer {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}
