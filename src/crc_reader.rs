//! Helper module to compute a CRC32 checksum
//!
//! Adapted from zip-rs:
//! <https://github.com/mvdnes/zip-rs/commit/b3c836d9c32efa120cdd5366280f940d3c3b985c>

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Reader that computes the CRC32 and length of everything read through it.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    bytes_read: u64,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            bytes_read: 0,
        }
    }

    /// The checksum of the bytes read so far
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[0..count]);
        self.bytes_read += count as u64;
        Ok(count)
    }
}
