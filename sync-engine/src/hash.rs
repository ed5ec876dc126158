//! Content hashing (BLAKE3).

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use sync_types::ContentHash;

const PREFIX: &str = "blake3:";

/// Render a digest as `blake3:<hex>`.
pub fn content_hash(hash: &blake3::Hash) -> ContentHash {
    ContentHash::new(format!("{}{}", PREFIX, hex::encode(hash.as_bytes())))
}

/// Hash a file's bytes.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(content_hash(&hasher.finalize()))
}

/// Writer adapter that hashes everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the inner writer with the digest.
    pub fn finish(mut self) -> io::Result<(W, ContentHash)> {
        self.inner.flush()?;
        Ok((self.inner, content_hash(&self.hasher.finalize())))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
