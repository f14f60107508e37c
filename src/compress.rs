//! Gzip helpers and the reusable buffer pools backing request assembly.

use std::io::{self, Read, Write};
use std::sync::Mutex;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzips `data` into `out`, reusing `out`'s allocation.
pub(crate) fn compress_into(data: &[u8], out: Vec<u8>, level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(out, level);
    encoder.write_all(data)?;
    encoder.finish()
}

/// Un-gzips the given input. Used by the audit log path and by tests to
/// check request bodies byte-for-byte.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// A pool of byte buffers shared by concurrent request builds. Buffers are
/// cleared on check-out so they carry no state between borrowers; the pool
/// only preserves their allocations.
#[derive(Debug, Default)]
pub(crate) struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn checkout(&self) -> Vec<u8> {
        let mut buf = self
            .buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default();
        buf.clear();
        buf
    }

    pub(crate) fn restore(&self, buf: Vec<u8>) {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let data = b"some telemetry payload that should survive the roundtrip";
        let compressed = compress_into(data, Vec::new(), Compression::default()).unwrap();
        assert_ne!(&compressed[..], &data[..]);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_compress_reuses_allocation() {
        let scratch = Vec::with_capacity(4096);
        let compressed = compress_into(b"x", scratch, Compression::default()).unwrap();
        assert!(compressed.capacity() >= 4096);
    }

    #[test]
    fn test_pool_clears_on_checkout() {
        let pool = BufferPool::new();
        let mut buf = pool.checkout();
        buf.extend_from_slice(b"stale");
        pool.restore(buf);
        let buf = pool.checkout();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pool_concurrent_checkout() {
        let pool = std::sync::Arc::new(BufferPool::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.checkout();
                        buf.push(1);
                        pool.restore(buf);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
