//! Raw DEFLATE streams for per-message compression.
//!
//! A compressed message is the sync-flushed DEFLATE output with its trailing
//! `00 00 ff ff` removed; the receiving side appends it back before inflating.

use flate2::{
    Compress, CompressError, Compression, Decompress, DecompressError, FlushCompress,
    FlushDecompress, Status,
};
use thiserror::Error;

/// Empty stored block emitted by a sync flush.
const SYNC_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// The deflate backend cannot produce a 256-byte window.
pub(crate) const MIN_COMPRESS_WINDOW_BITS: u8 = 9;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("deflate failed: {0}")]
    Compress(#[from] CompressError),

    #[error("inflate failed: {0}")]
    Decompress(#[from] DecompressError),

    #[error("inflated message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("{0} bytes after the final deflate block")]
    TrailingData(usize),
}

/// Compressor that starts every message with an empty window.
pub struct Deflater {
    inner: Compress,
}

impl std::fmt::Debug for Deflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflater").finish_non_exhaustive()
    }
}

impl Deflater {
    pub fn new(level: u32, window_bits: u8) -> Self {
        let bits = window_bits.clamp(MIN_COMPRESS_WINDOW_BITS, super::MAX_WINDOW_BITS);
        Self {
            inner: Compress::new_with_window_bits(Compression::new(level), false, bits),
        }
    }

    /// Compress one whole message.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, CompressionError> {
        self.inner.reset();

        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let base = self.inner.total_in();
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            let consumed = (self.inner.total_in() - base) as usize;
            self.inner
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)?;

            let consumed = (self.inner.total_in() - base) as usize;
            // A sync flush is complete once all input is taken and the
            // output buffer was not filled.
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
        }

        if out.ends_with(&SYNC_TAIL) {
            out.truncate(out.len() - SYNC_TAIL.len());
        }
        Ok(out)
    }
}

/// Decompressor for one direction of a link.
pub struct Inflater {
    inner: Decompress,
    reset_per_message: bool,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("reset_per_message", &self.reset_per_message)
            .finish_non_exhaustive()
    }
}

impl Inflater {
    /// `reset_per_message` must be true when the sender does not keep its
    /// window across messages; otherwise the window is carried over.
    pub fn new(reset_per_message: bool) -> Self {
        Self {
            inner: Decompress::new(false),
            reset_per_message,
        }
    }

    /// Inflate one whole message, failing if it grows past `limit` bytes.
    ///
    /// A message may end with a final (BFINAL) block instead of a sync flush.
    /// The stream is then finished, so the window is dropped before the next
    /// message regardless of `reset_per_message`.
    pub fn decompress(&mut self, input: &[u8], limit: usize) -> Result<Vec<u8>, CompressionError> {
        if self.reset_per_message {
            self.inner.reset(false);
        }

        let mut out = Vec::with_capacity((input.len() * 2).clamp(64, limit.max(64)));
        let result = self.feed(input, &mut out, limit).and_then(|finished| {
            if finished {
                Ok(true)
            } else {
                self.feed(&SYNC_TAIL, &mut out, limit)
            }
        });

        match result {
            Ok(false) => Ok(out),
            Ok(true) => {
                self.inner.reset(false);
                Ok(out)
            }
            Err(e) => {
                // The window is unusable after a failed message.
                self.inner.reset(false);
                Err(e)
            }
        }
    }

    /// Returns whether the deflate stream reached its final block.
    fn feed(
        &mut self,
        mut data: &[u8],
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<bool, CompressionError> {
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().clamp(64, 64 * 1024));
            }

            let before = self.inner.total_in();
            let status = self
                .inner
                .decompress_vec(data, out, FlushDecompress::Sync)?;
            let used = (self.inner.total_in() - before) as usize;
            data = &data[used..];

            if out.len() > limit {
                return Err(CompressionError::TooLarge { limit });
            }

            let room_left = out.len() < out.capacity();
            match status {
                Status::StreamEnd if data.is_empty() => return Ok(true),
                Status::StreamEnd => return Err(CompressionError::TrailingData(data.len())),
                Status::BufError if room_left => return Ok(false),
                _ if data.is_empty() && room_left => return Ok(false),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn compressed_output_drops_sync_tail() {
        let mut deflater = Deflater::new(6, 15);
        let packed = deflater.compress(&sample(4096)).unwrap();
        assert!(!packed.ends_with(&SYNC_TAIL));
        assert!(packed.len() < 4096);
    }

    #[test]
    fn inflates_independent_messages() {
        let mut deflater = Deflater::new(6, 15);
        let mut inflater = Inflater::new(true);

        for len in [0, 1, 100, 70_000] {
            let payload = sample(len);
            let packed = deflater.compress(&payload).unwrap();
            let unpacked = inflater.decompress(&packed, usize::MAX).unwrap();
            assert_eq!(unpacked, payload, "length {len}");
        }
    }

    #[test]
    fn inflater_keeps_window_when_peer_does() {
        // Fresh-context output is also valid input for a stateful inflater.
        let mut deflater = Deflater::new(9, 10);
        let mut inflater = Inflater::new(false);
        for _ in 0..3 {
            let packed = deflater.compress(&sample(2000)).unwrap();
            assert_eq!(inflater.decompress(&packed, 1 << 20).unwrap(), sample(2000));
        }
    }

    #[test]
    fn inflate_limit_is_enforced() {
        let mut deflater = Deflater::new(6, 15);
        let packed = deflater.compress(&vec![0u8; 1 << 20]).unwrap();
        let mut inflater = Inflater::new(true);
        assert!(matches!(
            inflater.decompress(&packed, 1024),
            Err(CompressionError::TooLarge { limit: 1024 })
        ));
    }

    /// Compress `input` as a complete raw deflate stream ending in a final block.
    fn finished_stream(compress: &mut Compress, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + 128);
        compress.reset();
        compress
            .compress_vec(input, &mut out, FlushCompress::Finish)
            .unwrap();
        out
    }

    #[test]
    fn final_block_messages_keep_decoding_with_context_takeover() {
        let mut compress = Compress::new(Compression::default(), false);
        let mut inflater = Inflater::new(false);

        for i in 0..4 {
            let payload = sample(500 + i * 37);
            let packed = finished_stream(&mut compress, &payload);
            assert_eq!(
                inflater.decompress(&packed, 1 << 20).unwrap(),
                payload,
                "message {i}"
            );
        }
    }

    #[test]
    fn stateful_peer_then_final_block() {
        // Two sync-flushed messages sharing a window, then one that finishes
        // the stream, then a fresh stream.
        let mut compress = Compress::new(Compression::default(), false);
        let mut inflater = Inflater::new(false);

        for i in 0..2 {
            let payload = sample(300 + i);
            let mut packed = Vec::with_capacity(1024);
            compress
                .compress_vec(&payload, &mut packed, FlushCompress::Sync)
                .unwrap();
            assert!(packed.ends_with(&SYNC_TAIL));
            packed.truncate(packed.len() - SYNC_TAIL.len());
            assert_eq!(inflater.decompress(&packed, 1 << 20).unwrap(), payload);
        }

        let mut last = Vec::with_capacity(1024);
        compress
            .compress_vec(&sample(302), &mut last, FlushCompress::Finish)
            .unwrap();
        assert_eq!(inflater.decompress(&last, 1 << 20).unwrap(), sample(302));

        let fresh = finished_stream(&mut compress, b"after the end");
        assert_eq!(inflater.decompress(&fresh, 1 << 20).unwrap(), b"after the end");
    }

    #[test]
    fn bytes_after_final_block_are_rejected() {
        let mut compress = Compress::new(Compression::default(), false);
        let mut inflater = Inflater::new(false);

        let mut packed = finished_stream(&mut compress, b"hello");
        packed.extend_from_slice(&[0x01, 0x02, 0x03]);
        assert!(matches!(
            inflater.decompress(&packed, 1024),
            Err(CompressionError::TrailingData(3))
        ));

        // The next message starts from a clean stream.
        let next = finished_stream(&mut compress, b"next");
        assert_eq!(inflater.decompress(&next, 1024).unwrap(), b"next");
    }

    #[test]
    fn garbage_is_rejected() {
        let mut inflater = Inflater::new(true);
        assert!(inflater.decompress(&[0xff, 0xff, 0xff, 0xff], 1024).is_err());
    }
}
