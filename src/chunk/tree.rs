// Chunk tree: the ordered chunks covering one stream end-to-end.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// SHA-256 digest of a chunk's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 32]);

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight bytes are plenty to tell chunks apart in logs.
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// One content-defined chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub digest: Digest,
    pub start_offset: u64,
    pub length: u32,
}

impl Chunk {
    /// Offset one past the last byte of the chunk.
    #[inline]
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.length as u64
    }
}

/// Coverage violation between a chunk tree and the stream it claims to cover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlignmentError {
    #[error("chunk {index} starts at {actual}, expected {expected}")]
    Discontiguous {
        index: usize,
        expected: u64,
        actual: u64,
    },
    #[error("chunk {index} is empty")]
    EmptyChunk { index: usize },
    #[error("chunk tree covers {covered} bytes but the stream holds {stream_len}")]
    LengthMismatch { covered: u64, stream_len: u64 },
}

/// Ordered chunks of a single stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkTree {
    chunks: Vec<Chunk>,
}

impl ChunkTree {
    /// Wrap a chunk list produced elsewhere. Call [`verify`](Self::verify)
    /// before trusting it.
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes covered (sum of chunk lengths).
    pub fn covered_len(&self) -> u64 {
        self.chunks.iter().map(|c| c.length as u64).sum()
    }

    /// Check that chunks are contiguous, non-empty and cover exactly
    /// `stream_len` bytes starting at offset 0.
    pub fn verify(&self, stream_len: u64) -> Result<(), AlignmentError> {
        let mut expected = 0u64;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.start_offset != expected {
                return Err(AlignmentError::Discontiguous {
                    index,
                    expected,
                    actual: chunk.start_offset,
                });
            }
            if chunk.length == 0 {
                return Err(AlignmentError::EmptyChunk { index });
            }
            expected = chunk.end_offset();
        }
        if expected != stream_len {
            return Err(AlignmentError::LengthMismatch {
                covered: expected,
                stream_len,
            });
        }
        Ok(())
    }

    /// Chunk indices grouped by digest, each list ascending.
    pub fn digest_index(&self) -> HashMap<Digest, Vec<usize>> {
        let mut index: HashMap<Digest, Vec<usize>> = HashMap::with_capacity(self.chunks.len());
        for (i, chunk) in self.chunks.iter().enumerate() {
            index.entry(chunk.digest).or_default().push(i);
        }
        index
    }
}
