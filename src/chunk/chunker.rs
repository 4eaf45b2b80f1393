// Content-defined chunker.
//
// Scans a stream once, rolling a window checksum over every byte.  A chunk
// ends where the boundary predicate fires (after `min_size`), or at
// `max_size`, or at end of stream.  Each chunk is digested with SHA-256 as
// its bytes go by, so the stream is never held in memory.

use std::io::{self, Read, Seek, SeekFrom};

use sha2::{Digest as _, Sha256};
use thiserror::Error;

use super::tree::{Chunk, ChunkTree, Digest};
use crate::hash::config::{ChunkerConfig, ConfigError};
use crate::hash::rolling::{self, RollingChecksum};

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("stream not readable: {0}")]
    Io(#[from] io::Error),
    #[error("invalid chunker configuration: {0}")]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Splits streams into a [`ChunkTree`].
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker after validating `config`.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Chunk a seekable stream from its first byte to EOF.
    ///
    /// The stream is rewound first; its position afterwards is at EOF.
    pub fn chunk<R: Read + Seek>(&self, stream: &mut R) -> Result<ChunkTree, ChunkError> {
        stream.seek(SeekFrom::Start(0))?;
        let mut builder = ChunkBuilder::new(&self.config);
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            builder.feed(&buf[..n]);
        }
        let tree = builder.finish();
        log::trace!(
            "chunked {} bytes into {} chunks ({})",
            tree.covered_len(),
            tree.len(),
            self.config.name
        );
        Ok(tree)
    }

    /// Chunk an in-memory buffer.
    pub fn chunk_slice(&self, data: &[u8]) -> ChunkTree {
        let mut builder = ChunkBuilder::new(&self.config);
        builder.feed(data);
        builder.finish()
    }
}

// ---------------------------------------------------------------------------
// Push-based chunk builder
// ---------------------------------------------------------------------------

/// Incremental chunking state. Bytes may be fed in arbitrarily sized pieces;
/// the resulting boundaries do not depend on how the input was split.
pub struct ChunkBuilder {
    min_size: usize,
    max_size: usize,
    target: u32,
    rolling: RollingChecksum,
    hasher: Sha256,
    chunk_start: u64,
    chunk_len: usize,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder {
    pub fn new(config: &ChunkerConfig) -> Self {
        Self {
            min_size: config.min_size,
            max_size: config.max_size,
            target: config.target_size.min(u32::MAX as usize) as u32,
            rolling: RollingChecksum::new(config.window),
            hasher: Sha256::new(),
            chunk_start: 0,
            chunk_len: 0,
            chunks: Vec::new(),
        }
    }

    /// Feed the next piece of the stream.
    pub fn feed(&mut self, data: &[u8]) {
        let mut seg_start = 0;
        for (i, &byte) in data.iter().enumerate() {
            self.rolling.roll(byte);
            self.chunk_len += 1;
            let cut = self.chunk_len >= self.max_size
                || (self.chunk_len >= self.min_size
                    && rolling::is_boundary(self.rolling.value(), self.target));
            if cut {
                self.hasher.update(&data[seg_start..=i]);
                seg_start = i + 1;
                self.cut();
            }
        }
        self.hasher.update(&data[seg_start..]);
    }

    /// Close the trailing partial chunk and return the tree.
    pub fn finish(mut self) -> ChunkTree {
        if self.chunk_len > 0 {
            self.cut();
        }
        ChunkTree::from_chunks(self.chunks)
    }

    fn cut(&mut self) {
        let digest: [u8; 32] = std::mem::take(&mut self.hasher).finalize().into();
        self.chunks.push(Chunk {
            digest: Digest(digest),
            start_offset: self.chunk_start,
            length: self.chunk_len as u32,
        });
        self.chunk_start += self.chunk_len as u64;
        self.chunk_len = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
