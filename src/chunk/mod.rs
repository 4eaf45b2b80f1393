// Content-defined chunking.
//
// - Stream splitting with a rolling checksum (`chunker`)
// - Chunk records and the end-to-end coverage invariant (`tree`)

pub mod chunker;
pub mod tree;

pub use chunker::{ChunkBuilder, ChunkError, Chunker};
pub use tree::{AlignmentError, Chunk, ChunkTree, Digest};
