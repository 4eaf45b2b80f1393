// Patch engine: ties chunking and generation to execution.
//
// Provides the in-memory APIs most callers want:
//   - `diff` chunks both versions and generates a script
//   - `apply` runs a script against a byte buffer
//   - `PatchBuilder` assembles one script spanning several files

use std::io::Cursor;

use thiserror::Error;

use crate::chunk::{ChunkError, ChunkTree, Chunker};
use crate::exec::{self, ExecError, MemoryStorage, REPLAY_PATH};
use crate::hash::config::{self, ChunkerConfig};
use crate::patch::generator::{self, GenerateError};
use crate::patch::instruction::Instruction;
use crate::patch::pipeline;

// ---------------------------------------------------------------------------
// Diff options
// ---------------------------------------------------------------------------

/// Configuration for script generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Chunk size profile used for both versions.
    pub chunker: ChunkerConfig,
    /// Whether to run the coalescing pass over generated scripts.
    pub coalesce: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            chunker: config::DEFAULT,
            coalesce: true,
        }
    }
}

impl DiffOptions {
    /// Options using the profile for `level` (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            chunker: config::config_for_level(level),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("chunking failed: {0}")]
    Chunk(#[from] ChunkError),
    #[error("generation failed: {0}")]
    Generate(#[from] GenerateError),
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Generate the script turning `old` into `new`.
///
/// `target` is the path the script edits; `None` leaves it to the caller's
/// default context (see [`exec::execute`]).
pub fn diff(
    old: &[u8],
    new: &[u8],
    target: Option<&str>,
    opts: &DiffOptions,
) -> Result<Vec<Instruction>, DiffError> {
    let chunker = Chunker::new(opts.chunker)?;
    let (old_tree, new_tree) = chunk_pair(&chunker, old, new);
    log::debug!(
        "chunked {} -> {} bytes into {} / {} chunks ({} profile)",
        old.len(),
        new.len(),
        old_tree.len(),
        new_tree.len(),
        opts.chunker.name
    );

    let mut old_stream = Cursor::new(old);
    let mut new_stream = Cursor::new(new);
    let script = if opts.coalesce {
        generator::generate_instructions(&old_tree, &new_tree, &mut old_stream, &mut new_stream, target)?
    } else {
        generator::generate_uncoalesced(&old_tree, &new_tree, &mut old_stream, &mut new_stream, target)?
    };
    Ok(script)
}

#[cfg(feature = "parallel")]
fn chunk_pair(chunker: &Chunker, old: &[u8], new: &[u8]) -> (ChunkTree, ChunkTree) {
    rayon::join(|| chunker.chunk_slice(old), || chunker.chunk_slice(new))
}

#[cfg(not(feature = "parallel"))]
fn chunk_pair(chunker: &Chunker, old: &[u8], new: &[u8]) -> (ChunkTree, ChunkTree) {
    (chunker.chunk_slice(old), chunker.chunk_slice(new))
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Apply `list` to `buffer` in place, treating the buffer as the default
/// file.
///
/// On error, instructions before the failing one remain applied to
/// `buffer`. A script that deletes the default file leaves it empty.
pub fn apply(list: &[Instruction], buffer: &mut Vec<u8>) -> Result<(), ExecError> {
    let mut storage = MemoryStorage::new();
    storage.insert(REPLAY_PATH, std::mem::take(buffer))?;
    let result = exec::execute(list, &mut storage, Some(REPLAY_PATH));
    *buffer = storage.take(REPLAY_PATH).unwrap_or_default();
    result
}

// ---------------------------------------------------------------------------
// Multi-file scripts
// ---------------------------------------------------------------------------

/// Builds one script covering edits to several files.
///
/// ```
/// use chunkpatch::engine::{DiffOptions, PatchBuilder};
///
/// let mut builder = PatchBuilder::new(DiffOptions::default());
/// builder.modify_file("a.txt", b"old text", b"new text").unwrap();
/// builder.create_file("b.txt", b"brand new");
/// builder.remove_file("c.txt");
/// let script = builder.finish();
/// assert!(!script.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    opts: DiffOptions,
    script: Vec<Instruction>,
}

impl PatchBuilder {
    pub fn new(opts: DiffOptions) -> Self {
        Self {
            opts,
            script: Vec::new(),
        }
    }

    /// Append edits turning `old` into `new` at `path`. Adds nothing when
    /// the versions are identical.
    pub fn modify_file(&mut self, path: &str, old: &[u8], new: &[u8]) -> Result<&mut Self, DiffError> {
        let edits = diff(old, new, Some(path), &self.opts)?;
        self.script.extend(edits);
        Ok(self)
    }

    /// Append the creation of `path` with `contents`. The file must not
    /// exist when the script runs.
    pub fn create_file(&mut self, path: &str, contents: &[u8]) -> &mut Self {
        self.script.push(Instruction::SetFile {
            path: path.to_string(),
        });
        if !contents.is_empty() {
            self.script.push(Instruction::Insert {
                offset: 0,
                payload: contents.to_vec(),
            });
        }
        self
    }

    /// Append the removal of `path`.
    pub fn remove_file(&mut self, path: &str) -> &mut Self {
        self.script.extend(generator::removal_script(path));
        self
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    pub fn finish(self) -> Vec<Instruction> {
        if self.opts.coalesce {
            pipeline::coalesce(self.script)
        } else {
            self.script
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
